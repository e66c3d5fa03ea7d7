//! # Panic 恢复
//!
//! ## 核心意图（Why）
//! - 后台任务（连接销毁、配置监听、指标刷新）一旦 panic，不应拖垮整个进程或被静默吞掉；
//! - 恢复时的处理动作（错误日志、计数器、回调）由调用方按需组合。
//!
//! ## 行为契约（What）
//! - 三个动作互相独立，未配置任何动作时 panic 仅被吸收；
//! - 动作执行顺序固定：计数器 → 错误日志 → 回调。

use std::{any::Any, fmt, panic::AssertUnwindSafe, sync::Arc};

use spark_kit_metrics::MetricsSink;

/// 一次被吸收的 panic。
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PanicReport {
    /// 任务标签，由调用方在派生任务时给出。
    pub label: String,
    /// panic 负载的文本形式；非字符串负载记为 `"<non-string panic payload>"`。
    pub message: String,
}

/// panic 回调。
pub type PanicCallback = Arc<dyn Fn(&PanicReport) + Send + Sync>;

/// 恢复动作组合。
///
/// # 教案式说明
/// - **契约（What）**：以构建器方式追加动作，`Clone` 后可被多个任务共享；
/// - **风险（Trade-offs）**：回调在 panic 所在任务中同步执行，回调内再次 panic 将不再被捕获。
#[derive(Clone, Default)]
pub struct RecoveryOptions {
    error_log: bool,
    metrics: Option<(Arc<dyn MetricsSink>, String)>,
    callback: Option<PanicCallback>,
}

impl fmt::Debug for RecoveryOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RecoveryOptions")
            .field("error_log", &self.error_log)
            .field("metrics_key", &self.metrics.as_ref().map(|(_, key)| key))
            .field("has_callback", &self.callback.is_some())
            .finish()
    }
}

impl RecoveryOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// panic 时输出一条 error 级别日志。
    pub fn with_error_log(mut self) -> Self {
        self.error_log = true;
        self
    }

    /// panic 时对 `key` 计数加一。
    pub fn with_metrics(mut self, sink: Arc<dyn MetricsSink>, key: impl Into<String>) -> Self {
        self.metrics = Some((sink, key.into()));
        self
    }

    /// panic 时执行回调。
    pub fn with_callback<F>(mut self, callback: F) -> Self
    where
        F: Fn(&PanicReport) + Send + Sync + 'static,
    {
        self.callback = Some(Arc::new(callback));
        self
    }

    pub(crate) fn recover(&self, label: &str, payload: &(dyn Any + Send)) -> PanicReport {
        let report = PanicReport {
            label: label.to_owned(),
            message: panic_message(payload),
        };
        if let Some((sink, key)) = &self.metrics {
            sink.incr_counter(key, 1.0);
        }
        if self.error_log {
            tracing::error!(task = %report.label, panic = %report.message, "panic caught");
        }
        if let Some(callback) = &self.callback {
            callback(&report);
        }
        report
    }
}

/// 提取 panic 负载的文本。
pub fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&'static str>() {
        (*message).to_owned()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "<non-string panic payload>".to_owned()
    }
}

/// 执行同步闭包并吸收其中的 panic。
///
/// 正常返回时为 `Some(value)`；发生 panic 时按 `opts` 执行恢复动作并返回 `None`。
pub fn catch_panic<T>(opts: &RecoveryOptions, label: &str, f: impl FnOnce() -> T) -> Option<T> {
    match std::panic::catch_unwind(AssertUnwindSafe(f)) {
        Ok(value) => Some(value),
        Err(payload) => {
            opts.recover(label, payload.as_ref());
            None
        }
    }
}
