//! spark-kit-log: 进程级 tracing 订阅器的安装与运行期级别切换。
//!
//! # 教案式概览
//! - **意图（Why）**：线上排障时需要临时调高日志级别，又不希望重启进程；
//!   本 crate 把 `fmt` 输出层与可热替换的 `EnvFilter` 组装在一起，并返回一个可克隆的控制句柄；
//! - **契约（What）**：
//!   - 级别字符串大小写不敏感并忽略首尾空白：`debug`、`info`、`warn`/`warning`、`error`，
//!     `fatal` 视同 `error`；无法识别的字符串被拒绝，当前级别保持不变；
//!   - [`install`] 在一个进程内只能成功一次；
//! - **实现（How）**：`tracing_subscriber::reload` 包裹 `EnvFilter`，切换级别时整体重建过滤器，
//!   附加的按 target 指令（如 `h2=warn`）在重建时一并保留；
//! - **风险（Trade-offs）**：重建过滤器会刷新全局的 callsite 兴趣缓存，不适合高频调用。

#![deny(unsafe_code)]

use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};

use parking_lot::Mutex;
use serde::Deserialize;
use thiserror::Error;
use tracing::Subscriber;
use tracing_subscriber::{
    EnvFilter, Registry,
    filter::{Directive, LevelFilter, ParseError},
    fmt,
    layer::SubscriberExt,
    reload,
};

static INSTALLED: AtomicBool = AtomicBool::new(false);

/// 日志输出配置。
#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct LogSettings {
    /// 全局级别，默认 `info`。
    pub level: String,
    /// 是否输出 ANSI 颜色。
    pub ansi: bool,
    /// 是否输出事件的 target。
    pub with_target: bool,
    /// 额外的过滤指令，语法同 `RUST_LOG`。
    pub directives: Vec<String>,
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            level: "info".to_owned(),
            ansi: true,
            with_target: true,
            directives: Vec::new(),
        }
    }
}

#[derive(Debug, Error)]
pub enum LogError {
    #[error("a subscriber has already been installed by spark-kit-log")]
    AlreadyInstalled,
    #[error("unknown log level '{0}'")]
    UnknownLevel(String),
    #[error("invalid filter directive '{directive}'")]
    Directive {
        directive: String,
        #[source]
        source: ParseError,
    },
    #[error("reload log filter failed")]
    Reload(#[source] reload::Error),
    #[error("set global subscriber failed")]
    SetGlobal(#[source] tracing::subscriber::SetGlobalDefaultError),
}

/// 解析级别字符串。
pub fn parse_level(raw: &str) -> Option<LevelFilter> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "debug" => Some(LevelFilter::DEBUG),
        "info" => Some(LevelFilter::INFO),
        "warn" | "warning" => Some(LevelFilter::WARN),
        "error" | "fatal" => Some(LevelFilter::ERROR),
        _ => None,
    }
}

/// 运行期日志级别控制句柄。
#[derive(Clone)]
pub struct LogHandle {
    reload: reload::Handle<EnvFilter, Registry>,
    directives: Arc<[Directive]>,
    level: Arc<Mutex<LevelFilter>>,
}

impl std::fmt::Debug for LogHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LogHandle")
            .field("level", &self.level())
            .field("directives", &self.directives)
            .finish()
    }
}

impl LogHandle {
    /// 当前全局级别。
    pub fn level(&self) -> LevelFilter {
        *self.level.lock()
    }

    /// 切换全局级别，返回切换后的级别。
    pub fn set_level(&self, raw: &str) -> Result<LevelFilter, LogError> {
        let level = parse_level(raw).ok_or_else(|| LogError::UnknownLevel(raw.to_owned()))?;
        let mut current = self.level.lock();
        self.reload
            .reload(compose_filter(level, &self.directives))
            .map_err(LogError::Reload)?;
        let previous = std::mem::replace(&mut *current, level);
        if previous != level {
            tracing::info!(from = %previous, to = %level, "log level changed");
        }
        Ok(level)
    }
}

/// 组装订阅器但不安装，供测试或需要自行管理全局状态的调用方使用。
pub fn build(
    settings: &LogSettings,
) -> Result<(impl Subscriber + Send + Sync + 'static, LogHandle), LogError> {
    let level = parse_level(&settings.level)
        .ok_or_else(|| LogError::UnknownLevel(settings.level.clone()))?;
    let directives = settings
        .directives
        .iter()
        .map(|raw| {
            raw.parse::<Directive>().map_err(|source| LogError::Directive {
                directive: raw.clone(),
                source,
            })
        })
        .collect::<Result<Vec<_>, _>>()?;

    let (filter, reload) = reload::Layer::new(compose_filter(level, &directives));
    let subscriber = tracing_subscriber::registry().with(filter).with(
        fmt::layer()
            .with_ansi(settings.ansi)
            .with_target(settings.with_target),
    );
    let handle = LogHandle {
        reload,
        directives: directives.into(),
        level: Arc::new(Mutex::new(level)),
    };
    Ok((subscriber, handle))
}

/// 安装为进程全局订阅器。
pub fn install(settings: &LogSettings) -> Result<LogHandle, LogError> {
    let (subscriber, handle) = build(settings)?;
    if INSTALLED.swap(true, Ordering::SeqCst) {
        return Err(LogError::AlreadyInstalled);
    }
    if let Err(err) = tracing::subscriber::set_global_default(subscriber) {
        INSTALLED.store(false, Ordering::SeqCst);
        return Err(LogError::SetGlobal(err));
    }
    Ok(handle)
}

fn compose_filter(level: LevelFilter, directives: &[Directive]) -> EnvFilter {
    directives
        .iter()
        .cloned()
        .fold(EnvFilter::default().add_directive(level.into()), EnvFilter::add_directive)
}
