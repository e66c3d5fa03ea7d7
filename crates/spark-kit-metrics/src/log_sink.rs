//! # LogMetricsSink：按周期聚合并写日志的指标上报器
//!
//! ## 核心意图（Why）
//! - 在没有接入专用指标后端的环境里，仍然希望看到“每分钟各计数器的 min/max/sum/avg/count”；
//! - 打点发生在请求路径上，必须非阻塞，聚合与输出交给单独的后台任务。
//!
//! ## 行为契约（What）
//! - `incr_counter`/`set_gauge` 通过 `try_send` 投递样本；队列满时丢弃样本并累加 [`LogMetricsSink::dropped`]；
//! - 名称以 [`OWN_LOG_METRICS_PREFIX`] 开头的样本（日志组件自身的指标）始终忽略，
//!   命中 `ignored_prefixes` 的样本同样直接忽略；
//! - 后台任务每个周期输出一行/指标：`metrics | <server> | <name> | min .., max .., sum .., avg .., count ..`，
//!   输出后清空聚合状态；
//! - 所有发送端被丢弃后，任务输出最后一批数据并退出。
//!
//! ## 风险提示（Trade-offs）
//! - 对齐整分钟依赖墙上时钟，系统时间跳变会导致首个周期偏长或偏短，之后的周期使用单调时钟。

use std::{
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::{Duration, SystemTime, UNIX_EPOCH},
};

use serde::Deserialize;
use tokio::{
    sync::mpsc,
    task::JoinHandle,
    time::{self, Instant, MissedTickBehavior},
};

use crate::{
    sink::MetricsSink,
    stat::{MetricsAggregator, Statistic},
};

/// 报表输出使用的日志级别。
///
/// 解析时忽略大小写与首尾空白，`warning` 视同 `warn`；无法识别的字符串回落为 `info`。
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(from = "String")]
pub enum ReportLevel {
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl ReportLevel {
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "debug" => ReportLevel::Debug,
            "warn" | "warning" => ReportLevel::Warn,
            "error" => ReportLevel::Error,
            _ => ReportLevel::Info,
        }
    }
}

impl From<String> for ReportLevel {
    fn from(value: String) -> Self {
        ReportLevel::parse(&value)
    }
}

/// 日志组件自身指标的名称前缀，上报器始终跳过。
pub const OWN_LOG_METRICS_PREFIX: &str = "spark.kit.Log";

/// 日志上报器配置。
///
/// # 教案式说明
/// - **意图（Why）**：与其它插件配置一样从 TOML 解码，缺省值即可直接使用；
/// - **契约（What）**：
///   - `server`（别名 `name`）：报表中的服务名，默认取当前可执行文件名；
///   - `level`：报表日志级别，默认 `info`；
///   - `flush_interval_secs`：聚合周期，默认 60 秒，最小按 1 秒处理；
///   - `align_to_minute`：首个周期是否对齐到下一个整分钟，默认开启；
///   - `queue_capacity`：样本队列容量，默认 1024；
///   - `ignored_prefixes`：额外需要忽略的指标名前缀，[`OWN_LOG_METRICS_PREFIX`] 无需列出。
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct LogSinkSettings {
    #[serde(alias = "name")]
    pub server: String,
    pub level: ReportLevel,
    pub flush_interval_secs: u64,
    pub align_to_minute: bool,
    pub queue_capacity: usize,
    pub ignored_prefixes: Vec<String>,
}

impl Default for LogSinkSettings {
    fn default() -> Self {
        Self {
            server: program_name(),
            level: ReportLevel::Info,
            flush_interval_secs: 60,
            align_to_minute: true,
            queue_capacity: 1024,
            ignored_prefixes: Vec::new(),
        }
    }
}

impl LogSinkSettings {
    pub fn flush_interval(&self) -> Duration {
        Duration::from_secs(self.flush_interval_secs.max(1))
    }
}

fn program_name() -> String {
    std::env::args()
        .next()
        .map(|arg0| {
            std::path::Path::new(&arg0)
                .file_name()
                .map(|name| name.to_string_lossy().into_owned())
                .unwrap_or(arg0)
        })
        .unwrap_or_default()
}

/// 报表行的落地方式，默认实现写入 `tracing`。
pub trait ReportWriter: Send + Sync + 'static {
    fn write(&self, level: ReportLevel, line: &str);
}

/// 通过 `tracing` 宏输出报表行。
#[derive(Clone, Copy, Debug, Default)]
pub struct TracingReportWriter;

impl ReportWriter for TracingReportWriter {
    fn write(&self, level: ReportLevel, line: &str) {
        match level {
            ReportLevel::Debug => tracing::debug!("{line}"),
            ReportLevel::Info => tracing::info!("{line}"),
            ReportLevel::Warn => tracing::warn!("{line}"),
            ReportLevel::Error => tracing::error!("{line}"),
        }
    }
}

#[derive(Debug)]
struct Sample {
    name: String,
    value: f64,
}

/// 聚合后写日志的指标上报器，克隆后共享同一个后台任务。
#[derive(Clone)]
pub struct LogMetricsSink {
    tx: mpsc::Sender<Sample>,
    ignored: Arc<[String]>,
    dropped: Arc<AtomicU64>,
}

impl LogMetricsSink {
    /// 启动后台聚合任务，报表写入 `tracing`。必须在 Tokio 运行时内调用。
    pub fn spawn(settings: LogSinkSettings) -> (Self, JoinHandle<()>) {
        Self::spawn_with_writer(settings, Arc::new(TracingReportWriter))
    }

    /// 启动后台聚合任务，报表交给自定义的 [`ReportWriter`]。
    pub fn spawn_with_writer(
        settings: LogSinkSettings,
        writer: Arc<dyn ReportWriter>,
    ) -> (Self, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(settings.queue_capacity.max(1));
        let sink = Self {
            tx,
            ignored: std::iter::once(OWN_LOG_METRICS_PREFIX.to_owned())
                .chain(settings.ignored_prefixes.iter().cloned())
                .collect(),
            dropped: Arc::new(AtomicU64::new(0)),
        };
        let handle = tokio::spawn(run(rx, settings, writer));
        (sink, handle)
    }

    /// 因队列已满或任务已退出而被丢弃的样本数。
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    fn enqueue(&self, key: &str, value: f64) {
        if self.ignored.iter().any(|prefix| key.starts_with(prefix.as_str())) {
            return;
        }
        let sample = Sample {
            name: key.to_owned(),
            value,
        };
        if self.tx.try_send(sample).is_err() {
            self.dropped.fetch_add(1, Ordering::Relaxed);
        }
    }
}

impl MetricsSink for LogMetricsSink {
    fn incr_counter(&self, key: &str, value: f64) {
        self.enqueue(key, value);
    }

    fn set_gauge(&self, key: &str, value: f64) {
        self.enqueue(key, value);
    }
}

impl std::fmt::Debug for LogMetricsSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LogMetricsSink")
            .field("dropped", &self.dropped())
            .finish_non_exhaustive()
    }
}

async fn run(
    mut rx: mpsc::Receiver<Sample>,
    settings: LogSinkSettings,
    writer: Arc<dyn ReportWriter>,
) {
    let period = settings.flush_interval();
    let first = if settings.align_to_minute {
        delay_to_next_minute(SystemTime::now())
    } else {
        period
    };
    let mut ticker = time::interval_at(Instant::now() + first, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let mut aggregator = MetricsAggregator::new();
    loop {
        tokio::select! {
            _ = ticker.tick() => flush(&settings, writer.as_ref(), &mut aggregator),
            sample = rx.recv() => match sample {
                Some(sample) => aggregator.record(&sample.name, sample.value),
                None => {
                    flush(&settings, writer.as_ref(), &mut aggregator);
                    break;
                }
            },
        }
    }
    tracing::debug!(server = %settings.server, "metrics log sink stopped");
}

fn flush(settings: &LogSinkSettings, writer: &dyn ReportWriter, aggregator: &mut MetricsAggregator) {
    for (name, stat) in aggregator.drain() {
        writer.write(settings.level, &format_report_line(&settings.server, &name, &stat));
    }
}

/// 单个指标的报表行。
pub fn format_report_line(server: &str, name: &str, stat: &Statistic) -> String {
    format!(
        "metrics | {server} | {name} | min {}, max {}, sum {}, avg {}, count {}",
        stat.min, stat.max, stat.sum, stat.avg, stat.count
    )
}

fn delay_to_next_minute(now: SystemTime) -> Duration {
    let millis = now
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() % 60_000)
        .unwrap_or(0) as u64;
    Duration::from_millis(60_000 - millis)
}
