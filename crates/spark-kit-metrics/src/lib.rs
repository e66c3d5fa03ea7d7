//! spark-kit-metrics: 面向业务组件的轻量指标契约。
//!
//! # 教案式概览
//! - **意图（Why）**：客户端缓存、配置分发、后台任务等组件都需要“打一个计数器”，但不应绑定具体的
//!   指标后端；本 crate 提供统一的 [`MetricsSink`] 契约，调用方按需注入实现。
//! - **结构（How）**：
//!   - [`sink`]：契约本身以及 [`NoopMetrics`]、[`RecordingMetrics`]、[`ScopedMetrics`] 三个常用实现；
//!   - [`stat`]：最小/最大/总和/次数的线程安全累加器与按名称聚合的 [`MetricsAggregator`]；
//!   - [`log_sink`]：把一个周期内的样本聚合后写入日志的 [`LogMetricsSink`]。
//! - **契约（What）**：所有上报接口都是“发出即忘”的，不返回错误、不阻塞调用方。
//! - **风险提示（Trade-offs）**：单维度指标足以覆盖当前组件，多维度标签暂不支持。

#![deny(unsafe_code)]

pub mod log_sink;
pub mod sink;
pub mod stat;

pub use log_sink::{
    LogMetricsSink, LogSinkSettings, OWN_LOG_METRICS_PREFIX, ReportLevel, ReportWriter,
    TracingReportWriter,
};
pub use sink::{MetricsSink, NoopMetrics, RecordingMetrics, ScopedMetrics};
pub use stat::{MetricsAggregator, StatCounter, Statistic};
