//! # 指标上报契约
//!
//! ## 角色定位（Why）
//! - 业务组件只关心“某个名字的计数器加一”，不关心背后是日志、Prometheus 还是内存表；
//! - 通过 `Arc<dyn MetricsSink>` 注入，避免进程级全局单例带来的测试耦合。
//!
//! ## 行为契约（What）
//! - `incr_counter` 累加；`set_gauge` 覆盖；
//! - 实现必须非阻塞，且不得 panic。

use std::sync::Arc;

use dashmap::DashMap;

/// 指标上报器。
///
/// # 教案式说明
/// - **意图（Why）**：为计数器与 Gauge 提供最小公共接口；
/// - **契约（What）**：`key` 为完整指标名（已含前缀），`value` 统一为 `f64`；
///   调用发生在请求热路径上，实现需保证常数级开销；
/// - **风险（Trade-offs）**：接口不返回错误，上报失败只能由实现自行记录。
pub trait MetricsSink: Send + Sync + 'static {
    /// 计数器累加 `value`。
    fn incr_counter(&self, key: &str, value: f64);

    /// Gauge 设置为 `value`，保留最后一次写入。
    fn set_gauge(&self, key: &str, value: f64);
}

/// 丢弃所有指标的空实现。
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopMetrics;

impl MetricsSink for NoopMetrics {
    fn incr_counter(&self, _key: &str, _value: f64) {}

    fn set_gauge(&self, _key: &str, _value: f64) {}
}

/// 内存记录型上报器，主要服务于测试与进程内自检。
///
/// - **契约（What）**：计数器按名称累加，Gauge 保留最后一次写入；读取未出现过的名称返回 `0.0`。
/// - **实现（How）**：两张 `DashMap`，读写均为分片锁，适合多任务并发打点。
#[derive(Debug, Default)]
pub struct RecordingMetrics {
    counters: DashMap<String, f64>,
    gauges: DashMap<String, f64>,
}

impl RecordingMetrics {
    /// 创建空的记录器。
    pub fn new() -> Self {
        Self::default()
    }

    /// 读取计数器当前值。
    pub fn counter(&self, key: &str) -> f64 {
        self.counters.get(key).map(|entry| *entry.value()).unwrap_or(0.0)
    }

    /// 读取 Gauge 当前值。
    pub fn gauge(&self, key: &str) -> Option<f64> {
        self.gauges.get(key).map(|entry| *entry.value())
    }

    /// 已出现过的计数器名称，按字典序排列。
    pub fn counter_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.counters.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }
}

impl MetricsSink for RecordingMetrics {
    fn incr_counter(&self, key: &str, value: f64) {
        *self.counters.entry(key.to_owned()).or_insert(0.0) += value;
    }

    fn set_gauge(&self, key: &str, value: f64) {
        self.gauges.insert(key.to_owned(), value);
    }
}

/// 带固定前缀的计数器句柄。
///
/// # 教案式说明
/// - **意图（Why）**：同一组件的多个计数器共享一个前缀（如 `spark.kit.redis.`），调用点只写短名；
/// - **契约（What）**：`incr(name)` 等价于 `sink.incr_counter(prefix + name, 1.0)`；
/// - **风险（Trade-offs）**：每次调用拼接一次字符串，对热路径可接受，若需零分配请直接使用底层 sink。
#[derive(Clone)]
pub struct ScopedMetrics {
    prefix: Arc<str>,
    sink: Arc<dyn MetricsSink>,
}

impl ScopedMetrics {
    /// 以前缀与底层上报器构造句柄。
    pub fn new(prefix: impl Into<Arc<str>>, sink: Arc<dyn MetricsSink>) -> Self {
        Self {
            prefix: prefix.into(),
            sink,
        }
    }

    /// 不上报任何指标的句柄。
    pub fn noop() -> Self {
        Self::new("", Arc::new(NoopMetrics))
    }

    /// 计数器加一。
    pub fn incr(&self, name: &str) {
        self.incr_by(name, 1.0);
    }

    /// 计数器加 `value`。
    pub fn incr_by(&self, name: &str, value: f64) {
        self.sink.incr_counter(&self.key(name), value);
    }

    /// 设置 Gauge。
    pub fn gauge(&self, name: &str, value: f64) {
        self.sink.set_gauge(&self.key(name), value);
    }

    /// 当前前缀。
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    fn key(&self, name: &str) -> String {
        let mut key = String::with_capacity(self.prefix.len() + name.len());
        key.push_str(&self.prefix);
        key.push_str(name);
        key
    }
}

impl std::fmt::Debug for ScopedMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScopedMetrics")
            .field("prefix", &self.prefix)
            .finish_non_exhaustive()
    }
}
