//! # ClientBuffer：按名称缓存客户端并在配置变更时热替换
//!
//! ## 核心意图（Why）
//! - 下游客户端（数据库、缓存、消息队列）构建代价高，应按逻辑名称复用；
//! - 配置中的目标地址变化后，需要切换到新客户端，同时让旧客户端上的在途请求自然结束。
//!
//! ## 行为契约（What）
//! - 目标地址不变时返回缓存的客户端，不触发构建；
//! - 目标地址变化（或首次访问）时构建新客户端并整体替换记录；旧客户端在
//!   `min(timeout, 60s)` 之后由后台任务关闭，且只关闭一次；
//! - 配置中查不到目标地址时：有旧记录则继续返回旧客户端，否则返回 [`BufferError::NotConfigured`]；
//! - 构造失败原样返回 [`BufferError::ConstructionFailed`]，不改动已有记录；
//! - 关闭失败只记录日志与 `clientDestroy.fail` 计数，不影响任何调用方。
//!
//! ## 并发模型（How）
//! - 记录表为 `DashMap`，“比较目标地址 → 构建 → 替换”三步之间不加锁；
//!   两个调用方同时观察到目标变化时都会构建，后写入者生效，先写入的记录随即被当作旧记录
//!   走正常的延迟关闭流程，因此每个被替换的记录都恰好对应一次关闭；
//! - 关闭任务经由 `spark_kit_concurrent::detach_on` 派生，句柄被登记，
//!   停机时可通过 [`ClientBuffer::drain_teardowns`] 等待其全部完成。

use std::{fmt, sync::Arc};

use dashmap::DashMap;
use futures::future::join_all;
use parking_lot::Mutex;
use spark_kit_concurrent::{RecoveryOptions, catch_panic, detach_on};
use spark_kit_config::{ClientTarget, TargetResolver};
use spark_kit_metrics::{MetricsSink, NoopMetrics, ScopedMetrics};
use tokio::{runtime::Handle, task::JoinHandle};

use crate::{error::BufferError, factory::ClientFactory, record::ClientRecord};

pub(crate) const CLIENT_UPDATE: &str = "clientUpdate.cnt";
pub(crate) const CLIENT_DESTROY_SUCC: &str = "clientDestroy.succ";
pub(crate) const CLIENT_DESTROY_FAIL: &str = "clientDestroy.fail";

const DEFAULT_METRICS_PREFIX: &str = "client.";

/// 按名称缓存的客户端集合。
///
/// 克隆得到的句柄共享同一组记录与关闭任务。
pub struct ClientBuffer<F: ClientFactory> {
    inner: Arc<BufferInner<F>>,
}

struct BufferInner<F: ClientFactory> {
    factory: F,
    resolver: Arc<dyn TargetResolver>,
    records: DashMap<String, ClientRecord<F::Client>>,
    metrics: ScopedMetrics,
    runtime: Option<Handle>,
    teardowns: Mutex<Vec<JoinHandle<Option<()>>>>,
}

impl<F: ClientFactory> Clone for ClientBuffer<F> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<F: ClientFactory> fmt::Debug for ClientBuffer<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientBuffer")
            .field("clients", &self.inner.records.len())
            .field("metrics", &self.inner.metrics)
            .field("pending_teardowns", &self.pending_teardowns())
            .finish()
    }
}

/// [`ClientBuffer`] 的构建器。
pub struct ClientBufferBuilder<F: ClientFactory> {
    factory: F,
    resolver: Arc<dyn TargetResolver>,
    metrics_prefix: String,
    sink: Arc<dyn MetricsSink>,
    runtime: Option<Handle>,
}

impl<F: ClientFactory> ClientBufferBuilder<F> {
    /// 指标名前缀，默认 `client.`；例如 `redis.` 得到 `redis.clientUpdate.cnt`。
    pub fn metrics_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.metrics_prefix = prefix.into();
        self
    }

    /// 指标上报器，默认丢弃。
    pub fn metrics(mut self, sink: Arc<dyn MetricsSink>) -> Self {
        self.sink = sink;
        self
    }

    /// 关闭任务所在的运行时；未指定时使用调用 `get_client` 时所处的运行时。
    pub fn runtime(mut self, handle: Handle) -> Self {
        self.runtime = Some(handle);
        self
    }

    pub fn build(self) -> ClientBuffer<F> {
        ClientBuffer {
            inner: Arc::new(BufferInner {
                factory: self.factory,
                resolver: self.resolver,
                records: DashMap::new(),
                metrics: ScopedMetrics::new(self.metrics_prefix, self.sink),
                runtime: self.runtime,
                teardowns: Mutex::new(Vec::new()),
            }),
        }
    }
}

impl<F: ClientFactory> ClientBuffer<F> {
    /// 以默认设置创建缓存。
    pub fn new<R: TargetResolver>(factory: F, resolver: R) -> Self {
        Self::builder(factory, resolver).build()
    }

    pub fn builder<R: TargetResolver>(factory: F, resolver: R) -> ClientBufferBuilder<F> {
        ClientBufferBuilder {
            factory,
            resolver: Arc::new(resolver),
            metrics_prefix: DEFAULT_METRICS_PREFIX.to_owned(),
            sink: Arc::new(NoopMetrics),
            runtime: None,
        }
    }

    /// 取得 `name` 对应的客户端，必要时构建或替换。
    ///
    /// # 教案式说明
    /// - **契约（What）**：
    ///   - 返回值要么是缓存中的客户端，要么是本次新建的客户端，不会同时涉及新旧两者；
    ///   - 本调用不会等待旧客户端关闭；
    /// - **前置条件**：替换旧客户端时需要 Tokio 运行时来派生关闭任务（构建器指定或当前上下文）；
    ///   两者皆无时旧客户端在当前线程立即关闭，并输出 error 日志；
    /// - **风险（Trade-offs）**：构造器在调用方线程上同步执行，慢构造会直接拖慢本次调用。
    pub fn get_client(
        &self,
        name: &str,
        options: &F::Options,
    ) -> Result<F::Client, BufferError<F::Error>> {
        let resolved = self
            .inner
            .resolver
            .resolve(name)
            .filter(ClientTarget::is_configured);
        let Some(ClientTarget { target, timeout }) = resolved else {
            return match self.inner.records.get(name) {
                Some(record) => {
                    tracing::debug!(name, target = %record.target(), "target missing, serving previous client");
                    Ok(record.client().clone())
                }
                None => Err(BufferError::NotConfigured {
                    name: name.to_owned(),
                }),
            };
        };

        if let Some(client) = self.cached(name, &target) {
            return Ok(client);
        }

        self.inner.metrics.incr(CLIENT_UPDATE);
        let client = self
            .inner
            .factory
            .build(name, options)
            .map_err(|source| {
                tracing::warn!(name, target = %target, error = %source, "build client failed");
                BufferError::ConstructionFailed {
                    name: name.to_owned(),
                    source,
                }
            })?;

        let record = ClientRecord::new(client.clone(), target, timeout);
        let previous = self.inner.records.insert(name.to_owned(), record);
        match previous {
            Some(previous) => {
                tracing::info!(
                    name,
                    from = %previous.target(),
                    grace = ?previous.grace_period(),
                    "client target changed, previous client scheduled for close"
                );
                self.schedule_teardown(name, previous);
            }
            None => tracing::info!(name, "client built"),
        }
        Ok(client)
    }

    /// 返回可重复调用的取客户端闭包，名称与构造参数在闭包内固定。
    pub fn getter(
        &self,
        name: &str,
        options: F::Options,
    ) -> impl Fn() -> Result<F::Client, BufferError<F::Error>> + use<F> {
        let buffer = self.clone();
        let name = name.to_owned();
        move || buffer.get_client(&name, &options)
    }

    /// 当前记录的目标地址。
    pub fn current_target(&self, name: &str) -> Option<String> {
        self.inner
            .records
            .get(name)
            .map(|record| record.target().to_owned())
    }

    /// 已缓存的名称数量。
    pub fn len(&self) -> usize {
        self.inner.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.records.is_empty()
    }

    /// 尚未完成的关闭任务数。
    pub fn pending_teardowns(&self) -> usize {
        let mut teardowns = self.inner.teardowns.lock();
        teardowns.retain(|handle| !handle.is_finished());
        teardowns.len()
    }

    /// 等待所有已登记的关闭任务完成，包括等待期间新登记的任务。
    ///
    /// 关闭任务不会被提前触发，调用方会等到各自的等待时间结束。
    pub async fn drain_teardowns(&self) {
        loop {
            let batch = std::mem::take(&mut *self.inner.teardowns.lock());
            if batch.is_empty() {
                return;
            }
            for joined in join_all(batch).await {
                if let Err(err) = joined {
                    tracing::error!(error = %err, "client teardown task aborted");
                }
            }
        }
    }

    fn cached(&self, name: &str, target: &str) -> Option<F::Client> {
        let record = self.inner.records.get(name)?;
        (record.target() == target).then(|| record.client().clone())
    }

    fn schedule_teardown(&self, name: &str, previous: ClientRecord<F::Client>) {
        let metrics = self.inner.metrics.clone();
        let opts = RecoveryOptions::new()
            .with_error_log()
            .with_callback(move |_| metrics.incr(CLIENT_DESTROY_FAIL));

        let runtime = self
            .inner
            .runtime
            .clone()
            .or_else(|| Handle::try_current().ok());
        let Some(runtime) = runtime else {
            tracing::error!(
                name,
                target = %previous.target(),
                "no tokio runtime to defer close, closing previous client immediately"
            );
            catch_panic(&opts, name, || self.inner.close_record(name, previous));
            return;
        };

        let inner = Arc::clone(&self.inner);
        let label = name.to_owned();
        let task = async move {
            tokio::time::sleep(previous.grace_period()).await;
            inner.close_record(&label, previous);
        };
        let handle = detach_on(&runtime, format!("client.teardown.{name}"), task, opts);

        let mut teardowns = self.inner.teardowns.lock();
        teardowns.retain(|handle| !handle.is_finished());
        teardowns.push(handle);
    }
}

impl<F: ClientFactory> BufferInner<F> {
    fn close_record(&self, name: &str, record: ClientRecord<F::Client>) {
        let (client, target, _) = record.into_parts();
        match self.factory.close(client) {
            Ok(()) => {
                self.metrics.incr(CLIENT_DESTROY_SUCC);
                tracing::info!(name, target = %target, "previous client closed");
            }
            Err(err) => {
                self.metrics.incr(CLIENT_DESTROY_FAIL);
                tracing::error!(name, target = %target, error = %err, "close previous client failed");
            }
        }
    }
}
