//! # 监听分发
//!
//! ## 核心意图（Why）
//! - 同一个配置键往往有多个关注方，而上游监听（文件系统事件、远端长连接）只应建立一次；
//! - 关注方只关心最新值，消费慢时旧值可以被覆盖，但不能阻塞上游或其他关注方。
//!
//! ## 行为契约（What）
//! - [`WatchDispatcher::subscribe`] 可在启动前后任意调用，订阅之后到达的变更才会被看到；
//! - [`WatchDispatcher::start`] 只会成功启动一次；启动失败不会被记为已启动，下次调用会重试；
//! - 订阅方丢弃 [`Subscription`] 后，在下一次分发时被移除并计入 `watch.closed.cnt`；
//! - 上游结束时所有订阅方收到结束信号（[`Subscription::changed`] 返回 `None`）；
//!   此后新建的订阅立即处于结束状态，分发器回到未启动状态，可再次 `start`。
//!
//! ## 实现要点（How）
//! - 每个订阅方持有一条 `tokio::sync::watch` 通道，天然具备“只保留最新值”的语义；
//! - 订阅表使用 `DashMap`，分发遍历与新增订阅互不阻塞。

use std::{
    future::Future,
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicU64, Ordering},
    },
};

use dashmap::DashMap;
use spark_kit_concurrent::{RecoveryOptions, detach};
use spark_kit_metrics::ScopedMetrics;
use tokio::sync::{Mutex, mpsc, watch};

use crate::{
    error::ConfigError,
    kv::{ConfigResponse, KvConfig},
};

/// 单个订阅方的接收端。
#[derive(Debug)]
pub struct Subscription<T> {
    rx: watch::Receiver<Option<T>>,
}

impl<T: Clone> Subscription<T> {
    /// 等待下一次变更并返回最新值；上游结束或分发器被释放时返回 `None`。
    pub async fn changed(&mut self) -> Option<T> {
        loop {
            self.rx.changed().await.ok()?;
            if let Some(value) = self.rx.borrow_and_update().clone() {
                return Some(value);
            }
        }
    }

    /// 最近一次收到的值，不等待。
    pub fn latest(&self) -> Option<T> {
        self.rx.borrow().clone()
    }
}

/// 一对多的监听分发器。
pub struct WatchDispatcher<T> {
    inner: Arc<DispatcherInner<T>>,
}

struct DispatcherInner<T> {
    key: String,
    subscribers: DashMap<u64, watch::Sender<Option<T>>>,
    next_id: AtomicU64,
    started: Mutex<bool>,
    ended: AtomicBool,
    metrics: ScopedMetrics,
}

impl<T> Clone for WatchDispatcher<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> std::fmt::Debug for WatchDispatcher<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WatchDispatcher")
            .field("key", &self.inner.key)
            .field("subscribers", &self.inner.subscribers.len())
            .finish()
    }
}

impl<T> WatchDispatcher<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// 创建分发器，`key` 仅用于日志。
    pub fn new(key: impl Into<String>) -> Self {
        Self::with_metrics(key, ScopedMetrics::noop())
    }

    pub fn with_metrics(key: impl Into<String>, metrics: ScopedMetrics) -> Self {
        Self {
            inner: Arc::new(DispatcherInner {
                key: key.into(),
                subscribers: DashMap::new(),
                next_id: AtomicU64::new(0),
                started: Mutex::new(false),
                ended: AtomicBool::new(false),
                metrics,
            }),
        }
    }

    /// 注册新的订阅方。上游已结束时返回的订阅不会再收到任何值。
    pub fn subscribe(&self) -> Subscription<T> {
        let (tx, rx) = watch::channel(None);
        if self.inner.ended.load(Ordering::SeqCst) {
            return Subscription { rx };
        }
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        self.inner.subscribers.insert(id, tx);
        // 与 `run` 收尾的清理竞争：插入晚于清理时在这里自行撤销。
        if self.inner.ended.load(Ordering::SeqCst) {
            self.inner.subscribers.remove(&id);
            return Subscription { rx };
        }
        self.inner.metrics.incr("watch.new.cnt");
        Subscription { rx }
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner.subscribers.len()
    }

    /// 建立上游监听并启动分发任务。
    ///
    /// # 教案式说明
    /// - **契约（What）**：`open` 只在尚未启动时被调用；已启动时直接返回 `Ok(())`；
    ///   `open` 失败时返回 [`ConfigError::Watch`]，分发器保持未启动状态；
    ///   上游结束后分发器回到未启动状态，再次调用会重新 `open`；
    /// - **实现（How）**：启动状态由异步互斥量保护，并发调用方排队等待同一次启动结果。
    pub async fn start<F, Fut>(&self, open: F) -> Result<(), ConfigError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<mpsc::Receiver<T>, ConfigError>>,
    {
        let mut started = self.inner.started.lock().await;
        if *started {
            return Ok(());
        }

        let upstream = open().await.map_err(|err| {
            tracing::warn!(key = %self.inner.key, error = %err, "start watching failed");
            ConfigError::Watch {
                key: self.inner.key.clone(),
                source: Arc::new(err),
            }
        })?;
        *started = true;
        self.inner.ended.store(false, Ordering::SeqCst);

        let inner = Arc::clone(&self.inner);
        detach(
            format!("config.watch.{}", self.inner.key),
            inner.run(upstream),
            RecoveryOptions::new().with_error_log(),
        );
        Ok(())
    }
}

impl WatchDispatcher<ConfigResponse> {
    /// 以 [`KvConfig::watch`] 作为上游启动分发。
    pub async fn start_kv(&self, source: &dyn KvConfig) -> Result<(), ConfigError> {
        let key = self.inner.key.clone();
        self.start(|| async move { source.watch(&key).await }).await
    }
}

impl<T> DispatcherInner<T>
where
    T: Clone + Send + Sync + 'static,
{
    async fn run(self: Arc<Self>, mut upstream: mpsc::Receiver<T>) {
        while let Some(value) = upstream.recv().await {
            self.dispatch(value);
        }
        tracing::info!(key = %self.key, "upstream watch closed");
        let mut started = self.started.lock().await;
        *started = false;
        self.ended.store(true, Ordering::SeqCst);
        self.subscribers.clear();
    }

    fn dispatch(&self, value: T) {
        self.subscribers.retain(|id, tx| {
            if tx.send(Some(value.clone())).is_err() {
                self.metrics.incr("watch.closed.cnt");
                tracing::warn!(key = %self.key, subscriber = id, "subscriber closed, removed");
                return false;
            }
            self.metrics.incr("watch.update.cnt");
            true
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use spark_kit_metrics::RecordingMetrics;

    fn dispatcher() -> (WatchDispatcher<u32>, Arc<RecordingMetrics>) {
        let metrics = Arc::new(RecordingMetrics::new());
        let scoped = ScopedMetrics::new("", metrics.clone());
        (WatchDispatcher::with_metrics("flags", scoped), metrics)
    }

    #[tokio::test]
    async fn every_subscriber_sees_updates() {
        let (dispatcher, metrics) = dispatcher();
        let mut a = dispatcher.subscribe();
        let mut b = dispatcher.subscribe();
        let (tx, rx) = mpsc::channel(4);
        dispatcher.start(move || async move { Ok(rx) }).await.expect("start");

        tx.send(7).await.expect("send");
        assert_eq!(a.changed().await, Some(7));
        assert_eq!(b.changed().await, Some(7));
        assert_eq!(metrics.counter("watch.new.cnt"), 2.0);
        assert_eq!(metrics.counter("watch.update.cnt"), 2.0);
    }

    #[tokio::test]
    async fn slow_subscriber_only_keeps_latest() {
        let (dispatcher, _) = dispatcher();
        let mut slow = dispatcher.subscribe();
        let mut probe = dispatcher.subscribe();
        let (tx, rx) = mpsc::channel(4);
        dispatcher.start(move || async move { Ok(rx) }).await.expect("start");

        for v in 1..=3 {
            tx.send(v).await.expect("send");
            assert_eq!(probe.changed().await, Some(v));
        }
        assert_eq!(slow.changed().await, Some(3));
        assert_eq!(slow.latest(), Some(3));
    }

    #[tokio::test]
    async fn closed_subscriber_is_removed_on_next_dispatch() {
        let (dispatcher, metrics) = dispatcher();
        let dropped = dispatcher.subscribe();
        let mut kept = dispatcher.subscribe();
        let (tx, rx) = mpsc::channel(4);
        dispatcher.start(move || async move { Ok(rx) }).await.expect("start");

        drop(dropped);
        tx.send(1).await.expect("send");
        assert_eq!(kept.changed().await, Some(1));
        assert_eq!(dispatcher.subscriber_count(), 1);
        assert_eq!(metrics.counter("watch.closed.cnt"), 1.0);
    }

    #[tokio::test]
    async fn start_is_retried_after_failure_and_runs_once() {
        let (dispatcher, _) = dispatcher();
        let err = dispatcher
            .start(|| async {
                Err(ConfigError::KeyNotFound {
                    source_name: "test".into(),
                    key: "flags".into(),
                })
            })
            .await
            .expect_err("open fails");
        assert!(matches!(err, ConfigError::Watch { ref key, .. } if key == "flags"));

        let (_tx, rx) = mpsc::channel(1);
        dispatcher.start(move || async move { Ok(rx) }).await.expect("retry succeeds");

        let mut opened_again = false;
        dispatcher
            .start(|| {
                opened_again = true;
                async { Err(ConfigError::Json(serde_json::from_str::<u8>("x").unwrap_err())) }
            })
            .await
            .expect("already started");
        assert!(!opened_again);
    }

    #[tokio::test]
    async fn upstream_end_closes_subscriptions() {
        let (dispatcher, _) = dispatcher();
        let mut sub = dispatcher.subscribe();
        let (tx, rx) = mpsc::channel(1);
        dispatcher.start(move || async move { Ok(rx) }).await.expect("start");
        drop(tx);
        assert_eq!(sub.changed().await, None);
    }

    #[tokio::test]
    async fn ended_dispatcher_closes_late_subscribers_and_restarts() {
        let (dispatcher, _) = dispatcher();
        let mut early = dispatcher.subscribe();
        let (tx, rx) = mpsc::channel(1);
        dispatcher.start(move || async move { Ok(rx) }).await.expect("start");
        drop(tx);
        assert_eq!(early.changed().await, None);

        let mut late = dispatcher.subscribe();
        let closed = tokio::time::timeout(std::time::Duration::from_secs(1), late.changed()).await;
        assert_eq!(closed.expect("closed without waiting"), None);
        assert_eq!(dispatcher.subscriber_count(), 0);

        let mut reopened = false;
        let err = dispatcher
            .start(|| {
                reopened = true;
                async {
                    Err(ConfigError::KeyNotFound {
                        source_name: "test".into(),
                        key: "flags".into(),
                    })
                }
            })
            .await
            .expect_err("open runs again");
        assert!(reopened);
        assert!(matches!(err, ConfigError::Watch { .. }));

        let (tx, rx) = mpsc::channel(1);
        dispatcher.start(move || async move { Ok(rx) }).await.expect("restart");
        let mut fresh = dispatcher.subscribe();
        tx.send(5).await.expect("send");
        assert_eq!(fresh.changed().await, Some(5));
    }
}
