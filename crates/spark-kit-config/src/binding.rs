use std::{fmt, sync::Arc};

use arc_swap::ArcSwap;
use serde::{Deserialize, de::DeserializeOwned};
use spark_kit_concurrent::{RecoveryOptions, detach};
use tokio::task::JoinHandle;

use crate::{
    dispatcher::Subscription,
    error::ConfigError,
    kv::{ConfigResponse, EventType, KvConfig},
};

/// 配置内容的编码格式。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Encoding {
    Json,
    Toml,
}

impl Encoding {
    pub fn decode<T: DeserializeOwned>(self, raw: &str) -> Result<T, ConfigError> {
        match self {
            Encoding::Json => serde_json::from_str(raw).map_err(ConfigError::Json),
            Encoding::Toml => toml::from_str(raw).map_err(ConfigError::Toml),
        }
    }
}

/// 与某个配置键保持同步的强类型值。
///
/// # 教案式说明
/// - **意图（Why）**：业务代码只想读取“当前的配置结构体”，不想处理订阅、解码与失败回退；
/// - **契约（What）**：
///   - [`load`](Self::load) 返回当前快照，无锁；
///   - 收到 `Put`/`Null` 事件时解码并整体替换；解码失败保留旧值并记录 warn 日志；
///   - `Del` 事件被忽略，配置被删除时继续沿用最后一次有效值；
/// - **风险（Trade-offs）**：旧快照在所有读者释放前不会被回收，高频更新的大对象需关注内存峰值。
pub struct ConfigBinding<T> {
    key: Arc<str>,
    encoding: Encoding,
    current: Arc<ArcSwap<T>>,
}

impl<T> Clone for ConfigBinding<T> {
    fn clone(&self) -> Self {
        Self {
            key: Arc::clone(&self.key),
            encoding: self.encoding,
            current: Arc::clone(&self.current),
        }
    }
}

impl<T: fmt::Debug> fmt::Debug for ConfigBinding<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConfigBinding")
            .field("key", &self.key)
            .field("encoding", &self.encoding)
            .field("current", &self.current.load_full())
            .finish()
    }
}

impl<T> ConfigBinding<T>
where
    T: DeserializeOwned + Send + Sync + 'static,
{
    pub fn new(key: impl Into<Arc<str>>, initial: T, encoding: Encoding) -> Self {
        Self {
            key: key.into(),
            encoding,
            current: Arc::new(ArcSwap::from_pointee(initial)),
        }
    }

    /// 从配置源读取初始值。
    pub async fn load_from(
        source: &dyn KvConfig,
        key: &str,
        encoding: Encoding,
    ) -> Result<Self, ConfigError> {
        let response = source.get(key).await?;
        let initial = encoding.decode(response.value())?;
        Ok(Self::new(key, initial, encoding))
    }

    pub fn load(&self) -> Arc<T> {
        self.current.load_full()
    }

    /// 应用一次变更；返回是否替换了当前值。
    pub fn apply(&self, response: &ConfigResponse) -> Result<bool, ConfigError> {
        if response.event() == EventType::Del {
            tracing::info!(key = %self.key, "config deleted, keep last value");
            return Ok(false);
        }
        let next: T = self.encoding.decode(response.value())?;
        self.current.store(Arc::new(next));
        Ok(true)
    }

    /// 持续消费订阅并更新当前值，订阅结束时任务退出。
    pub fn follow(&self, mut subscription: Subscription<ConfigResponse>) -> JoinHandle<Option<()>> {
        let binding = self.clone();
        detach(
            format!("config.binding.{}", self.key),
            async move {
                while let Some(response) = subscription.changed().await {
                    match binding.apply(&response) {
                        Ok(true) => tracing::debug!(key = %binding.key, "config binding updated"),
                        Ok(false) => {}
                        Err(err) => tracing::warn!(
                            key = %binding.key,
                            error = %err,
                            "decode config failed, keep last value"
                        ),
                    }
                }
            },
            RecoveryOptions::new().with_error_log(),
        )
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::dispatcher::WatchDispatcher;
    use tokio::sync::mpsc;

    #[derive(Debug, Deserialize, PartialEq)]
    struct Flags {
        dark_mode: bool,
        limit: u32,
    }

    fn put(raw: &str) -> ConfigResponse {
        ConfigResponse::new(raw, EventType::Put)
    }

    #[test]
    fn decodes_json_and_toml() {
        let json: Flags = Encoding::Json
            .decode(r#"{"dark_mode": true, "limit": 3}"#)
            .expect("json");
        let toml: Flags = Encoding::Toml.decode("dark_mode = true\nlimit = 3").expect("toml");
        assert_eq!(json, toml);
    }

    #[test]
    fn invalid_payload_keeps_previous_value() {
        let binding = ConfigBinding::new(
            "flags",
            Flags {
                dark_mode: false,
                limit: 1,
            },
            Encoding::Json,
        );
        assert!(binding.apply(&put("{not json")).is_err());
        assert_eq!(binding.load().limit, 1);

        assert!(binding.apply(&put(r#"{"dark_mode": true, "limit": 9}"#)).expect("valid"));
        assert_eq!(binding.load().limit, 9);
    }

    #[test]
    fn delete_event_is_ignored() {
        let binding = ConfigBinding::new("flags", Flags { dark_mode: true, limit: 2 }, Encoding::Toml);
        let changed = binding
            .apply(&ConfigResponse::new("", EventType::Del))
            .expect("del");
        assert!(!changed);
        assert_eq!(binding.load().limit, 2);
    }

    #[tokio::test]
    async fn follows_dispatched_updates() {
        let dispatcher = WatchDispatcher::new("flags");
        let binding = ConfigBinding::new("flags", Flags { dark_mode: false, limit: 0 }, Encoding::Toml);
        let task = binding.follow(dispatcher.subscribe());

        let (tx, rx) = mpsc::channel(4);
        dispatcher.start(move || async move { Ok(rx) }).await.expect("start");
        tx.send(put("dark_mode = true\nlimit = 5")).await.expect("send");

        for _ in 0..100 {
            if binding.load().limit == 5 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
        assert_eq!(*binding.load(), Flags { dark_mode: true, limit: 5 });

        drop(tx);
        assert_eq!(task.await.expect("join"), Some(()));
    }
}
