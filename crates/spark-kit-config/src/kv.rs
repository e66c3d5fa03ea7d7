use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::ConfigError;

/// 配置变更事件类型。
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum EventType {
    /// 非监听产生的读取结果。
    #[default]
    Null,
    Put,
    Del,
}

/// 一次读取或一次变更通知。
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ConfigResponse {
    value: String,
    event: EventType,
}

impl ConfigResponse {
    pub fn new(value: impl Into<String>, event: EventType) -> Self {
        Self {
            value: value.into(),
            event,
        }
    }

    pub fn value(&self) -> &str {
        &self.value
    }

    pub fn event(&self) -> EventType {
        self.event
    }
}

/// 键值型配置源。
///
/// # 教案式说明
/// - **意图（Why）**：本地文件、远端配置中心对业务呈现同一组读写与监听操作；
/// - **契约（What）**：
///   - `get` 返回当前值，事件类型为 [`EventType::Null`]；
///   - `watch` 返回一个接收端，后续变更以 `Put`/`Del` 事件推送，接收端被丢弃即视为取消订阅；
///   - 不支持写入的来源在 `put`/`del` 上返回 [`ConfigError::Unsupported`]；
/// - **风险（Trade-offs）**：接收端容量有限，消费过慢时推送方会等待；需要“只看最新值”
///   语义的多订阅场景请经由 [`WatchDispatcher`](crate::WatchDispatcher) 分发。
#[async_trait]
pub trait KvConfig: Send + Sync + 'static {
    /// 配置源名称，用于日志与错误信息。
    fn name(&self) -> &str;

    async fn get(&self, key: &str) -> Result<ConfigResponse, ConfigError>;

    async fn put(&self, key: &str, value: &str) -> Result<(), ConfigError>;

    async fn del(&self, key: &str) -> Result<(), ConfigError>;

    async fn watch(&self, key: &str) -> Result<mpsc::Receiver<ConfigResponse>, ConfigError>;
}
