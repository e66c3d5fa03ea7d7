//! # 客户端目标表
//!
//! ## 核心意图（Why）
//! - 下游客户端的“连到哪里、超时多少”来自配置，且需要在不重启的情况下变更；
//! - 读取发生在每一次取客户端的热路径上，因此采用 `ArcSwap` 快照：读无锁，写整体替换。
//!
//! ## 配置格式（What）
//! ```toml
//! [[client.service]]
//! name = "redis.user"
//! target = "redis://10.0.0.1:6379"
//! timeout = 800 # 毫秒
//! ```
//! - `target` 缺省或为空白字符串视为“未配置”；`timeout` 缺省为 `0`；
//! - 名称重复时以后出现者为准。

use std::{collections::HashMap, sync::Arc, time::Duration};

use arc_swap::ArcSwap;
use serde::Deserialize;

use crate::error::ConfigError;

/// 单个客户端的目标地址与超时。
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ClientTarget {
    pub target: String,
    pub timeout: Duration,
}

impl ClientTarget {
    pub fn new(target: impl Into<String>, timeout: Duration) -> Self {
        Self {
            target: target.into(),
            timeout,
        }
    }

    /// 目标地址非空白。
    pub fn is_configured(&self) -> bool {
        !self.target.trim().is_empty()
    }
}

/// 按名称查找客户端目标。
///
/// # 教案式说明
/// - **契约（What）**：返回 `None` 表示该名称没有配置；实现需保证读取开销稳定，
///   调用方会在每次取客户端时调用；
/// - **风险（Trade-offs）**：接口为同步函数，远端配置需要由实现自行缓存在本地。
pub trait TargetResolver: Send + Sync + 'static {
    fn resolve(&self, name: &str) -> Option<ClientTarget>;
}

impl<T: TargetResolver + ?Sized> TargetResolver for Arc<T> {
    fn resolve(&self, name: &str) -> Option<ClientTarget> {
        (**self).resolve(name)
    }
}

#[derive(Debug, Default, Deserialize)]
struct TableDocument {
    #[serde(default)]
    client: ClientSection,
}

#[derive(Debug, Default, Deserialize)]
struct ClientSection {
    #[serde(default)]
    service: Vec<ServiceEntry>,
}

#[derive(Debug, Deserialize)]
struct ServiceEntry {
    name: String,
    #[serde(default)]
    target: String,
    /// 毫秒。
    #[serde(default)]
    timeout: u64,
}

/// 可热更新的客户端目标表。
///
/// 克隆得到的句柄共享同一张表。
#[derive(Clone, Debug, Default)]
pub struct ClientTable {
    inner: Arc<ArcSwap<HashMap<String, ClientTarget>>>,
}

impl ClientTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// 从 TOML 文本构造。
    pub fn from_toml_str(raw: &str) -> Result<Self, ConfigError> {
        let table = Self::new();
        table.reload_from_str(raw)?;
        Ok(table)
    }

    /// 以新的 TOML 文本整体替换当前表；解析失败时保留原表。
    pub fn reload_from_str(&self, raw: &str) -> Result<(), ConfigError> {
        let document: TableDocument = toml::from_str(raw).map_err(ConfigError::Toml)?;
        let next: HashMap<_, _> = document
            .client
            .service
            .into_iter()
            .map(|entry| {
                let target = ClientTarget::new(entry.target, Duration::from_millis(entry.timeout));
                (entry.name, target)
            })
            .collect();
        tracing::debug!(services = next.len(), "client table reloaded");
        self.inner.store(Arc::new(next));
        Ok(())
    }

    /// 新增或替换单个条目。
    pub fn upsert(&self, name: impl Into<String>, target: ClientTarget) {
        let name = name.into();
        self.inner.rcu(|current| {
            let mut next = HashMap::clone(current);
            next.insert(name.clone(), target.clone());
            next
        });
    }

    /// 删除单个条目，返回被删除的值。
    pub fn remove(&self, name: &str) -> Option<ClientTarget> {
        let previous = self.inner.rcu(|current| {
            let mut next = HashMap::clone(current);
            next.remove(name);
            next
        });
        previous.get(name).cloned()
    }

    pub fn get(&self, name: &str) -> Option<ClientTarget> {
        self.inner.load().get(name).cloned()
    }

    pub fn len(&self) -> usize {
        self.inner.load().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.load().is_empty()
    }
}

impl TargetResolver for ClientTable {
    fn resolve(&self, name: &str) -> Option<ClientTarget> {
        self.get(name)
    }
}
