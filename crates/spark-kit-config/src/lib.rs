//! spark-kit-config: 客户端目标表与可热更新的键值配置。
//!
//! # 教案式概览
//! - **意图（Why）**：客户端缓存需要一个“名称 → 目标地址”的查询入口，业务配置需要在不重启的
//!   情况下生效；两者都以 `ArcSwap` 快照对外提供无锁读取；
//! - **结构（How）**：
//!   - [`target`]：[`ClientTarget`]、[`TargetResolver`] 与基于 TOML 的 [`ClientTable`]；
//!   - [`kv`]：键值配置源契约 [`KvConfig`]；[`file`]：本地文件实现 [`FileConfig`]；
//!   - [`dispatcher`]：一对多的监听分发 [`WatchDispatcher`]；
//!   - [`binding`]：解码后自动更新的 [`ConfigBinding`]；
//! - **契约（What）**：所有错误统一为 [`ConfigError`]；后台任务失败只记录日志，不影响已生效的快照。

#![deny(unsafe_code)]

pub mod binding;
pub mod dispatcher;
pub mod error;
pub mod file;
pub mod kv;
pub mod target;

pub use binding::{ConfigBinding, Encoding};
pub use dispatcher::{Subscription, WatchDispatcher};
pub use error::ConfigError;
pub use file::{FileConfig, FileConfigSettings, FileItem};
pub use kv::{ConfigResponse, EventType, KvConfig};
pub use target::{ClientTable, ClientTarget, TargetResolver};
