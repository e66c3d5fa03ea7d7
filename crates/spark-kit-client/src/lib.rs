//! spark-kit-client: 下游客户端的按名称缓存与热替换。
//!
//! # 教案式概览
//! - **意图（Why）**：业务通过逻辑名称（如 `redis.user`）取客户端，目标地址来自可热更新的配置；
//!   地址变化时自动切换到新客户端，并在宽限期后关闭旧客户端，保证在途请求不被中断；
//! - **结构（How）**：
//!   - [`factory`]：构造/关闭契约 [`ClientFactory`] 与闭包实现 [`FnClientFactory`]；
//!   - [`record`]：单条缓存记录 [`ClientRecord`] 与宽限期上限 [`MAX_TEARDOWN_GRACE`]；
//!   - [`buffer`]：缓存本体 [`ClientBuffer`]；
//!   - [`error`]：调用方可见的错误 [`BufferError`]；
//! - **契约（What）**：缓存是显式构造、可克隆的组件实例，而非进程级单例；
//!   目标地址查询通过 `spark_kit_config::TargetResolver` 注入，指标通过 `spark_kit_metrics::MetricsSink` 注入。

#![deny(unsafe_code)]

pub mod buffer;
pub mod error;
pub mod factory;
pub mod record;

pub use buffer::{ClientBuffer, ClientBufferBuilder};
pub use error::BufferError;
pub use factory::{ClientFactory, FnClientFactory};
pub use record::{ClientRecord, MAX_TEARDOWN_GRACE, teardown_grace};
