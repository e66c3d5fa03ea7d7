//! spark-kit-concurrent: 后台任务派生与 panic 恢复。
//!
//! # 教案式概览
//! - **意图（Why）**：把“派生任务 + 捕获 panic + 记录日志/指标”收敛为一个调用，
//!   避免各组件各自手写 `tokio::spawn` 后遗漏恢复逻辑；
//! - **结构（How）**：[`recovery`] 定义恢复动作与同步场景的 [`catch_panic`]；
//!   [`detach`](mod@detach) 负责异步任务的派生与并发等待；
//! - **契约（What）**：派生出的任务总是返回可追踪的 `JoinHandle`，调用方可选择等待或丢弃。

#![deny(unsafe_code)]

pub mod detach;
pub mod recovery;

pub use detach::{ConcurrentError, detach, detach_and_wait, detach_on};
pub use recovery::{PanicCallback, PanicReport, RecoveryOptions, catch_panic, panic_message};
