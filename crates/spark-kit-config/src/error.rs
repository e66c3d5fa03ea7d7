use std::{io, path::PathBuf, sync::Arc};

use thiserror::Error;

/// 配置层错误。
///
/// # 教案式说明
/// - **意图（Why）**：配置来源多样（TOML 文本、本地文件、远端 KV），统一为一个枚举后调用方只需一次 `match`；
/// - **契约（What）**：底层错误通过 `#[source]` 保留，`Display` 只描述本层上下文；
/// - **风险（Trade-offs）**：监听启动失败以 `Arc` 共享，便于在多个等待方之间复制。
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("decode toml failed")]
    Toml(#[source] toml::de::Error),
    #[error("decode json failed")]
    Json(#[source] serde_json::Error),
    #[error("key '{key}' is not configured in source '{source_name}'")]
    KeyNotFound { source_name: String, key: String },
    #[error("read '{}' failed", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("watch '{}' for changes failed", .path.display())]
    Notify {
        path: PathBuf,
        #[source]
        source: notify::Error,
    },
    #[error("path '{}' is not a regular file", .path.display())]
    NotAFile { path: PathBuf },
    #[error("config source '{source_name}' does not support {operation}")]
    Unsupported {
        source_name: String,
        operation: &'static str,
    },
    #[error("watch key '{key}' failed")]
    Watch {
        key: String,
        #[source]
        source: Arc<ConfigError>,
    },
}
