//! # 本地文件配置源
//!
//! ## 核心意图（Why）
//! - 让“一个配置键对应一个本地文件”的部署方式也能享受统一的 [`KvConfig`] 读取与热更新；
//! - 文件短暂不可读（如原子替换的间隙）时，调用方仍能拿到最近一次成功读取的内容。
//!
//! ## 行为契约（What）
//! - `get`：读取成功则刷新缓存并返回；失败时退回缓存，缓存也没有时返回读取错误；
//! - `put`/`del`：不支持；
//! - `watch`：每个键只注册一个文件系统监听，后续调用共享，各自获得独立的接收端；
//!   内容写入推送 `Put`，文件删除推送 `Del`，重新创建再次推送 `Put`。
//!
//! ## 实现要点（How）
//! - 监听挂在文件所在目录上（非递归），按文件名过滤事件，删除后重建同名文件仍能被观察到；
//! - `notify` 回调运行在其自有线程，事件经无界通道桥接进异步任务；
//! - 监听句柄由配置源持有，配置源全部句柄释放后通道关闭，转发任务随之退出；
//! - 向订阅者推送使用 `try_send`：某个订阅者不消费时只丢弃它自己的事件并计数，不拖住其他订阅者。

use std::{
    collections::HashMap,
    io,
    path::{Path, PathBuf},
    sync::{
        Arc, Weak,
        atomic::{AtomicU64, Ordering},
    },
};

use async_trait::async_trait;
use dashmap::DashMap;
use notify::{
    Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher,
    event::{AccessKind, AccessMode},
};
use parking_lot::Mutex;
use serde::Deserialize;
use spark_kit_concurrent::{RecoveryOptions, detach};
use tokio::sync::mpsc::{self, error::TrySendError};

use crate::{
    error::ConfigError,
    kv::{ConfigResponse, EventType, KvConfig},
};

const SOURCE_NAME: &str = "file";
const WATCH_CHANNEL_CAPACITY: usize = 10;

/// 单个文件条目。
#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
pub struct FileItem {
    pub name: String,
    pub path: PathBuf,
}

/// 文件配置源的声明式配置。
///
/// ```toml
/// [[items]]
/// name = "feature_flags"
/// path = "/etc/app/flags.json"
/// ```
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
pub struct FileConfigSettings {
    pub items: Vec<FileItem>,
}

/// 基于本地文件的 [`KvConfig`]。
#[derive(Clone)]
pub struct FileConfig {
    inner: Arc<FileInner>,
}

struct FileInner {
    items: HashMap<String, PathBuf>,
    cache: DashMap<String, String>,
    watchers: Mutex<HashMap<String, WatchEntry>>,
}

struct WatchEntry {
    hub: Arc<WatchHub>,
    // 释放即注销目录监听并关闭事件通道。
    _fs_watcher: RecommendedWatcher,
}

/// 同一个键的全部订阅者。
#[derive(Default)]
struct WatchHub {
    subscribers: Mutex<Vec<mpsc::Sender<ConfigResponse>>>,
    dropped: AtomicU64,
}

#[derive(Debug, PartialEq, Eq)]
enum FileState {
    Present(String),
    Missing,
}

impl std::fmt::Debug for FileConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileConfig")
            .field("items", &self.inner.items)
            .finish_non_exhaustive()
    }
}

impl Default for FileConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl FileConfig {
    pub fn new() -> Self {
        Self::from_items(HashMap::new())
    }

    pub fn from_settings(settings: FileConfigSettings) -> Self {
        let items = settings
            .items
            .into_iter()
            .map(|item| (item.name, item.path))
            .collect();
        Self::from_items(items)
    }

    /// 追加一个键到文件的映射。构建期方法：返回全新的配置源，不继承已有缓存与监听。
    pub fn with_item(self, name: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        let mut items = self.inner.items.clone();
        items.insert(name.into(), path.into());
        Self::from_items(items)
    }

    fn from_items(items: HashMap<String, PathBuf>) -> Self {
        Self {
            inner: Arc::new(FileInner {
                items,
                cache: DashMap::new(),
                watchers: Mutex::new(HashMap::new()),
            }),
        }
    }

    fn path_of(&self, key: &str) -> Result<&Path, ConfigError> {
        self.inner
            .items
            .get(key)
            .map(PathBuf::as_path)
            .ok_or_else(|| ConfigError::KeyNotFound {
                source_name: SOURCE_NAME.to_owned(),
                key: key.to_owned(),
            })
    }

    /// 因订阅者通道已满而被丢弃的事件数。
    pub fn dropped_events(&self, key: &str) -> u64 {
        self.inner
            .watchers
            .lock()
            .get(key)
            .map_or(0, |entry| entry.hub.dropped.load(Ordering::Relaxed))
    }
}

#[async_trait]
impl KvConfig for FileConfig {
    fn name(&self) -> &str {
        SOURCE_NAME
    }

    async fn get(&self, key: &str) -> Result<ConfigResponse, ConfigError> {
        let path = self.path_of(key)?;
        match tokio::fs::read_to_string(path).await {
            Ok(content) => {
                self.inner.cache.insert(key.to_owned(), content.clone());
                Ok(ConfigResponse::new(content, EventType::Null))
            }
            Err(source) => match self.inner.cache.get(key) {
                Some(cached) => {
                    tracing::warn!(key, path = %path.display(), error = %source, "read config file failed, serving cached content");
                    Ok(ConfigResponse::new(cached.value().clone(), EventType::Null))
                }
                None => Err(ConfigError::Io {
                    path: path.to_path_buf(),
                    source,
                }),
            },
        }
    }

    async fn put(&self, _key: &str, _value: &str) -> Result<(), ConfigError> {
        Err(ConfigError::Unsupported {
            source_name: SOURCE_NAME.to_owned(),
            operation: "put",
        })
    }

    async fn del(&self, _key: &str) -> Result<(), ConfigError> {
        Err(ConfigError::Unsupported {
            source_name: SOURCE_NAME.to_owned(),
            operation: "del",
        })
    }

    async fn watch(&self, key: &str) -> Result<mpsc::Receiver<ConfigResponse>, ConfigError> {
        let path = self.path_of(key)?.to_path_buf();
        let initial = read_regular_file(&path).await?;

        let (tx, rx) = mpsc::channel(WATCH_CHANNEL_CAPACITY);
        let mut watchers = self.inner.watchers.lock();
        if let Some(entry) = watchers.get(key) {
            entry.hub.subscribers.lock().push(tx);
            return Ok(rx);
        }

        let (fs_watcher, fs_events) = watch_parent_dir(&path)?;
        let hub = Arc::new(WatchHub::default());
        hub.subscribers.lock().push(tx);
        watchers.insert(
            key.to_owned(),
            WatchEntry {
                hub: Arc::clone(&hub),
                _fs_watcher: fs_watcher,
            },
        );
        drop(watchers);

        self.inner.cache.insert(key.to_owned(), initial.clone());
        tracing::info!(key, path = %path.display(), "start watching config file");
        let forward = forward_file_events(
            Arc::downgrade(&self.inner),
            key.to_owned(),
            path,
            hub,
            fs_events,
            FileState::Present(initial),
        );
        detach(
            format!("config.file.watch.{key}"),
            forward,
            RecoveryOptions::new().with_error_log(),
        );
        Ok(rx)
    }
}

/// 校验路径为可读的普通文件并返回其内容。
async fn read_regular_file(path: &Path) -> Result<String, ConfigError> {
    let io_error = |source: io::Error| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    };
    let metadata = tokio::fs::metadata(path).await.map_err(io_error)?;
    if !metadata.is_file() {
        return Err(ConfigError::NotAFile {
            path: path.to_path_buf(),
        });
    }
    tokio::fs::read_to_string(path).await.map_err(io_error)
}

type FsEvents = mpsc::UnboundedReceiver<notify::Result<Event>>;

/// 在文件所在目录上注册非递归监听。
///
/// 直接监听文件本身时，删除会让内核一并移除该监听，之后重建的同名文件再无事件；
/// 挂在目录上则删除与重建都能收到。
fn watch_parent_dir(path: &Path) -> Result<(RecommendedWatcher, FsEvents), ConfigError> {
    let notify_error = |source: notify::Error| ConfigError::Notify {
        path: path.to_path_buf(),
        source,
    };
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };

    let (tx, rx) = mpsc::unbounded_channel();
    let mut watcher = notify::recommended_watcher(move |event: notify::Result<Event>| {
        // 接收端关闭说明转发任务已退出，事件无人关心。
        let _ = tx.send(event);
    })
    .map_err(notify_error)?;
    watcher
        .watch(dir, RecursiveMode::NonRecursive)
        .map_err(notify_error)?;
    Ok((watcher, rx))
}

/// 事件是否落在被监听的文件上。目录内其他文件的变化直接忽略。
fn touches(event: &Event, path: &Path) -> bool {
    let Some(name) = path.file_name() else {
        return false;
    };
    event.paths.iter().any(|p| p.file_name() == Some(name))
}

async fn forward_file_events(
    source: Weak<FileInner>,
    key: String,
    path: PathBuf,
    hub: Arc<WatchHub>,
    mut fs_events: FsEvents,
    mut state: FileState,
) {
    while let Some(result) = fs_events.recv().await {
        let event = match result {
            Ok(event) => event,
            Err(err) => {
                tracing::error!(key = %key, path = %path.display(), error = %err, "watch config file failed");
                continue;
            }
        };
        if !touches(&event, &path) {
            continue;
        }
        let Some(inner) = source.upgrade() else {
            break;
        };

        let update = match event.kind {
            EventKind::Remove(_) => removed(&key, &path, &mut state),
            EventKind::Create(_)
            | EventKind::Modify(_)
            | EventKind::Access(AccessKind::Close(AccessMode::Write)) => {
                match tokio::fs::read_to_string(&path).await {
                    Ok(content) => {
                        if matches!(&state, FileState::Present(previous) if *previous == content) {
                            continue;
                        }
                        tracing::info!(key = %key, path = %path.display(), "config file written");
                        inner.cache.insert(key.clone(), content.clone());
                        state = FileState::Present(content.clone());
                        Some(ConfigResponse::new(content, EventType::Put))
                    }
                    // 改名移走同样表现为 Modify。
                    Err(err) if err.kind() == io::ErrorKind::NotFound => {
                        removed(&key, &path, &mut state)
                    }
                    Err(err) => {
                        tracing::error!(key = %key, path = %path.display(), error = %err, "read watched config file failed");
                        None
                    }
                }
            }
            _ => None,
        };
        drop(inner);
        if let Some(update) = update {
            publish(&key, &hub, update);
        }
    }
    tracing::debug!(key = %key, "config source dropped, stop watching");
}

fn removed(key: &str, path: &Path, state: &mut FileState) -> Option<ConfigResponse> {
    if *state == FileState::Missing {
        return None;
    }
    tracing::info!(key, path = %path.display(), "config file removed");
    *state = FileState::Missing;
    Some(ConfigResponse::new(String::new(), EventType::Del))
}

/// 把事件推给全部订阅者。
///
/// # 契约说明（What）
/// - 通道已满：丢弃该订阅者的这一条事件并计入 `dropped`，其余订阅者照常收到；
/// - 通道已关闭：移除该订阅者。
fn publish(key: &str, hub: &WatchHub, event: ConfigResponse) {
    hub.subscribers.lock().retain(|tx| match tx.try_send(event.clone()) {
        Ok(()) => true,
        Err(TrySendError::Full(_)) => {
            let dropped = hub.dropped.fetch_add(1, Ordering::Relaxed) + 1;
            tracing::warn!(key, dropped, "config watch subscriber is full, event dropped");
            true
        }
        Err(TrySendError::Closed(_)) => false,
    });
}
