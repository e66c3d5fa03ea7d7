use thiserror::Error;

/// 取客户端失败的原因。
///
/// 关闭旧客户端的失败不在此列：它发生在后台，只体现在日志与 `clientDestroy.fail` 计数中。
#[derive(Debug, Error)]
pub enum BufferError<E> {
    /// 配置中没有该名称的目标地址，且缓存中也没有可用的旧客户端。
    #[error("client '{name}' is not configured")]
    NotConfigured { name: String },
    /// 构造器返回错误，缓存保持原状。
    #[error("build client '{name}' failed")]
    ConstructionFailed {
        name: String,
        #[source]
        source: E,
    },
}

impl<E> BufferError<E> {
    pub fn name(&self) -> &str {
        match self {
            BufferError::NotConfigured { name } | BufferError::ConstructionFailed { name, .. } => name,
        }
    }
}
