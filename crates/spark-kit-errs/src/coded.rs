use thiserror::Error;

/// 携带业务错误码与可展示描述的错误。
///
/// # 教案式说明
/// - **意图（Why）**：服务实现通过返回 `CodedError`（或在错误链中包裹它）来声明响应码，
///   由 [`ErrToCodeFilter`](crate::ErrToCodeFilter) 写回响应体；
/// - **契约（What）**：`code` 为任意整数错误码，`message` 面向调用方展示，不应包含内部细节；
/// - **风险（Trade-offs）**：错误码的取值空间由业务自行约定，本类型不做校验。
#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[error("code: {code}, msg: {message}")]
pub struct CodedError {
    code: i64,
    message: String,
}

impl CodedError {
    pub fn new(code: impl Into<i64>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
        }
    }

    pub fn code(&self) -> i64 {
        self.code
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}
