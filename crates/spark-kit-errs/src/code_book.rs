//! # CodeBook：错误到 (code, message) 的翻译规则
//!
//! ## 核心意图（Why）
//! - 对外只暴露可展示的描述，内部细节以摘要值的形式附带，方便排障时在日志中反查；
//! - 成功码、未知错误码、摘要描述与摘要函数都可以按服务定制。
//!
//! ## 行为契约（What）
//! - [`CodeBook::extract_code_message`]：不附带摘要；
//! - [`CodeBook::extract_code_message_digest`]：错误本身就是 [`CodedError`] 时原样返回，
//!   否则在描述后追加 `"<摘要描述>: <摘要值>"`；
//! - 返回的描述总是单行，换行符被转义为 `\n` 两个字符。
//!
//! ## 设计取舍（Trade-offs）
//! - 规则以实例形式持有，而不是进程级全局变量，不同过滤器可以使用不同规则。

use std::{error::Error, fmt, sync::Arc};

use sha2::{Digest, Sha256};

use crate::coded::CodedError;

/// 错误摘要函数。
pub type DigestFn = Arc<dyn Fn(&(dyn Error + 'static)) -> String + Send + Sync>;

/// 错误码翻译规则。
#[derive(Clone)]
pub struct CodeBook {
    success_code: i64,
    success_message: String,
    undefined_code: i64,
    undefined_message: String,
    digest_description: String,
    digest: DigestFn,
}

impl Default for CodeBook {
    fn default() -> Self {
        Self {
            success_code: 0,
            success_message: "success".to_owned(),
            undefined_code: -1,
            undefined_message: "unknown error".to_owned(),
            digest_description: "digest code".to_owned(),
            digest: Arc::new(default_digest),
        }
    }
}

impl fmt::Debug for CodeBook {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CodeBook")
            .field("success_code", &self.success_code)
            .field("success_message", &self.success_message)
            .field("undefined_code", &self.undefined_code)
            .field("undefined_message", &self.undefined_message)
            .field("digest_description", &self.digest_description)
            .finish_non_exhaustive()
    }
}

impl CodeBook {
    pub fn new() -> Self {
        Self::default()
    }

    /// 设置成功码与描述，默认 `0` / `"success"`。
    pub fn with_success(mut self, code: impl Into<i64>, message: impl Into<String>) -> Self {
        self.success_code = code.into();
        self.success_message = message.into();
        self
    }

    /// 设置未知错误的错误码与描述，默认 `-1` / `"unknown error"`。
    pub fn with_undefined_error(mut self, code: impl Into<i64>, message: impl Into<String>) -> Self {
        self.undefined_code = code.into();
        self.undefined_message = message.into();
        self
    }

    /// 不暴露具体错误时，摘要值前的描述名，默认 `"digest code"`。
    pub fn with_digest_description(mut self, description: impl Into<String>) -> Self {
        self.digest_description = description.into();
        self
    }

    /// 替换摘要函数。
    pub fn with_digest_function<F>(mut self, digest: F) -> Self
    where
        F: Fn(&(dyn Error + 'static)) -> String + Send + Sync + 'static,
    {
        self.digest = Arc::new(digest);
        self
    }

    pub fn success_code(&self) -> i64 {
        self.success_code
    }

    /// 提取错误码与描述，描述不附带摘要。
    ///
    /// - `None`：返回成功码与成功描述；
    /// - 错误链中存在 [`CodedError`]：返回其错误码与描述；
    /// - 否则：返回未知错误码与未知错误描述。
    pub fn extract_code_message(&self, err: Option<&(dyn Error + 'static)>) -> (i64, String) {
        let Some(err) = err else {
            return (self.success_code, single_line(&self.success_message));
        };
        match find_coded(err) {
            Some(coded) => (coded.code(), single_line(coded.message())),
            None => (self.undefined_code, single_line(&self.undefined_message)),
        }
    }

    /// 提取错误码与描述，对被包裹的错误追加完整信息的摘要。
    pub fn extract_code_message_digest(
        &self,
        err: Option<&(dyn Error + 'static)>,
    ) -> (i64, String) {
        let Some(err) = err else {
            return (self.success_code, single_line(&self.success_message));
        };
        if let Some(coded) = err.downcast_ref::<CodedError>() {
            return (coded.code(), single_line(coded.message()));
        }

        let digest = (self.digest)(err);
        let (code, message) = match find_coded(err) {
            Some(coded) => (coded.code(), coded.message()),
            None => (self.undefined_code, self.undefined_message.as_str()),
        };
        let message = format!("{message}, {}: {digest}", self.digest_description);
        (code, single_line(&message))
    }
}

/// 默认摘要：对错误链全文做 SHA-256，取前 4 字节的十六进制。
pub fn default_digest(err: &(dyn Error + 'static)) -> String {
    let mut hasher = Sha256::new();
    hasher.update(chain_text(err).as_bytes());
    let digest = hasher.finalize();
    hex::encode(&digest[..4])
}

fn chain_text(err: &(dyn Error + 'static)) -> String {
    let mut text = err.to_string();
    let mut current = err.source();
    while let Some(source) = current {
        text.push_str(": ");
        text.push_str(&source.to_string());
        current = source.source();
    }
    text
}

fn find_coded<'a>(err: &'a (dyn Error + 'static)) -> Option<&'a CodedError> {
    let mut current = Some(err);
    while let Some(candidate) = current {
        if let Some(coded) = candidate.downcast_ref::<CodedError>() {
            return Some(coded);
        }
        current = candidate.source();
    }
    None
}

fn single_line(s: &str) -> String {
    s.replace('\n', "\\n")
}
