//! # spark-kit-errs
//!
//! ## 定位与职责（Why）
//! - RPC 响应普遍携带 `code`/`message` 字段，而服务实现更习惯直接返回 `Result`；
//!   本 crate 负责两者之间的翻译，让调用方与实现方都能“像函数调用一样”只处理错误。
//!
//! ## 模块划分（Where）
//! - [`coded`]：带错误码的错误类型 [`CodedError`]；
//! - [`code_book`]：错误码提取与摘要规则 [`CodeBook`]；
//! - [`filter`]：服务端/客户端两侧的 [`ErrToCodeFilter`]。

#![deny(unsafe_code)]

pub mod code_book;
pub mod coded;
pub mod filter;

pub use code_book::{CodeBook, DigestFn, default_digest};
pub use coded::CodedError;
pub use filter::{ClientCallError, CodeMessageCarrier, CodeMessageSetter, ErrToCodeFilter};
