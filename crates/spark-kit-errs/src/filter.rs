//! # ErrToCodeFilter：错误与响应码之间的双向翻译
//!
//! ## 角色定位（Why）
//! - **服务端**：处理函数返回错误时，把错误翻译为响应体中的 `code`/`message`，RPC 层面返回成功；
//! - **客户端**：响应体中的 `code` 非成功时，把它还原为 [`CodedError`]，调用方只需判断 `Result`。
//!
//! ## 行为契约（What）
//! - 响应类型通过 [`CodeMessageCarrier`] 暴露读写入口，由业务为每个响应结构体实现；
//! - 可选的 [`CodeMessageSetter`] 钩子优先于默认写入逻辑，返回 `true` 表示钩子接管，
//!   此时错误不再被吸收，原样交还框架层；
//! - 服务端翻译使用 [`CodeBook::extract_code_message_digest`]，不向调用方泄露内部错误细节。

use std::{any::Any, error::Error, fmt, future::Future, sync::Arc};

use thiserror::Error;

use crate::{code_book::CodeBook, coded::CodedError};

/// 携带 `code`/`message` 字段的响应体。
pub trait CodeMessageCarrier {
    /// 读取响应码与描述。
    fn code_message(&self) -> (i64, &str);

    /// 写入响应码与描述。
    fn set_code_message(&mut self, code: i64, message: String);
}

/// 自定义写入钩子：参数依次为响应体、响应码、描述；返回 `true` 表示已完成写入。
pub type CodeMessageSetter = Arc<dyn Fn(&mut dyn Any, i64, &str) -> bool + Send + Sync>;

/// 客户端调用失败的两种来源。
#[derive(Debug, Error)]
pub enum ClientCallError<E> {
    /// 框架层错误（网络、超时、编解码），原样透传。
    #[error("rpc call failed: {0}")]
    Framework(#[source] E),
    /// 对端返回了非成功响应码。
    #[error(transparent)]
    Coded(#[from] CodedError),
}

/// 服务端/客户端共用的错误码翻译过滤器。
#[derive(Clone, Default)]
pub struct ErrToCodeFilter {
    book: CodeBook,
    setter: Option<CodeMessageSetter>,
}

impl fmt::Debug for ErrToCodeFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ErrToCodeFilter")
            .field("book", &self.book)
            .field("has_setter", &self.setter.is_some())
            .finish()
    }
}

impl ErrToCodeFilter {
    pub fn new(book: CodeBook) -> Self {
        Self { book, setter: None }
    }

    /// 安装自定义写入钩子。
    pub fn with_setter<F>(mut self, setter: F) -> Self
    where
        F: Fn(&mut dyn Any, i64, &str) -> bool + Send + Sync + 'static,
    {
        self.setter = Some(Arc::new(setter));
        self
    }

    pub fn code_book(&self) -> &CodeBook {
        &self.book
    }

    /// 服务端过滤：执行处理函数，错误被翻译进响应体后以成功返回。
    ///
    /// # 教案式说明
    /// - **契约（What）**：处理函数成功时原样返回；失败时构造 `Rsp::default()`，
    ///   先交给钩子：钩子返回 `true` 时直接返回原错误 `Err(err)`，由框架层按错误处理；
    ///   钩子未处理再写入摘要后的 code/message，记录一条 warn 日志并以 `Ok(rsp)` 返回；
    /// - **风险（Trade-offs）**：错误被吸收后框架层看到的是成功调用，框架自身的错误统计将不再包含这类失败。
    pub async fn serve<Req, Rsp, E, F, Fut>(&self, req: Req, next: F) -> Result<Rsp, E>
    where
        F: FnOnce(Req) -> Fut,
        Fut: Future<Output = Result<Rsp, E>>,
        Rsp: CodeMessageCarrier + Default + 'static,
        E: Error + 'static,
    {
        let err = match next(req).await {
            Ok(rsp) => return Ok(rsp),
            Err(err) => err,
        };

        let source: &(dyn Error + 'static) = &err;
        let (code, message) = self.book.extract_code_message_digest(Some(source));
        let mut rsp = Rsp::default();
        if let Some(setter) = &self.setter {
            if setter(&mut rsp as &mut dyn Any, code, &message) {
                return Err(err);
            }
        }

        tracing::warn!(code, msg = %message, error = %err, "err_to_code 转换");
        rsp.set_code_message(code, message);
        Ok(rsp)
    }

    /// 客户端过滤：框架错误原样透传，非成功响应码还原为 [`CodedError`]。
    pub async fn call<Req, Rsp, E, F, Fut>(
        &self,
        req: Req,
        next: F,
    ) -> Result<Rsp, ClientCallError<E>>
    where
        F: FnOnce(Req) -> Fut,
        Fut: Future<Output = Result<Rsp, E>>,
        Rsp: CodeMessageCarrier,
    {
        let rsp = next(req).await.map_err(ClientCallError::Framework)?;
        let (code, message) = rsp.code_message();
        if code == self.book.success_code() {
            return Ok(rsp);
        }
        tracing::debug!(code, msg = %message, "code_to_err 转换");
        Err(ClientCallError::Coded(CodedError::new(code, message)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicI64, Ordering};
    use tracing_test::traced_test;

    #[derive(Debug, Default, PartialEq)]
    struct EchoRsp {
        code: i32,
        msg: String,
        body: String,
    }

    impl CodeMessageCarrier for EchoRsp {
        fn code_message(&self) -> (i64, &str) {
            (i64::from(self.code), &self.msg)
        }

        fn set_code_message(&mut self, code: i64, message: String) {
            self.code = code as i32;
            self.msg = message;
        }
    }

    #[derive(Debug, thiserror::Error)]
    #[error("transport closed")]
    struct TransportClosed;

    #[tokio::test]
    async fn serve_passes_success_through() {
        let filter = ErrToCodeFilter::default();
        let rsp = filter
            .serve("ping", |req| async move {
                Ok::<_, CodedError>(EchoRsp {
                    body: req.to_owned(),
                    ..EchoRsp::default()
                })
            })
            .await
            .expect("success");
        assert_eq!(rsp.body, "ping");
        assert_eq!(rsp.code, 0);
    }

    #[tokio::test]
    #[traced_test]
    async fn serve_translates_error_into_response() {
        let filter = ErrToCodeFilter::default();
        let rsp: EchoRsp = filter
            .serve((), |_| async { Err(CodedError::new(404, "not found")) })
            .await
            .expect("error absorbed");
        assert_eq!(rsp.code, 404);
        assert_eq!(rsp.msg, "not found");
        assert!(logs_contain("err_to_code"));
    }

    #[tokio::test]
    #[traced_test]
    async fn handled_by_setter_hook_returns_original_error() {
        let seen = Arc::new(AtomicI64::new(0));
        let hook_seen = Arc::clone(&seen);
        let filter = ErrToCodeFilter::default().with_setter(move |rsp, code, _msg| {
            match rsp.downcast_mut::<EchoRsp>() {
                Some(rsp) => {
                    rsp.code = code as i32;
                    hook_seen.store(code, Ordering::SeqCst);
                    true
                }
                None => false,
            }
        });
        let err = filter
            .serve((), |_| async { Err::<EchoRsp, _>(CodedError::new(10, "x")) })
            .await
            .expect_err("hook hands the error back");
        assert_eq!(err.code(), 10);
        assert_eq!(seen.load(Ordering::SeqCst), 10);
        assert!(!logs_contain("err_to_code"));
    }

    #[tokio::test]
    async fn unhandled_by_setter_hook_falls_back_to_default_write() {
        let filter = ErrToCodeFilter::default().with_setter(|_rsp, _code, _msg| false);
        let rsp: EchoRsp = filter
            .serve((), |_| async { Err(CodedError::new(10, "x")) })
            .await
            .expect("error absorbed");
        assert_eq!(rsp.code, 10);
        assert_eq!(rsp.msg, "x");
    }

    #[tokio::test]
    async fn call_restores_coded_error() {
        let filter = ErrToCodeFilter::default();
        let result = filter
            .call((), |_| async {
                Ok::<_, TransportClosed>(EchoRsp {
                    code: 1001,
                    msg: "quota exceeded".into(),
                    body: String::new(),
                })
            })
            .await;
        match result {
            Err(ClientCallError::Coded(err)) => {
                assert_eq!(err.code(), 1001);
                assert_eq!(err.message(), "quota exceeded");
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[tokio::test]
    async fn call_keeps_framework_error() {
        let filter = ErrToCodeFilter::default();
        let result = filter
            .call((), |_| async { Err::<EchoRsp, _>(TransportClosed) })
            .await;
        assert!(matches!(result, Err(ClientCallError::Framework(TransportClosed))));
    }

    #[tokio::test]
    async fn call_accepts_configured_success_code() {
        let filter = ErrToCodeFilter::new(CodeBook::new().with_success(200, "ok"));
        let rsp = filter
            .call((), |_| async {
                Ok::<_, TransportClosed>(EchoRsp {
                    code: 200,
                    msg: "ok".into(),
                    body: "payload".into(),
                })
            })
            .await
            .expect("success code");
        assert_eq!(rsp.body, "payload");
    }
}
