//! # 分离任务
//!
//! ## 核心意图（Why）
//! - 请求路径上派生的后台任务不应阻塞调用方，也不应因 panic 静默消失；
//! - 派生任务的日志需要能关联回发起方，因此新任务的 span 以 `follows_from` 指向调用方 span。
//!
//! ## 行为契约（What）
//! - [`detach`]/[`detach_on`] 立即返回可追踪的 [`JoinHandle`]，任务 panic 时句柄解析为 `None`；
//! - [`detach_and_wait`] 并发执行一组任务，全部结束后按任务顺序返回第一个错误。

use std::{future::Future, panic::AssertUnwindSafe};

use futures::{FutureExt, future::join_all};
use thiserror::Error;
use tokio::{runtime::Handle, task::JoinHandle};
use tracing::{Instrument, Span};

use crate::recovery::{RecoveryOptions, panic_message};

/// 在当前 Tokio 运行时上派生带 panic 恢复的任务。
///
/// # 教案式说明
/// - **契约（What）**：返回的句柄在任务正常结束时解析为 `Some(output)`，panic 时按 `opts`
///   执行恢复动作后解析为 `None`；句柄被丢弃不会取消任务；
/// - **前置条件**：必须在 Tokio 运行时上下文中调用，否则与 `tokio::spawn` 一样 panic；
///   不确定是否处于运行时内时请改用 [`detach_on`] 并显式传入句柄。
pub fn detach<F>(label: impl Into<String>, fut: F, opts: RecoveryOptions) -> JoinHandle<Option<F::Output>>
where
    F: Future + Send + 'static,
    F::Output: Send + 'static,
{
    detach_on(&Handle::current(), label, fut, opts)
}

/// 在指定运行时上派生带 panic 恢复的任务。
pub fn detach_on<F>(
    handle: &Handle,
    label: impl Into<String>,
    fut: F,
    opts: RecoveryOptions,
) -> JoinHandle<Option<F::Output>>
where
    F: Future + Send + 'static,
    F::Output: Send + 'static,
{
    let label = label.into();
    let span = tracing::info_span!("detach", task = %label);
    span.follows_from(Span::current());

    let guarded = async move {
        match AssertUnwindSafe(fut).catch_unwind().await {
            Ok(output) => Some(output),
            Err(payload) => {
                opts.recover(&label, payload.as_ref());
                None
            }
        }
    };
    handle.spawn(guarded.instrument(span))
}

/// [`detach_and_wait`] 的失败原因，`index` 为任务在输入序列中的位置。
#[derive(Debug, Error)]
pub enum ConcurrentError<E> {
    #[error("task {index} failed")]
    Task {
        index: usize,
        #[source]
        source: E,
    },
    #[error("task {index} panicked: {message}")]
    Panicked { index: usize, message: String },
    #[error("task {index} was cancelled")]
    Cancelled { index: usize },
}

/// 并发执行全部任务并等待其结束。
///
/// # 教案式说明
/// - **契约（What）**：每个任务独立派生到当前运行时；无论成败都会等到全部任务结束，
///   然后按输入顺序返回第一个失败。空序列直接返回 `Ok(())`；
/// - **风险（Trade-offs）**：某个任务失败不会取消其余任务，耗时由最慢的任务决定。
pub async fn detach_and_wait<I, F, E>(tasks: I) -> Result<(), ConcurrentError<E>>
where
    I: IntoIterator<Item = F>,
    F: Future<Output = Result<(), E>> + Send + 'static,
    E: Send + 'static,
{
    let parent = Span::current();
    let handles: Vec<_> = tasks
        .into_iter()
        .enumerate()
        .map(|(index, task)| {
            let span = tracing::debug_span!(parent: &parent, "detach_and_wait", index);
            tokio::spawn(task.instrument(span))
        })
        .collect();

    let mut first_failure = None;
    for (index, joined) in join_all(handles).await.into_iter().enumerate() {
        let failure = match joined {
            Ok(Ok(())) => continue,
            Ok(Err(source)) => ConcurrentError::Task { index, source },
            Err(err) if err.is_panic() => ConcurrentError::Panicked {
                index,
                message: panic_message(err.into_panic().as_ref()),
            },
            Err(_) => ConcurrentError::Cancelled { index },
        };
        if first_failure.is_none() {
            first_failure = Some(failure);
        }
    }

    match first_failure {
        Some(failure) => Err(failure),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    };
    use std::time::Duration;

    use super::*;
    use spark_kit_metrics::RecordingMetrics;

    #[derive(Debug, PartialEq, thiserror::Error)]
    #[error("boom {0}")]
    struct Boom(u8);

    #[tokio::test(flavor = "multi_thread")]
    async fn detached_task_yields_its_output() {
        let handle = detach("answer", async { 42 }, RecoveryOptions::new());
        assert_eq!(handle.await.expect("join"), Some(42));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn panic_is_recovered_and_counted() {
        let metrics = Arc::new(RecordingMetrics::new());
        let opts = RecoveryOptions::new().with_metrics(metrics.clone(), "detach.panic");
        let handle = detach(
            "explode",
            async {
                panic!("kaboom");
            },
            opts,
        );
        let out: Option<()> = handle.await.expect("join must not see the panic");
        assert!(out.is_none());
        assert_eq!(metrics.counter("detach.panic"), 1.0);
    }

    #[test]
    fn detach_on_explicit_runtime() {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(1)
            .build()
            .expect("runtime");
        let handle = detach_on(runtime.handle(), "outside", async { "done" }, RecoveryOptions::new());
        assert_eq!(runtime.block_on(handle).expect("join"), Some("done"));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn wait_runs_every_task() {
        let counter = Arc::new(AtomicUsize::new(0));
        let tasks = (0..5).map(|_| {
            let counter = Arc::clone(&counter);
            async move {
                tokio::time::sleep(Duration::from_millis(5)).await;
                counter.fetch_add(1, Ordering::SeqCst);
                Ok::<(), Boom>(())
            }
        });
        detach_and_wait(tasks).await.expect("all succeed");
        assert_eq!(counter.load(Ordering::SeqCst), 5);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn wait_reports_first_error_in_task_order() {
        let finished = Arc::new(AtomicUsize::new(0));
        let tasks = (0..4_u8).map(|i| {
            let finished = Arc::clone(&finished);
            async move {
                // 后面的任务先失败，返回值仍以输入顺序为准。
                tokio::time::sleep(Duration::from_millis(u64::from(4 - i) * 5)).await;
                finished.fetch_add(1, Ordering::SeqCst);
                if i >= 1 { Err(Boom(i)) } else { Ok(()) }
            }
        });
        let err = detach_and_wait(tasks).await.expect_err("must fail");
        assert!(matches!(err, ConcurrentError::Task { index: 1, source: Boom(1) }));
        assert_eq!(finished.load(Ordering::SeqCst), 4);
    }

    fn worker_died() -> Result<(), Boom> {
        panic!("worker died")
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn wait_turns_panic_into_error() {
        let tasks: Vec<futures::future::BoxFuture<'static, Result<(), Boom>>> = vec![
            Box::pin(async { Ok(()) }),
            Box::pin(async { worker_died() }),
        ];
        let err = detach_and_wait(tasks).await.expect_err("must fail");
        match err {
            ConcurrentError::Panicked { index, message } => {
                assert_eq!(index, 1);
                assert_eq!(message, "worker died");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn wait_on_empty_input_is_ok() {
        let tasks: Vec<futures::future::Ready<Result<(), Boom>>> = Vec::new();
        assert!(detach_and_wait(tasks).await.is_ok());
    }
}
