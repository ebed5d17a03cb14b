use std::{
    fmt,
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use tokio::runtime::Handle;

use crate::{
    error::ExecutorError,
    executor::{Executor, ExecutorId, ExecutorRef, Task, call_stack},
};

/// 把 Tokio 运行时适配为 [`Executor`]。
///
/// # 教案式说明
/// - **意图 (Why)**：调用方可能本身就运行在 Tokio 之上，完成通知应当回到 Tokio 的工作线程，
///   而不是强迫调用方另起一个 [`ExecutionContext`](crate::ExecutionContext)。
/// - **逻辑 (How)**：`post` 通过 `spawn` 投递，`post_after` 先 `tokio::time::sleep` 再执行；
///   闭包执行期间压入调用栈帧，保证 [`Executor::running_in_this_thread`] 语义一致。
/// - **契约 (What)**：Tokio 运行时自行管理生命周期，`work_started`/`work_finished`
///   仅维护一份可观测的计数，不影响运行时退出。
#[derive(Clone)]
pub struct TokioExecutor {
    inner: Arc<TokioInner>,
}

struct TokioInner {
    id: ExecutorId,
    handle: Handle,
    outstanding: AtomicUsize,
}

impl TokioExecutor {
    pub fn new(handle: Handle) -> Self {
        Self {
            inner: Arc::new(TokioInner {
                id: ExecutorId::next(),
                handle,
                outstanding: AtomicUsize::new(0),
            }),
        }
    }

    /// 基于当前线程所在的 Tokio 运行时创建执行器。
    pub fn current() -> Result<Self, ExecutorError> {
        Handle::try_current()
            .map(Self::new)
            .map_err(|_| ExecutorError::NoRuntime)
    }

    /// 已登记但尚未完成的工作数。
    pub fn outstanding_work(&self) -> usize {
        self.inner.outstanding.load(Ordering::Acquire)
    }

    fn wrap(&self, task: Task) -> impl FnOnce() + Send + 'static {
        let inner = Arc::clone(&self.inner);
        inner.outstanding.fetch_add(1, Ordering::AcqRel);
        move || {
            {
                let _frame = call_stack::Frame::enter(inner.id);
                task();
            }
            inner.outstanding.fetch_sub(1, Ordering::AcqRel);
        }
    }
}

impl Executor for TokioExecutor {
    fn id(&self) -> ExecutorId {
        self.inner.id
    }

    fn post(&self, task: Task) {
        let run = self.wrap(task);
        self.inner.handle.spawn(async move { run() });
    }

    fn post_after(&self, delay: Duration, task: Task) {
        let run = self.wrap(task);
        self.inner.handle.spawn(async move {
            tokio::time::sleep(delay).await;
            run();
        });
    }

    fn work_started(&self) {
        self.inner.outstanding.fetch_add(1, Ordering::AcqRel);
    }

    fn work_finished(&self) {
        self.inner.outstanding.fetch_sub(1, Ordering::AcqRel);
    }

    fn share(&self) -> ExecutorRef {
        Arc::new(self.clone())
    }
}

impl fmt::Debug for TokioExecutor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokioExecutor")
            .field("id", &self.inner.id)
            .field("outstanding", &self.outstanding_work())
            .finish()
    }
}
