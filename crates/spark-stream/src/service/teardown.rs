use std::{
    fmt,
    future::Future,
    pin::Pin,
    sync::Arc,
    task::{Context, Poll},
    time::Duration,
};

use futures::task::AtomicWaker;
use parking_lot::{Condvar, Mutex};

use crate::service::ServiceId;

/// 服务析构时交给 `on_teardown` 回调的报告。
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TeardownReport {
    pub service: ServiceId,
    /// 析构是否发生在服务自己的串行车道内。
    pub on_serializer: bool,
    /// 执行析构的线程名。
    pub thread: Option<String>,
    /// 后台循环已完成的节拍数。
    pub ops_completed: u64,
}

pub(crate) type TeardownCallback = Box<dyn FnOnce(TeardownReport) + Send + 'static>;

/// 收尾任务的执行结果。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TeardownOutcome {
    /// 收尾任务释放了最后一个强引用，服务已在车道内析构。
    Destroyed,
    /// 仍有在途操作或后台循环持有服务，析构推迟到它们释放引用时发生。
    Deferred,
    /// 收尾任务未执行即被丢弃（例如执行上下文先一步停止）。
    Abandoned,
}

struct Signal {
    outcome: Mutex<Option<TeardownOutcome>>,
    ready: Condvar,
    waker: AtomicWaker,
}

/// 等待收尾任务执行的句柄。
///
/// # 教案式说明
/// - **意图 (Why)**：异步收尾立即返回，但测试与有序关停需要知道“收尾任务何时跑完”；
///   句柄同时支持阻塞等待与 `.await`。
/// - **逻辑 (How)**：结果写入共享槽后依次唤醒条件变量与 [`AtomicWaker`]，
///   阻塞等待方与异步等待方互不干扰。
/// - **契约 (What)**：结果只写入一次；收尾任务被丢弃时结果为 [`TeardownOutcome::Abandoned`]，
///   等待方不会永久阻塞。
#[derive(Clone)]
pub struct TeardownHandle {
    signal: Arc<Signal>,
}

impl TeardownHandle {
    pub(crate) fn new() -> (Self, TeardownNotifier) {
        let signal = Arc::new(Signal {
            outcome: Mutex::new(None),
            ready: Condvar::new(),
            waker: AtomicWaker::new(),
        });
        let notifier = TeardownNotifier {
            signal: Some(Arc::clone(&signal)),
        };
        (Self { signal }, notifier)
    }

    pub fn outcome(&self) -> Option<TeardownOutcome> {
        *self.signal.outcome.lock()
    }

    pub fn is_finished(&self) -> bool {
        self.outcome().is_some()
    }

    /// 阻塞直到收尾任务执行完毕。
    ///
    /// 若服务车道只由当前线程驱动，调用本方法会死锁。
    pub fn wait(&self) -> TeardownOutcome {
        let mut outcome = self.signal.outcome.lock();
        loop {
            if let Some(value) = *outcome {
                return value;
            }
            self.signal.ready.wait(&mut outcome);
        }
    }

    pub fn wait_timeout(&self, timeout: Duration) -> Option<TeardownOutcome> {
        let mut outcome = self.signal.outcome.lock();
        if outcome.is_none() {
            let _ = self
                .signal
                .ready
                .wait_while_for(&mut outcome, |value| value.is_none(), timeout);
        }
        *outcome
    }
}

impl Future for TeardownHandle {
    type Output = TeardownOutcome;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<TeardownOutcome> {
        if let Some(value) = self.outcome() {
            return Poll::Ready(value);
        }
        self.signal.waker.register(cx.waker());
        match self.outcome() {
            Some(value) => Poll::Ready(value),
            None => Poll::Pending,
        }
    }
}

impl fmt::Debug for TeardownHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TeardownHandle")
            .field("outcome", &self.outcome())
            .finish()
    }
}

/// 收尾任务持有的通知端；未通知即被丢弃时报告 [`TeardownOutcome::Abandoned`]。
pub(crate) struct TeardownNotifier {
    signal: Option<Arc<Signal>>,
}

impl TeardownNotifier {
    pub(crate) fn notify(mut self, outcome: TeardownOutcome) {
        self.publish(outcome);
    }

    fn publish(&mut self, outcome: TeardownOutcome) {
        if let Some(signal) = self.signal.take() {
            *signal.outcome.lock() = Some(outcome);
            signal.ready.notify_all();
            signal.waker.wake();
        }
    }
}

impl Drop for TeardownNotifier {
    fn drop(&mut self) {
        self.publish(TeardownOutcome::Abandoned);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dropped_notifier_reports_abandoned() {
        let (handle, notifier) = TeardownHandle::new();
        assert!(!handle.is_finished());
        drop(notifier);
        assert_eq!(handle.wait(), TeardownOutcome::Abandoned);
    }

    #[test]
    fn handle_resolves_as_future() {
        let (handle, notifier) = TeardownHandle::new();
        let waiter = std::thread::spawn(move || futures::executor::block_on(handle));
        notifier.notify(TeardownOutcome::Destroyed);
        assert_eq!(waiter.join().expect("等待线程不应 panic"), TeardownOutcome::Destroyed);
    }

    #[test]
    fn wait_timeout_expires_while_pending() {
        let (handle, _notifier) = TeardownHandle::new();
        assert_eq!(handle.wait_timeout(Duration::from_millis(5)), None);
    }
}
