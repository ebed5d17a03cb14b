use std::{
    cmp::Ordering as CmpOrdering,
    collections::{BinaryHeap, VecDeque},
    fmt,
    sync::Arc,
    time::{Duration, Instant},
};

use parking_lot::{Condvar, Mutex};
use tracing::trace;

use crate::executor::{Executor, ExecutorId, ExecutorRef, Task, call_stack};

/// FIFO 任务队列 + 定时器堆构成的执行上下文。
///
/// # 教案级注释
///
/// ## 意图 (Why)
/// - 为串行化服务与调用方提供一个可确定性驱动的调度器：测试可以在单线程上
///   [`run_until_idle`](Self::run_until_idle) 逐步推进，生产环境则由 [`ThreadPool`](crate::ThreadPool)
///   在多个线程上并行 [`run`](Self::run)。
///
/// ## 逻辑 (How)
/// - `outstanding` 统计排队任务、执行中任务、未到期定时器与 WorkGuard 的总数；
/// - `run` 在计数归零或 [`stop`](Self::stop) 后返回，期间若无就绪任务则在条件变量上等待，
///   等待超时点取最早到期的定时器；
/// - 任务执行期间压入调用栈帧，使 [`Executor::running_in_this_thread`] 可判定亲和性。
///
/// ## 契约 (What)
/// - 多个线程可同时调用 `run`，任务之间不保证互斥；
/// - 同一线程内提交的任务按提交顺序出队；
/// - 上下文被丢弃时尚未执行的任务随之析构，不会再运行。
///
/// ## 注意事项 (Trade-offs)
/// - 队列使用单把互斥锁保护，吞吐量不及无锁队列，但足以覆盖服务/流模式的调度需求。
#[derive(Clone)]
pub struct ExecutionContext {
    inner: Arc<ContextInner>,
}

struct ContextInner {
    id: ExecutorId,
    state: Mutex<ContextState>,
    wakeup: Condvar,
}

#[derive(Default)]
struct ContextState {
    ready: VecDeque<Task>,
    timers: BinaryHeap<TimerEntry>,
    next_seq: u64,
    outstanding: usize,
    stopped: bool,
}

struct TimerEntry {
    due: Instant,
    seq: u64,
    task: Task,
}

// `BinaryHeap` 为大顶堆，这里反转比较以便最早到期者位于堆顶；同一时刻按提交顺序出队。
impl Ord for TimerEntry {
    fn cmp(&self, other: &Self) -> CmpOrdering {
        other
            .due
            .cmp(&self.due)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

impl PartialOrd for TimerEntry {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for TimerEntry {
    fn eq(&self, other: &Self) -> bool {
        self.due == other.due && self.seq == other.seq
    }
}

impl Eq for TimerEntry {}

impl ContextState {
    fn promote_expired(&mut self, now: Instant) {
        while self.timers.peek().is_some_and(|entry| entry.due <= now) {
            if let Some(entry) = self.timers.pop() {
                self.ready.push_back(entry.task);
            }
        }
    }

    fn next_due(&self) -> Option<Instant> {
        self.timers.peek().map(|entry| entry.due)
    }
}

#[derive(Clone, Copy)]
enum Drive {
    Poll,
    Block { until: Option<Instant> },
}

impl ExecutionContext {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(ContextInner {
                id: ExecutorId::next(),
                state: Mutex::new(ContextState::default()),
                wakeup: Condvar::new(),
            }),
        }
    }

    /// 运行任务直到没有未完成工作或上下文被停止，返回执行的任务数。
    pub fn run(&self) -> usize {
        self.drive(Drive::Block { until: None })
    }

    /// 与 [`run`](Self::run) 相同，但最多阻塞 `timeout`。
    pub fn run_for(&self, timeout: Duration) -> usize {
        self.drive(Drive::Block {
            until: Some(Instant::now() + timeout),
        })
    }

    /// 执行所有已就绪的任务（含已到期的定时器），不等待未来的工作。
    ///
    /// 执行过程中新提交的任务同样会被运行，直到就绪队列为空。
    pub fn run_until_idle(&self) -> usize {
        self.drive(Drive::Poll)
    }

    /// 请求所有 `run` 调用尽快返回；排队任务保留，待 [`restart`](Self::restart) 后继续。
    pub fn stop(&self) {
        self.inner.state.lock().stopped = true;
        self.inner.wakeup.notify_all();
    }

    /// 停止上下文并丢弃所有排队任务与定时器，返回丢弃的任务数。
    ///
    /// 任务在锁外析构；析构过程中新投递的任务同样被丢弃。
    pub fn shutdown(&self) -> usize {
        self.stop();
        let mut dropped = 0;
        loop {
            let (ready, timers) = {
                let mut state = self.inner.state.lock();
                let ready = std::mem::take(&mut state.ready);
                let timers = std::mem::take(&mut state.timers);
                state.outstanding = state.outstanding.saturating_sub(ready.len() + timers.len());
                (ready, timers)
            };
            if ready.is_empty() && timers.is_empty() {
                break;
            }
            dropped += ready.len() + timers.len();
            drop(ready);
            drop(timers);
        }
        if dropped > 0 {
            trace!(executor = %self.inner.id, dropped, "pending tasks discarded");
        }
        self.inner.wakeup.notify_all();
        dropped
    }

    /// 清除停止标记。
    pub fn restart(&self) {
        self.inner.state.lock().stopped = false;
    }

    pub fn is_stopped(&self) -> bool {
        self.inner.state.lock().stopped
    }

    /// 当前未完成工作量（排队任务、执行中任务、定时器与 WorkGuard 之和）。
    pub fn outstanding_work(&self) -> usize {
        self.inner.state.lock().outstanding
    }

    fn drive(&self, mode: Drive) -> usize {
        let mut executed = 0;
        while let Some(task) = self.next_task(mode) {
            self.execute(task);
            executed += 1;
        }
        executed
    }

    fn next_task(&self, mode: Drive) -> Option<Task> {
        let mut state = self.inner.state.lock();
        loop {
            if state.stopped {
                return None;
            }
            let now = Instant::now();
            state.promote_expired(now);
            if let Some(task) = state.ready.pop_front() {
                return Some(task);
            }
            if state.outstanding == 0 {
                return None;
            }
            match mode {
                Drive::Poll => return None,
                Drive::Block { until } => {
                    if until.is_some_and(|limit| limit <= now) {
                        return None;
                    }
                    let wake_at = match (state.next_due(), until) {
                        (Some(due), Some(limit)) => Some(due.min(limit)),
                        (due, limit) => due.or(limit),
                    };
                    match wake_at {
                        Some(at) => {
                            let _ = self.inner.wakeup.wait_until(&mut state, at);
                        }
                        None => self.inner.wakeup.wait(&mut state),
                    }
                }
            }
        }
    }

    fn execute(&self, task: Task) {
        let _frame = call_stack::Frame::enter(self.inner.id);
        let _finished = FinishOnExit(&self.inner);
        task();
    }
}

impl ContextInner {
    fn finish_work(&self) {
        let mut state = self.state.lock();
        debug_assert!(state.outstanding > 0, "outstanding work underflow");
        state.outstanding = state.outstanding.saturating_sub(1);
        if state.outstanding == 0 {
            drop(state);
            self.wakeup.notify_all();
        }
    }
}

struct FinishOnExit<'a>(&'a ContextInner);

impl Drop for FinishOnExit<'_> {
    fn drop(&mut self) {
        self.0.finish_work();
    }
}

impl Default for ExecutionContext {
    fn default() -> Self {
        Self::new()
    }
}

impl Executor for ExecutionContext {
    fn id(&self) -> ExecutorId {
        self.inner.id
    }

    fn post(&self, task: Task) {
        {
            let mut state = self.inner.state.lock();
            state.outstanding += 1;
            state.ready.push_back(task);
        }
        self.inner.wakeup.notify_one();
    }

    fn post_after(&self, delay: Duration, task: Task) {
        if delay.is_zero() {
            self.post(task);
            return;
        }
        {
            let mut state = self.inner.state.lock();
            state.outstanding += 1;
            let seq = state.next_seq;
            state.next_seq += 1;
            state.timers.push(TimerEntry {
                due: Instant::now() + delay,
                seq,
                task,
            });
        }
        trace!(executor = %self.inner.id, delay_ms = delay.as_millis() as u64, "timer armed");
        // 正在限时等待的线程需要重新计算最早到期点。
        self.inner.wakeup.notify_all();
    }

    fn work_started(&self) {
        self.inner.state.lock().outstanding += 1;
    }

    fn work_finished(&self) {
        self.inner.finish_work();
    }

    fn share(&self) -> ExecutorRef {
        Arc::new(self.clone())
    }
}

impl fmt::Debug for ExecutionContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.state.lock();
        f.debug_struct("ExecutionContext")
            .field("id", &self.inner.id)
            .field("ready", &state.ready.len())
            .field("timers", &state.timers.len())
            .field("outstanding", &state.outstanding)
            .field("stopped", &state.stopped)
            .finish()
    }
}
