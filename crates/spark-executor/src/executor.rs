use std::{
    cell::RefCell,
    fmt,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use crate::work::WorkGuard;

/// 可投递到执行器的单次任务。
pub type Task = Box<dyn FnOnce() + Send + 'static>;

/// 类型擦除后的共享执行器句柄。
pub type ExecutorRef = Arc<dyn Executor>;

/// 执行器的进程内唯一标识。
///
/// # 教案式说明
/// - **意图 (Why)**：执行器亲和性需要回答“当前线程是否正运行在某个执行器之内”，
///   仅凭线程 ID 无法区分同一线程上嵌套运行的上下文与 Strand，因此为每个执行器分配独立 ID。
/// - **契约 (What)**：ID 单调递增、永不复用；`0` 保留不用。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ExecutorId(u64);

impl ExecutorId {
    pub(crate) fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }

    /// 返回原始数值，便于写入结构化日志字段。
    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ExecutorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "exec-{}", self.0)
    }
}

/// `Executor` 定义调度器抽象：提交任务、延迟提交、未完成工作计数与亲和性探测。
///
/// # 设计背景（Why）
/// - 串行化服务与调用方各自拥有执行器，完成通知必须被投递回调用方选定的执行器；
///   因此执行器需对象安全，可被擦除为 [`ExecutorRef`] 在句柄与操作之间传递。
/// - `work_started`/`work_finished` 对应 “WorkGuard” 语义：只要计数非零，执行上下文就不会认为自己已空闲。
///
/// # 契约说明（What）
/// - `post`：任务不得在调用线程上内联执行，必须异步运行；
/// - `post_after`：到期后再按 `post` 语义运行，到期前同样计入未完成工作；
/// - `running_in_this_thread`：仅当当前线程正处于该执行器运行的任务之内时返回 `true`；
/// - `share`：返回指向同一执行器的 [`ExecutorRef`]，身份（`id`）保持不变。
///
/// # 风险提示（Trade-offs）
/// - 执行器本身不保证多个任务之间的互斥；需要全序与互斥时请使用 [`Strand`](crate::Strand)。
pub trait Executor: Send + Sync + 'static {
    /// 执行器标识。
    fn id(&self) -> ExecutorId;

    /// 异步提交任务。
    fn post(&self, task: Task);

    /// 在 `delay` 之后提交任务。
    fn post_after(&self, delay: Duration, task: Task);

    /// 登记一份未完成工作。
    fn work_started(&self);

    /// 注销一份未完成工作。
    fn work_finished(&self);

    /// 获取指向同一执行器的共享句柄。
    fn share(&self) -> ExecutorRef;

    /// 当前线程是否正运行在该执行器的任务中。
    fn running_in_this_thread(&self) -> bool {
        call_stack::contains(self.id())
    }

    /// 创建 WorkGuard，守卫存活期间执行器不会进入空闲。
    fn work_guard(&self) -> WorkGuard {
        WorkGuard::new(self.share())
    }
}

impl fmt::Debug for dyn Executor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Executor").field("id", &self.id()).finish()
    }
}

/// 线程局部的执行器调用栈。
///
/// 执行上下文运行任务、Strand 排空队列、Tokio 适配层执行闭包时各压入一帧；
/// 帧在离开作用域（含 panic 展开）时弹出。
pub(crate) mod call_stack {
    use super::{ExecutorId, RefCell};

    thread_local! {
        static FRAMES: RefCell<Vec<ExecutorId>> = const { RefCell::new(Vec::new()) };
    }

    pub(crate) struct Frame {
        id: ExecutorId,
    }

    impl Frame {
        pub(crate) fn enter(id: ExecutorId) -> Self {
            FRAMES.with(|frames| frames.borrow_mut().push(id));
            Self { id }
        }
    }

    impl Drop for Frame {
        fn drop(&mut self) {
            FRAMES.with(|frames| {
                let popped = frames.borrow_mut().pop();
                debug_assert_eq!(popped, Some(self.id), "executor frames must unwind in order");
            });
        }
    }

    pub(crate) fn contains(id: ExecutorId) -> bool {
        FRAMES.with(|frames| frames.borrow().contains(&id))
    }

    pub(crate) fn current() -> Option<ExecutorId> {
        FRAMES.with(|frames| frames.borrow().last().copied())
    }
}

/// 返回当前线程最内层正在运行的执行器 ID。
///
/// 在执行器之外（例如测试主线程直接调用）返回 `None`。
pub fn current_executor() -> Option<ExecutorId> {
    call_stack::current()
}
