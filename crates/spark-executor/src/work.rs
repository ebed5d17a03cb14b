use std::fmt;

use crate::executor::ExecutorRef;

/// `WorkGuard` 在存活期间为执行器登记一份未完成工作。
///
/// # 教案式说明
/// - **意图 (Why)**：异步操作在服务侧执行时，调用方的执行器上暂时没有任何排队任务；
///   若此时执行上下文判定“无事可做”并退出 `run`，完成通知将无处投递。守卫把“尚未完成的操作”
///   显式计入执行器的工作量。
/// - **逻辑 (How)**：构造时调用 [`Executor::work_started`](crate::Executor::work_started)，
///   析构或 [`reset`](Self::reset) 时调用 `work_finished`，二者严格配对一次。
/// - **契约 (What)**：[`executor`](Self::executor) 返回受守护的执行器，常用于把收尾任务投递回同一执行器。
pub struct WorkGuard {
    executor: ExecutorRef,
    owns_work: bool,
}

impl WorkGuard {
    pub fn new(executor: ExecutorRef) -> Self {
        executor.work_started();
        Self {
            executor,
            owns_work: true,
        }
    }

    /// 受守护的执行器。
    pub fn executor(&self) -> &ExecutorRef {
        &self.executor
    }

    /// 守卫是否仍持有工作计数。
    pub fn owns_work(&self) -> bool {
        self.owns_work
    }

    /// 提前释放工作计数；重复调用无副作用。
    pub fn reset(&mut self) {
        if self.owns_work {
            self.owns_work = false;
            self.executor.work_finished();
        }
    }
}

impl Drop for WorkGuard {
    fn drop(&mut self) {
        self.reset();
    }
}

impl fmt::Debug for WorkGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkGuard")
            .field("executor", &self.executor.id())
            .field("owns_work", &self.owns_work)
            .finish()
    }
}
