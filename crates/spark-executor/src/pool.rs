use std::{
    fmt,
    thread::{self, JoinHandle},
};

use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::{
    config::PoolConfig,
    context::ExecutionContext,
    error::ExecutorError,
    executor::{Executor, ExecutorRef},
    work::WorkGuard,
};

/// 由固定数量工作线程并行驱动的 [`ExecutionContext`]。
///
/// # 教案式说明
/// - **意图 (Why)**：串行化保证只有在“执行器被多个线程并行驱动”时才有检验价值；
///   线程池就是这种并行驱动的最小实现。
/// - **逻辑 (How)**：构造时持有一个 [`WorkGuard`]，使空闲的工作线程阻塞在 `run` 中等待新任务；
///   [`join`](Self::join) 释放守卫，等待剩余工作完成后回收线程。
/// - **契约 (What)**：
///   - `join` 会执行完所有已提交与已登记的工作；
///   - `Drop` 先 [`stop`](Self::stop) 再回收线程，未执行的任务随上下文析构；
///   - 在池内线程上丢弃线程池时跳过对自身的 join。
pub struct ThreadPool {
    context: ExecutionContext,
    guard: Mutex<Option<WorkGuard>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl ThreadPool {
    pub fn new(config: &PoolConfig) -> Result<Self, ExecutorError> {
        config.validate()?;
        let context = ExecutionContext::new();
        let guard = context.work_guard();
        let pool = Self {
            context,
            guard: Mutex::new(Some(guard)),
            workers: Mutex::new(Vec::with_capacity(config.threads)),
        };

        for index in 0..config.threads {
            let name = format!("{}-{index}", config.thread_name);
            let context = pool.context.clone();
            let worker = name.clone();
            let handle = thread::Builder::new()
                .name(name.clone())
                .spawn(move || {
                    let executed = context.run();
                    debug!(worker = %worker, executed, "worker exited");
                })
                .map_err(|source| ExecutorError::Spawn { name, source })?;
            pool.workers.lock().push(handle);
        }
        debug!(executor = %pool.context.id(), threads = config.threads, "thread pool started");
        Ok(pool)
    }

    /// 以 `threads` 个工作线程和默认线程名创建线程池。
    pub fn with_threads(threads: usize) -> Result<Self, ExecutorError> {
        Self::new(&PoolConfig::with_threads(threads))
    }

    /// 被驱动的执行上下文。
    pub fn context(&self) -> &ExecutionContext {
        &self.context
    }

    /// 类型擦除后的执行器句柄。
    pub fn executor(&self) -> ExecutorRef {
        self.context.share()
    }

    /// 立即停止所有工作线程，排队任务不再执行。
    pub fn stop(&self) {
        self.context.stop();
    }

    /// 释放池自身的工作守卫，等待所有工作完成后回收线程。
    pub fn join(&self) {
        self.guard.lock().take();
        self.join_workers();
    }

    fn join_workers(&self) {
        let current = thread::current().id();
        let workers = std::mem::take(&mut *self.workers.lock());
        for handle in workers {
            if handle.thread().id() == current {
                continue;
            }
            if handle.join().is_err() {
                warn!(executor = %self.context.id(), "worker thread panicked");
            }
        }
    }
}

impl Drop for ThreadPool {
    fn drop(&mut self) {
        self.context.stop();
        self.guard.lock().take();
        self.join_workers();
        self.context.shutdown();
    }
}

impl fmt::Debug for ThreadPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ThreadPool")
            .field("context", &self.context)
            .field("workers", &self.workers.lock().len())
            .finish()
    }
}
