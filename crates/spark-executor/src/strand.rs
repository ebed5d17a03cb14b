use std::{collections::VecDeque, fmt, sync::Arc, time::Duration};

use parking_lot::Mutex;
use tracing::trace;

use crate::executor::{Executor, ExecutorId, ExecutorRef, Task, call_stack};

/// 单次排空最多执行的任务数；超过后把剩余任务重新投递，避免长期占用底层工作线程。
const DRAIN_BUDGET: usize = 64;

/// `Strand` 是建立在任意执行器之上的串行执行上下文。
///
/// # 教案级注释
///
/// ## 意图 (Why)
/// - 服务状态只允许被一个执行流触碰；与其给每块状态加锁，不如把所有访问排进同一条“车道”，
///   由车道保证同一时刻至多一个任务在运行。
///
/// ## 逻辑 (How)
/// - 每个 Strand 维护自己的 FIFO 队列与 `scheduled` 标记；
/// - 队列由空转为非空且尚未调度时，向底层执行器投递一个“排空任务”；
/// - 排空任务在压入 Strand 调用栈帧后依次执行队列中的任务，预算耗尽或队列清空后退出；
/// - 退出由 `ResumeOnExit` 守卫收尾：队列仍非空则重新投递，否则清除 `scheduled`。
///   任务 panic 展开时守卫同样生效，车道不会卡死。
///
/// ## 契约 (What)
/// - 提交到同一 Strand 的任务互不重叠，且按提交的全序执行；
/// - 即使底层执行器由多个线程并行驱动，上述保证依然成立；
/// - 克隆得到的句柄指向同一条车道。
///
/// ## 注意事项 (Trade-offs)
/// - Strand 不拥有线程；若底层执行器停止驱动，排队任务也随之停滞。
#[derive(Clone)]
pub struct Strand {
    inner: Arc<StrandInner>,
}

struct StrandInner {
    id: ExecutorId,
    executor: ExecutorRef,
    lane: Mutex<Lane>,
}

#[derive(Default)]
struct Lane {
    queue: VecDeque<Task>,
    scheduled: bool,
}

impl Strand {
    /// 在 `executor` 之上创建新的串行车道。
    pub fn new(executor: ExecutorRef) -> Self {
        Self {
            inner: Arc::new(StrandInner {
                id: ExecutorId::next(),
                executor,
                lane: Mutex::new(Lane::default()),
            }),
        }
    }

    /// 底层执行器。
    pub fn inner_executor(&self) -> &ExecutorRef {
        &self.inner.executor
    }

    /// 若当前已在车道内则立即执行，否则排队。
    pub fn dispatch(&self, task: Task) {
        if self.running_in_this_thread() {
            task();
        } else {
            self.post(task);
        }
    }

    /// 车道中等待执行的任务数（不含正在执行的任务）。
    pub fn pending(&self) -> usize {
        self.inner.lane.lock().queue.len()
    }
}

impl StrandInner {
    fn schedule_drain(self: &Arc<Self>) {
        let drain = Drain(Some(Arc::clone(self)));
        self.executor.post(Box::new(move || drain.run()));
    }

    fn drain(self: Arc<Self>) {
        let _frame = call_stack::Frame::enter(self.id);
        let resume = ResumeOnExit(&self);
        for _ in 0..DRAIN_BUDGET {
            let next = self.lane.lock().queue.pop_front();
            match next {
                Some(task) => task(),
                None => break,
            }
        }
        drop(resume);
    }
}

/// 投递到底层执行器的排空任务。
///
/// 底层执行器未执行就丢弃它（例如 `shutdown`）时，车道中排队的任务随之丢弃，
/// 否则“队列中的任务持有车道句柄”会形成永远无法回收的环。
struct Drain(Option<Arc<StrandInner>>);

impl Drain {
    fn run(mut self) {
        if let Some(inner) = self.0.take() {
            inner.drain();
        }
    }
}

impl Drop for Drain {
    fn drop(&mut self) {
        let Some(inner) = self.0.take() else {
            return;
        };
        let discarded = {
            let mut lane = inner.lane.lock();
            lane.scheduled = false;
            std::mem::take(&mut lane.queue)
        };
        if !discarded.is_empty() {
            trace!(strand = %inner.id, discarded = discarded.len(), "strand drain discarded, pending tasks dropped");
        }
        drop(discarded);
    }
}

struct ResumeOnExit<'a>(&'a Arc<StrandInner>);

impl Drop for ResumeOnExit<'_> {
    fn drop(&mut self) {
        let reschedule = {
            let mut lane = self.0.lane.lock();
            if lane.queue.is_empty() {
                lane.scheduled = false;
                false
            } else {
                true
            }
        };
        if reschedule {
            trace!(strand = %self.0.id, "strand budget exhausted, rescheduling");
            self.0.schedule_drain();
        }
    }
}

impl Executor for Strand {
    fn id(&self) -> ExecutorId {
        self.inner.id
    }

    fn post(&self, task: Task) {
        let needs_drain = {
            let mut lane = self.inner.lane.lock();
            lane.queue.push_back(task);
            !std::mem::replace(&mut lane.scheduled, true)
        };
        if needs_drain {
            self.inner.schedule_drain();
        }
    }

    fn post_after(&self, delay: Duration, task: Task) {
        let strand = self.clone();
        self.inner
            .executor
            .post_after(delay, Box::new(move || strand.post(task)));
    }

    fn work_started(&self) {
        self.inner.executor.work_started();
    }

    fn work_finished(&self) {
        self.inner.executor.work_finished();
    }

    fn share(&self) -> ExecutorRef {
        Arc::new(self.clone())
    }
}

impl fmt::Debug for Strand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let lane = self.inner.lane.lock();
        f.debug_struct("Strand")
            .field("id", &self.inner.id)
            .field("executor", &self.inner.executor.id())
            .field("pending", &lane.queue.len())
            .field("scheduled", &lane.scheduled)
            .finish()
    }
}
