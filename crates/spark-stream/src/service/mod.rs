//! 后台服务与其生命周期管理。

mod builder;
pub(crate) mod core;
mod teardown;

use std::{
    fmt,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
};

use bytes::Bytes;
use parking_lot::Mutex;
use spark_executor::{CompletionToken, Executor, ExecutorRef, Strand, WorkGuard};
use tracing::{debug, info};

use crate::{
    config::{ServiceConfig, TeardownMode},
    error::{ConfigError, StreamError},
    state::LoopState,
    stream::{DuplexStream, Operation, RangeReadStream, ReadStream, WriteStream, launch},
};

pub use builder::ServiceBuilder;
pub use teardown::{TeardownHandle, TeardownOutcome, TeardownReport};

use self::core::ServiceCore;

/// 服务的进程内唯一标识。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ServiceId(u64);

impl ServiceId {
    pub(crate) fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }

    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ServiceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "svc-{}", self.0)
    }
}

/// [`Service::buffer_op`] 观测到的缓冲区长度（清空之前）。
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct BufferSizes {
    pub input: usize,
    pub output: usize,
}

/// 服务状态的只读快照。
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ServiceSnapshot {
    pub service: ServiceId,
    /// 输出缓冲区中尚未被排空的字节。
    pub output: Bytes,
    /// 输入缓冲区中尚未被后台循环消费的字节。
    pub input: Bytes,
    /// `output[0]` 在生产日志中的绝对偏移。
    pub output_base: u64,
    pub consumed_total: u64,
    pub ops_count: u64,
    pub producer_finished: bool,
    pub loop_state: LoopState,
    /// 已在车道内执行的读写搬运次数。
    pub transfers: u64,
}

/// 服务的所有者句柄。
///
/// # 教案级注释
///
/// ## 意图 (Why)
/// - 所有者可能在任意线程上被丢弃，但服务的析构逻辑必须在服务车道内运行；
///   所有者因此从不直接析构服务，而是把“最后一个强引用”打包成任务送回车道。
///
/// ## 逻辑 (How)
/// - 强引用放在受互斥保护的槽中，[`teardown`](Self::teardown) 取走它，先到先得；
/// - 同时持有车道上的 [`WorkGuard`]，保证在收尾任务投递之前执行上下文不会因空闲而退出；
/// - 收尾任务投递后释放守卫；`Sync` 模式阻塞等待任务执行，已在车道内时直接内联执行。
///
/// ## 契约 (What)
/// - 收尾只发生一次，重复或并发调用 `teardown` 只有第一次返回句柄；
/// - 流句柄只持有弱引用，收尾后的所有操作都以 `DeadReference` 完成；
/// - 强引用保留且不设上限的后台循环在收尾时被请求停止，服务随最后一个节拍在车道内析构；
/// - `Drop` 按配置的 [`TeardownMode`] 执行收尾。
///
/// ## 注意事项 (Trade-offs)
/// - 异步收尾后若执行上下文不再被驱动（例如进程退出），服务不会在车道内析构；这是可接受的代价。
/// - 在只由当前线程驱动的执行上下文上使用 `Sync` 模式会死锁。
pub struct Service {
    id: ServiceId,
    strand: Strand,
    teardown_mode: TeardownMode,
    slot: Mutex<Option<Arc<ServiceCore>>>,
    guard: Mutex<Option<WorkGuard>>,
}

impl Service {
    /// 以 `config` 在 `executor` 之上创建服务。
    pub fn new(executor: ExecutorRef, config: ServiceConfig) -> Result<Self, ConfigError> {
        ServiceBuilder::new(executor).config(config).build()
    }

    pub fn builder(executor: ExecutorRef) -> ServiceBuilder {
        ServiceBuilder::new(executor)
    }

    pub(crate) fn from_core(
        core: Arc<ServiceCore>,
        strand: Strand,
        teardown_mode: TeardownMode,
    ) -> Self {
        let guard = strand.work_guard();
        debug!(service = %core.id(), strand = %strand.id(), "service created");
        Self {
            id: core.id(),
            strand,
            teardown_mode,
            slot: Mutex::new(Some(core)),
            guard: Mutex::new(Some(guard)),
        }
    }

    pub fn id(&self) -> ServiceId {
        self.id
    }

    /// 服务状态所在的串行车道。
    pub fn strand(&self) -> &Strand {
        &self.strand
    }

    fn core(&self) -> Option<Arc<ServiceCore>> {
        self.slot.lock().clone()
    }

    fn weak(&self) -> std::sync::Weak<ServiceCore> {
        self.slot
            .lock()
            .as_ref()
            .map(Arc::downgrade)
            .unwrap_or_default()
    }

    /// 启动后台循环；只有真正启动循环的调用返回 `true`。
    pub fn start(&self) -> bool {
        self.core().is_some_and(|core| core.start())
    }

    /// 请求后台循环在下一个节拍结束。
    pub fn stop(&self) {
        if let Some(core) = self.core() {
            core.request_stop();
        }
    }

    /// 后台循环状态；收尾之后返回 `None`。
    pub fn loop_state(&self) -> Option<LoopState> {
        self.core().map(|core| core.loop_state())
    }

    pub fn is_torn_down(&self) -> bool {
        self.slot.lock().is_none()
    }

    /// 把服务的强引用交还车道。
    ///
    /// 第一次调用返回 [`TeardownHandle`]，之后的调用返回 `None`。
    pub fn teardown(&self, mode: TeardownMode) -> Option<TeardownHandle> {
        let core = self.slot.lock().take()?;
        core.owner_released();
        let (handle, notifier) = TeardownHandle::new();
        let service = self.id;
        let task = move || {
            let outcome = match Arc::into_inner(core) {
                Some(core) => {
                    drop(core);
                    TeardownOutcome::Destroyed
                }
                None => TeardownOutcome::Deferred,
            };
            debug!(service = %service, ?outcome, "teardown task finished");
            notifier.notify(outcome);
        };

        let inline = mode == TeardownMode::Sync && self.strand.running_in_this_thread();
        info!(service = %self.id, ?mode, inline, "teardown requested");
        if inline {
            task();
        } else {
            self.strand.post(Box::new(task));
        }
        self.guard.lock().take();

        if mode == TeardownMode::Sync {
            handle.wait();
        }
        Some(handle)
    }

    /// 排空式读句柄。
    pub fn read_stream(&self, caller: ExecutorRef) -> ReadStream {
        ReadStream::new(caller, self.weak())
    }

    /// 读取生产日志 `[start, end)` 的区间读句柄。
    pub fn range_stream(&self, caller: ExecutorRef, start: u64, end: u64) -> RangeReadStream {
        RangeReadStream::new(caller, self.weak(), start, end)
    }

    /// 追加式写句柄。
    pub fn write_stream(&self, caller: ExecutorRef) -> WriteStream {
        WriteStream::new(caller, self.weak())
    }

    pub fn duplex_stream(&self, caller: ExecutorRef) -> DuplexStream {
        DuplexStream::new(caller, self.weak())
    }

    /// 在车道内按需清空输入/输出缓冲区，交付清空前观测到的长度。
    pub fn buffer_op<K>(
        &self,
        caller: ExecutorRef,
        clear_in: bool,
        clear_out: bool,
        token: K,
    ) -> K::Output
    where
        K: CompletionToken<Result<BufferSizes, StreamError>>,
    {
        let service = self.weak();
        token.initiate(|handler| {
            launch(
                Operation {
                    name: "buffer_op",
                    caller,
                    service,
                    input: (),
                },
                handler,
                |(), error| Err(error),
                move |core, ()| Ok(core.buffer_op(clear_in, clear_out)),
            );
        })
    }

    /// 在车道内采集服务快照。
    pub fn snapshot<K>(&self, caller: ExecutorRef, token: K) -> K::Output
    where
        K: CompletionToken<Result<ServiceSnapshot, StreamError>>,
    {
        let service = self.weak();
        token.initiate(|handler| {
            launch(
                Operation {
                    name: "snapshot",
                    caller,
                    service,
                    input: (),
                },
                handler,
                |(), error| Err(error),
                |core, ()| Ok(core.snapshot()),
            );
        })
    }
}

impl Drop for Service {
    fn drop(&mut self) {
        self.teardown(self.teardown_mode);
    }
}

impl fmt::Debug for Service {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Service")
            .field("id", &self.id)
            .field("strand", &self.strand.id())
            .field("teardown_mode", &self.teardown_mode)
            .field("torn_down", &self.is_torn_down())
            .finish()
    }
}
