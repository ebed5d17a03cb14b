use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicU64, Ordering},
    },
    thread,
};

use bytes::Bytes;
use parking_lot::Mutex;
use spark_executor::{Executor, Strand};
use tracing::{debug, info, trace, warn};

use crate::{
    completion::Completion,
    config::{LoopRetention, ServiceConfig},
    error::StreamError,
    service::{
        BufferSizes, ServiceId, ServiceSnapshot,
        teardown::{TeardownCallback, TeardownReport},
    },
    state::{AtomicLoopState, LoopState, SerializedCell, ServiceBuffers},
    stream::RangeCursor,
    workload::Workload,
};

struct CoreState {
    buffers: ServiceBuffers,
    workload: Box<dyn Workload>,
}

/// 服务共享状态与后台循环。
///
/// # 教案级注释
///
/// ## 意图 (Why)
/// - 服务是一个长期存活的后台参与者：它按节拍自主修改缓冲区，同时被多个流句柄并发访问；
///   所有可变状态都被钉在 `strand` 上，流句柄与所有者只能以“投递任务”的方式间接触碰它。
///
/// ## 逻辑 (How)
/// - 缓冲区与工作负载位于 [`SerializedCell`] 中，任何访问都要求当前线程运行在 `strand` 内；
/// - 后台循环由一串 `Strand::post_after` 定时任务构成，每个节拍根据 [`LoopRetention`]
///   捕获强引用或弱引用，最后一个节拍不再捕获，使服务在无人持有时可以析构；
/// - `transfer_*` 系列方法即流操作在车道内执行的“搬运循环”，它们只产出 [`Completion`]，
///   不关心结果如何交付。
///
/// ## 契约 (What)
/// - `start` 幂等，只有真正启动循环的调用返回 `true`；
/// - 析构时构造 [`TeardownReport`] 交给注册的回调；析构不在车道内发生时额外记录 `warn`。
pub(crate) struct ServiceCore {
    id: ServiceId,
    strand: Strand,
    config: ServiceConfig,
    state: SerializedCell<CoreState>,
    loop_state: AtomicLoopState,
    stop_requested: AtomicBool,
    transfers: AtomicU64,
    on_teardown: Mutex<Option<TeardownCallback>>,
}

impl ServiceCore {
    pub(crate) fn new(
        id: ServiceId,
        strand: Strand,
        config: ServiceConfig,
        workload: Box<dyn Workload>,
        on_teardown: Option<TeardownCallback>,
    ) -> Self {
        let buffers = ServiceBuffers::with_initial_output(&config.initial_output);
        Self {
            id,
            state: SerializedCell::new(strand.clone(), CoreState { buffers, workload }),
            strand,
            config,
            loop_state: AtomicLoopState::new(),
            stop_requested: AtomicBool::new(false),
            transfers: AtomicU64::new(0),
            on_teardown: Mutex::new(on_teardown),
        }
    }

    pub(crate) fn id(&self) -> ServiceId {
        self.id
    }

    pub(crate) fn strand(&self) -> &Strand {
        &self.strand
    }

    pub(crate) fn loop_state(&self) -> LoopState {
        self.loop_state.load()
    }

    pub(crate) fn start(self: &Arc<Self>) -> bool {
        if !self
            .loop_state
            .transition(LoopState::NotStarted, LoopState::Running)
        {
            debug!(service = %self.id, state = ?self.loop_state(), "background loop already started");
            return false;
        }
        info!(
            service = %self.id,
            interval_ms = self.config.tick_interval_ms,
            max_ops = ?self.config.max_ops,
            retention = ?self.config.retention,
            "background loop started"
        );
        self.schedule_tick();
        true
    }

    pub(crate) fn request_stop(self: &Arc<Self>) {
        self.stop_requested.store(true, Ordering::Release);
        if self
            .loop_state
            .transition(LoopState::NotStarted, LoopState::Stopped)
        {
            let this = Arc::clone(self);
            self.strand.post(Box::new(move || {
                this.state.with(|state| state.buffers.finish_producer());
                info!(service = %this.id, "background loop stopped before start");
            }));
        } else {
            debug!(service = %self.id, "stop requested, next tick will end the loop");
        }
    }

    /// 所有者交出服务时调用。
    ///
    /// 强引用保留且不设上限的循环此后无人能够停止，由这里代为请求停止，
    /// 使下一个节拍结束循环并释放最后一个强引用。
    pub(crate) fn owner_released(&self) {
        if self.config.retention == LoopRetention::Strong && self.config.max_ops.is_none() {
            self.stop_requested.store(true, Ordering::Release);
            debug!(service = %self.id, "owner released an unbounded loop, stop requested");
        }
    }

    fn schedule_tick(self: &Arc<Self>) {
        let interval = self.config.tick_interval();
        match self.config.retention {
            LoopRetention::Strong => {
                let this = Arc::clone(self);
                self.strand
                    .post_after(interval, Box::new(move || this.tick()));
            }
            LoopRetention::Weak => {
                let weak = Arc::downgrade(self);
                let id = self.id;
                self.strand.post_after(
                    interval,
                    Box::new(move || match weak.upgrade() {
                        Some(this) => this.tick(),
                        None => debug!(service = %id, "owner released, background loop interrupted"),
                    }),
                );
            }
        }
    }

    fn tick(self: &Arc<Self>) {
        let limit_reached = |ops: u64| self.config.max_ops.is_some_and(|max| ops >= max);

        let before = self.state.with(|state| state.buffers.ops_count());
        if self.stop_requested.load(Ordering::Acquire) || limit_reached(before) {
            self.finish();
            return;
        }

        let ops = self.state.with(|state| {
            let tick = state.buffers.record_tick();
            state.workload.on_tick(&mut state.buffers, tick);
            tick
        });
        trace!(service = %self.id, tick = ops, "background tick");

        if limit_reached(ops) || self.stop_requested.load(Ordering::Acquire) {
            self.finish();
        } else {
            self.schedule_tick();
        }
    }

    fn finish(&self) {
        let ops = self.state.with(|state| {
            state.buffers.finish_producer();
            state.buffers.ops_count()
        });
        self.loop_state.finish();
        info!(service = %self.id, ops, "background loop finished");
    }

    /// 排空式读取：从输出缓冲区头部取走字节。
    pub(crate) fn transfer_out(&self, dest: &mut [u8]) -> Completion {
        let completion = self.state.with(|state| {
            let buffers = &mut state.buffers;
            let mut moved = 0;
            loop {
                if buffers.producer_finished() && buffers.output().is_empty() {
                    break Completion::failed(StreamError::EndOfData, moved);
                }
                if moved == dest.len() {
                    break Completion::failed(StreamError::BufferExhausted, moved);
                }
                match buffers.pop_output_byte() {
                    Some(byte) => {
                        dest[moved] = byte;
                        moved += 1;
                    }
                    None => break Completion::failed(StreamError::WouldBlock, moved),
                }
            }
        });
        self.transfers.fetch_add(1, Ordering::Relaxed);
        completion
    }

    /// 区间读取：按绝对偏移读取 `[head, end)`，不消耗输出缓冲区。
    ///
    /// 已被排空式读者取走的前缀无法再读，游标先前移到输出缓冲区的绝对起点。
    pub(crate) fn transfer_range(&self, cursor: &RangeCursor, dest: &mut [u8]) -> Completion {
        let completion = self.state.with(|state| {
            let buffers = &state.buffers;
            let mut head = cursor.head().max(buffers.output_base());
            let mut moved = 0;
            let completion = loop {
                if head >= cursor.end() {
                    break Completion::failed(StreamError::EndOfData, moved);
                }
                if moved == dest.len() {
                    break Completion::failed(StreamError::BufferExhausted, moved);
                }
                match buffers.output_byte_at(head) {
                    Some(byte) => {
                        dest[moved] = byte;
                        moved += 1;
                        head += 1;
                    }
                    None if buffers.producer_finished() => {
                        break Completion::failed(StreamError::EndOfData, moved);
                    }
                    None => break Completion::failed(StreamError::WouldBlock, moved),
                }
            };
            cursor.advance_to(head.min(cursor.end()));
            completion
        });
        self.transfers.fetch_add(1, Ordering::Relaxed);
        completion
    }

    /// 追加式写入：把调用方字节追加到输入缓冲区，受 `input_capacity` 约束。
    pub(crate) fn transfer_in(&self, src: &[u8]) -> Completion {
        let capacity = self.config.input_capacity;
        let closed = self.loop_state() == LoopState::Stopped;
        let completion = self.state.with(|state| {
            let buffers = &mut state.buffers;
            let mut moved = 0;
            loop {
                if closed {
                    break Completion::failed(StreamError::EndOfData, moved);
                }
                if moved == src.len() {
                    break Completion::ok(moved);
                }
                if buffers.input().len() >= capacity {
                    let error = if moved == 0 {
                        StreamError::WouldBlock
                    } else {
                        StreamError::BufferExhausted
                    };
                    break Completion::failed(error, moved);
                }
                buffers.push_input_byte(src[moved]);
                moved += 1;
            }
        });
        self.transfers.fetch_add(1, Ordering::Relaxed);
        completion
    }

    pub(crate) fn buffer_op(&self, clear_in: bool, clear_out: bool) -> BufferSizes {
        let (input, output) = self
            .state
            .with(|state| state.buffers.clear(clear_in, clear_out));
        debug!(service = %self.id, input, output, clear_in, clear_out, "buffer operation");
        BufferSizes { input, output }
    }

    pub(crate) fn snapshot(&self) -> ServiceSnapshot {
        let loop_state = self.loop_state();
        let transfers = self.transfers.load(Ordering::Relaxed);
        self.state.with(|state| {
            let buffers = &state.buffers;
            ServiceSnapshot {
                service: self.id,
                output: Bytes::copy_from_slice(buffers.output()),
                input: Bytes::copy_from_slice(buffers.input()),
                output_base: buffers.output_base(),
                consumed_total: buffers.consumed_total(),
                ops_count: buffers.ops_count(),
                producer_finished: buffers.producer_finished(),
                loop_state,
                transfers,
            }
        })
    }
}

impl Drop for ServiceCore {
    fn drop(&mut self) {
        let on_serializer = self.strand.running_in_this_thread();
        let report = TeardownReport {
            service: self.id,
            on_serializer,
            thread: thread::current().name().map(str::to_owned),
            ops_completed: self.state.get_mut().buffers.ops_count(),
        };
        if on_serializer {
            info!(service = %self.id, ops = report.ops_completed, "service destroyed on its serializer");
        } else {
            warn!(
                service = %self.id,
                thread = ?report.thread,
                "service destroyed outside of its serializer"
            );
        }
        if let Some(callback) = self.on_teardown.get_mut().take() {
            callback(report);
        }
    }
}
