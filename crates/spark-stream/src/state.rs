use std::{
    fmt,
    sync::atomic::{AtomicU8, Ordering},
};

use bytes::{Bytes, BytesMut};
use parking_lot::Mutex;
use spark_executor::{Executor, Strand};

/// 服务持有的全部可变状态。
///
/// 输出缓冲区由后台循环生产、被读句柄消费；输入缓冲区由写句柄生产、被后台循环消费。
/// 两个方向都记录累计量，使“绝对偏移”在缓冲区被部分排空后依然可计算。
#[derive(Debug, Default)]
pub struct ServiceBuffers {
    output: BytesMut,
    output_base: u64,
    input: BytesMut,
    consumed_total: u64,
    ops_count: u64,
    producer_finished: bool,
}

impl ServiceBuffers {
    pub(crate) fn with_initial_output(initial: &[u8]) -> Self {
        Self {
            output: BytesMut::from(initial),
            ..Self::default()
        }
    }

    /// 向输出缓冲区追加字节。
    pub fn produce(&mut self, bytes: &[u8]) {
        self.output.extend_from_slice(bytes);
    }

    /// 从输入缓冲区头部取出至多 `max` 字节。
    pub fn consume_input(&mut self, max: usize) -> Bytes {
        let take = max.min(self.input.len());
        self.consumed_total += take as u64;
        self.input.split_to(take).freeze()
    }

    /// 输出缓冲区中尚未被读走的字节。
    pub fn output(&self) -> &[u8] {
        &self.output
    }

    /// 输入缓冲区中尚未被后台循环消费的字节。
    pub fn input(&self) -> &[u8] {
        &self.input
    }

    /// `output()[0]` 在生产日志中的绝对偏移，即已被排空读取的字节数。
    pub fn output_base(&self) -> u64 {
        self.output_base
    }

    /// 生产日志当前的末尾偏移。
    pub fn output_end(&self) -> u64 {
        self.output_base + self.output.len() as u64
    }

    pub fn consumed_total(&self) -> u64 {
        self.consumed_total
    }

    pub fn ops_count(&self) -> u64 {
        self.ops_count
    }

    pub fn producer_finished(&self) -> bool {
        self.producer_finished
    }

    pub(crate) fn pop_output_byte(&mut self) -> Option<u8> {
        if self.output.is_empty() {
            return None;
        }
        let byte = self.output[0];
        let _ = self.output.split_to(1);
        self.output_base += 1;
        Some(byte)
    }

    pub(crate) fn output_byte_at(&self, offset: u64) -> Option<u8> {
        let index = offset.checked_sub(self.output_base)?;
        self.output.get(usize::try_from(index).ok()?).copied()
    }

    pub(crate) fn push_input_byte(&mut self, byte: u8) {
        self.input.extend_from_slice(&[byte]);
    }

    pub(crate) fn record_tick(&mut self) -> u64 {
        self.ops_count += 1;
        self.ops_count
    }

    pub(crate) fn finish_producer(&mut self) {
        self.producer_finished = true;
    }

    /// 清空缓冲区，返回清空前的长度。
    pub(crate) fn clear(&mut self, clear_in: bool, clear_out: bool) -> (usize, usize) {
        let sizes = (self.input.len(), self.output.len());
        if clear_in {
            self.consumed_total += self.input.len() as u64;
            self.input.clear();
        }
        if clear_out {
            self.output_base += self.output.len() as u64;
            self.output.clear();
        }
        sizes
    }
}

/// 只能在指定串行车道内访问的状态单元。
///
/// # 教案级注释
///
/// ## 意图 (Why)
/// - 互斥由 [`Strand`] 提供，本单元不承担同步职责；它只负责把“在车道外访问”
///   与“重叠访问”这两类违规尽早暴露出来。
///
/// ## 逻辑 (How)
/// - 访问前断言当前线程正运行在车道内；
/// - 内部 `Mutex` 只用 `try_lock`：车道保证不会有竞争，`try_lock` 失败即说明出现了重叠或重入。
///
/// ## 契约 (What)
/// - 违规属于不变量破坏，直接 panic，不转换为错误值；
/// - 独占所有权下（例如析构）可经 [`get_mut`](Self::get_mut) 绕过检查。
pub struct SerializedCell<T> {
    strand: Strand,
    value: Mutex<T>,
}

impl<T> SerializedCell<T> {
    pub fn new(strand: Strand, value: T) -> Self {
        Self {
            strand,
            value: Mutex::new(value),
        }
    }

    pub fn strand(&self) -> &Strand {
        &self.strand
    }

    /// 在车道内访问状态。
    ///
    /// # Panics
    /// 当前线程不在车道内，或同一状态正被另一次访问占用时 panic。
    pub fn with<R>(&self, f: impl FnOnce(&mut T) -> R) -> R {
        assert!(
            self.strand.running_in_this_thread(),
            "serialized state accessed outside of its strand"
        );
        let Some(mut guard) = self.value.try_lock() else {
            panic!("overlapping access to serialized state detected");
        };
        f(&mut guard)
    }

    pub fn get_mut(&mut self) -> &mut T {
        self.value.get_mut()
    }
}

impl<T> fmt::Debug for SerializedCell<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SerializedCell")
            .field("strand", &self.strand.id())
            .finish_non_exhaustive()
    }
}

/// 后台循环的生命周期状态：`NotStarted → Running → Stopped`，单向推进。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum LoopState {
    NotStarted = 0,
    Running = 1,
    Stopped = 2,
}

impl LoopState {
    fn from_u8(raw: u8) -> Self {
        match raw {
            0 => LoopState::NotStarted,
            1 => LoopState::Running,
            _ => LoopState::Stopped,
        }
    }
}

/// [`LoopState`] 的原子容器。
#[derive(Debug)]
pub(crate) struct AtomicLoopState(AtomicU8);

impl AtomicLoopState {
    pub(crate) fn new() -> Self {
        Self(AtomicU8::new(LoopState::NotStarted as u8))
    }

    pub(crate) fn load(&self) -> LoopState {
        LoopState::from_u8(self.0.load(Ordering::Acquire))
    }

    /// 仅当状态从 `from` 成功切换到 `to` 时返回 `true`。
    pub(crate) fn transition(&self, from: LoopState, to: LoopState) -> bool {
        self.0
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub(crate) fn finish(&self) -> LoopState {
        LoopState::from_u8(self.0.swap(LoopState::Stopped as u8, Ordering::AcqRel))
    }
}
