//! 流句柄：以部分读写协议访问后台服务。
//!
//! # 教案级注释
//!
//! ## 意图 (Why)
//! - 句柄是调用方唯一可见的入口；它只保存“在哪交付”（调用方执行器）与“找谁干活”（服务弱引用），
//!   自身不持有任何服务状态，因此可以随时克隆、随时丢弃。
//!
//! ## 逻辑 (How)
//! - 每次操作先按值接管调用方缓冲区，零长度缓冲区直接以 `MalformedRequest` 拒绝；
//! - 随后交给三跳启动器：解析弱引用、车道内搬运、回到调用方执行器交付；
//! - 交付风格由 [`CompletionToken`] 决定，句柄本身对回调、阻塞与 `async` 一视同仁。
//!
//! ## 契约 (What)
//! - 服务已销毁时，每次调用都以 `DeadReference` 与 0 字节完成，且交付是异步的；
//! - 每次调用恰好产生一条完成记录。

mod op;

use std::sync::{
    Arc, Weak,
    atomic::{AtomicU64, Ordering},
};

use bytes::Bytes;
use spark_executor::{CompletionToken, ExecutorRef};

use crate::{
    completion::{Completion, Transfer},
    error::StreamError,
    service::core::ServiceCore,
};

pub(crate) use op::{Operation, launch, reject_now};

/// 读缓冲区为空时的拒绝原因。
const EMPTY_READ: &str = "read buffer must not be empty";
/// 写缓冲区为空时的拒绝原因。
const EMPTY_WRITE: &str = "write buffer must not be empty";

/// 部分读能力。
pub trait ReadSome {
    /// 读取至多 `buf.len()` 字节；结果中的缓冲区即传入的 `buf`。
    fn read_some<K>(&self, buf: Vec<u8>, token: K) -> K::Output
    where
        K: CompletionToken<Transfer<Vec<u8>>>;
}

/// 部分写能力。
pub trait WriteSome {
    /// 写入 `buf` 的一个前缀；结果中的缓冲区即传入的 `buf`。
    fn write_some<K>(&self, buf: Bytes, token: K) -> K::Output
    where
        K: CompletionToken<Transfer<Bytes>>;
}

fn reject_read(buf: Vec<u8>, error: StreamError) -> Transfer<Vec<u8>> {
    Transfer::new(Completion::failed(error, 0), buf)
}

fn reject_write(buf: Bytes, error: StreamError) -> Transfer<Bytes> {
    Transfer::new(Completion::failed(error, 0), buf)
}

#[derive(Clone, Debug)]
struct Endpoint {
    caller: ExecutorRef,
    service: Weak<ServiceCore>,
}

impl Endpoint {
    fn new(caller: ExecutorRef, service: Weak<ServiceCore>) -> Self {
        Self { caller, service }
    }

    fn operation<I>(&self, name: &'static str, input: I) -> Operation<I> {
        Operation {
            name,
            caller: Arc::clone(&self.caller),
            service: self.service.clone(),
            input,
        }
    }

    fn is_alive(&self) -> bool {
        self.service.strong_count() > 0
    }

    fn drain<K>(&self, buf: Vec<u8>, token: K) -> K::Output
    where
        K: CompletionToken<Transfer<Vec<u8>>>,
    {
        token.initiate(|handler| {
            if buf.is_empty() {
                let error = StreamError::MalformedRequest { reason: EMPTY_READ };
                reject_now("read_some", &self.caller, handler, reject_read, buf, error);
                return;
            }
            launch(
                self.operation("read_some", buf),
                handler,
                reject_read,
                |service, mut buf| {
                    let completion = service.transfer_out(&mut buf);
                    Transfer::new(completion, buf)
                },
            );
        })
    }

    fn append<K>(&self, buf: Bytes, token: K) -> K::Output
    where
        K: CompletionToken<Transfer<Bytes>>,
    {
        token.initiate(|handler| {
            if buf.is_empty() {
                let error = StreamError::MalformedRequest {
                    reason: EMPTY_WRITE,
                };
                reject_now("write_some", &self.caller, handler, reject_write, buf, error);
                return;
            }
            launch(
                self.operation("write_some", buf),
                handler,
                reject_write,
                |service, buf| {
                    let completion = service.transfer_in(&buf);
                    Transfer::new(completion, buf)
                },
            );
        })
    }
}

/// 排空式读句柄：读走的字节从服务输出缓冲区移除。
#[derive(Clone, Debug)]
pub struct ReadStream {
    endpoint: Endpoint,
}

impl ReadStream {
    pub(crate) fn new(caller: ExecutorRef, service: Weak<ServiceCore>) -> Self {
        Self {
            endpoint: Endpoint::new(caller, service),
        }
    }

    /// 完成通知交付的执行器。
    pub fn executor(&self) -> &ExecutorRef {
        &self.endpoint.caller
    }

    /// 服务当前是否仍存活；结果仅供参考，操作时会重新解析。
    pub fn is_alive(&self) -> bool {
        self.endpoint.is_alive()
    }
}

impl ReadSome for ReadStream {
    fn read_some<K>(&self, buf: Vec<u8>, token: K) -> K::Output
    where
        K: CompletionToken<Transfer<Vec<u8>>>,
    {
        self.endpoint.drain(buf, token)
    }
}

/// 区间游标：`head` 只在服务车道内读取与推进。
#[derive(Debug)]
pub(crate) struct RangeCursor {
    head: AtomicU64,
    end: u64,
}

impl RangeCursor {
    pub(crate) fn new(start: u64, end: u64) -> Self {
        Self {
            head: AtomicU64::new(start),
            end: end.max(start),
        }
    }

    pub(crate) fn head(&self) -> u64 {
        self.head.load(Ordering::Acquire)
    }

    pub(crate) fn end(&self) -> u64 {
        self.end
    }

    pub(crate) fn advance_to(&self, head: u64) {
        self.head.store(head, Ordering::Release);
    }
}

/// 区间读句柄：读取生产日志中 `[start, end)` 范围内的字节，不消耗服务缓冲区。
///
/// 克隆的句柄共享同一个游标。
///
/// 游标之前的字节若已被排空式读者取走，读取从服务输出缓冲区的绝对起点继续，
/// 被跳过的前缀不再可读；[`position`](Self::position) 随之前移，[`remaining`](Self::remaining)
/// 只统计仍可能读到的字节。
#[derive(Clone, Debug)]
pub struct RangeReadStream {
    endpoint: Endpoint,
    cursor: Arc<RangeCursor>,
}

impl RangeReadStream {
    pub(crate) fn new(
        caller: ExecutorRef,
        service: Weak<ServiceCore>,
        start: u64,
        end: u64,
    ) -> Self {
        Self {
            endpoint: Endpoint::new(caller, service),
            cursor: Arc::new(RangeCursor::new(start, end)),
        }
    }

    /// 完成通知交付的执行器。
    pub fn executor(&self) -> &ExecutorRef {
        &self.endpoint.caller
    }

    /// 服务当前是否仍存活；结果仅供参考，操作时会重新解析。
    pub fn is_alive(&self) -> bool {
        self.endpoint.is_alive()
    }

    /// 下一次读取的起始偏移。
    pub fn position(&self) -> u64 {
        self.cursor.head()
    }

    /// 区间终点（不含）。
    pub fn end(&self) -> u64 {
        self.cursor.end()
    }

    /// 区间内尚未读取的字节数。
    pub fn remaining(&self) -> u64 {
        self.cursor.end().saturating_sub(self.cursor.head())
    }
}

impl ReadSome for RangeReadStream {
    fn read_some<K>(&self, buf: Vec<u8>, token: K) -> K::Output
    where
        K: CompletionToken<Transfer<Vec<u8>>>,
    {
        let endpoint = &self.endpoint;
        token.initiate(|handler| {
            if buf.is_empty() {
                let error = StreamError::MalformedRequest { reason: EMPTY_READ };
                reject_now("read_range", &endpoint.caller, handler, reject_read, buf, error);
                return;
            }
            let cursor = Arc::clone(&self.cursor);
            launch(
                endpoint.operation("read_range", buf),
                handler,
                reject_read,
                move |service, mut buf| {
                    let completion = service.transfer_range(&cursor, &mut buf);
                    Transfer::new(completion, buf)
                },
            );
        })
    }
}

/// 追加式写句柄。
#[derive(Clone, Debug)]
pub struct WriteStream {
    endpoint: Endpoint,
}

impl WriteStream {
    pub(crate) fn new(caller: ExecutorRef, service: Weak<ServiceCore>) -> Self {
        Self {
            endpoint: Endpoint::new(caller, service),
        }
    }

    /// 完成通知交付的执行器。
    pub fn executor(&self) -> &ExecutorRef {
        &self.endpoint.caller
    }

    /// 服务当前是否仍存活；结果仅供参考，操作时会重新解析。
    pub fn is_alive(&self) -> bool {
        self.endpoint.is_alive()
    }
}

impl WriteSome for WriteStream {
    fn write_some<K>(&self, buf: Bytes, token: K) -> K::Output
    where
        K: CompletionToken<Transfer<Bytes>>,
    {
        self.endpoint.append(buf, token)
    }
}

/// 同时具备排空式读与追加式写的双工句柄。
#[derive(Clone, Debug)]
pub struct DuplexStream {
    endpoint: Endpoint,
}

impl DuplexStream {
    pub(crate) fn new(caller: ExecutorRef, service: Weak<ServiceCore>) -> Self {
        Self {
            endpoint: Endpoint::new(caller, service),
        }
    }

    /// 完成通知交付的执行器。
    pub fn executor(&self) -> &ExecutorRef {
        &self.endpoint.caller
    }

    /// 服务当前是否仍存活；结果仅供参考，操作时会重新解析。
    pub fn is_alive(&self) -> bool {
        self.endpoint.is_alive()
    }
}

impl ReadSome for DuplexStream {
    fn read_some<K>(&self, buf: Vec<u8>, token: K) -> K::Output
    where
        K: CompletionToken<Transfer<Vec<u8>>>,
    {
        self.endpoint.drain(buf, token)
    }
}

impl WriteSome for DuplexStream {
    fn write_some<K>(&self, buf: Bytes, token: K) -> K::Output
    where
        K: CompletionToken<Transfer<Bytes>>,
    {
        self.endpoint.append(buf, token)
    }
}
