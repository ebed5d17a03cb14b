//! 完成令牌：把“操作结束”这一事件交付给调用方选择的风格。
//!
//! # 教案级注释
//!
//! ## 意图 (Why)
//! - 同一个异步操作可能被回调风格、阻塞风格或 `async/await` 风格的调用方使用；
//!   操作实现者只应关心“何时、在何处交付一个值”，不应关心调用方如何等待。
//!
//! ## 逻辑 (How)
//! - [`Handler<T>`] 是一次性的交付端，按值消费，天然保证“至多交付一次”；
//! - [`CompletionToken::initiate`] 先由令牌构造 `Handler`，再把它交给操作的启动闭包，
//!   最后把令牌自身的等待物（`()`、`T` 或 Future）作为返回值交还调用方；
//! - [`dispatch`] 把交付包装成任务投递到调用方执行器，保证执行器亲和性。
//!
//! ## 契约 (What)
//! - 任何风格下，`Handler` 都在调用方执行器的任务内被调用；
//! - `use_blocking` 会阻塞当前线程，调用方执行器必须由其他线程驱动；
//! - 交付端被丢弃而未交付属于实现缺陷：`use_blocking` 与 `use_future` 都会以 panic 暴露。

use std::{
    fmt,
    future::Future,
    pin::Pin,
    sync::Arc,
    task::{Context, Poll},
    time::Duration,
};

use futures::channel::oneshot;
use parking_lot::{Condvar, Mutex};

use crate::executor::Executor;

/// 一次性完成交付端。
pub struct Handler<T> {
    deliver: Box<dyn FnOnce(T) + Send + 'static>,
}

impl<T: Send + 'static> Handler<T> {
    pub fn new<F>(deliver: F) -> Self
    where
        F: FnOnce(T) + Send + 'static,
    {
        Self {
            deliver: Box::new(deliver),
        }
    }

    /// 在当前线程上交付结果。
    pub fn complete(self, value: T) {
        (self.deliver)(value)
    }

    /// 在交付前转换结果类型。
    pub fn map<U, F>(self, convert: F) -> Handler<U>
    where
        U: Send + 'static,
        F: FnOnce(U) -> T + Send + 'static,
    {
        Handler::new(move |value| self.complete(convert(value)))
    }
}

impl<T> fmt::Debug for Handler<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Handler").finish_non_exhaustive()
    }
}

/// 把 `value` 交付给 `handler`，交付动作作为任务投递到 `executor`，绝不内联执行。
pub fn dispatch<T: Send + 'static>(executor: &dyn Executor, handler: Handler<T>, value: T) {
    executor.post(Box::new(move || handler.complete(value)));
}

/// 完成令牌：决定异步操作的返回形态。
pub trait CompletionToken<T: Send + 'static> {
    /// 启动操作后交还调用方的值。
    type Output;

    /// 构造交付端并调用 `launch` 启动操作。
    fn initiate<L>(self, launch: L) -> Self::Output
    where
        L: FnOnce(Handler<T>);
}

/// 回调风格令牌，见 [`callback`]。
pub struct Callback<F>(F);

/// 操作完成时在调用方执行器上调用 `f`。
pub fn callback<F>(f: F) -> Callback<F> {
    Callback(f)
}

impl<T, F> CompletionToken<T> for Callback<F>
where
    T: Send + 'static,
    F: FnOnce(T) + Send + 'static,
{
    type Output = ();

    fn initiate<L>(self, launch: L)
    where
        L: FnOnce(Handler<T>),
    {
        launch(Handler::new(self.0));
    }
}

impl<F> fmt::Debug for Callback<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Callback")
    }
}

/// 阻塞风格令牌，见 [`use_blocking`]。
#[derive(Clone, Copy, Debug, Default)]
pub struct UseBlocking;

/// 阻塞当前线程直到结果交付。
pub fn use_blocking() -> UseBlocking {
    UseBlocking
}

impl<T: Send + 'static> CompletionToken<T> for UseBlocking {
    type Output = T;

    fn initiate<L>(self, launch: L) -> T
    where
        L: FnOnce(Handler<T>),
    {
        let cell = CompletionCell::new();
        launch(cell.handler());
        match cell.wait() {
            Some(value) => value,
            None => panic!("completion handler dropped without delivering a result"),
        }
    }
}

enum Slot<T> {
    Pending,
    Ready(T),
    Taken,
    Abandoned,
}

struct CellShared<T> {
    slot: Mutex<Slot<T>>,
    ready: Condvar,
}

/// 单值交付槽：一端由 [`Handler`] 填充，另一端阻塞等待。
///
/// 若对应的 `Handler` 未交付即被丢弃，等待方得到 `None` 而不是永远阻塞。
pub struct CompletionCell<T> {
    shared: Arc<CellShared<T>>,
}

impl<T: Send + 'static> CompletionCell<T> {
    pub fn new() -> Self {
        Self {
            shared: Arc::new(CellShared {
                slot: Mutex::new(Slot::Pending),
                ready: Condvar::new(),
            }),
        }
    }

    /// 创建填充本槽的交付端。
    pub fn handler(&self) -> Handler<T> {
        let mut sender = CellSender {
            shared: Some(Arc::clone(&self.shared)),
        };
        Handler::new(move |value| sender.send(value))
    }

    /// 阻塞直到结果可用。
    pub fn wait(&self) -> Option<T> {
        let mut slot = self.shared.slot.lock();
        while matches!(*slot, Slot::Pending) {
            self.shared.ready.wait(&mut slot);
        }
        take_ready(&mut slot)
    }

    /// 最多阻塞 `timeout`；超时或交付端已被丢弃时返回 `None`。
    pub fn wait_timeout(&self, timeout: Duration) -> Option<T> {
        let mut slot = self.shared.slot.lock();
        if matches!(*slot, Slot::Pending) {
            let _ = self
                .shared
                .ready
                .wait_while_for(&mut slot, |slot| matches!(slot, Slot::Pending), timeout);
        }
        take_ready(&mut slot)
    }

    /// 非阻塞地取出已交付的结果。
    pub fn try_take(&self) -> Option<T> {
        take_ready(&mut self.shared.slot.lock())
    }
}

fn take_ready<T>(slot: &mut Slot<T>) -> Option<T> {
    match std::mem::replace(slot, Slot::Taken) {
        Slot::Ready(value) => Some(value),
        other => {
            *slot = other;
            None
        }
    }
}

impl<T: Send + 'static> Default for CompletionCell<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for CompletionCell<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = match *self.shared.slot.lock() {
            Slot::Pending => "pending",
            Slot::Ready(_) => "ready",
            Slot::Taken => "taken",
            Slot::Abandoned => "abandoned",
        };
        f.debug_struct("CompletionCell").field("state", &state).finish()
    }
}

struct CellSender<T> {
    shared: Option<Arc<CellShared<T>>>,
}

impl<T> CellSender<T> {
    fn send(&mut self, value: T) {
        if let Some(shared) = self.shared.take() {
            *shared.slot.lock() = Slot::Ready(value);
            shared.ready.notify_all();
        }
    }
}

impl<T> Drop for CellSender<T> {
    fn drop(&mut self) {
        if let Some(shared) = self.shared.take() {
            *shared.slot.lock() = Slot::Abandoned;
            shared.ready.notify_all();
        }
    }
}

/// `async/await` 风格令牌，见 [`use_future`]。
#[derive(Clone, Copy, Debug, Default)]
pub struct UseFuture;

/// 返回在结果交付时就绪的 Future。
pub fn use_future() -> UseFuture {
    UseFuture
}

impl<T: Send + 'static> CompletionToken<T> for UseFuture {
    type Output = CompletionFuture<T>;

    fn initiate<L>(self, launch: L) -> CompletionFuture<T>
    where
        L: FnOnce(Handler<T>),
    {
        let (tx, rx) = oneshot::channel();
        launch(Handler::new(move |value| {
            // 接收端已放弃等待时结果被丢弃。
            let _ = tx.send(value);
        }));
        CompletionFuture { rx }
    }
}

/// [`use_future`] 产生的 Future。
///
/// # Panics
/// 交付端未交付即被丢弃时，轮询会 panic。
#[must_use = "futures do nothing unless polled"]
pub struct CompletionFuture<T> {
    rx: oneshot::Receiver<T>,
}

impl<T> Future for CompletionFuture<T> {
    type Output = T;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<T> {
        match Pin::new(&mut self.rx).poll(cx) {
            Poll::Ready(Ok(value)) => Poll::Ready(value),
            Poll::Ready(Err(oneshot::Canceled)) => {
                panic!("completion handler dropped without delivering a result")
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

impl<T> fmt::Debug for CompletionFuture<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompletionFuture").finish_non_exhaustive()
    }
}
