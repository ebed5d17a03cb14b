#![doc = r#"
# spark-executor

## 设计动机（Why）
- **定位**：为串行化服务流提供最小的调度器抽象：提交任务、延迟提交、
  未完成工作计数、执行器亲和性探测，以及建立在任意执行器之上的串行车道 `Strand`。
- **架构角色**：`spark-stream` 只依赖本 crate 暴露的 [`Executor`] 契约；
  测试可用单线程 [`ExecutionContext`] 确定性推进，生产环境可用 [`ThreadPool`]
  或通过 [`TokioExecutor`] 复用 Tokio 运行时。
- **设计理念**：完成通知必须回到调用方选定的执行器，因此“在哪里执行”
  与“执行什么”被严格拆开，任务一律以 [`Task`] 形式投递。

## 核心契约（What）
- [`Executor::post`] 从不内联执行任务；
- [`Strand`] 保证同一车道上的任务互不重叠且按提交全序执行；
- [`WorkGuard`] 存活期间执行上下文不会因“无事可做”而退出 `run`；
- [`completion`] 模块提供一次性交付端 [`Handler`] 与三种完成风格：
  [`callback`]、[`use_blocking`]、[`use_future`]。

## 实现策略（How）
- **执行上下文**：单把 `parking_lot::Mutex` 保护 FIFO 队列与定时器堆，
  空闲线程在条件变量上等待最早到期的定时器；
- **亲和性**：线程局部调用栈记录正在运行的执行器 ID，嵌套的 Strand 与上下文各占一帧；
- **Tokio 适配**：`runtime-tokio` 特性启用后，`TokioExecutor` 以 `spawn` 投递任务。

## 风险与考量（Trade-offs）
- **取消**：执行器不提供任务取消；已投递任务要么执行，要么随上下文析构被丢弃。
- **公平性**：Strand 单次排空有预算上限，超出后重新排队，牺牲少量吞吐换取底层线程的公平。
"#]
#![deny(unsafe_code)]

pub mod completion;
mod config;
mod context;
mod error;
mod executor;
mod pool;
mod strand;
#[cfg(feature = "runtime-tokio")]
mod tokio_exec;
mod work;

pub use completion::{
    Callback, CompletionCell, CompletionFuture, CompletionToken, Handler, UseBlocking, UseFuture,
    callback, dispatch, use_blocking, use_future,
};
pub use config::PoolConfig;
pub use context::ExecutionContext;
pub use error::ExecutorError;
pub use executor::{Executor, ExecutorId, ExecutorRef, Task, current_executor};
pub use pool::ThreadPool;
pub use strand::Strand;
#[cfg(feature = "runtime-tokio")]
pub use tokio_exec::TokioExecutor;
pub use work::WorkGuard;
