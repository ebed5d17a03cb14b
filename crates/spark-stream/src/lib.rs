#![doc = r#"
# spark-stream

## 设计动机（Why）
- **定位**：提供由串行化后台服务支撑的异步流对象。服务是长期存活的后台参与者，
  持有被生产与消费的字节缓冲区；调用方通过部分读写的流句柄访问它。
- **架构角色**：建立在 `spark-executor` 的 [`Executor`](spark_executor::Executor)、
  [`Strand`](spark_executor::Strand) 与完成令牌之上，不依赖任何具体运行时。
- **设计理念**：“在哪执行”被严格拆成三处：调用方执行器发起操作，服务车道执行搬运，
  结果再回到调用方执行器交付。任何一跳都不会被折叠。

## 核心契约（What）
- 同一服务上的任意两次搬运绝不交错修改缓冲区；
- 每个操作恰好交付一条 [`Completion`]，且总是在调用方执行器上异步交付；
- 服务的生命周期与任何单个句柄解耦：句柄只持有弱引用，
  [`Service`] 被丢弃时把最后的强引用送回服务车道析构；
- 后台循环的 `start` 幂等，重复调用不会产生第二条循环。

## 实现策略（How）
- **服务状态**：缓冲区位于 [`SerializedCell`] 中，车道外访问或重叠访问立即 panic；
- **后台循环**：以 `Strand::post_after` 串联节拍，按 [`LoopRetention`] 决定每个节拍持有强引用还是弱引用；
- **交付策略**：默认以值交付错误（[`Transfer`] 中的 `completion.error`），
  用 [`raising`] 包装令牌后切换为 `Result` 交付。

## 风险与考量（Trade-offs）
- **取消**：已进入车道的搬运不可取消；超时需由调用方在自己的执行器上与定时器竞速。
- **异步收尾**：收尾任务投递后若执行上下文不再被驱动，服务不会在车道内析构。
"#]
#![deny(unsafe_code)]

mod completion;
mod config;
mod error;
mod service;
mod state;
mod stream;
mod workload;

pub use completion::{Completion, Raising, Transfer, TransferError, raising};
pub use config::{LoopRetention, ServiceConfig, TeardownMode};
pub use error::{ConfigError, ErrorCategory, StreamError};
pub use service::{
    BufferSizes, Service, ServiceBuilder, ServiceId, ServiceSnapshot, TeardownHandle,
    TeardownOutcome, TeardownReport,
};
pub use state::{LoopState, SerializedCell, ServiceBuffers};
pub use stream::{DuplexStream, RangeReadStream, ReadSome, ReadStream, WriteSome, WriteStream};
pub use workload::{PatternWorkload, Workload};
