//! 三种交付风格与两种错误策略。
//!
//! # 教案级导览
//!
//! - **Why**：同一次读写必须能以回调、阻塞等待或 `async/await` 的方式被观察，
//!   且无论哪种风格，交付都发生在调用方执行器上。
//! - **How**：服务运行在独立线程池上，调用方执行器分别为另一线程池或 Tokio 运行时；
//!   在交付闭包中检查 `running_in_this_thread`。
//! - **What**：覆盖值策略与 [`raising`] 抛出策略，两者互不混用。

mod support;

use std::{sync::mpsc, time::Duration};

use bytes::Bytes;
use spark_executor::{
    Executor, ExecutorRef, ThreadPool, TokioExecutor, callback, use_blocking, use_future,
};
use spark_stream::{
    ReadSome, Service, ServiceConfig, StreamError, Transfer, TransferError, WriteSome, raising,
};

fn seeded(pool: &ThreadPool, bytes: &[u8]) -> Service {
    Service::new(
        pool.executor(),
        ServiceConfig::default().with_initial_output(bytes.to_vec()),
    )
    .expect("合法配置")
}

/// 回调风格：回调运行在调用方线程池的任务内，而不是服务车道内。
#[test]
fn callback_runs_on_caller_executor() {
    support::init_tracing();
    let service_pool = ThreadPool::with_threads(2).expect("线程池应当创建成功");
    let caller_pool = ThreadPool::with_threads(1).expect("调用方线程池应当创建成功");
    let service = seeded(&service_pool, b"hello");
    let caller: ExecutorRef = caller_pool.executor();
    let stream = service.read_stream(caller.clone());

    let (tx, rx) = mpsc::channel();
    let strand = service.strand().clone();
    stream.read_some(
        vec![0; 5],
        callback(move |transfer: Transfer<Vec<u8>>| {
            tx.send((
                transfer,
                caller.running_in_this_thread(),
                strand.running_in_this_thread(),
            ))
            .ok();
        }),
    );

    let (transfer, on_caller, on_strand) = rx
        .recv_timeout(Duration::from_secs(5))
        .expect("回调必须执行");
    assert!(on_caller, "回调必须运行在调用方执行器上");
    assert!(!on_strand, "回调不得运行在服务车道上");
    assert_eq!(transfer.filled(), b"hello");
    assert_eq!(transfer.error(), Some(&StreamError::BufferExhausted));
}

/// 阻塞风格：值策略下错误只是记录中的字段。
#[test]
fn blocking_value_policy_reports_error_field() {
    support::init_tracing();
    let service_pool = ThreadPool::with_threads(2).expect("线程池应当创建成功");
    let caller_pool = ThreadPool::with_threads(1).expect("调用方线程池应当创建成功");
    let service = seeded(&service_pool, b"ab");
    let duplex = service.duplex_stream(caller_pool.executor());

    let read = duplex.read_some(vec![0; 8], use_blocking());
    assert_eq!(read.filled(), b"ab");
    assert_eq!(read.error(), Some(&StreamError::WouldBlock));

    let written = duplex.write_some(Bytes::from_static(b"xyz"), use_blocking());
    assert!(written.completion.is_ok());
    assert_eq!(written.transferred(), 3);
}

/// 阻塞风格 + 抛出策略：错误以 `Err(TransferError)` 交付，缓冲区随错误归还。
#[test]
fn blocking_raise_policy_returns_err() {
    support::init_tracing();
    let service_pool = ThreadPool::with_threads(2).expect("线程池应当创建成功");
    let caller_pool = ThreadPool::with_threads(1).expect("调用方线程池应当创建成功");
    let service = seeded(&service_pool, b"");
    let stream = service.read_stream(caller_pool.executor());

    let result: Result<Transfer<Vec<u8>>, TransferError<Vec<u8>>> =
        stream.read_some(vec![0; 4], raising(use_blocking()));
    let err = result.expect_err("空服务上的读取必须以错误交付");
    assert_eq!(err.error, StreamError::WouldBlock);
    assert_eq!(err.transferred, 0);
    assert_eq!(err.buffer.len(), 4);

    let writer = service.write_stream(caller_pool.executor());
    let ok = writer
        .write_some(Bytes::from_static(b"ok"), raising(use_blocking()))
        .expect("成功的写入以 Ok 交付");
    assert_eq!(ok.transferred(), 2);
}

/// `async/await` 风格：调用方执行器为 Tokio，Future 在交付后就绪。
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn future_style_resumes_on_tokio() {
    support::init_tracing();
    let service_pool = ThreadPool::with_threads(2).expect("线程池应当创建成功");
    let service = seeded(&service_pool, b"async!");
    let caller = TokioExecutor::current().expect("测试运行在 Tokio 运行时之内");
    let stream = service.read_stream(caller.share());

    let transfer = stream.read_some(vec![0; 16], use_future()).await;
    assert_eq!(transfer.filled(), b"async!");
    assert_eq!(transfer.error(), Some(&StreamError::WouldBlock));

    let raised = stream.read_some(vec![0; 1], raising(use_future())).await;
    let err = raised.expect_err("缓冲区已读空，必须以错误交付");
    assert!(err.error.is_retryable());
}

/// 服务级异步函数同样支持 Future 风格。
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn buffer_op_and_snapshot_as_futures() {
    support::init_tracing();
    let service_pool = ThreadPool::with_threads(2).expect("线程池应当创建成功");
    let service = seeded(&service_pool, b"0123456789");
    let caller = TokioExecutor::current().expect("测试运行在 Tokio 运行时之内");
    let writer = service.write_stream(caller.share());
    writer
        .write_some(Bytes::from_static(b"abc"), raising(use_future()))
        .await
        .expect("写入应当成功");

    let sizes = service
        .buffer_op(caller.share(), true, false, use_future())
        .await
        .expect("服务仍然存活");
    assert_eq!((sizes.input, sizes.output), (3, 10));

    let snapshot = service
        .snapshot(caller.share(), use_future())
        .await
        .expect("服务仍然存活");
    assert!(snapshot.input.is_empty(), "输入缓冲区已被清空");
    assert_eq!(snapshot.consumed_total, 3);
    assert_eq!(&snapshot.output[..], b"0123456789");
    assert_eq!(snapshot.transfers, 1);
}

/// 调用方以自身执行器上的定时器与操作竞速，实现超时。
#[test]
fn caller_side_timeout_race_is_composable() {
    support::init_tracing();
    let service_pool = ThreadPool::with_threads(1).expect("线程池应当创建成功");
    let caller_pool = ThreadPool::with_threads(1).expect("调用方线程池应当创建成功");
    let service = seeded(&service_pool, b"x");
    let caller = caller_pool.executor();
    let stream = service.read_stream(caller.clone());

    let (tx, rx) = mpsc::channel::<&'static str>();
    {
        let tx = tx.clone();
        caller.post_after(
            Duration::from_secs(5),
            Box::new(move || {
                tx.send("timeout").ok();
            }),
        );
    }
    stream.read_some(
        vec![0; 1],
        callback(move |_: Transfer<Vec<u8>>| {
            tx.send("completed").ok();
        }),
    );
    let winner = rx.recv_timeout(Duration::from_secs(10)).expect("必须有一方胜出");
    assert_eq!(winner, "completed");
    caller_pool.stop();
}
