//! 部分读与生命周期的四个基准场景。
//!
//! # 教案级导览
//!
//! - **Why**：四个场景分别锁定“暂无数据”“缓冲区耗尽”“区间结束”“所有者先于后台循环离开”
//!   这四种最容易被实现细节改变的行为。
//! - **How**：A/B/C 在单线程上下文上确定性推进；D 使用线程池并以析构回调观测服务在哪个线程上析构。
//! - **What**：每个场景断言错误种类、传输字节数与服务剩余状态。

mod support;

use std::{
    sync::mpsc,
    time::{Duration, Instant},
};

use spark_executor::{ExecutionContext, Executor, PoolConfig, ThreadPool, callback, use_blocking};
use spark_stream::{
    LoopRetention, LoopState, ReadSome, Service, ServiceConfig, ServiceSnapshot, StreamError,
    TeardownMode, TeardownOutcome,
};

/// ## 场景 A：服务尚未产出任何数据
///
/// - **契约 (What)**：10 字节读取以 `WouldBlock` 完成，传输 0 字节。
#[test]
fn scenario_a_empty_service_would_block() {
    support::init_tracing();
    let ctx = ExecutionContext::new();
    let service = Service::new(ctx.share(), ServiceConfig::default()).expect("合法配置");
    let stream = service.read_stream(ctx.share());

    let transfer = support::read_now(&ctx, &stream, 10);
    assert_eq!(transfer.error(), Some(&StreamError::WouldBlock));
    assert_eq!(transfer.transferred(), 0);
    assert_eq!(transfer.buffer.len(), 10, "缓冲区必须原样归还");
}

/// ## 场景 B：目标缓冲区小于可用数据
///
/// - **契约 (What)**：2 字节读取以 `BufferExhausted` 完成，读到 `ab`，服务剩余 `cd`。
#[test]
fn scenario_b_small_buffer_is_exhausted() {
    support::init_tracing();
    let ctx = ExecutionContext::new();
    let service = Service::new(
        ctx.share(),
        ServiceConfig::default().with_initial_output(*b"abcd"),
    )
    .expect("合法配置");
    let stream = service.read_stream(ctx.share());

    let transfer = support::read_now(&ctx, &stream, 2);
    assert_eq!(transfer.error(), Some(&StreamError::BufferExhausted));
    assert_eq!(transfer.filled(), b"ab");

    let (sink, result) = support::slot();
    service.snapshot(
        ctx.share(),
        callback(move |snapshot: Result<ServiceSnapshot, StreamError>| {
            *sink.lock() = Some(snapshot);
        }),
    );
    ctx.run_until_idle();
    let snapshot = result
        .lock()
        .take()
        .expect("快照必须交付")
        .expect("服务仍然存活");
    assert_eq!(&snapshot.output[..], b"cd");
    assert_eq!(snapshot.output_base, 2);
}

/// ## 场景 C：区间终点恰好落在第 4 字节
///
/// - **契约 (What)**：10 字节读取以 `EndOfData` 完成，传输 4 字节，后续读取继续报告 `EndOfData`。
#[test]
fn scenario_c_range_end_reached() {
    support::init_tracing();
    let ctx = ExecutionContext::new();
    let service = Service::new(
        ctx.share(),
        ServiceConfig::default().with_initial_output(*b"abcd"),
    )
    .expect("合法配置");
    let stream = service.range_stream(ctx.share(), 0, 4);

    let transfer = support::read_now(&ctx, &stream, 10);
    assert_eq!(transfer.error(), Some(&StreamError::EndOfData));
    assert_eq!(transfer.filled(), b"abcd");
    assert_eq!(stream.remaining(), 0);

    let again = support::read_now(&ctx, &stream, 10);
    assert_eq!(again.error(), Some(&StreamError::EndOfData));
    assert_eq!(again.transferred(), 0);
}

/// 排空式读者取走区间开头的字节后，区间读取从输出缓冲区的起点继续，而不是提前结束。
#[test]
fn range_reader_skips_prefix_drained_by_other_reader() {
    support::init_tracing();
    let ctx = ExecutionContext::new();
    let service = Service::new(
        ctx.share(),
        ServiceConfig::default().with_initial_output(*b"abcdefgh"),
    )
    .expect("合法配置");
    let drain = service.read_stream(ctx.share());
    let range = service.range_stream(ctx.share(), 0, 8);

    let drained = support::read_now(&ctx, &drain, 2);
    assert_eq!(drained.filled(), b"ab");

    let transfer = support::read_now(&ctx, &range, 10);
    assert_eq!(transfer.filled(), b"cdefgh", "仍在缓冲区中的区间字节必须可读");
    assert_eq!(transfer.error(), Some(&StreamError::EndOfData));
    assert_eq!(range.position(), 8);
    assert_eq!(range.remaining(), 0);

    let partial = service.range_stream(ctx.share(), 1, 5);
    support::read_now(&ctx, &drain, 4);
    let tail = support::read_now(&ctx, &partial, 10);
    assert_eq!(tail.transferred(), 0, "区间已整体被取走");
    assert_eq!(tail.error(), Some(&StreamError::EndOfData));
    assert_eq!(partial.position(), 5, "游标不得越过区间终点");
}

/// ## 场景 D：所有者在后台循环进行中被丢弃
///
/// - **意图 (Why)**：强引用保留模式下，循环必须跑完所有剩余节拍，且服务只在自己的车道内析构。
/// - **逻辑 (How)**：3 个节拍、每拍 5ms；启动后立即在测试线程上丢弃所有者，通过析构回调接收报告。
/// - **契约 (What)**：报告显示析构发生在车道内、线程属于线程池、节拍数为 3。
#[test]
fn scenario_d_owner_dropped_mid_flight() {
    support::init_tracing();
    let pool = ThreadPool::new(&PoolConfig {
        threads: 2,
        thread_name: "scenario-d".into(),
    })
    .expect("线程池应当创建成功");
    let (tx, rx) = mpsc::channel();
    let service = Service::builder(pool.executor())
        .config(
            ServiceConfig::default()
                .with_tick_interval(Duration::from_millis(5))
                .with_max_ops(Some(3))
                .with_retention(LoopRetention::Strong),
        )
        .on_teardown(move |report| {
            tx.send(report).ok();
        })
        .build()
        .expect("合法配置");
    assert!(service.start());
    assert_eq!(service.loop_state(), Some(LoopState::Running));

    let handle = service
        .teardown(TeardownMode::Async)
        .expect("首次收尾必须返回句柄");
    drop(service);

    let report = rx
        .recv_timeout(Duration::from_secs(5))
        .expect("服务必须在循环结束后析构");
    assert!(report.on_serializer, "析构必须发生在服务车道内");
    assert_eq!(report.ops_completed, 3, "已调度的节拍必须全部完成");
    assert!(
        report
            .thread
            .as_deref()
            .is_some_and(|name| name.starts_with("scenario-d-")),
        "析构不得发生在调用方线程上"
    );
    assert_eq!(
        handle.wait_timeout(Duration::from_secs(5)),
        Some(TeardownOutcome::Deferred),
        "后台循环仍持有强引用，收尾任务只能推迟析构"
    );
}

/// 弱引用保留模式下，丢弃所有者会中断尚未执行的节拍。
#[test]
fn weak_retention_loop_is_interrupted_by_owner_drop() {
    support::init_tracing();
    let pool = ThreadPool::with_threads(2).expect("线程池应当创建成功");
    let (tx, rx) = mpsc::channel();
    let service = Service::builder(pool.executor())
        .config(
            ServiceConfig::default()
                .with_tick_interval(Duration::from_millis(50))
                .with_max_ops(Some(100))
                .with_retention(LoopRetention::Weak),
        )
        .on_teardown(move |report| {
            tx.send(report).ok();
        })
        .build()
        .expect("合法配置");
    assert!(service.start());

    let outcome = service
        .teardown(TeardownMode::Sync)
        .map(|handle| handle.wait());
    assert_eq!(outcome, Some(TeardownOutcome::Destroyed));

    let report = rx
        .recv_timeout(Duration::from_secs(5))
        .expect("析构回调必须执行");
    assert!(report.on_serializer);
    assert!(report.ops_completed < 100, "弱引用循环不得阻止析构");
}

/// 同步读取一个已经结束的服务：排空式读取在数据读尽后报告 `EndOfData`。
#[test]
fn drained_finished_service_reports_end_of_data() {
    support::init_tracing();
    let pool = ThreadPool::with_threads(2).expect("线程池应当创建成功");
    let caller = ThreadPool::with_threads(1).expect("调用方线程池应当创建成功");
    let service = Service::new(
        pool.executor(),
        ServiceConfig::default()
            .with_tick_interval(Duration::from_millis(1))
            .with_max_ops(Some(2)),
    )
    .expect("合法配置");
    let stream = service.read_stream(caller.executor());
    assert!(service.start());

    let deadline = Instant::now() + Duration::from_secs(5);
    while service.loop_state() != Some(LoopState::Stopped) {
        assert!(Instant::now() < deadline, "循环必须在期限内结束");
        std::thread::sleep(Duration::from_millis(1));
    }

    let first = stream.read_some(vec![0; 64], use_blocking());
    assert_eq!(first.transferred(), 16, "两个节拍各生产 8 字节");
    assert_eq!(first.error(), Some(&StreamError::EndOfData));
    assert_eq!(first.filled(), b"abcdefghijklmnop");
}
