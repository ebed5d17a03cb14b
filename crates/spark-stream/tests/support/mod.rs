//! 集成测试共享工具：日志初始化与“单线程驱动一次操作”的辅助函数。
#![allow(dead_code)]

use std::sync::{Arc, Once};

use bytes::Bytes;
use parking_lot::Mutex;
use spark_executor::{ExecutionContext, callback};
use spark_stream::{ReadSome, Transfer, WriteSome};
use tracing_subscriber::EnvFilter;

/// 安装 `tracing-subscriber`，过滤规则取自 `RUST_LOG`，缺省为 `info`。
pub fn init_tracing() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .try_init();
    });
}

/// 共享的单值结果槽。
pub fn slot<T>() -> (Arc<Mutex<Option<T>>>, Arc<Mutex<Option<T>>>) {
    let slot = Arc::new(Mutex::new(None));
    (Arc::clone(&slot), slot)
}

/// 发起一次读取并在 `ctx` 上推进到完成。
pub fn read_now<S: ReadSome>(ctx: &ExecutionContext, stream: &S, len: usize) -> Transfer<Vec<u8>> {
    let (sink, result) = slot();
    stream.read_some(
        vec![0; len],
        callback(move |transfer: Transfer<Vec<u8>>| {
            *sink.lock() = Some(transfer);
        }),
    );
    ctx.run_until_idle();
    let transfer = result.lock().take();
    transfer.expect("读取必须在上下文空转前完成")
}

/// 发起一次写入并在 `ctx` 上推进到完成。
pub fn write_now<S: WriteSome>(ctx: &ExecutionContext, stream: &S, bytes: &[u8]) -> Transfer<Bytes> {
    let (sink, result) = slot();
    stream.write_some(
        Bytes::copy_from_slice(bytes),
        callback(move |transfer: Transfer<Bytes>| {
            *sink.lock() = Some(transfer);
        }),
    );
    ctx.run_until_idle();
    let transfer = result.lock().take();
    transfer.expect("写入必须在上下文空转前完成")
}
