//! 搬运循环的性质验证。
//!
//! # 教案级注释概览
//!
//! - **核心目标 (Why)**：三种搬运循环的结果完全由“缓冲区长度、可用字节、区间边界、容量”决定；
//!   以影子公式对照真实服务，确保优先级（结束 > 缓冲区满 > 暂无数据）在任意输入下都成立。
//! - **设计手法 (How)**：每个用例在单线程上下文上创建服务，预置输出或设置容量，
//!   发起一次操作后把 `(错误, 传输字节数)` 与影子公式比较。
//! - **合同 (What)**：
//!   - 排空读：`t = min(b, n)`；`b <= n` 时 `BufferExhausted`，否则 `WouldBlock`；
//!   - 区间读：`t = min(b, max(0, min(e, n) - s))`；`s + t >= e` 时 `EndOfData`，
//!     否则 `t == b` 时 `BufferExhausted`，否则 `WouldBlock`；
//!   - 写入：`t = min(w, c)`；`t == w` 时成功，否则 `BufferExhausted`。
//!
//! # 设计考量 (Trade-offs)
//!
//! - 服务均未启动，生产者未结束，因此不会出现“生产者已结束”带来的 `EndOfData`；
//!   该分支由集成场景覆盖。

mod support;

use proptest::prelude::*;
use spark_executor::{ExecutionContext, Executor};
use spark_stream::{Service, ServiceConfig, StreamError};

fn seeded(ctx: &ExecutionContext, available: usize) -> Service {
    let initial: Vec<u8> = (0..available).map(|i| b'a' + (i % 26) as u8).collect();
    Service::new(
        ctx.share(),
        ServiceConfig::default().with_initial_output(initial),
    )
    .expect("合法配置")
}

fn expected_range(b: u64, n: u64, s: u64, e: u64) -> (Option<StreamError>, u64) {
    let available = e.min(n).saturating_sub(s);
    let t = b.min(available);
    let error = if s + t >= e {
        StreamError::EndOfData
    } else if t == b {
        StreamError::BufferExhausted
    } else {
        StreamError::WouldBlock
    };
    (Some(error), t)
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn prop_drain_read_matches_model(b in 1_usize..64, n in 0_usize..64) {
        let ctx = ExecutionContext::new();
        let service = seeded(&ctx, n);
        let stream = service.read_stream(ctx.share());

        let transfer = support::read_now(&ctx, &stream, b);
        let t = b.min(n);
        let error = if b <= n { StreamError::BufferExhausted } else { StreamError::WouldBlock };
        prop_assert_eq!(transfer.transferred(), t);
        prop_assert_eq!(transfer.error(), Some(&error));
        prop_assert!(transfer.filled().iter().enumerate().all(|(i, byte)| *byte == b'a' + (i % 26) as u8));
    }

    #[test]
    fn prop_range_read_matches_model(
        b in 1_u64..48,
        n in 0_u64..48,
        s in 0_u64..48,
        len in 0_u64..48,
    ) {
        let e = s + len;
        let ctx = ExecutionContext::new();
        let service = seeded(&ctx, n as usize);
        let stream = service.range_stream(ctx.share(), s, e);

        let transfer = support::read_now(&ctx, &stream, b as usize);
        let (error, t) = expected_range(b, n, s, e);
        prop_assert_eq!(transfer.transferred() as u64, t);
        prop_assert_eq!(transfer.error().cloned(), error);
        prop_assert_eq!(stream.position(), s + t, "游标必须前进已传输的字节数");
    }

    #[test]
    fn prop_write_matches_model(w in 1_usize..64, c in 1_usize..64) {
        let ctx = ExecutionContext::new();
        let service = Service::new(
            ctx.share(),
            ServiceConfig { input_capacity: c, ..ServiceConfig::default() },
        )
        .expect("合法配置");
        let writer = service.write_stream(ctx.share());

        let payload = vec![b'w'; w];
        let transfer = support::write_now(&ctx, &writer, &payload);
        let t = w.min(c);
        prop_assert_eq!(transfer.transferred(), t);
        if t == w {
            prop_assert!(transfer.completion.is_ok());
        } else {
            prop_assert_eq!(transfer.error(), Some(&StreamError::BufferExhausted));
        }
    }

    /// 连续的排空读之间不丢失也不重复字节。
    #[test]
    fn prop_successive_drains_partition_output(n in 0_usize..96, chunks in prop::collection::vec(1_usize..16, 1..12)) {
        let ctx = ExecutionContext::new();
        let service = seeded(&ctx, n);
        let stream = service.read_stream(ctx.share());

        let mut collected = Vec::new();
        for chunk in chunks {
            let transfer = support::read_now(&ctx, &stream, chunk);
            collected.extend_from_slice(transfer.filled());
        }
        let expected: Vec<u8> = (0..collected.len()).map(|i| b'a' + (i % 26) as u8).collect();
        prop_assert!(collected.len() <= n);
        prop_assert_eq!(collected, expected);
    }
}
