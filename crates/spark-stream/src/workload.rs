use crate::state::ServiceBuffers;

/// 后台循环每个节拍执行的工作。
///
/// 实现者运行在服务的串行车道上，可以自由读写 [`ServiceBuffers`]，但不应阻塞：
/// 节拍期间所有流操作都在排队等待。
pub trait Workload: Send + 'static {
    /// `tick` 从 1 开始计数。
    fn on_tick(&mut self, buffers: &mut ServiceBuffers, tick: u64);
}

impl<F> Workload for F
where
    F: FnMut(&mut ServiceBuffers, u64) + Send + 'static,
{
    fn on_tick(&mut self, buffers: &mut ServiceBuffers, tick: u64) {
        self(buffers, tick)
    }
}

const CHARSET: &[u8] = b"abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

/// 缺省工作负载：每个节拍生产固定长度的字符序列，并消费固定数量的输入字节。
///
/// 生成的字符按节拍与位置确定性地从字母数字表中选取，便于在测试中精确断言。
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PatternWorkload {
    produce_per_tick: usize,
    consume_per_tick: usize,
    cursor: usize,
}

impl PatternWorkload {
    pub fn new(produce_per_tick: usize, consume_per_tick: usize) -> Self {
        Self {
            produce_per_tick,
            consume_per_tick,
            cursor: 0,
        }
    }

    /// 第 `n` 个（从 0 开始）生产字节。
    pub fn byte_at(n: usize) -> u8 {
        CHARSET[n % CHARSET.len()]
    }
}

impl Workload for PatternWorkload {
    fn on_tick(&mut self, buffers: &mut ServiceBuffers, _tick: u64) {
        let chunk: Vec<u8> = (self.cursor..self.cursor + self.produce_per_tick)
            .map(Self::byte_at)
            .collect();
        self.cursor += self.produce_per_tick;
        buffers.produce(&chunk);
        buffers.consume_input(self.consume_per_tick);
    }
}
