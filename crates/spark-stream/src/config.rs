use std::time::Duration;

use serde::Deserialize;

use crate::error::ConfigError;

/// 后台循环对服务自身的持有方式。
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoopRetention {
    /// 每个节拍持有强引用：循环结束前服务不会被销毁。
    #[default]
    Strong,
    /// 每个节拍只持有弱引用：最后一个所有者离开后循环随即中断。
    Weak,
}

/// 所有者析构时的收尾方式。
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TeardownMode {
    /// 把收尾任务投递到串行车道后立即返回。
    #[default]
    Async,
    /// 阻塞直到收尾任务在串行车道上执行完毕。
    Sync,
}

/// 后台服务配置。
///
/// # 教案式说明
/// - **意图 (Why)**：节拍间隔、生产/消费速率与容量上限决定了流句柄能观测到的所有流控信号，
///   集中成一份可从 TOML 加载的配置，测试与部署共享同一套语义。
/// - **契约 (What)**：
///   - 所有字段可省略，缺省值见 [`Default`] 实现；
///   - `max_ops = None` 表示循环不设上限，直到显式 `stop` 或所有者收尾；
///     强引用保留模式下，收尾会代为请求停止，循环在下一个节拍结束后服务才析构；
///   - [`validate`](Self::validate) 拒绝零间隔与零容量。
///
/// ```toml
/// tick_interval_ms = 100
/// max_ops = 5
/// produce_per_tick = 8
/// consume_per_tick = 4
/// input_capacity = 1024
/// retention = "weak"
/// teardown = "sync"
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServiceConfig {
    pub tick_interval_ms: u64,
    pub max_ops: Option<u64>,
    pub produce_per_tick: usize,
    pub consume_per_tick: usize,
    pub input_capacity: usize,
    /// 服务创建时预置到输出缓冲区的字节。
    pub initial_output: Vec<u8>,
    pub retention: LoopRetention,
    pub teardown: TeardownMode,
    /// 构建完成后是否立即启动后台循环。
    pub autostart: bool,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: 1000,
            max_ops: Some(5),
            produce_per_tick: 8,
            consume_per_tick: 4,
            input_capacity: 4096,
            initial_output: Vec::new(),
            retention: LoopRetention::Strong,
            teardown: TeardownMode::Async,
            autostart: false,
        }
    }
}

impl ServiceConfig {
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.tick_interval_ms == 0 {
            return Err(ConfigError::Invalid {
                field: "tick_interval_ms",
                reason: "must be greater than zero",
            });
        }
        if self.input_capacity == 0 {
            return Err(ConfigError::Invalid {
                field: "input_capacity",
                reason: "must be greater than zero",
            });
        }
        Ok(())
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    pub fn with_tick_interval(mut self, interval: Duration) -> Self {
        self.tick_interval_ms = u64::try_from(interval.as_millis()).unwrap_or(u64::MAX).max(1);
        self
    }

    pub fn with_max_ops(mut self, max_ops: Option<u64>) -> Self {
        self.max_ops = max_ops;
        self
    }

    pub fn with_initial_output(mut self, bytes: impl Into<Vec<u8>>) -> Self {
        self.initial_output = bytes.into();
        self
    }

    pub fn with_retention(mut self, retention: LoopRetention) -> Self {
        self.retention = retention;
        self
    }

    pub fn with_teardown(mut self, teardown: TeardownMode) -> Self {
        self.teardown = teardown;
        self
    }
}
