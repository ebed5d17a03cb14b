use thiserror::Error;

/// 执行器层错误。
///
/// # 教案式说明
/// - **意图 (Why)**：线程池启动与配置解析是执行器唯一可能失败的环节，其余调度操作均不可失败；
///   集中为这几类故障提供稳定错误码，方便上层在日志与告警中归类。
/// - **契约 (What)**：[`code`](Self::code) 返回的字符串在版本间保持稳定。
#[derive(Debug, Error)]
pub enum ExecutorError {
    /// 工作线程创建失败。
    #[error("failed to spawn worker thread `{name}`: {source}")]
    Spawn {
        name: String,
        #[source]
        source: std::io::Error,
    },
    /// 配置值非法。
    #[error("invalid executor configuration: {reason}")]
    InvalidConfig { reason: String },
    /// TOML 配置无法解析。
    #[error("failed to parse executor configuration: {0}")]
    Parse(#[from] toml::de::Error),
    /// 当前线程不在 Tokio 运行时之内。
    #[error("no tokio runtime is available on the current thread")]
    NoRuntime,
}

impl ExecutorError {
    /// 稳定错误码。
    pub fn code(&self) -> &'static str {
        match self {
            ExecutorError::Spawn { .. } => "executor.spawn_failed",
            ExecutorError::InvalidConfig { .. } => "executor.invalid_config",
            ExecutorError::Parse(_) => "executor.config_parse",
            ExecutorError::NoRuntime => "executor.no_runtime",
        }
    }
}
