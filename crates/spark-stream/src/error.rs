use thiserror::Error;

/// 流操作的错误分类。
///
/// # 教案式说明
/// - **意图 (Why)**：部分读写的多数“失败”其实是正常的流控信号（缓冲满、暂无数据），
///   调用方需要据此决定是立即重试、换缓冲区重试，还是结束读取。
/// - **契约 (What)**：
///   - 每个变体拥有稳定错误码（[`code`](Self::code)），可直接写入日志字段；
///   - [`category`](Self::category) 把变体映射为 [`ErrorCategory`]，与错误码一一对应、不随版本漂移；
///   - 错误总是伴随已传输字节数一起交付，见 [`Completion`](crate::Completion)。
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum StreamError {
    /// 服务已被销毁，句柄持有的弱引用无法升级。
    #[error("the backing service no longer exists")]
    DeadReference,
    /// 目标缓冲区（读）或服务输入缓冲区（写）已满，本次调用可能已传输部分数据。
    #[error("buffer exhausted before the request could make further progress")]
    BufferExhausted,
    /// 源侧暂无数据（读）或输入缓冲区暂无空间（写），未传输任何数据时亦可能返回。
    #[error("operation would block; retry later")]
    WouldBlock,
    /// 数据已全部读出且不会再有新数据，或服务已停止接收写入。
    #[error("end of data")]
    EndOfData,
    /// 请求本身不合法，例如零长度缓冲区。
    #[error("malformed request: {reason}")]
    MalformedRequest { reason: &'static str },
}

/// 错误的处置建议。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// 换缓冲区或稍后重试可以继续推进。
    Retryable,
    /// 重试无意义。
    NonRetryable,
}

impl StreamError {
    /// 稳定错误码。
    pub fn code(&self) -> &'static str {
        match self {
            StreamError::DeadReference => "stream.dead_reference",
            StreamError::BufferExhausted => "stream.buffer_exhausted",
            StreamError::WouldBlock => "stream.would_block",
            StreamError::EndOfData => "stream.end_of_data",
            StreamError::MalformedRequest { .. } => "stream.malformed_request",
        }
    }

    pub fn category(&self) -> ErrorCategory {
        match self {
            StreamError::BufferExhausted | StreamError::WouldBlock => ErrorCategory::Retryable,
            StreamError::DeadReference
            | StreamError::EndOfData
            | StreamError::MalformedRequest { .. } => ErrorCategory::NonRetryable,
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.category() == ErrorCategory::Retryable
    }
}

/// 服务配置错误。
#[derive(Debug, Error)]
pub enum ConfigError {
    /// TOML 文本无法解析或字段类型不匹配。
    #[error("failed to parse service configuration: {0}")]
    Parse(#[from] toml::de::Error),
    /// 字段取值非法。
    #[error("invalid service configuration `{field}`: {reason}")]
    Invalid {
        field: &'static str,
        reason: &'static str,
    },
}

impl ConfigError {
    pub fn code(&self) -> &'static str {
        match self {
            ConfigError::Parse(_) => "stream.config_parse",
            ConfigError::Invalid { .. } => "stream.invalid_config",
        }
    }
}
