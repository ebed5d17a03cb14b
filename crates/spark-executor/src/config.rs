use serde::Deserialize;

use crate::error::ExecutorError;

/// 线程池配置。
///
/// 通过 TOML 加载时所有字段均可省略：
///
/// ```toml
/// threads = 4
/// thread_name = "spark-exec"
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PoolConfig {
    /// 并行驱动执行上下文的工作线程数，必须大于 0。
    pub threads: usize,
    /// 线程名前缀，实际名称为 `{thread_name}-{index}`。
    pub thread_name: String,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            threads: 1,
            thread_name: String::from("spark-exec"),
        }
    }
}

impl PoolConfig {
    pub fn with_threads(threads: usize) -> Self {
        Self {
            threads,
            ..Self::default()
        }
    }

    /// 从 TOML 文本解析并校验。
    pub fn from_toml_str(text: &str) -> Result<Self, ExecutorError> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ExecutorError> {
        if self.threads == 0 {
            return Err(ExecutorError::InvalidConfig {
                reason: "threads must be greater than zero".into(),
            });
        }
        if self.thread_name.is_empty() {
            return Err(ExecutorError::InvalidConfig {
                reason: "thread_name must not be empty".into(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_fields_fall_back_to_defaults() {
        let config = PoolConfig::from_toml_str("threads = 3").expect("合法配置");
        assert_eq!(config.threads, 3);
        assert_eq!(config.thread_name, "spark-exec");
    }

    #[test]
    fn zero_threads_is_rejected() {
        let err = PoolConfig::from_toml_str("threads = 0").expect_err("0 线程必须被拒绝");
        assert_eq!(err.code(), "executor.invalid_config");
    }

    #[test]
    fn unknown_keys_are_parse_errors() {
        let err = PoolConfig::from_toml_str("workers = 2").expect_err("未知字段必须报错");
        assert_eq!(err.code(), "executor.config_parse");
    }
}
