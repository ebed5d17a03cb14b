use std::{fmt, sync::Arc};

use spark_executor::{Executor, ExecutorRef, Strand};

use crate::{
    config::ServiceConfig,
    error::ConfigError,
    service::{Service, ServiceId, core::ServiceCore, teardown::TeardownReport},
    workload::{PatternWorkload, Workload},
};

/// [`Service`] 的构建器。
///
/// ```
/// use spark_executor::{ExecutionContext, Executor};
/// use spark_stream::{Service, ServiceConfig};
///
/// let ctx = ExecutionContext::new();
/// let service = Service::builder(ctx.share())
///     .config(ServiceConfig::default().with_initial_output(*b"abcd"))
///     .on_teardown(|report| assert!(report.on_serializer))
///     .build()
///     .expect("合法配置");
/// assert!(!service.is_torn_down());
///
/// drop(service);
/// ctx.run_until_idle();
/// ```
pub struct ServiceBuilder {
    executor: ExecutorRef,
    config: ServiceConfig,
    workload: Option<Box<dyn Workload>>,
    on_teardown: Option<Box<dyn FnOnce(TeardownReport) + Send + 'static>>,
}

impl ServiceBuilder {
    pub(crate) fn new(executor: ExecutorRef) -> Self {
        Self {
            executor,
            config: ServiceConfig::default(),
            workload: None,
            on_teardown: None,
        }
    }

    pub fn config(mut self, config: ServiceConfig) -> Self {
        self.config = config;
        self
    }

    /// 替换缺省的 [`PatternWorkload`]。
    pub fn workload(mut self, workload: impl Workload) -> Self {
        self.workload = Some(Box::new(workload));
        self
    }

    /// 注册析构回调；回调在服务析构的线程上执行，正常情况下即服务车道。
    pub fn on_teardown<F>(mut self, callback: F) -> Self
    where
        F: FnOnce(TeardownReport) + Send + 'static,
    {
        self.on_teardown = Some(Box::new(callback));
        self
    }

    pub fn build(self) -> Result<Service, ConfigError> {
        self.config.validate()?;
        let workload = self.workload.unwrap_or_else(|| {
            Box::new(PatternWorkload::new(
                self.config.produce_per_tick,
                self.config.consume_per_tick,
            ))
        });
        let strand = Strand::new(self.executor);
        let autostart = self.config.autostart;
        let teardown = self.config.teardown;
        let core = Arc::new(ServiceCore::new(
            ServiceId::next(),
            strand.clone(),
            self.config,
            workload,
            self.on_teardown,
        ));
        let service = Service::from_core(core, strand, teardown);
        if autostart {
            service.start();
        }
        Ok(service)
    }
}

impl fmt::Debug for ServiceBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceBuilder")
            .field("executor", &self.executor.id())
            .field("config", &self.config)
            .field("custom_workload", &self.workload.is_some())
            .field("on_teardown", &self.on_teardown.is_some())
            .finish()
    }
}
