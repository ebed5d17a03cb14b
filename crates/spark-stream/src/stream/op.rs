use std::sync::{Arc, Weak};

use spark_executor::{Executor, ExecutorRef, Handler, dispatch};
use tracing::trace;

use crate::{error::StreamError, service::core::ServiceCore};

/// 一次待启动的服务操作。
pub(crate) struct Operation<I> {
    pub(crate) name: &'static str,
    pub(crate) caller: ExecutorRef,
    pub(crate) service: Weak<ServiceCore>,
    pub(crate) input: I,
}

/// 以三跳方式启动操作：解析引用 → 车道内执行 → 回到调用方执行器交付。
///
/// # 教案级注释
///
/// ## 意图 (Why)
/// - 调用方可能运行在任意执行器上，服务状态只能在服务车道内访问，结果又必须回到调用方执行器；
///   三个位置各对应一跳，任何一跳都不能被折叠掉。
///
/// ## 逻辑 (How)
/// 1. 在调用线程上升级弱引用；失败时把 `reject(input, DeadReference)` 投递给调用方，绝不内联；
/// 2. 升级成功后为调用方执行器取得 WorkGuard，并把 `run` 投递到服务车道；
/// 3. `run` 结束后先在车道内释放服务强引用，再把结果与 WorkGuard 一起投递回调用方执行器。
///
/// ## 契约 (What)
/// - `handler` 恰好被调用一次，且总是在 `caller` 的任务内；
/// - WorkGuard 的覆盖范围从第 2 跳开始，到交付任务结束为止；
/// - 服务强引用在车道内释放，因此即便在途操作持有最后一个引用，服务也在车道内析构。
pub(crate) fn launch<I, R, F>(
    op: Operation<I>,
    handler: Handler<R>,
    reject: fn(I, StreamError) -> R,
    run: F,
) where
    I: Send + 'static,
    R: Send + 'static,
    F: FnOnce(&ServiceCore, I) -> R + Send + 'static,
{
    let Operation {
        name,
        caller,
        service,
        input,
    } = op;

    let Some(service) = service.upgrade() else {
        trace!(op = name, caller = %caller.id(), "service released, reporting dead reference");
        dispatch(&*caller, handler, reject(input, StreamError::DeadReference));
        return;
    };

    let guard = caller.work_guard();
    let strand = service.strand().clone();
    trace!(op = name, service = %service.id(), caller = %caller.id(), "hop to serializer");
    strand.post(Box::new(move || {
        let service_id = service.id();
        let result = run(service.as_ref(), input);
        drop(service);

        let caller = Arc::clone(guard.executor());
        trace!(op = name, service = %service_id, caller = %caller.id(), "hop back to caller");
        caller.post(Box::new(move || {
            handler.complete(result);
            drop(guard);
        }));
    }));
}

/// 立即以错误拒绝请求，仍经由调用方执行器异步交付。
pub(crate) fn reject_now<I, R>(
    name: &'static str,
    caller: &ExecutorRef,
    handler: Handler<R>,
    reject: fn(I, StreamError) -> R,
    input: I,
    error: StreamError,
) where
    R: Send + 'static,
{
    trace!(op = name, caller = %caller.id(), error = error.code(), "request rejected");
    dispatch(&**caller, handler, reject(input, error));
}

#[cfg(test)]
mod tests {
    use spark_executor::{ExecutionContext, Executor, callback};
    use tracing_test::traced_test;

    use crate::{ReadSome, Service, ServiceConfig, Transfer};

    #[test]
    #[traced_test]
    fn every_hop_is_traced() {
        let ctx = ExecutionContext::new();
        let service = Service::new(
            ctx.share(),
            ServiceConfig::default().with_initial_output(*b"ab"),
        )
        .expect("合法配置");
        let stream = service.read_stream(ctx.share());
        stream.read_some(vec![0; 1], callback(|_: Transfer<Vec<u8>>| {}));
        ctx.run_until_idle();

        assert!(logs_contain("hop to serializer"));
        assert!(logs_contain("hop back to caller"));
        drop(service);
        ctx.run_until_idle();
    }

    #[test]
    #[traced_test]
    fn dead_reference_is_traced() {
        let ctx = ExecutionContext::new();
        let service = Service::new(ctx.share(), ServiceConfig::default()).expect("合法配置");
        let stream = service.read_stream(ctx.share());
        drop(service);
        ctx.run_until_idle();

        stream.read_some(vec![0; 1], callback(|_: Transfer<Vec<u8>>| {}));
        ctx.run_until_idle();
        assert!(logs_contain("reporting dead reference"));
        assert!(logs_contain("service destroyed on its serializer"));
    }
}
