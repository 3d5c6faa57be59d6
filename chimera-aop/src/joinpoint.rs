//! 连接点（JoinPoint）与方法调用（MethodInvocation）
//!
//! [`MethodInvocation`] 是一次代理调用的执行器：它按顺序驱动拦截器链，
//! 链走到尽头时调用目标方法

use crate::chain::ChainElement;
use crate::class::{Invoker, TargetClass};
use crate::error::AopError;
use crate::metadata::Method;
use crate::pointcut;
use crate::proxy::AopProxy;
use crate::value::{Arguments, ReturnValue, Target, TargetCall};
use std::any::Any;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// 连接点信息
///
/// 传递给前置、返回后、异常和后置通知的只读视图
pub struct JoinPoint<'a> {
    method: &'a Method,
    arguments: &'a Arguments,
    target: &'a Target,
    target_class: &'a TargetClass,
    started: Instant,
}

impl<'a> JoinPoint<'a> {
    pub fn new(
        method: &'a Method,
        arguments: &'a Arguments,
        target: &'a Target,
        target_class: &'a TargetClass,
        started: Instant,
    ) -> Self {
        Self {
            method,
            arguments,
            target,
            target_class,
            started,
        }
    }

    /// 获取完整的方法签名，例如 `EchoServiceImpl::echo`
    pub fn signature(&self) -> String {
        format!("{}::{}", self.target_class.name(), self.method.name())
    }

    pub fn method(&self) -> &'a Method {
        self.method
    }

    pub fn method_name(&self) -> &'a str {
        self.method.name()
    }

    pub fn target_type(&self) -> &'a str {
        self.target_class.name()
    }

    pub fn arguments(&self) -> &'a Arguments {
        self.arguments
    }

    pub fn target(&self) -> &'a Target {
        self.target
    }

    /// 尝试以具体类型访问目标对象
    pub fn target_as<T: Any>(&self) -> Option<&'a T> {
        self.target.downcast_ref::<T>()
    }

    pub fn target_class(&self) -> &'a TargetClass {
        self.target_class
    }

    /// 调用开始时间
    pub fn started(&self) -> Instant {
        self.started
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }
}

impl fmt::Debug for JoinPoint<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JoinPoint")
            .field("signature", &self.signature())
            .field("declaring_type", &self.method.declaring_type())
            .field("arguments", self.arguments)
            .finish()
    }
}

/// 一次代理方法调用
///
/// 链的位置在嵌套调用中回退，所以拦截器可以多次调用 [`proceed`](Self::proceed)
pub struct MethodInvocation<'a> {
    proxy: &'a Arc<AopProxy>,
    expose_proxy: bool,
    target: &'a Target,
    target_class: &'a TargetClass,
    method: &'a Method,
    invoker: Option<&'a Invoker>,
    arguments: Arguments,
    chain: &'a [ChainElement],
    index: usize,
    started: Instant,
}

impl<'a> MethodInvocation<'a> {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        proxy: &'a Arc<AopProxy>,
        expose_proxy: bool,
        target: &'a Target,
        target_class: &'a TargetClass,
        method: &'a Method,
        invoker: Option<&'a Invoker>,
        arguments: Arguments,
        chain: &'a [ChainElement],
    ) -> Self {
        Self {
            proxy,
            expose_proxy,
            target,
            target_class,
            method,
            invoker,
            arguments,
            chain,
            index: 0,
            started: Instant::now(),
        }
    }

    /// 执行链中的下一个拦截器；链已走完时调用目标方法
    pub fn proceed(&mut self) -> anyhow::Result<ReturnValue> {
        let chain = self.chain;
        let Some(element) = chain.get(self.index) else {
            return self.invoke_join_point();
        };

        self.index += 1;
        let result = match element {
            ChainElement::Interceptor(interceptor) => interceptor.invoke(self),
            ChainElement::Dynamic {
                interceptor,
                matcher,
            } => {
                if pointcut::matches_arguments(
                    matcher.as_ref(),
                    self.method,
                    self.target_class,
                    &self.arguments,
                ) {
                    interceptor.invoke(self)
                } else {
                    self.proceed()
                }
            }
        };
        self.index -= 1;
        result
    }

    fn invoke_join_point(&self) -> anyhow::Result<ReturnValue> {
        let invoker = self.invoker.ok_or_else(|| AopError::NoTargetMethod {
            method: self.method.qualified_name(),
        })?;
        let call = TargetCall::new(&self.arguments, self.exposed_proxy());
        (&**invoker)(&**self.target, &call)
    }

    pub fn method(&self) -> &'a Method {
        self.method
    }

    pub fn arguments(&self) -> &Arguments {
        &self.arguments
    }

    /// 在 `proceed()` 之前修改参数
    pub fn arguments_mut(&mut self) -> &mut Arguments {
        &mut self.arguments
    }

    pub fn target(&self) -> &'a Target {
        self.target
    }

    pub fn target_class(&self) -> &'a TargetClass {
        self.target_class
    }

    /// 发起本次调用的代理
    pub fn proxy(&self) -> &'a Arc<AopProxy> {
        self.proxy
    }

    /// 开启 `expose_proxy` 时目标方法可见的代理
    pub(crate) fn exposed_proxy(&self) -> Option<&'a Arc<AopProxy>> {
        self.expose_proxy.then_some(self.proxy)
    }

    /// 当前在链中的位置（已进入的拦截器数量）
    pub fn position(&self) -> usize {
        self.index
    }

    pub fn chain_len(&self) -> usize {
        self.chain.len()
    }

    pub fn join_point(&self) -> JoinPoint<'_> {
        JoinPoint::new(
            self.method,
            &self.arguments,
            self.target,
            self.target_class,
            self.started,
        )
    }
}

impl fmt::Debug for MethodInvocation<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MethodInvocation")
            .field("method", &self.method.qualified_name())
            .field("target_class", &self.target_class.name())
            .field("position", &self.index)
            .field("chain_len", &self.chain.len())
            .finish()
    }
}
