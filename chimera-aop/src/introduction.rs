//! 引入（Introduction）
//!
//! 引入让代理额外实现目标类本身没有实现的接口。引入顾问只做类级别匹配，
//! 被引入接口的方法由引入拦截器直接处理，不会到达目标对象

use crate::advice::MethodInterceptor;
use crate::class::TargetClass;
use crate::error::{AopError, AopResult};
use crate::joinpoint::MethodInvocation;
use crate::metadata::Interface;
use crate::value::{ReturnValue, Target, TargetCall};
use std::any::Any;
use std::sync::Arc;

/// 引入拦截器
pub trait IntroductionInterceptor: MethodInterceptor {
    /// 引入的接口
    fn interfaces(&self) -> Vec<Arc<Interface>>;

    fn implements_interface(&self, name: &str) -> bool {
        self.interfaces().iter().any(|iface| iface.name() == name)
    }
}

/// 将引入拦截器作为普通拦截器放进链中
pub(crate) struct IntroductionChainLink(pub(crate) Arc<dyn IntroductionInterceptor>);

impl MethodInterceptor for IntroductionChainLink {
    fn invoke(&self, invocation: &mut MethodInvocation<'_>) -> anyhow::Result<ReturnValue> {
        self.0.invoke(invocation)
    }
}

/// 把被引入接口的调用委托给另一个对象
///
/// 委托对象的类元数据决定了引入哪些接口；其他方法照常沿链向下执行
pub struct DelegatingIntroductionInterceptor {
    delegate: Target,
    delegate_class: Arc<TargetClass>,
    interfaces: Vec<Arc<Interface>>,
}

impl DelegatingIntroductionInterceptor {
    pub fn new<T: Any + Send + Sync>(delegate: T, delegate_class: Arc<TargetClass>) -> AopResult<Self> {
        if !delegate_class.is_type::<T>() {
            return Err(AopError::TargetTypeMismatch {
                expected: delegate_class.name().to_string(),
                actual: std::any::type_name::<T>().to_string(),
            });
        }

        let interfaces = delegate_class.user_interfaces();
        if interfaces.is_empty() {
            return Err(AopError::Config(format!(
                "introduction delegate '{}' implements no interfaces",
                delegate_class.name()
            )));
        }

        Ok(Self {
            delegate: Arc::new(delegate),
            delegate_class,
            interfaces,
        })
    }

    pub fn delegate(&self) -> &Target {
        &self.delegate
    }
}

impl MethodInterceptor for DelegatingIntroductionInterceptor {
    fn invoke(&self, invocation: &mut MethodInvocation<'_>) -> anyhow::Result<ReturnValue> {
        let method = invocation.method();
        if !self.implements_interface(method.declaring_type()) {
            return invocation.proceed();
        }

        let entry = self
            .delegate_class
            .implementation(method)
            .ok_or_else(|| AopError::NoTargetMethod {
                method: method.qualified_name(),
            })?;
        tracing::trace!(
            "Introduced method {} handled by delegate {}",
            method.qualified_name(),
            self.delegate_class.name()
        );
        let call = TargetCall::new(invocation.arguments(), invocation.exposed_proxy());
        (&**entry.invoker())(&*self.delegate, &call)
    }
}

impl IntroductionInterceptor for DelegatingIntroductionInterceptor {
    fn interfaces(&self) -> Vec<Arc<Interface>> {
        self.interfaces.clone()
    }
}
