//! Chimera AOP - 基于代理的方法拦截
//!
//! 提供类似 Spring AOP 的功能，支持：
//! - 切点匹配（类过滤器 + 方法匹配器，支持运行时匹配）
//! - 多种通知类型（Before、AfterReturning、AfterThrowing、After、Around、Introduction）
//! - 带缓存的拦截器链
//! - 两种代理策略：接口代理、子类转发代理
//! - 多种目标源：单例、原型、池化、热替换
//! - 自动代理协调器，挂在对象生命周期上自动为匹配的对象创建代理
//!
//! ```ignore
//! use chimera_aop::prelude::*;
//!
//! let proxy = ProxyFactory::for_target(OrderServiceImpl::default())?
//!     .advice(Advice::around(TimingInterceptor))
//!     .get_proxy()?;
//! let total: u64 = proxy.call("total", args![42u64])?;
//! ```

extern crate self as chimera_aop;

pub mod adapter;
pub mod advice;
pub mod advisor;
pub mod aspect;
pub mod auto_proxy;
pub mod chain;
pub mod class;
pub mod config;
pub mod error;
pub mod error_info;
pub mod introduction;
pub mod joinpoint;
pub mod lifecycle;
pub mod logging;
pub mod metadata;
pub mod pointcut;
pub mod proxy;
pub mod proxy_factory;
pub mod target_source;
pub mod value;

#[cfg(test)]
mod test_support;

// 重新导出核心类型
pub use adapter::{AdvisorAdapter, AdvisorAdapterRegistry};
pub use advice::{
    Advice, AdviceType, AfterAdvice, AfterReturningAdvice, MethodBeforeAdvice, MethodInterceptor,
    ThrowsAdvice,
};
pub use advisor::{Advisor, AdvisorRegistry, HIGHEST_PRECEDENCE, LOWEST_PRECEDENCE};
pub use aspect::{Aspect, AspectRegistration};
pub use auto_proxy::{AutoProxyCreator, CacheKey, ProxyDecision, ProxyTypeInfo};
pub use class::{ClassRegistry, TargetClass};
pub use config::AopProperties;
pub use error::{AopError, AopResult};
pub use error_info::ErrorInfo;
pub use introduction::{DelegatingIntroductionInterceptor, IntroductionInterceptor};
pub use joinpoint::{JoinPoint, MethodInvocation};
pub use metadata::{Interface, Method, MethodSignature, ProxyInterface};
pub use pointcut::{Pointcut, PointcutExpression};
pub use proxy::AopProxy;
pub use proxy_factory::{AdvisedSupport, AopProxyFactory, ProxyConfig, ProxyFactory, ProxyStrategy};
pub use target_source::TargetSource;
pub use value::{Arguments, CurrentProxy, ReturnValue, Target, TargetCall};

pub use chimera_aop_macros::{advisable, aspect, proxy_interface};

// 导出 inventory 供宏使用
pub use inventory;

#[doc(hidden)]
pub mod __private {
    pub use anyhow;
    pub use std::any::TypeId;
    pub use std::sync::Arc;

    pub use once_cell::sync::Lazy;
}

/// 构造调用实参
///
/// ```ignore
/// let greeting: String = proxy.call("greet", args!["Ada".to_string()])?;
/// ```
#[macro_export]
macro_rules! args {
    () => {
        $crate::value::Arguments::new()
    };
    ($($value:expr),+ $(,)?) => {
        $crate::value::Arguments::new()$(.with($value))+
    };
}

/// 预导入模块
pub mod prelude {
    pub use crate::advice::*;
    pub use crate::advisor::{Advisor, AdvisorRegistry};
    pub use crate::aspect::{Aspect, AspectRegistration};
    pub use crate::auto_proxy::AutoProxyCreator;
    pub use crate::class::TargetClass;
    pub use crate::config::AopProperties;
    pub use crate::error::{AopError, AopResult};
    pub use crate::error_info::ErrorInfo;
    pub use crate::joinpoint::{JoinPoint, MethodInvocation};
    pub use crate::lifecycle::BeanPostProcessor;
    pub use crate::metadata::{Interface, ProxyInterface};
    pub use crate::pointcut::{Pointcut, PointcutExpression};
    pub use crate::proxy::AopProxy;
    pub use crate::proxy_factory::{ProxyConfig, ProxyFactory};
    pub use crate::target_source::*;
    pub use crate::value::{Arguments, CurrentProxy, ReturnValue, Target, TargetCall};
    pub use crate::{advisable, args, aspect, proxy_interface};
}
