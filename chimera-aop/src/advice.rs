//! 通知（Advice）定义
//!
//! 定义了在连接点执行的各种动作。环绕通知即 [`MethodInterceptor`]，
//! 其余通知类型由 [`AdvisorAdapterRegistry`](crate::AdvisorAdapterRegistry)
//! 适配成拦截器后进入拦截器链

use crate::introduction::IntroductionInterceptor;
use crate::joinpoint::{JoinPoint, MethodInvocation};
use crate::value::ReturnValue;
use std::any::Any;
use std::fmt;
use std::sync::Arc;

/// 通知类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AdviceType {
    /// 前置通知
    Before,
    /// 后置通知（无论成功还是失败都执行）
    After,
    /// 返回后通知（成功返回时执行）
    AfterReturning,
    /// 异常通知（抛出异常时执行）
    AfterThrowing,
    /// 环绕通知（可以控制方法执行）
    Around,
    /// 引入（为代理增加新接口）
    Introduction,
}

/// 前置通知
///
/// 返回错误会中止调用，错误原样传给调用方
pub trait MethodBeforeAdvice: Send + Sync {
    fn before(&self, join_point: &JoinPoint<'_>) -> anyhow::Result<()>;
}

/// 返回后通知
pub trait AfterReturningAdvice: Send + Sync {
    fn after_returning(&self, join_point: &JoinPoint<'_>, result: &ReturnValue)
        -> anyhow::Result<()>;
}

/// 异常通知
///
/// 返回 `Ok(())` 时原始错误继续传播；返回 `Err` 时以新错误替换原始错误
pub trait ThrowsAdvice: Send + Sync {
    fn after_throwing(&self, join_point: &JoinPoint<'_>, error: &anyhow::Error)
        -> anyhow::Result<()>;
}

/// 后置通知（finally 语义）
pub trait AfterAdvice: Send + Sync {
    fn after(&self, join_point: &JoinPoint<'_>) -> anyhow::Result<()>;
}

/// 方法拦截器（环绕通知）
///
/// 拦截器可以调用 `invocation.proceed()` 零次或多次
pub trait MethodInterceptor: Send + Sync {
    fn invoke(&self, invocation: &mut MethodInvocation<'_>) -> anyhow::Result<ReturnValue>;
}

/// 通知
#[derive(Clone)]
pub enum Advice {
    Before(Arc<dyn MethodBeforeAdvice>),
    AfterReturning(Arc<dyn AfterReturningAdvice>),
    AfterThrowing(Arc<dyn ThrowsAdvice>),
    After(Arc<dyn AfterAdvice>),
    Around(Arc<dyn MethodInterceptor>),
    Introduction(Arc<dyn IntroductionInterceptor>),
    /// 由自定义适配器处理的通知
    Custom {
        kind: &'static str,
        advice: Arc<dyn Any + Send + Sync>,
    },
}

impl Advice {
    pub fn before(advice: impl MethodBeforeAdvice + 'static) -> Self {
        Advice::Before(Arc::new(advice))
    }

    pub fn after_returning(advice: impl AfterReturningAdvice + 'static) -> Self {
        Advice::AfterReturning(Arc::new(advice))
    }

    pub fn after_throwing(advice: impl ThrowsAdvice + 'static) -> Self {
        Advice::AfterThrowing(Arc::new(advice))
    }

    pub fn after(advice: impl AfterAdvice + 'static) -> Self {
        Advice::After(Arc::new(advice))
    }

    pub fn around(interceptor: impl MethodInterceptor + 'static) -> Self {
        Advice::Around(Arc::new(interceptor))
    }

    pub fn introduction(interceptor: impl IntroductionInterceptor + 'static) -> Self {
        Advice::Introduction(Arc::new(interceptor))
    }

    pub fn custom<T: Any + Send + Sync>(kind: &'static str, advice: T) -> Self {
        Advice::Custom {
            kind,
            advice: Arc::new(advice),
        }
    }

    pub fn before_fn<F>(f: F) -> Self
    where
        F: Fn(&JoinPoint<'_>) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        Self::before(FnAdvice(f))
    }

    pub fn after_returning_fn<F>(f: F) -> Self
    where
        F: Fn(&JoinPoint<'_>, &ReturnValue) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        Self::after_returning(FnAdvice(f))
    }

    pub fn after_throwing_fn<F>(f: F) -> Self
    where
        F: Fn(&JoinPoint<'_>, &anyhow::Error) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        Self::after_throwing(FnAdvice(f))
    }

    pub fn after_fn<F>(f: F) -> Self
    where
        F: Fn(&JoinPoint<'_>) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        Self::after(FnAfter(f))
    }

    pub fn around_fn<F>(f: F) -> Self
    where
        F: Fn(&mut MethodInvocation<'_>) -> anyhow::Result<ReturnValue> + Send + Sync + 'static,
    {
        Self::around(FnAdvice(f))
    }

    /// 内置通知类型；自定义通知返回 `None`
    pub fn advice_type(&self) -> Option<AdviceType> {
        match self {
            Advice::Before(_) => Some(AdviceType::Before),
            Advice::AfterReturning(_) => Some(AdviceType::AfterReturning),
            Advice::AfterThrowing(_) => Some(AdviceType::AfterThrowing),
            Advice::After(_) => Some(AdviceType::After),
            Advice::Around(_) => Some(AdviceType::Around),
            Advice::Introduction(_) => Some(AdviceType::Introduction),
            Advice::Custom { .. } => None,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Advice::Before(_) => "before",
            Advice::AfterReturning(_) => "after-returning",
            Advice::AfterThrowing(_) => "after-throwing",
            Advice::After(_) => "after",
            Advice::Around(_) => "around",
            Advice::Introduction(_) => "introduction",
            Advice::Custom { kind, .. } => *kind,
        }
    }
}

impl fmt::Debug for Advice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Advice({})", self.kind())
    }
}

/// 闭包形式的通知
struct FnAdvice<F>(F);

/// `after` 与 `before` 的闭包签名相同，需要单独的包装类型
struct FnAfter<F>(F);

impl<F> MethodBeforeAdvice for FnAdvice<F>
where
    F: Fn(&JoinPoint<'_>) -> anyhow::Result<()> + Send + Sync,
{
    fn before(&self, join_point: &JoinPoint<'_>) -> anyhow::Result<()> {
        (self.0)(join_point)
    }
}

impl<F> AfterReturningAdvice for FnAdvice<F>
where
    F: Fn(&JoinPoint<'_>, &ReturnValue) -> anyhow::Result<()> + Send + Sync,
{
    fn after_returning(
        &self,
        join_point: &JoinPoint<'_>,
        result: &ReturnValue,
    ) -> anyhow::Result<()> {
        (self.0)(join_point, result)
    }
}

impl<F> ThrowsAdvice for FnAdvice<F>
where
    F: Fn(&JoinPoint<'_>, &anyhow::Error) -> anyhow::Result<()> + Send + Sync,
{
    fn after_throwing(
        &self,
        join_point: &JoinPoint<'_>,
        error: &anyhow::Error,
    ) -> anyhow::Result<()> {
        (self.0)(join_point, error)
    }
}

impl<F> AfterAdvice for FnAfter<F>
where
    F: Fn(&JoinPoint<'_>) -> anyhow::Result<()> + Send + Sync,
{
    fn after(&self, join_point: &JoinPoint<'_>) -> anyhow::Result<()> {
        (self.0)(join_point)
    }
}

impl<F> MethodInterceptor for FnAdvice<F>
where
    F: Fn(&mut MethodInvocation<'_>) -> anyhow::Result<ReturnValue> + Send + Sync,
{
    fn invoke(&self, invocation: &mut MethodInvocation<'_>) -> anyhow::Result<ReturnValue> {
        (self.0)(invocation)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_advice_kinds() {
        let before = Advice::before_fn(|_| Ok(()));
        assert_eq!(before.advice_type(), Some(AdviceType::Before));
        assert_eq!(before.kind(), "before");

        let around = Advice::around_fn(|invocation| invocation.proceed());
        assert_eq!(around.advice_type(), Some(AdviceType::Around));

        let after = Advice::after_fn(|_| Ok(()));
        assert!(matches!(after, Advice::After(_)));

        let custom = Advice::custom("audit", 42u32);
        assert_eq!(custom.advice_type(), None);
        assert_eq!(custom.kind(), "audit");
        assert_eq!(format!("{:?}", custom), "Advice(audit)");
    }
}
