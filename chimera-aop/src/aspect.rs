//! 切面（Aspect）定义
//!
//! 切面是横切关注点的模块化。一个切面由切点表达式和若干回调组成，
//! 注册时被转换成一个 [`Advisor`]，回调由 [`AspectInterceptor`] 在拦截器链中驱动

use crate::advice::{Advice, MethodInterceptor};
use crate::advisor::{Advisor, LOWEST_PRECEDENCE};
use crate::error_info::ErrorInfo;
use crate::joinpoint::{JoinPoint, MethodInvocation};
use crate::pointcut::PointcutExpression;
use crate::value::ReturnValue;
use std::sync::Arc;

/// 切面 Trait
///
/// 实现此 trait 以定义切面逻辑
pub trait Aspect: Send + Sync {
    /// 切面名称
    fn name(&self) -> &str;

    /// 切点表达式
    fn pointcut(&self) -> &PointcutExpression;

    /// 执行顺序，值越小越先执行
    fn order(&self) -> i32 {
        LOWEST_PRECEDENCE
    }

    /// 前置通知（可选实现）
    fn before(&self, _join_point: &JoinPoint<'_>) {}

    /// 后置通知（可选实现），无论成功还是失败都会执行
    fn after(&self, _join_point: &JoinPoint<'_>) {}

    /// 返回后通知（可选实现）
    fn after_returning(&self, _join_point: &JoinPoint<'_>, _result: &ReturnValue) {}

    /// 异常通知（可选实现）
    fn after_throwing(&self, _join_point: &JoinPoint<'_>, _error: &ErrorInfo) {}
}

/// 切面注册器
///
/// 用于 inventory 自动收集和注册切面
pub struct AspectRegistration {
    /// 切面名称
    pub name: &'static str,

    /// 切点表达式
    pub pointcut_expr: &'static str,

    /// 创建切面实例的函数
    pub creator: fn() -> Arc<dyn Aspect>,
}

impl AspectRegistration {
    pub const fn new(
        name: &'static str,
        pointcut_expr: &'static str,
        creator: fn() -> Arc<dyn Aspect>,
    ) -> Self {
        Self {
            name,
            pointcut_expr,
            creator,
        }
    }

    /// 创建切面实例
    pub fn create_instance(&self) -> Arc<dyn Aspect> {
        (self.creator)()
    }
}

inventory::collect!(AspectRegistration);

/// 获取所有注册的切面注册器
pub fn get_all_aspect_registrations() -> impl Iterator<Item = &'static AspectRegistration> {
    inventory::iter::<AspectRegistration>.into_iter()
}

/// 驱动切面回调的环绕拦截器
///
/// 执行顺序：
/// 1. 前置通知
/// 2. 目标方法（或链中剩余的拦截器）
/// 3. 返回后通知或异常通知
/// 4. 后置通知
pub struct AspectInterceptor {
    aspect: Arc<dyn Aspect>,
}

impl AspectInterceptor {
    pub fn new(aspect: Arc<dyn Aspect>) -> Self {
        Self { aspect }
    }

    pub fn aspect(&self) -> &Arc<dyn Aspect> {
        &self.aspect
    }
}

impl MethodInterceptor for AspectInterceptor {
    fn invoke(&self, invocation: &mut MethodInvocation<'_>) -> anyhow::Result<ReturnValue> {
        self.aspect.before(&invocation.join_point());

        let result = invocation.proceed();

        let join_point = invocation.join_point();
        match &result {
            Ok(value) => self.aspect.after_returning(&join_point, value),
            Err(error) => self
                .aspect
                .after_throwing(&join_point, &ErrorInfo::from_anyhow(error)),
        }
        self.aspect.after(&join_point);

        result
    }
}

/// 把切面转换成顾问：切点来自切面的表达式，顺序来自 [`Aspect::order`]
pub fn aspect_advisor(aspect: Arc<dyn Aspect>) -> Advisor {
    let pointcut = aspect.pointcut().clone();
    let name = aspect.name().to_string();
    let order = aspect.order();
    Advisor::new(pointcut, Advice::around(AspectInterceptor::new(aspect)))
        .with_name(name)
        .with_order(order)
}

// ============================================================================
// 预定义的常用切面
// ============================================================================

/// 日志切面 - 记录方法调用
pub struct LoggingAspect {
    log_args: bool,
    log_result: bool,
    pointcut: PointcutExpression,
}

impl LoggingAspect {
    pub fn new(pointcut: PointcutExpression) -> Self {
        Self {
            log_args: false,
            log_result: false,
            pointcut,
        }
    }

    pub fn with_args(mut self) -> Self {
        self.log_args = true;
        self
    }

    pub fn with_result(mut self) -> Self {
        self.log_result = true;
        self
    }
}

impl Aspect for LoggingAspect {
    fn name(&self) -> &str {
        "LoggingAspect"
    }

    fn pointcut(&self) -> &PointcutExpression {
        &self.pointcut
    }

    fn before(&self, join_point: &JoinPoint<'_>) {
        if self.log_args {
            tracing::info!(
                "→ Entering: {} with {:?}",
                join_point.signature(),
                join_point.arguments()
            );
        } else {
            tracing::info!("→ Entering: {}", join_point.signature());
        }
    }

    fn after_returning(&self, join_point: &JoinPoint<'_>, result: &ReturnValue) {
        if self.log_result {
            tracing::info!(
                "  {} returned {}",
                join_point.signature(),
                result.type_name()
            );
        }
    }

    fn after(&self, join_point: &JoinPoint<'_>) {
        tracing::info!(
            "← Exiting: {} (took {:?})",
            join_point.signature(),
            join_point.elapsed()
        );
    }
}

/// 性能监控切面
pub struct PerformanceAspect {
    threshold_ms: u128,
    pointcut: PointcutExpression,
}

impl PerformanceAspect {
    pub fn new(threshold_ms: u128, pointcut: PointcutExpression) -> Self {
        Self {
            threshold_ms,
            pointcut,
        }
    }
}

impl Aspect for PerformanceAspect {
    fn name(&self) -> &str {
        "PerformanceAspect"
    }

    fn pointcut(&self) -> &PointcutExpression {
        &self.pointcut
    }

    fn after(&self, join_point: &JoinPoint<'_>) {
        let elapsed = join_point.elapsed().as_millis();
        if elapsed > self.threshold_ms {
            tracing::warn!(
                "⚠️ Slow method detected: {} took {}ms (threshold: {}ms)",
                join_point.signature(),
                elapsed,
                self.threshold_ms
            );
        }
    }
}

/// 异常处理切面
pub struct ExceptionHandlingAspect {
    pointcut: PointcutExpression,
}

impl ExceptionHandlingAspect {
    pub fn new(pointcut: PointcutExpression) -> Self {
        Self { pointcut }
    }
}

impl Aspect for ExceptionHandlingAspect {
    fn name(&self) -> &str {
        "ExceptionHandlingAspect"
    }

    fn pointcut(&self) -> &PointcutExpression {
        &self.pointcut
    }

    fn order(&self) -> i32 {
        crate::advisor::HIGHEST_PRECEDENCE
    }

    fn after_throwing(&self, join_point: &JoinPoint<'_>, error: &ErrorInfo) {
        tracing::error!(
            "❌ Exception in {}: {}",
            join_point.signature(),
            error.full_description()
        );
    }
}
