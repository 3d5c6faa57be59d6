//! 通知适配器注册表
//!
//! 把各种通知统一转换成 [`MethodInterceptor`]。注册表持有一份不可变的适配器
//! 快照，注册新适配器时整体替换快照，读取端无锁

use crate::advice::{
    Advice, AfterAdvice, AfterReturningAdvice, MethodBeforeAdvice, MethodInterceptor, ThrowsAdvice,
};
use crate::advisor::Advisor;
use crate::error::{AopError, AopResult};
use crate::introduction::IntroductionChainLink;
use crate::joinpoint::MethodInvocation;
use crate::pointcut::Pointcut;
use crate::value::ReturnValue;
use arc_swap::ArcSwap;
use once_cell::sync::Lazy;
use std::sync::Arc;

/// 通知适配器
pub trait AdvisorAdapter: Send + Sync {
    fn name(&self) -> &str;

    fn supports_advice(&self, advice: &Advice) -> bool;

    /// 为顾问生成拦截器；只有在 `supports_advice` 为 true 时才会被调用
    fn interceptor(&self, advisor: &Advisor) -> Option<Arc<dyn MethodInterceptor>>;
}

/// 适配器注册表
pub struct AdvisorAdapterRegistry {
    adapters: ArcSwap<Vec<Arc<dyn AdvisorAdapter>>>,
}

static GLOBAL_ADAPTER_REGISTRY: Lazy<Arc<AdvisorAdapterRegistry>> =
    Lazy::new(|| Arc::new(AdvisorAdapterRegistry::with_default_adapters()));

impl AdvisorAdapterRegistry {
    /// 不含任何适配器的注册表，只能处理环绕通知和引入
    pub fn empty() -> Self {
        Self {
            adapters: ArcSwap::from_pointee(Vec::new()),
        }
    }

    /// 预装前置、返回后、异常、后置四种适配器
    pub fn with_default_adapters() -> Self {
        let adapters: Vec<Arc<dyn AdvisorAdapter>> = vec![
            Arc::new(BeforeAdviceAdapter),
            Arc::new(AfterReturningAdviceAdapter),
            Arc::new(ThrowsAdviceAdapter),
            Arc::new(AfterAdviceAdapter),
        ];
        Self {
            adapters: ArcSwap::from_pointee(adapters),
        }
    }

    pub fn global() -> Arc<AdvisorAdapterRegistry> {
        GLOBAL_ADAPTER_REGISTRY.clone()
    }

    pub fn register_adapter(&self, adapter: Arc<dyn AdvisorAdapter>) {
        tracing::debug!("Registered advisor adapter: {}", adapter.name());
        self.adapters.rcu(|current| {
            let mut next: Vec<Arc<dyn AdvisorAdapter>> = current.iter().cloned().collect();
            next.push(adapter.clone());
            next
        });
    }

    pub fn adapter_count(&self) -> usize {
        self.adapters.load().len()
    }

    pub fn supports(&self, advice: &Advice) -> bool {
        matches!(advice, Advice::Around(_) | Advice::Introduction(_))
            || self
                .adapters
                .load()
                .iter()
                .any(|adapter| adapter.supports_advice(advice))
    }

    /// 把通知包装成匹配所有方法的顾问
    pub fn wrap(&self, advice: Advice) -> AopResult<Advisor> {
        if !self.supports(&advice) {
            return Err(AopError::UnknownAdviceType {
                kind: advice.kind().to_string(),
            });
        }
        Ok(match advice {
            Advice::Introduction(interceptor) => Advisor::introduction(interceptor),
            advice => Advisor::new(Pointcut::always(), advice),
        })
    }

    /// 顾问对应的拦截器，按适配器注册顺序排列
    pub fn interceptors(&self, advisor: &Advisor) -> AopResult<Vec<Arc<dyn MethodInterceptor>>> {
        let mut interceptors: Vec<Arc<dyn MethodInterceptor>> = Vec::new();
        match advisor.advice() {
            Advice::Around(interceptor) => interceptors.push(interceptor.clone()),
            Advice::Introduction(interceptor) => {
                interceptors.push(Arc::new(IntroductionChainLink(interceptor.clone())))
            }
            _ => {}
        }

        for adapter in self.adapters.load().iter() {
            if adapter.supports_advice(advisor.advice()) {
                if let Some(interceptor) = adapter.interceptor(advisor) {
                    interceptors.push(interceptor);
                }
            }
        }

        if interceptors.is_empty() {
            return Err(AopError::UnknownAdviceType {
                kind: advisor.advice().kind().to_string(),
            });
        }
        Ok(interceptors)
    }
}

impl Default for AdvisorAdapterRegistry {
    fn default() -> Self {
        Self::with_default_adapters()
    }
}

struct BeforeAdviceAdapter;

impl AdvisorAdapter for BeforeAdviceAdapter {
    fn name(&self) -> &str {
        "before"
    }

    fn supports_advice(&self, advice: &Advice) -> bool {
        matches!(advice, Advice::Before(_))
    }

    fn interceptor(&self, advisor: &Advisor) -> Option<Arc<dyn MethodInterceptor>> {
        match advisor.advice() {
            Advice::Before(advice) => Some(Arc::new(MethodBeforeAdviceInterceptor {
                advice: advice.clone(),
            })),
            _ => None,
        }
    }
}

struct AfterReturningAdviceAdapter;

impl AdvisorAdapter for AfterReturningAdviceAdapter {
    fn name(&self) -> &str {
        "after-returning"
    }

    fn supports_advice(&self, advice: &Advice) -> bool {
        matches!(advice, Advice::AfterReturning(_))
    }

    fn interceptor(&self, advisor: &Advisor) -> Option<Arc<dyn MethodInterceptor>> {
        match advisor.advice() {
            Advice::AfterReturning(advice) => Some(Arc::new(AfterReturningAdviceInterceptor {
                advice: advice.clone(),
            })),
            _ => None,
        }
    }
}

struct ThrowsAdviceAdapter;

impl AdvisorAdapter for ThrowsAdviceAdapter {
    fn name(&self) -> &str {
        "after-throwing"
    }

    fn supports_advice(&self, advice: &Advice) -> bool {
        matches!(advice, Advice::AfterThrowing(_))
    }

    fn interceptor(&self, advisor: &Advisor) -> Option<Arc<dyn MethodInterceptor>> {
        match advisor.advice() {
            Advice::AfterThrowing(advice) => Some(Arc::new(ThrowsAdviceInterceptor {
                advice: advice.clone(),
            })),
            _ => None,
        }
    }
}

struct AfterAdviceAdapter;

impl AdvisorAdapter for AfterAdviceAdapter {
    fn name(&self) -> &str {
        "after"
    }

    fn supports_advice(&self, advice: &Advice) -> bool {
        matches!(advice, Advice::After(_))
    }

    fn interceptor(&self, advisor: &Advisor) -> Option<Arc<dyn MethodInterceptor>> {
        match advisor.advice() {
            Advice::After(advice) => Some(Arc::new(AfterAdviceInterceptor {
                advice: advice.clone(),
            })),
            _ => None,
        }
    }
}

/// 前置通知拦截器
pub struct MethodBeforeAdviceInterceptor {
    advice: Arc<dyn MethodBeforeAdvice>,
}

impl MethodInterceptor for MethodBeforeAdviceInterceptor {
    fn invoke(&self, invocation: &mut MethodInvocation<'_>) -> anyhow::Result<ReturnValue> {
        self.advice.before(&invocation.join_point())?;
        invocation.proceed()
    }
}

/// 返回后通知拦截器
pub struct AfterReturningAdviceInterceptor {
    advice: Arc<dyn AfterReturningAdvice>,
}

impl MethodInterceptor for AfterReturningAdviceInterceptor {
    fn invoke(&self, invocation: &mut MethodInvocation<'_>) -> anyhow::Result<ReturnValue> {
        let value = invocation.proceed()?;
        self.advice
            .after_returning(&invocation.join_point(), &value)?;
        Ok(value)
    }
}

/// 异常通知拦截器
pub struct ThrowsAdviceInterceptor {
    advice: Arc<dyn ThrowsAdvice>,
}

impl MethodInterceptor for ThrowsAdviceInterceptor {
    fn invoke(&self, invocation: &mut MethodInvocation<'_>) -> anyhow::Result<ReturnValue> {
        match invocation.proceed() {
            Ok(value) => Ok(value),
            Err(error) => {
                self.advice
                    .after_throwing(&invocation.join_point(), &error)?;
                Err(error)
            }
        }
    }
}

/// 后置通知拦截器，成功或失败都会执行
pub struct AfterAdviceInterceptor {
    advice: Arc<dyn AfterAdvice>,
}

impl MethodInterceptor for AfterAdviceInterceptor {
    fn invoke(&self, invocation: &mut MethodInvocation<'_>) -> anyhow::Result<ReturnValue> {
        let result = invocation.proceed();
        self.advice.after(&invocation.join_point())?;
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct CountingAdapter;

    impl AdvisorAdapter for CountingAdapter {
        fn name(&self) -> &str {
            "audit"
        }

        fn supports_advice(&self, advice: &Advice) -> bool {
            matches!(advice, Advice::Custom { kind: "audit", .. })
        }

        fn interceptor(&self, _advisor: &Advisor) -> Option<Arc<dyn MethodInterceptor>> {
            Some(Arc::new(PassThrough))
        }
    }

    struct PassThrough;

    impl MethodInterceptor for PassThrough {
        fn invoke(&self, invocation: &mut MethodInvocation<'_>) -> anyhow::Result<ReturnValue> {
            invocation.proceed()
        }
    }

    #[test]
    fn test_default_adapters_support_builtin_advice() {
        let registry = AdvisorAdapterRegistry::with_default_adapters();
        assert_eq!(registry.adapter_count(), 4);
        assert!(registry.supports(&Advice::before_fn(|_| Ok(()))));
        assert!(registry.supports(&Advice::after_fn(|_| Ok(()))));
        assert!(registry.supports(&Advice::around_fn(|inv| inv.proceed())));
        assert!(!registry.supports(&Advice::custom("audit", ())));
    }

    #[test]
    fn test_wrap_rejects_unknown_advice() {
        let registry = AdvisorAdapterRegistry::with_default_adapters();
        let error = registry.wrap(Advice::custom("audit", ())).unwrap_err();
        assert!(matches!(error, AopError::UnknownAdviceType { kind } if kind == "audit"));
    }

    #[test]
    fn test_register_custom_adapter() {
        let registry = AdvisorAdapterRegistry::with_default_adapters();
        registry.register_adapter(Arc::new(CountingAdapter));

        let advisor = registry.wrap(Advice::custom("audit", ())).unwrap();
        assert_eq!(registry.interceptors(&advisor).unwrap().len(), 1);
    }

    #[test]
    fn test_empty_registry_still_handles_around() {
        let registry = AdvisorAdapterRegistry::empty();
        let around = registry.wrap(Advice::around(PassThrough)).unwrap();
        assert_eq!(registry.interceptors(&around).unwrap().len(), 1);

        let before = Advisor::new(Pointcut::always(), Advice::before_fn(|_| Ok(())));
        assert!(registry.interceptors(&before).is_err());
    }
}
