//! 拦截器链构建与缓存
//!
//! [`AdvisorChainFactory`] 对一组顾问按顺序做两级匹配（类过滤器、方法匹配器），
//! 生成某个方法的拦截器链。运行时匹配器会被包装成 [`ChainElement::Dynamic`]，
//! 每次调用时再根据实参决定是否执行。
//!
//! [`ChainCache`] 以 (目标类型, 方法) 为键缓存链。缓存条目记录了构建时的
//! [`ChainEpoch`]，纪元推进后旧条目自动视为未命中

use crate::adapter::AdvisorAdapterRegistry;
use crate::advice::MethodInterceptor;
use crate::advisor::Advisor;
use crate::class::TargetClass;
use crate::error::AopResult;
use crate::metadata::Method;
use crate::pointcut::{self, MethodMatcher};
use std::any::TypeId;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// 拦截器链中的一个元素
#[derive(Clone)]
pub enum ChainElement {
    /// 无条件执行
    Interceptor(Arc<dyn MethodInterceptor>),
    /// 运行时匹配成功才执行
    Dynamic {
        interceptor: Arc<dyn MethodInterceptor>,
        matcher: Arc<dyn MethodMatcher>,
    },
}

impl ChainElement {
    pub fn interceptor(&self) -> &Arc<dyn MethodInterceptor> {
        match self {
            ChainElement::Interceptor(interceptor) => interceptor,
            ChainElement::Dynamic { interceptor, .. } => interceptor,
        }
    }

    pub fn is_dynamic(&self) -> bool {
        matches!(self, ChainElement::Dynamic { .. })
    }
}

impl fmt::Debug for ChainElement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChainElement::Interceptor(_) => write!(f, "Interceptor"),
            ChainElement::Dynamic { .. } => write!(f, "Dynamic"),
        }
    }
}

/// 某个方法的有序拦截器链
#[derive(Debug, Default)]
pub struct InterceptorChain {
    elements: Vec<ChainElement>,
    requires_introduction: bool,
}

impl InterceptorChain {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn elements(&self) -> &[ChainElement] {
        &self.elements
    }

    pub fn len(&self) -> usize {
        self.elements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }

    /// 链中是否包含引入拦截器
    ///
    /// 仅供检查使用；代理实现的引入接口在 `ProxyFactory::into_advised` 中收集
    pub fn requires_introduction(&self) -> bool {
        self.requires_introduction
    }
}

/// 拦截器链工厂
#[derive(Clone)]
pub struct AdvisorChainFactory {
    adapters: Arc<AdvisorAdapterRegistry>,
}

impl AdvisorChainFactory {
    pub fn new(adapters: Arc<AdvisorAdapterRegistry>) -> Self {
        Self { adapters }
    }

    /// 为 `method` 构建拦截器链
    ///
    /// `pre_filtered` 为 true 时跳过类过滤器，并保持调用方给出的顾问顺序
    /// （顾问已经按类筛选并排好序，例如通用拦截器放在最前）；否则按 `order` 稳定排序
    pub fn build_chain(
        &self,
        advisors: &[Arc<Advisor>],
        method: &Method,
        target_class: &TargetClass,
        pre_filtered: bool,
    ) -> AopResult<InterceptorChain> {
        let mut ordered: Vec<&Arc<Advisor>> = advisors.iter().collect();
        if !pre_filtered {
            ordered.sort_by_key(|advisor| advisor.order());
        }

        let mut chain = InterceptorChain::default();
        for advisor in ordered {
            let pointcut = advisor.pointcut();
            let class_matches = pre_filtered
                || pointcut::matches_class(pointcut.class_filter().as_ref(), target_class);

            if advisor.is_introduction() {
                if class_matches {
                    chain.requires_introduction = true;
                    chain.elements.extend(
                        self.adapters
                            .interceptors(advisor)?
                            .into_iter()
                            .map(ChainElement::Interceptor),
                    );
                }
                continue;
            }

            if !class_matches {
                continue;
            }

            let matcher = pointcut.method_matcher();
            if !pointcut::matches_method(matcher.as_ref(), method, target_class) {
                continue;
            }

            let interceptors = self.adapters.interceptors(advisor)?;
            if matcher.is_runtime() {
                chain
                    .elements
                    .extend(interceptors.into_iter().map(|interceptor| {
                        ChainElement::Dynamic {
                            interceptor,
                            matcher: matcher.clone(),
                        }
                    }));
            } else {
                chain
                    .elements
                    .extend(interceptors.into_iter().map(ChainElement::Interceptor));
            }
        }

        tracing::trace!(
            "Built interceptor chain for {} on {}: {} element(s)",
            method.qualified_name(),
            target_class.name(),
            chain.len()
        );
        Ok(chain)
    }
}

impl Default for AdvisorChainFactory {
    fn default() -> Self {
        Self::new(AdvisorAdapterRegistry::global())
    }
}

/// 链纪元
///
/// 多个代理配置可以共享同一个纪元，推进纪元会让它们的链缓存全部失效
#[derive(Debug, Clone, Default)]
pub struct ChainEpoch(Arc<AtomicU64>);

impl ChainEpoch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current(&self) -> u64 {
        self.0.load(Ordering::Acquire)
    }

    pub fn advance(&self) -> u64 {
        self.0.fetch_add(1, Ordering::AcqRel) + 1
    }
}

/// 链缓存键
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MethodCacheKey {
    class: TypeId,
    method: Method,
}

impl MethodCacheKey {
    pub fn new(class: &TargetClass, method: &Method) -> Self {
        Self {
            class: class.target_type_id(),
            method: method.clone(),
        }
    }
}

struct CachedChain {
    epoch: u64,
    chain: Arc<InterceptorChain>,
}

/// 拦截器链缓存
///
/// 本身不加锁，由持有者决定并发策略
#[derive(Default)]
pub struct ChainCache {
    entries: HashMap<MethodCacheKey, CachedChain>,
}

impl ChainCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lookup(&self, key: &MethodCacheKey, epoch: u64) -> Option<Arc<InterceptorChain>> {
        self.entries
            .get(key)
            .filter(|cached| cached.epoch == epoch)
            .map(|cached| cached.chain.clone())
    }

    /// 写入缓存；若同一纪元已有条目（并发构建），保留已有的链并返回它
    pub fn store(
        &mut self,
        key: MethodCacheKey,
        epoch: u64,
        chain: Arc<InterceptorChain>,
    ) -> Arc<InterceptorChain> {
        if let Some(existing) = self.lookup(&key, epoch) {
            return existing;
        }
        self.entries.insert(key, CachedChain { epoch, chain: chain.clone() });
        chain
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::advice::Advice;
    use crate::metadata::MethodSignature;
    use crate::pointcut::{DynamicMethodMatcher, Pointcut, PointcutExpression};
    use crate::value::ReturnValue;

    struct Inventory;

    fn inventory_class() -> Arc<TargetClass> {
        TargetClass::builder::<Inventory>("Inventory")
            .method("reserve", &["u32"], |_: &Inventory, _| Ok(ReturnValue::unit()))
            .method("release", &["u32"], |_: &Inventory, _| Ok(ReturnValue::unit()))
            .build()
    }

    fn advisor(name: &str, pointcut: impl Into<Pointcut>, order: i32) -> Arc<Advisor> {
        Arc::new(
            Advisor::new(pointcut, Advice::before_fn(|_| Ok(())))
                .with_name(name)
                .with_order(order),
        )
    }

    fn reserve(class: &TargetClass) -> Method {
        class.find_method("reserve").unwrap().clone()
    }

    #[test]
    fn test_chain_filters_by_class_and_method() {
        let class = inventory_class();
        let advisors = vec![
            advisor("all", Pointcut::always(), 0),
            advisor("reserve", PointcutExpression::MethodPattern("reserve".into()), 0),
            advisor("release", PointcutExpression::MethodPattern("release".into()), 0),
            advisor("other-type", PointcutExpression::TypePattern("Order".into()), 0),
        ];

        let factory = AdvisorChainFactory::default();
        let chain = factory
            .build_chain(&advisors, &reserve(&class), &class, false)
            .unwrap();
        assert_eq!(chain.len(), 2);
        assert!(!chain.requires_introduction());
    }

    #[test]
    fn test_pre_filtered_skips_class_filter() {
        let class = inventory_class();
        let advisors = vec![advisor(
            "other-type",
            PointcutExpression::TypePattern("Order".into()),
            0,
        )];

        let factory = AdvisorChainFactory::default();
        let method = Method::new("Order", MethodSignature::new("reserve", &["u32"]));
        let filtered = factory.build_chain(&advisors, &method, &class, false).unwrap();
        let pre_filtered = factory.build_chain(&advisors, &method, &class, true).unwrap();
        assert!(filtered.is_empty());
        assert_eq!(pre_filtered.len(), 1);
    }

    #[test]
    fn test_pre_filtered_keeps_supplied_order() {
        let class = inventory_class();
        let dynamic = Pointcut::for_method_matcher(DynamicMethodMatcher::new("reserve", |_, _| true));
        let advisors = vec![advisor("static", Pointcut::always(), 10), advisor("dynamic", dynamic, 1)];

        let factory = AdvisorChainFactory::default();
        let sorted = factory
            .build_chain(&advisors, &reserve(&class), &class, false)
            .unwrap();
        assert!(sorted.elements()[0].is_dynamic());
        assert!(!sorted.elements()[1].is_dynamic());

        let kept = factory
            .build_chain(&advisors, &reserve(&class), &class, true)
            .unwrap();
        assert!(!kept.elements()[0].is_dynamic());
        assert!(kept.elements()[1].is_dynamic());
    }

    #[test]
    fn test_runtime_matcher_yields_dynamic_element() {
        let class = inventory_class();
        let dynamic = Pointcut::for_method_matcher(DynamicMethodMatcher::new("reserve", |_, _| true));
        let advisors = vec![advisor("dynamic", dynamic, 0)];

        let chain = AdvisorChainFactory::default()
            .build_chain(&advisors, &reserve(&class), &class, false)
            .unwrap();
        assert_eq!(chain.len(), 1);
        assert!(chain.elements()[0].is_dynamic());
    }

    #[test]
    fn test_epoch_invalidates_cache_entries() {
        let class = inventory_class();
        let key = MethodCacheKey::new(&class, &reserve(&class));
        let epoch = ChainEpoch::new();
        let mut cache = ChainCache::new();

        let stored = cache.store(key.clone(), epoch.current(), Arc::new(InterceptorChain::empty()));
        let hit = cache.lookup(&key, epoch.current()).unwrap();
        assert!(Arc::ptr_eq(&stored, &hit));

        epoch.advance();
        assert!(cache.lookup(&key, epoch.current()).is_none());
    }

    #[test]
    fn test_store_keeps_first_chain_of_an_epoch() {
        let class = inventory_class();
        let key = MethodCacheKey::new(&class, &reserve(&class));
        let mut cache = ChainCache::new();

        let first = cache.store(key.clone(), 0, Arc::new(InterceptorChain::empty()));
        let second = cache.store(key.clone(), 0, Arc::new(InterceptorChain::empty()));
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(cache.len(), 1);

        let rebuilt = cache.store(key, 1, Arc::new(InterceptorChain::empty()));
        assert!(!Arc::ptr_eq(&first, &rebuilt));
    }
}
