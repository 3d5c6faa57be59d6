//! 顾问（Advisor）与顾问注册表
//!
//! 顾问 = 切点 + 通知 + 顺序。注册表保存应用中所有候选顾问，
//! 自动代理协调器从中挑选适用于某个类的顾问

use crate::advice::Advice;
use crate::aspect::{self, Aspect};
use crate::chain::ChainEpoch;
use crate::class::TargetClass;
use crate::introduction::IntroductionInterceptor;
use crate::metadata::Interface;
use crate::pointcut::{self, ClassFilter, Pointcut, TrueClassFilter};
use arc_swap::ArcSwap;
use once_cell::sync::Lazy;
use std::fmt;
use std::sync::Arc;

/// 最高优先级（最先执行）
pub const HIGHEST_PRECEDENCE: i32 = i32::MIN;

/// 最低优先级（最后执行），顾问的默认顺序
pub const LOWEST_PRECEDENCE: i32 = i32::MAX;

/// 顾问
#[derive(Clone)]
pub struct Advisor {
    name: String,
    pointcut: Pointcut,
    advice: Advice,
    order: i32,
}

impl Advisor {
    pub fn new(pointcut: impl Into<Pointcut>, advice: Advice) -> Self {
        Self {
            name: advice.kind().to_string(),
            pointcut: pointcut.into(),
            advice,
            order: LOWEST_PRECEDENCE,
        }
    }

    /// 匹配所有类的引入顾问
    pub fn introduction(interceptor: Arc<dyn IntroductionInterceptor>) -> Self {
        Self::introduction_for(TrueClassFilter, interceptor)
    }

    /// 只对 `class_filter` 匹配的类生效的引入顾问
    pub fn introduction_for(
        class_filter: impl ClassFilter + 'static,
        interceptor: Arc<dyn IntroductionInterceptor>,
    ) -> Self {
        Self::new(
            Pointcut::for_class_filter(class_filter),
            Advice::Introduction(interceptor),
        )
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_order(mut self, order: i32) -> Self {
        self.order = order;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn pointcut(&self) -> &Pointcut {
        &self.pointcut
    }

    pub fn advice(&self) -> &Advice {
        &self.advice
    }

    pub fn order(&self) -> i32 {
        self.order
    }

    pub fn is_introduction(&self) -> bool {
        matches!(self.advice, Advice::Introduction(_))
    }

    pub fn introduced_interfaces(&self) -> Vec<Arc<Interface>> {
        match &self.advice {
            Advice::Introduction(interceptor) => interceptor.interfaces(),
            _ => Vec::new(),
        }
    }

    /// 该顾问是否可能作用于某个类
    ///
    /// 引入顾问只看类过滤器；普通顾问还要求至少有一个方法静态匹配
    pub fn can_apply(&self, class: &TargetClass) -> bool {
        if !pointcut::matches_class(self.pointcut.class_filter().as_ref(), class) {
            return false;
        }
        if self.is_introduction() {
            return true;
        }
        let matcher = self.pointcut.method_matcher();
        class
            .methods()
            .any(|method| pointcut::matches_method(matcher.as_ref(), method, class))
    }
}

impl fmt::Debug for Advisor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Advisor")
            .field("name", &self.name)
            .field("advice", &self.advice)
            .field("order", &self.order)
            .finish()
    }
}

/// 按顺序稳定排序（顺序相同的保持注册顺序）
pub fn sort_advisors(advisors: &mut [Arc<Advisor>]) {
    advisors.sort_by_key(|advisor| advisor.order());
}

/// 全局顾问注册表
///
/// 应用启动时自动初始化，加载所有通过 inventory 注册的切面
static GLOBAL_ADVISOR_REGISTRY: Lazy<Arc<AdvisorRegistry>> = Lazy::new(|| {
    let registry = AdvisorRegistry::new();
    registry.load_registered_aspects();
    Arc::new(registry)
});

/// 顾问注册表
///
/// 持有候选顾问的不可变快照。修改时整体替换快照并推进链纪元，
/// 已缓存的拦截器链在下次调用时重建
pub struct AdvisorRegistry {
    advisors: ArcSwap<Vec<Arc<Advisor>>>,
    epoch: ChainEpoch,
}

impl AdvisorRegistry {
    pub fn new() -> Self {
        Self {
            advisors: ArcSwap::from_pointee(Vec::new()),
            epoch: ChainEpoch::new(),
        }
    }

    pub fn global() -> Arc<AdvisorRegistry> {
        GLOBAL_ADVISOR_REGISTRY.clone()
    }

    /// 用一组新的顾问替换全部候选顾问
    pub fn register_advisors(&self, advisors: impl IntoIterator<Item = Advisor>) {
        let advisors: Vec<Arc<Advisor>> = advisors.into_iter().map(Arc::new).collect();
        tracing::info!("🔷 [AdvisorRegistry] Registered {} advisor(s)", advisors.len());
        self.advisors.store(Arc::new(advisors));
        self.epoch.advance();
    }

    pub fn add_advisor(&self, advisor: Advisor) -> Arc<Advisor> {
        let advisor = Arc::new(advisor);
        tracing::debug!("Registering advisor: {}", advisor.name());
        self.advisors.rcu(|current| {
            let mut next: Vec<Arc<Advisor>> = current.iter().cloned().collect();
            next.push(advisor.clone());
            next
        });
        self.epoch.advance();
        advisor
    }

    /// 注册一个切面
    pub fn register_aspect(&self, aspect: Arc<dyn Aspect>) -> Arc<Advisor> {
        self.add_advisor(aspect::aspect_advisor(aspect))
    }

    /// 当前快照
    pub fn advisors(&self) -> Arc<Vec<Arc<Advisor>>> {
        self.advisors.load_full()
    }

    /// 让所有共享本纪元的拦截器链缓存失效
    pub fn invalidate_chains(&self) {
        self.epoch.advance();
    }

    pub fn epoch(&self) -> ChainEpoch {
        self.epoch.clone()
    }

    pub fn len(&self) -> usize {
        self.advisors.load().len()
    }

    pub fn is_empty(&self) -> bool {
        self.advisors.load().is_empty()
    }

    /// 从 inventory 自动加载所有注册的切面
    pub fn load_registered_aspects(&self) {
        let registrations: Vec<_> = aspect::get_all_aspect_registrations().collect();
        if registrations.is_empty() {
            return;
        }
        tracing::info!("Auto-loading {} aspect(s) from registry", registrations.len());

        for registration in registrations {
            tracing::debug!(
                "  ├─ Loading aspect: {} with pointcut: {}",
                registration.name,
                registration.pointcut_expr
            );
            self.register_aspect(registration.create_instance());
        }
    }
}

impl Default for AdvisorRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pointcut::PointcutExpression;
    use crate::value::ReturnValue;

    struct Ledger;

    fn ledger_class() -> Arc<TargetClass> {
        TargetClass::builder::<Ledger>("Ledger")
            .method("post", &["u64"], |_: &Ledger, _| Ok(ReturnValue::unit()))
            .method("balance", &[], |_: &Ledger, _| Ok(ReturnValue::new(0u64)))
            .build()
    }

    fn noop() -> Advice {
        Advice::before_fn(|_| Ok(()))
    }

    #[test]
    fn test_default_order_is_lowest_precedence() {
        let advisor = Advisor::new(Pointcut::always(), noop());
        assert_eq!(advisor.order(), LOWEST_PRECEDENCE);
        assert_eq!(advisor.name(), "before");
        assert!(!advisor.is_introduction());
    }

    #[test]
    fn test_sort_is_stable() {
        let mut advisors = vec![
            Arc::new(Advisor::new(Pointcut::always(), noop()).with_name("a").with_order(5)),
            Arc::new(Advisor::new(Pointcut::always(), noop()).with_name("b")),
            Arc::new(Advisor::new(Pointcut::always(), noop()).with_name("c").with_order(5)),
            Arc::new(Advisor::new(Pointcut::always(), noop()).with_name("d").with_order(1)),
        ];
        sort_advisors(&mut advisors);
        let names: Vec<_> = advisors.iter().map(|a| a.name()).collect();
        assert_eq!(names, vec!["d", "a", "c", "b"]);
    }

    #[test]
    fn test_can_apply_requires_a_matching_method() {
        let class = ledger_class();
        let matching = Advisor::new(PointcutExpression::MethodPattern("post".into()), noop());
        let missing = Advisor::new(PointcutExpression::MethodPattern("close".into()), noop());
        let wrong_type = Advisor::new(PointcutExpression::TypePattern("Order*".into()), noop());

        assert!(matching.can_apply(&class));
        assert!(!missing.can_apply(&class));
        assert!(!wrong_type.can_apply(&class));
    }

    #[test]
    fn test_registry_advances_epoch_on_change() {
        let registry = AdvisorRegistry::new();
        let epoch = registry.epoch();
        let start = epoch.current();

        registry.add_advisor(Advisor::new(Pointcut::always(), noop()));
        assert_eq!(registry.len(), 1);
        assert!(epoch.current() > start);

        let before_replace = epoch.current();
        registry.register_advisors(vec![
            Advisor::new(Pointcut::always(), noop()),
            Advisor::new(Pointcut::always(), noop()),
        ]);
        assert_eq!(registry.len(), 2);
        assert!(epoch.current() > before_replace);
    }

    #[test]
    fn test_snapshot_is_unaffected_by_later_changes() {
        let registry = AdvisorRegistry::new();
        registry.add_advisor(Advisor::new(Pointcut::always(), noop()));
        let snapshot = registry.advisors();

        registry.add_advisor(Advisor::new(Pointcut::always(), noop()));
        assert_eq!(snapshot.len(), 1);
        assert_eq!(registry.advisors().len(), 2);
    }
}
