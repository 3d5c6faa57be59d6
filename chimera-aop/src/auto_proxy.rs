//! 自动代理协调器
//!
//! [`AutoProxyCreator`] 挂在对象生命周期上，为每个受管对象决定是否需要代理：
//!
//! 1. 实例化之前：若某个 [`TargetSourceCreator`] 为该对象提供了自定义目标源，
//!    立即基于该目标源创建代理
//! 2. 初始化之后：查找适用的顾问；没有则原样返回，有则用单例目标源包装成代理
//!
//! 决策按对象的标识键（名称，无名称时用类型）缓存，同一个键只计算一次。
//! 不同键的首次计算可以并发进行，互不阻塞

use crate::adapter::AdvisorAdapterRegistry;
use crate::advice::Advice;
use crate::advisor::{sort_advisors, Advisor, AdvisorRegistry};
use crate::class::{ClassRegistry, TargetClass};
use crate::config::AopProperties;
use crate::error::AopResult;
use crate::lifecycle::{
    BeanPostProcessor, InstantiationAwareBeanPostProcessor, SmartInstantiationAwareBeanPostProcessor,
};
use crate::proxy::AopProxy;
use crate::proxy_factory::{AopProxyFactory, ProxyConfig, ProxyFactory, ProxyStrategy};
use crate::target_source::{SingletonTargetSource, TargetSource, TargetSourceCreator};
use crate::value::Target;
use dashmap::{DashMap, DashSet};
use once_cell::sync::OnceCell;
use std::any::TypeId;
use std::fmt;
use std::sync::Arc;

/// 决策缓存键
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum CacheKey {
    Name(String),
    Type(TypeId),
}

impl CacheKey {
    /// 有名称时按名称，否则按类型
    pub fn for_bean(class: &TargetClass, bean_name: &str) -> Self {
        if bean_name.is_empty() {
            CacheKey::Type(class.target_type_id())
        } else {
            CacheKey::Name(bean_name.to_string())
        }
    }
}

/// 代理决策
#[derive(Clone)]
pub enum ProxyDecision {
    /// 不需要代理
    Skip,
    /// 需要代理，附带已排序的适用顾问
    Proxy { advisors: Arc<[Arc<Advisor>]> },
}

impl ProxyDecision {
    pub fn is_proxy(&self) -> bool {
        matches!(self, ProxyDecision::Proxy { .. })
    }
}

impl fmt::Debug for ProxyDecision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProxyDecision::Skip => write!(f, "Skip"),
            ProxyDecision::Proxy { advisors } => f
                .debug_struct("Proxy")
                .field(
                    "advisors",
                    &advisors.iter().map(|a| a.name()).collect::<Vec<_>>(),
                )
                .finish(),
        }
    }
}

/// 已创建代理的类型信息
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxyTypeInfo {
    pub strategy: ProxyStrategy,
    pub class_name: Option<String>,
    pub interfaces: Vec<String>,
}

impl ProxyTypeInfo {
    fn of(proxy: &AopProxy) -> Self {
        Self {
            strategy: proxy.strategy(),
            class_name: proxy.target_class().map(|class| class.name().to_string()),
            interfaces: proxy
                .proxied_interfaces()
                .iter()
                .map(|iface| iface.name().to_string())
                .collect(),
        }
    }
}

/// 提前暴露的代理引用
///
/// 所有持有者共享同一个单元，解析一次后看到同一个对象
#[derive(Clone, Default)]
pub struct EarlyProxyReference {
    cell: Arc<OnceCell<Target>>,
}

impl EarlyProxyReference {
    pub fn get(&self) -> Option<Target> {
        self.cell.get().cloned()
    }

    pub fn is_resolved(&self) -> bool {
        self.cell.get().is_some()
    }
}

impl fmt::Debug for EarlyProxyReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EarlyProxyReference")
            .field("resolved", &self.is_resolved())
            .finish()
    }
}

type SkipPredicate = dyn Fn(&TargetClass, &str) -> bool + Send + Sync;

/// 自动代理协调器
pub struct AutoProxyCreator {
    advisors: Arc<AdvisorRegistry>,
    adapters: Arc<AdvisorAdapterRegistry>,
    aop_proxy_factory: AopProxyFactory,
    defaults: ProxyConfig,
    common_interceptors: Vec<Arc<Advisor>>,
    apply_common_interceptors_first: bool,
    target_source_creators: Vec<Arc<dyn TargetSourceCreator>>,
    skip: Option<Box<SkipPredicate>>,
    decisions: DashMap<CacheKey, Arc<OnceCell<ProxyDecision>>>,
    target_sourced_beans: DashSet<CacheKey>,
    proxy_types: DashMap<CacheKey, ProxyTypeInfo>,
    early_references: DashMap<CacheKey, EarlyProxyReference>,
}

impl AutoProxyCreator {
    pub fn new(advisors: Arc<AdvisorRegistry>) -> Self {
        Self {
            advisors,
            adapters: AdvisorAdapterRegistry::global(),
            aop_proxy_factory: AopProxyFactory::default(),
            defaults: ProxyConfig::default(),
            common_interceptors: Vec::new(),
            apply_common_interceptors_first: true,
            target_source_creators: Vec::new(),
            skip: None,
            decisions: DashMap::new(),
            target_sourced_beans: DashSet::new(),
            proxy_types: DashMap::new(),
            early_references: DashMap::new(),
        }
    }

    /// 按配置创建
    pub fn from_properties(advisors: Arc<AdvisorRegistry>, properties: &AopProperties) -> Self {
        let mut creator = Self::new(advisors)
            .with_config(properties.proxy_config())
            .with_proxy_factory(properties.proxy_factory());
        creator.apply_common_interceptors_first = properties.apply_common_interceptors_first;
        creator
    }

    pub fn with_config(mut self, config: ProxyConfig) -> Self {
        self.defaults = config;
        self
    }

    pub fn with_proxy_factory(mut self, factory: AopProxyFactory) -> Self {
        self.aop_proxy_factory = factory;
        self
    }

    pub fn with_adapters(mut self, adapters: Arc<AdvisorAdapterRegistry>) -> Self {
        self.adapters = adapters;
        self
    }

    pub fn with_target_source_creator(mut self, creator: Arc<dyn TargetSourceCreator>) -> Self {
        self.target_source_creators.push(creator);
        self
    }

    /// 追加应用于所有代理的公共拦截器
    pub fn with_common_interceptor(mut self, advice: Advice) -> AopResult<Self> {
        let advisor = self.adapters.wrap(advice)?;
        self.common_interceptors.push(Arc::new(advisor));
        Ok(self)
    }

    /// 公共拦截器排在对象专属顾问之前（默认）还是之后
    pub fn apply_common_interceptors_first(mut self, first: bool) -> Self {
        self.apply_common_interceptors_first = first;
        self
    }

    /// 额外的跳过条件
    pub fn with_skip<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&TargetClass, &str) -> bool + Send + Sync + 'static,
    {
        self.skip = Some(Box::new(predicate));
        self
    }

    pub fn advisor_registry(&self) -> &Arc<AdvisorRegistry> {
        &self.advisors
    }

    /// 实例化之前的钩子
    ///
    /// 只有存在自定义目标源时才会创建代理
    pub fn notify_candidate(
        &self,
        class: &Arc<TargetClass>,
        bean_name: &str,
    ) -> AopResult<Option<Arc<AopProxy>>> {
        if self.should_skip(class, bean_name) {
            return Ok(None);
        }

        for creator in &self.target_source_creators {
            if let Some(source) = creator.target_source(class, bean_name) {
                let key = CacheKey::for_bean(class, bean_name);
                self.target_sourced_beans.insert(key.clone());
                let advisors = self.find_eligible_advisors(class);
                let proxy = self.create_proxy(class, bean_name, &key, source, &advisors)?;
                return Ok(Some(proxy));
            }
        }
        Ok(None)
    }

    /// 初始化之后的钩子
    ///
    /// 未登记类型的对象、已经是代理的对象原样返回
    pub fn notify_initialized(&self, bean: Target, bean_name: &str) -> AopResult<Target> {
        if bean.is::<AopProxy>() {
            return Ok(bean);
        }
        let Some(class) = ClassRegistry::global().resolve(&bean) else {
            tracing::trace!("Bean '{}' has no registered class, leaving it unproxied", bean_name);
            return Ok(bean);
        };

        let key = CacheKey::for_bean(&class, bean_name);
        if self.target_sourced_beans.contains(&key) {
            return Ok(bean);
        }
        // 已登记占位的对象：结果写回占位，使先前拿到占位的一方看到同一个对象
        let placeholder = self.early_references.get(&key).map(|r| r.value().clone());
        if let Some(reference) = placeholder {
            let resolved = reference
                .cell
                .get_or_try_init(|| self.wrap_if_necessary(bean, &class, bean_name, &key))?;
            return Ok(resolved.clone());
        }
        self.wrap_if_necessary(bean, &class, bean_name, &key)
    }

    /// 为尚未初始化完成的对象提供提前引用
    ///
    /// 同一个键的所有调用得到同一个对象；之后的 `notify_initialized` 也返回它
    pub fn early_proxy_reference(&self, bean: Target, bean_name: &str) -> AopResult<Target> {
        let Some(class) = ClassRegistry::global().resolve(&bean) else {
            return Ok(bean);
        };
        let key = CacheKey::for_bean(&class, bean_name);
        let reference = self.early_reference(&class, bean_name);
        let resolved = reference
            .cell
            .get_or_try_init(|| self.wrap_if_necessary(bean, &class, bean_name, &key))?;
        Ok(resolved.clone())
    }

    /// 取得（必要时登记）某个对象的提前引用占位
    pub fn early_reference(&self, class: &TargetClass, bean_name: &str) -> EarlyProxyReference {
        self.early_references
            .entry(CacheKey::for_bean(class, bean_name))
            .or_default()
            .value()
            .clone()
    }

    /// 预测对象最终暴露的类型，只对已创建代理的对象有结果
    pub fn predict_proxy_type(&self, class: &TargetClass, bean_name: &str) -> Option<ProxyTypeInfo> {
        self.proxy_types
            .get(&CacheKey::for_bean(class, bean_name))
            .map(|info| info.value().clone())
    }

    /// 已缓存的决策
    pub fn cached_decision(&self, key: &CacheKey) -> Option<ProxyDecision> {
        self.decisions.get(key)?.value().get().cloned()
    }

    fn wrap_if_necessary(
        &self,
        bean: Target,
        class: &Arc<TargetClass>,
        bean_name: &str,
        key: &CacheKey,
    ) -> AopResult<Target> {
        match self.decision_for(class, bean_name, key) {
            ProxyDecision::Skip => Ok(bean),
            ProxyDecision::Proxy { advisors } => {
                let source = Arc::new(SingletonTargetSource::new(bean, class.clone()));
                let proxy = self.create_proxy(class, bean_name, key, source, &advisors)?;
                Ok(proxy as Target)
            }
        }
    }

    fn decision_for(&self, class: &TargetClass, bean_name: &str, key: &CacheKey) -> ProxyDecision {
        // 先取出单元再释放分片锁，只有同一个键的首次计算会相互等待
        let cell = self
            .decisions
            .entry(key.clone())
            .or_insert_with(|| Arc::new(OnceCell::new()))
            .value()
            .clone();

        cell.get_or_init(|| {
            if self.should_skip(class, bean_name) {
                tracing::trace!("Skipping infrastructure bean '{}'", bean_name);
                return ProxyDecision::Skip;
            }
            let advisors = self.find_eligible_advisors(class);
            if advisors.is_empty() {
                tracing::trace!("No advisors apply to bean '{}'", bean_name);
                ProxyDecision::Skip
            } else {
                ProxyDecision::Proxy {
                    advisors: advisors.into(),
                }
            }
        })
        .clone()
    }

    fn should_skip(&self, class: &TargetClass, bean_name: &str) -> bool {
        class.is_infrastructure()
            || self
                .skip
                .as_ref()
                .map_or(false, |predicate| predicate(class, bean_name))
    }

    /// 候选顾问中能作用于该类的顾问，按顺序排好
    pub fn find_eligible_advisors(&self, class: &TargetClass) -> Vec<Arc<Advisor>> {
        let mut eligible: Vec<Arc<Advisor>> = self
            .advisors
            .advisors()
            .iter()
            .filter(|advisor| advisor.can_apply(class))
            .cloned()
            .collect();
        sort_advisors(&mut eligible);
        eligible
    }

    fn create_proxy(
        &self,
        class: &Arc<TargetClass>,
        bean_name: &str,
        key: &CacheKey,
        source: Arc<dyn TargetSource>,
        specific: &[Arc<Advisor>],
    ) -> AopResult<Arc<AopProxy>> {
        let mut factory = ProxyFactory::for_target_source(source)
            .config(self.defaults)
            .pre_filtered(true)
            .adapter_registry(self.adapters.clone())
            .aop_proxy_factory(self.aop_proxy_factory)
            .epoch(self.advisors.epoch());

        if !self.defaults.proxy_target_class {
            let interfaces = class.user_interfaces();
            if interfaces.is_empty() {
                factory = factory.proxy_target_class(true);
            }
            for interface in interfaces {
                factory = factory.interface(interface);
            }
        }

        let (first, last): (&[Arc<Advisor>], &[Arc<Advisor>]) = if self.apply_common_interceptors_first {
            (self.common_interceptors.as_slice(), specific)
        } else {
            (specific, self.common_interceptors.as_slice())
        };
        for advisor in first.iter().chain(last) {
            factory = factory.shared_advisor(advisor.clone());
        }

        let proxy = factory.get_proxy()?;
        self.proxy_types.insert(key.clone(), ProxyTypeInfo::of(&proxy));
        tracing::info!(
            "🔷 [AutoProxy] Created {} proxy for bean '{}' ({}) with {} advisor(s)",
            proxy.strategy(),
            bean_name,
            class.name(),
            specific.len() + self.common_interceptors.len()
        );
        Ok(proxy)
    }
}

impl Default for AutoProxyCreator {
    fn default() -> Self {
        Self::new(AdvisorRegistry::global())
    }
}

impl BeanPostProcessor for AutoProxyCreator {
    fn post_process_after_initialization(&self, bean: Target, bean_name: &str) -> AopResult<Target> {
        self.notify_initialized(bean, bean_name)
    }

    fn name(&self) -> &str {
        "AutoProxyCreator"
    }

    fn order(&self) -> i32 {
        // 在其他处理器之后执行，确保对象已经完全初始化
        2000
    }
}

impl InstantiationAwareBeanPostProcessor for AutoProxyCreator {
    fn post_process_before_instantiation(
        &self,
        class: &Arc<TargetClass>,
        bean_name: &str,
    ) -> AopResult<Option<Target>> {
        Ok(self
            .notify_candidate(class, bean_name)?
            .map(|proxy| proxy as Target))
    }
}

impl SmartInstantiationAwareBeanPostProcessor for AutoProxyCreator {
    fn predict_proxy_type(&self, class: &Arc<TargetClass>, bean_name: &str) -> Option<ProxyTypeInfo> {
        AutoProxyCreator::predict_proxy_type(self, class, bean_name)
    }

    fn get_early_bean_reference(&self, bean: Target, bean_name: &str) -> AopResult<Target> {
        self.early_proxy_reference(bean, bean_name)
    }
}
