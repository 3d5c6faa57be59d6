//! 代理配置与代理工厂
//!
//! - [`ProxyConfig`]：代理标志位
//! - [`AdvisedSupport`]：一个代理的完整配置（目标源、接口、顾问、链缓存）
//! - [`ProxyFactory`]：以构建器方式组装配置并创建代理
//! - [`AopProxyFactory`]：根据配置选择代理策略

use crate::adapter::AdvisorAdapterRegistry;
use crate::advice::Advice;
use crate::advisor::Advisor;
use crate::chain::{AdvisorChainFactory, ChainCache, ChainEpoch, InterceptorChain, MethodCacheKey};
use crate::class::TargetClass;
use crate::error::{AopError, AopResult};
use crate::metadata::{Interface, Method, ProxyInterface};
use crate::proxy::AopProxy;
use crate::target_source::{SingletonTargetSource, TargetSource};
use parking_lot::RwLock;
use serde::Deserialize;
use std::any::Any;
use std::fmt;
use std::sync::Arc;

/// 代理标志位
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct ProxyConfig {
    /// 强制使用子类转发代理
    pub proxy_target_class: bool,
    /// 允许激进优化（同样会选择子类转发代理）
    pub optimize: bool,
    /// 让目标方法可以取得当前代理
    pub expose_proxy: bool,
    /// 代理创建后禁止修改顾问
    pub frozen: bool,
    /// 顾问已按目标类筛选过，构建链时跳过类过滤器
    pub pre_filtered: bool,
}

/// 代理策略
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProxyStrategy {
    /// 只暴露代理接口中的方法
    InterfaceDispatch,
    /// 暴露目标类的全部方法，并且代理被视为目标类的实例
    SubclassForward,
}

impl fmt::Display for ProxyStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProxyStrategy::InterfaceDispatch => write!(f, "interface-dispatch"),
            ProxyStrategy::SubclassForward => write!(f, "subclass-forward"),
        }
    }
}

struct AdvisedState {
    advisors: Arc<[Arc<Advisor>]>,
    generation: u64,
    chains: ChainCache,
}

/// 代理配置
pub struct AdvisedSupport {
    target_source: Arc<dyn TargetSource>,
    interfaces: Vec<Arc<Interface>>,
    config: ProxyConfig,
    adapters: Arc<AdvisorAdapterRegistry>,
    chain_factory: AdvisorChainFactory,
    epoch: ChainEpoch,
    state: RwLock<AdvisedState>,
}

impl AdvisedSupport {
    pub fn target_source(&self) -> &Arc<dyn TargetSource> {
        &self.target_source
    }

    pub fn target_class(&self) -> Option<Arc<TargetClass>> {
        self.target_source.target_class()
    }

    /// 代理的接口（包含引入的接口）
    pub fn interfaces(&self) -> &[Arc<Interface>] {
        &self.interfaces
    }

    /// 是否没有用户提供的（非标记）接口
    pub fn has_no_user_interfaces(&self) -> bool {
        self.interfaces.iter().all(|iface| iface.is_marker())
    }

    pub fn config(&self) -> ProxyConfig {
        self.config
    }

    pub fn is_frozen(&self) -> bool {
        self.config.frozen
    }

    pub fn advisors(&self) -> Arc<[Arc<Advisor>]> {
        self.state.read().advisors.clone()
    }

    fn class_label(&self) -> String {
        self.target_class()
            .map_or_else(|| "<no target>".to_string(), |c| c.name().to_string())
    }

    fn mutate(&self, change: impl FnOnce(&mut Vec<Arc<Advisor>>) -> bool) -> AopResult<bool> {
        if self.config.frozen {
            return Err(AopError::ConfigFrozen {
                class: self.class_label(),
            });
        }

        let mut state = self.state.write();
        let mut advisors = state.advisors.to_vec();
        if !change(&mut advisors) {
            return Ok(false);
        }
        state.advisors = advisors.into();
        state.generation += 1;
        state.chains.clear();
        Ok(true)
    }

    /// 向已创建的代理追加顾问
    ///
    /// 代理的接口在创建时已经确定，因此这里不接受引入顾问
    pub fn add_advisor(&self, advisor: Advisor) -> AopResult<Arc<Advisor>> {
        if advisor.is_introduction() {
            return Err(AopError::Config(
                "introductions must be configured before the proxy is created".to_string(),
            ));
        }
        if !self.adapters.supports(advisor.advice()) {
            return Err(AopError::UnknownAdviceType {
                kind: advisor.advice().kind().to_string(),
            });
        }

        let advisor = Arc::new(advisor);
        let added = advisor.clone();
        self.mutate(move |advisors| {
            advisors.push(added);
            true
        })?;
        tracing::debug!("Added advisor {} to proxy of {}", advisor.name(), self.class_label());
        Ok(advisor)
    }

    pub fn add_advice(&self, advice: Advice) -> AopResult<Arc<Advisor>> {
        let advisor = self.adapters.wrap(advice)?;
        self.add_advisor(advisor)
    }

    /// 按名称移除顾问，返回是否有顾问被移除
    pub fn remove_advisor(&self, name: &str) -> AopResult<bool> {
        self.mutate(|advisors| {
            let before = advisors.len();
            advisors.retain(|advisor| advisor.name() != name);
            advisors.len() != before
        })
    }

    /// 获取方法的拦截器链（带缓存）
    ///
    /// 链在锁外构建；只有在构建期间配置没有变化时才写入缓存
    pub fn interceptor_chain(
        &self,
        method: &Method,
        target_class: &TargetClass,
    ) -> AopResult<Arc<InterceptorChain>> {
        let key = MethodCacheKey::new(target_class, method);
        let epoch = self.epoch.current();

        let (advisors, generation) = {
            let state = self.state.read();
            if let Some(chain) = state.chains.lookup(&key, epoch) {
                return Ok(chain);
            }
            (state.advisors.clone(), state.generation)
        };

        let chain = Arc::new(self.chain_factory.build_chain(
            &advisors,
            method,
            target_class,
            self.config.pre_filtered,
        )?);

        let mut state = self.state.write();
        if state.generation != generation || self.epoch.current() != epoch {
            return Ok(chain);
        }
        Ok(state.chains.store(key, epoch, chain))
    }

    pub fn cached_chain_count(&self) -> usize {
        self.state.read().chains.len()
    }
}

impl fmt::Debug for AdvisedSupport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AdvisedSupport")
            .field("target_class", &self.class_label())
            .field(
                "interfaces",
                &self.interfaces.iter().map(|i| i.name()).collect::<Vec<_>>(),
            )
            .field("advisors", &self.advisors().len())
            .field("config", &self.config)
            .finish()
    }
}

/// 代理工厂
///
/// ```ignore
/// let proxy = ProxyFactory::for_target(EchoServiceImpl::default())?
///     .advice(Advice::around(TimingInterceptor))
///     .expose_proxy(true)
///     .get_proxy()?;
/// ```
pub struct ProxyFactory {
    target_source: Option<Arc<dyn TargetSource>>,
    interfaces: Vec<Arc<Interface>>,
    advisors: Vec<Arc<Advisor>>,
    advices: Vec<Advice>,
    config: ProxyConfig,
    adapters: Arc<AdvisorAdapterRegistry>,
    aop_proxy_factory: AopProxyFactory,
    epoch: ChainEpoch,
}

impl ProxyFactory {
    pub fn new() -> Self {
        Self {
            target_source: None,
            interfaces: Vec::new(),
            advisors: Vec::new(),
            advices: Vec::new(),
            config: ProxyConfig::default(),
            adapters: AdvisorAdapterRegistry::global(),
            aop_proxy_factory: AopProxyFactory::default(),
            epoch: ChainEpoch::new(),
        }
    }

    /// 以单例目标创建工厂，并代理目标类实现的全部接口
    pub fn for_target<T: Any + Send + Sync>(target: T) -> AopResult<Self> {
        let source = SingletonTargetSource::of(target)?;
        let interfaces = source
            .target_class()
            .map(|class| class.interfaces().to_vec())
            .unwrap_or_default();
        let mut factory = Self::for_target_source(Arc::new(source));
        factory.interfaces = interfaces;
        Ok(factory)
    }

    pub fn for_target_source(target_source: Arc<dyn TargetSource>) -> Self {
        Self::new().target_source(target_source)
    }

    pub fn target_source(mut self, target_source: Arc<dyn TargetSource>) -> Self {
        self.target_source = Some(target_source);
        self
    }

    pub fn interface(mut self, interface: Arc<Interface>) -> Self {
        if !self.interfaces.iter().any(|i| i.name() == interface.name()) {
            self.interfaces.push(interface);
        }
        self
    }

    pub fn interface_of<I: ProxyInterface + ?Sized>(self) -> Self {
        self.interface(I::interface())
    }

    pub fn clear_interfaces(mut self) -> Self {
        self.interfaces.clear();
        self
    }

    /// 包装成匹配所有方法的顾问；不支持的通知在 `get_proxy` 时报错
    pub fn advice(mut self, advice: Advice) -> Self {
        self.advices.push(advice);
        self
    }

    pub fn advisor(self, advisor: Advisor) -> Self {
        self.shared_advisor(Arc::new(advisor))
    }

    /// 追加共享的顾问实例；共享同一批顾问实例的代理可能被判定为相等
    pub fn shared_advisor(mut self, advisor: Arc<Advisor>) -> Self {
        self.advisors.push(advisor);
        self
    }

    pub fn config(mut self, config: ProxyConfig) -> Self {
        self.config = config;
        self
    }

    pub fn proxy_target_class(mut self, value: bool) -> Self {
        self.config.proxy_target_class = value;
        self
    }

    pub fn optimize(mut self, value: bool) -> Self {
        self.config.optimize = value;
        self
    }

    pub fn expose_proxy(mut self, value: bool) -> Self {
        self.config.expose_proxy = value;
        self
    }

    pub fn frozen(mut self, value: bool) -> Self {
        self.config.frozen = value;
        self
    }

    pub fn pre_filtered(mut self, value: bool) -> Self {
        self.config.pre_filtered = value;
        self
    }

    pub fn adapter_registry(mut self, adapters: Arc<AdvisorAdapterRegistry>) -> Self {
        self.adapters = adapters;
        self
    }

    pub fn aop_proxy_factory(mut self, factory: AopProxyFactory) -> Self {
        self.aop_proxy_factory = factory;
        self
    }

    /// 与其他配置共享链纪元
    pub fn epoch(mut self, epoch: ChainEpoch) -> Self {
        self.epoch = epoch;
        self
    }

    /// 组装配置但不创建代理
    pub fn into_advised(self) -> AopResult<AdvisedSupport> {
        let target_source = self
            .target_source
            .ok_or_else(|| AopError::Config("no target source configured".to_string()))?;

        let mut advisors = self.advisors;
        for advice in self.advices {
            advisors.push(Arc::new(self.adapters.wrap(advice)?));
        }

        let mut interfaces = self.interfaces;
        for advisor in &advisors {
            if !self.adapters.supports(advisor.advice()) {
                return Err(AopError::UnknownAdviceType {
                    kind: advisor.advice().kind().to_string(),
                });
            }
            for introduced in advisor.introduced_interfaces() {
                if !interfaces.iter().any(|i| i.name() == introduced.name()) {
                    interfaces.push(introduced);
                }
            }
        }

        Ok(AdvisedSupport {
            target_source,
            interfaces,
            config: self.config,
            chain_factory: AdvisorChainFactory::new(self.adapters.clone()),
            adapters: self.adapters,
            epoch: self.epoch,
            state: RwLock::new(AdvisedState {
                advisors: advisors.into(),
                generation: 0,
                chains: ChainCache::new(),
            }),
        })
    }

    /// 创建代理
    pub fn get_proxy(self) -> AopResult<Arc<AopProxy>> {
        let aop_proxy_factory = self.aop_proxy_factory;
        let advised = Arc::new(self.into_advised()?);
        let strategy = aop_proxy_factory.select_strategy(&advised)?;
        let proxy = AopProxy::build(advised, strategy)?;
        tracing::debug!(
            "Created {} proxy for {} with {} advisor(s)",
            strategy,
            proxy
                .target_class()
                .map_or("<no target>", |class| class.name()),
            proxy.advised().advisors().len()
        );
        Ok(proxy)
    }
}

impl Default for ProxyFactory {
    fn default() -> Self {
        Self::new()
    }
}

/// 代理策略选择器
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AopProxyFactory {
    native_image: bool,
}

impl AopProxyFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// 原生模式下无法生成子类，只能使用接口代理
    pub fn native_image(mut self, native_image: bool) -> Self {
        self.native_image = native_image;
        self
    }

    pub fn is_native_image(&self) -> bool {
        self.native_image
    }

    pub fn select_strategy(&self, advised: &AdvisedSupport) -> AopResult<ProxyStrategy> {
        let user_interfaces = !advised.has_no_user_interfaces();

        if self.native_image {
            if user_interfaces {
                return Ok(ProxyStrategy::InterfaceDispatch);
            }
            return Err(AopError::NoViableStrategy {
                class: advised.class_label(),
                reason: "subclass proxies are unavailable in native mode and no interfaces are proxied"
                    .to_string(),
            });
        }

        let config = advised.config();
        if config.optimize || config.proxy_target_class || !user_interfaces {
            let class = advised.target_class().ok_or(AopError::NoTargetClass)?;
            if class.is_proxy_class() || class.is_sealed() {
                if user_interfaces {
                    return Ok(ProxyStrategy::InterfaceDispatch);
                }
                return Err(AopError::NoViableStrategy {
                    class: class.name().to_string(),
                    reason: if class.is_sealed() {
                        "class is sealed and implements no interfaces".to_string()
                    } else {
                        "class is already a proxy and no interfaces are proxied".to_string()
                    },
                });
            }
            return Ok(ProxyStrategy::SubclassForward);
        }

        Ok(ProxyStrategy::InterfaceDispatch)
    }
}
