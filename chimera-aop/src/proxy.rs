//! AOP 代理
//!
//! [`AopProxy`] 在创建时根据代理策略建立分派表：接口代理只包含代理接口
//! （含引入接口）中的方法，子类转发代理还包含目标类自身的全部方法。
//!
//! 每次调用的流程：
//! 1. `equals` / `hash_code` 在接口没有声明它们时由代理自己处理
//! 2. 从目标源取目标；失败时直接返回错误，不执行任何通知
//! 3. 获取（缓存的）拦截器链；链为空时直接调用目标方法
//! 4. 否则由 [`MethodInvocation`] 驱动拦截器链
//! 5. 非静态目标源在调用结束时归还目标，无论成功还是失败

use crate::chain::InterceptorChain;
use crate::class::{Invoker, TargetClass};
use crate::error::{AopError, AopResult};
use crate::joinpoint::MethodInvocation;
use crate::metadata::{
    Interface, Method, ProxyInterface, ADVISED_INTERFACE, EQUALS_METHOD, HASH_CODE_METHOD,
};
use crate::proxy_factory::{AdvisedSupport, ProxyStrategy};
use crate::target_source::TargetSource;
use crate::value::{Arguments, ReturnValue, Target, TargetCall};
use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::{Arc, Weak};

/// 代理哈希的固定种子，与目标源哈希组合
const PROXY_HASH_SEED: u64 = 0x0a0b_5e7c_c0de_0001;

struct DispatchEntry {
    method: Method,
    invoker: Option<Invoker>,
}

/// 非静态目标源的归还守卫
struct ReleaseGuard<'a> {
    source: &'a dyn TargetSource,
    target: Option<Target>,
}

impl Drop for ReleaseGuard<'_> {
    fn drop(&mut self) {
        if let Some(target) = self.target.take() {
            if let Err(error) = self.source.release_target(target) {
                tracing::warn!("Failed to release target: {:#}", error);
            }
        }
    }
}

/// AOP 代理
pub struct AopProxy {
    advised: Arc<AdvisedSupport>,
    strategy: ProxyStrategy,
    target_class: Option<Arc<TargetClass>>,
    interfaces: Vec<Arc<Interface>>,
    dispatch: HashMap<String, DispatchEntry>,
    equals_defined: bool,
    hash_code_defined: bool,
    this: Weak<AopProxy>,
}

impl AopProxy {
    pub(crate) fn build(advised: Arc<AdvisedSupport>, strategy: ProxyStrategy) -> AopResult<Arc<Self>> {
        let target_class = advised.target_class();
        let mut dispatch: HashMap<String, DispatchEntry> = HashMap::new();

        if strategy == ProxyStrategy::SubclassForward {
            let class = target_class.as_ref().ok_or(AopError::NoTargetClass)?;
            for entry in class.entries() {
                dispatch
                    .entry(entry.method().name().to_string())
                    .or_insert_with(|| DispatchEntry {
                        method: entry.method().clone(),
                        invoker: Some(entry.invoker().clone()),
                    });
            }
        }

        for interface in advised.interfaces() {
            for method in interface.methods() {
                let invoker = target_class
                    .as_ref()
                    .and_then(|class| class.implementation(method))
                    .map(|entry| entry.invoker().clone());
                dispatch
                    .entry(method.name().to_string())
                    .or_insert_with(|| DispatchEntry {
                        method: method.clone(),
                        invoker,
                    });
            }
        }

        let mut interfaces = advised.interfaces().to_vec();
        interfaces.push(Interface::marker(ADVISED_INTERFACE));
        let equals_defined = interfaces.iter().any(|i| i.defines_equals());
        let hash_code_defined = interfaces.iter().any(|i| i.defines_hash_code());

        Ok(Arc::new_cyclic(|this| AopProxy {
            advised,
            strategy,
            target_class,
            interfaces,
            dispatch,
            equals_defined,
            hash_code_defined,
            this: this.clone(),
        }))
    }

    /// 按方法名调用
    pub fn invoke(&self, method_name: &str, arguments: Arguments) -> anyhow::Result<ReturnValue> {
        if !self.equals_defined && method_name == EQUALS_METHOD && arguments.len() == 1 {
            let other = arguments.get::<Arc<AopProxy>>(0).ok();
            return Ok(ReturnValue::new(other.map_or(false, |other| self == &**other)));
        }
        if !self.hash_code_defined && method_name == HASH_CODE_METHOD && arguments.is_empty() {
            return Ok(ReturnValue::new(self.identity_hash()));
        }

        let entry = self
            .dispatch
            .get(method_name)
            .ok_or_else(|| AopError::MethodNotProxied {
                class: self.display_name(),
                method: method_name.to_string(),
            })?;
        self.dispatch_call(entry, arguments)
    }

    /// 调用并把返回值转换为 `R`
    pub fn call<R: Any>(&self, method_name: &str, arguments: Arguments) -> anyhow::Result<R> {
        Ok(self.invoke(method_name, arguments)?.downcast::<R>()?)
    }

    fn dispatch_call(&self, entry: &DispatchEntry, arguments: Arguments) -> anyhow::Result<ReturnValue> {
        let proxy = self.this.upgrade().ok_or_else(|| {
            AopError::Config("proxy invoked while being dropped".to_string())
        })?;
        let source = self.advised.target_source();
        let target = source.get_target()?;
        let _release = ReleaseGuard {
            source: &**source,
            target: (!source.is_static()).then(|| target.clone()),
        };

        let class = match &self.target_class {
            Some(class) => class.clone(),
            None => TargetClass::empty(),
        };
        let chain = self.advised.interceptor_chain(&entry.method, &class)?;
        let exposed = self.advised.config().expose_proxy;

        if chain.is_empty() {
            tracing::trace!("No advice for {}, invoking target directly", entry.method);
            let invoker = entry.invoker.as_ref().ok_or_else(|| AopError::NoTargetMethod {
                method: entry.method.qualified_name(),
            })?;
            let call = TargetCall::new(&arguments, exposed.then_some(&proxy));
            return (&**invoker)(&*target, &call);
        }

        let mut invocation = MethodInvocation::new(
            &proxy,
            exposed,
            &target,
            &class,
            &entry.method,
            entry.invoker.as_ref(),
            arguments,
            chain.elements(),
        );
        invocation.proceed()
    }

    pub fn strategy(&self) -> ProxyStrategy {
        self.strategy
    }

    /// 代理配置，可在运行时增删顾问（配置未冻结时）
    pub fn advised(&self) -> &Arc<AdvisedSupport> {
        &self.advised
    }

    pub fn target_class(&self) -> Option<&Arc<TargetClass>> {
        self.target_class.as_ref()
    }

    /// 代理实现的全部接口（包括引入接口和 `Advised` 标记接口）
    pub fn proxied_interfaces(&self) -> &[Arc<Interface>] {
        &self.interfaces
    }

    pub fn has_method(&self, method_name: &str) -> bool {
        self.dispatch.contains_key(method_name)
    }

    /// 代理是否可以当作 `T` 的实例使用（只有子类转发代理可以）
    pub fn is_instance_of<T: Any>(&self) -> bool {
        self.strategy == ProxyStrategy::SubclassForward
            && self
                .target_class
                .as_ref()
                .map_or(false, |class| class.target_type_id() == TypeId::of::<T>())
    }

    pub fn implements(&self, interface: &str) -> bool {
        self.interfaces.iter().any(|iface| iface.name() == interface)
            || (self.strategy == ProxyStrategy::SubclassForward
                && self
                    .target_class
                    .as_ref()
                    .map_or(false, |class| class.implements(interface)))
    }

    pub fn implements_interface<I: ProxyInterface + ?Sized>(&self) -> bool {
        self.implements(I::interface().name())
    }

    /// 某个方法当前的拦截器链
    pub fn interceptor_chain(&self, method_name: &str) -> AopResult<Arc<InterceptorChain>> {
        let entry = self
            .dispatch
            .get(method_name)
            .ok_or_else(|| AopError::MethodNotProxied {
                class: self.display_name(),
                method: method_name.to_string(),
            })?;
        let class = match &self.target_class {
            Some(class) => class.clone(),
            None => TargetClass::empty(),
        };
        self.advised.interceptor_chain(&entry.method, &class)
    }

    /// 与相等性一致的哈希
    pub fn identity_hash(&self) -> u64 {
        PROXY_HASH_SEED
            .wrapping_mul(13)
            .wrapping_add(self.advised.target_source().identity_hash())
    }

    fn display_name(&self) -> String {
        self.target_class
            .as_ref()
            .map_or_else(
                || {
                    self.interfaces
                        .first()
                        .map_or("<proxy>".to_string(), |i| i.name().to_string())
                },
                |class| class.name().to_string(),
            )
    }
}

/// 两个代理的配置等价时相等：接口相同、顾问实例相同、目标源等价
fn equals_in_proxy(a: &AdvisedSupport, b: &AdvisedSupport) -> bool {
    let same_interfaces = a.interfaces().len() == b.interfaces().len()
        && a
            .interfaces()
            .iter()
            .zip(b.interfaces())
            .all(|(x, y)| x.name() == y.name());
    if !same_interfaces {
        return false;
    }

    let (left, right) = (a.advisors(), b.advisors());
    let same_advisors = left.len() == right.len()
        && left.iter().zip(right.iter()).all(|(x, y)| Arc::ptr_eq(x, y));

    same_advisors
        && a
            .target_source()
            .same_source(&**b.target_source())
}

impl PartialEq for AopProxy {
    fn eq(&self, other: &Self) -> bool {
        std::ptr::eq(self, other) || equals_in_proxy(&self.advised, &other.advised)
    }
}

impl Eq for AopProxy {}

impl Hash for AopProxy {
    fn hash<H: Hasher>(&self, state: &mut H) {
        state.write_u64(self.identity_hash());
    }
}

impl fmt::Debug for AopProxy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AopProxy")
            .field("target", &self.display_name())
            .field("strategy", &self.strategy)
            .field(
                "interfaces",
                &self.interfaces.iter().map(|i| i.name()).collect::<Vec<_>>(),
            )
            .field("methods", &self.dispatch.len())
            .finish()
    }
}
