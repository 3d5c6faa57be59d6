//! `#[advisable]`、`#[proxy_interface]`、`#[aspect]` 的集成测试

use chimera_aop::prelude::*;
use chimera_aop::{AdvisorRegistry, ProxyStrategy};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;

#[derive(Debug, thiserror::Error)]
#[error("insufficient stock for {0}")]
struct OutOfStock(String);

#[proxy_interface]
pub trait Inventory: Send + Sync {
    fn reserve(&self, item: &str, quantity: u32) -> anyhow::Result<u32>;
    fn available(&self, item: String) -> anyhow::Result<u32>;
}

pub struct Warehouse {
    stock: AtomicU32,
}

impl Default for Warehouse {
    fn default() -> Self {
        Self {
            stock: AtomicU32::new(10),
        }
    }
}

#[advisable]
impl Inventory for Warehouse {
    fn reserve(&self, item: &str, quantity: u32) -> anyhow::Result<u32> {
        let stock = self.stock.load(Ordering::SeqCst);
        if quantity > stock {
            return Err(OutOfStock(item.to_string()).into());
        }
        self.stock.store(stock - quantity, Ordering::SeqCst);
        Ok(stock - quantity)
    }

    fn available(&self, _item: String) -> anyhow::Result<u32> {
        Ok(self.stock.load(Ordering::SeqCst))
    }
}

#[advisable]
impl Warehouse {
    /// 通过当前代理回调自身，让嵌套调用同样被拦截
    pub fn audit(&self, proxy: CurrentProxy) -> anyhow::Result<u32> {
        let proxy = proxy.get()?;
        proxy.available("apple".to_string())
    }

    pub fn label(&self) -> String {
        "warehouse".to_string()
    }

    #[allow(dead_code)]
    fn internal(&self) -> u32 {
        0
    }
}

static AUDITED: AtomicUsize = AtomicUsize::new(0);

#[derive(Default)]
struct StockAudit;

#[aspect("execution(* Inventory.reserve(..))", order = 5)]
impl Aspect for StockAudit {
    fn before(&self, _join_point: &JoinPoint<'_>) {
        AUDITED.fetch_add(1, Ordering::SeqCst);
    }
}

fn method_log() -> (Arc<Mutex<Vec<String>>>, Advice) {
    let log = Arc::new(Mutex::new(Vec::new()));
    let sink = log.clone();
    let advice = Advice::before_fn(move |join_point| {
        sink.lock().push(join_point.method_name().to_string());
        Ok(())
    });
    (log, advice)
}

#[test]
fn class_is_assembled_from_both_impls() {
    let class = TargetClass::of::<Warehouse>().expect("Warehouse should be registered");

    assert_eq!(class.name(), "Warehouse");
    assert!(class.implements("Inventory"));
    assert_eq!(
        class.find_method("reserve").unwrap().declaring_type(),
        "Inventory"
    );
    assert_eq!(class.find_method("reserve").unwrap().signature().arity(), 2);
    // CurrentProxy 不计入签名
    assert_eq!(class.find_method("audit").unwrap().signature().arity(), 0);
    assert!(class.find_method("label").is_some());
    assert!(class.find_method("internal").is_none());
}

#[test]
fn interface_proxy_dispatches_through_the_trait() -> anyhow::Result<()> {
    let (log, advice) = method_log();
    let proxy = ProxyFactory::for_target(Warehouse::default())?
        .advice(advice)
        .get_proxy()?;
    assert_eq!(proxy.strategy(), ProxyStrategy::InterfaceDispatch);
    assert!(proxy.implements_interface::<dyn Inventory>());

    let inventory: Arc<dyn Inventory> = proxy.clone();
    assert_eq!(inventory.reserve("apple", 3)?, 7);
    assert_eq!(inventory.available("apple".to_string())?, 7);
    assert_eq!(*log.lock(), vec!["reserve", "available"]);

    let hidden = proxy.invoke("label", args![]).unwrap_err();
    assert!(matches!(
        hidden.downcast_ref::<AopError>(),
        Some(AopError::MethodNotProxied { .. })
    ));
    Ok(())
}

#[test]
fn target_errors_reach_the_caller_unchanged() -> anyhow::Result<()> {
    let proxy = ProxyFactory::for_target(Warehouse::default())?.get_proxy()?;

    let error = proxy.reserve("pear", 50).unwrap_err();
    let out_of_stock = error.downcast_ref::<OutOfStock>().expect("original error type");
    assert_eq!(out_of_stock.0, "pear");
    Ok(())
}

#[test]
fn exposed_proxy_intercepts_self_invocation() -> anyhow::Result<()> {
    let (log, advice) = method_log();
    let proxy = ProxyFactory::for_target(Warehouse::default())?
        .proxy_target_class(true)
        .expose_proxy(true)
        .advice(advice)
        .get_proxy()?;
    assert_eq!(proxy.strategy(), ProxyStrategy::SubclassForward);

    assert_eq!(proxy.call::<u32>("audit", args![])?, 10);
    assert_eq!(proxy.call::<String>("label", args![])?, "warehouse");
    assert_eq!(*log.lock(), vec!["audit", "available", "label"]);
    Ok(())
}

#[test]
fn audit_without_exposure_fails() -> anyhow::Result<()> {
    let proxy = ProxyFactory::for_target(Warehouse::default())?
        .proxy_target_class(true)
        .get_proxy()?;

    let error = proxy.call::<u32>("audit", args![]).unwrap_err();
    assert!(matches!(
        error.downcast_ref::<AopError>(),
        Some(AopError::ProxyNotExposed)
    ));
    Ok(())
}

#[test]
fn registered_aspect_is_applied_by_auto_proxy() -> anyhow::Result<()> {
    let registry = Arc::new(AdvisorRegistry::new());
    registry.load_registered_aspects();

    let advisors = registry.advisors();
    let audit = advisors
        .iter()
        .find(|advisor| advisor.name() == "StockAudit")
        .expect("aspect collected through inventory");
    assert_eq!(audit.order(), 5);

    let creator = AutoProxyCreator::new(registry);
    let bean: Target = Arc::new(Warehouse::default());
    let exposed = creator.notify_initialized(bean, "warehouse")?;
    let proxy = exposed
        .downcast::<AopProxy>()
        .unwrap_or_else(|_| panic!("warehouse should be proxied"));

    let before = AUDITED.load(Ordering::SeqCst);
    proxy.reserve("apple", 1)?;
    proxy.available("apple".to_string())?;
    assert_eq!(AUDITED.load(Ordering::SeqCst), before + 1);
    Ok(())
}
