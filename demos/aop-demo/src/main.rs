use chimera_aop::aspect::{LoggingAspect, PerformanceAspect};
use chimera_aop::logging::LoggingConfig;
use chimera_aop::prelude::*;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

// ==================== 业务接口 ====================

#[derive(Debug, thiserror::Error)]
enum OrderError {
    #[error("quantity must be positive")]
    EmptyOrder,
}

#[proxy_interface]
pub trait OrderService: Send + Sync {
    fn place(&self, item: &str, quantity: u32) -> anyhow::Result<u64>;
    fn placed(&self) -> anyhow::Result<u64>;
}

#[derive(Default)]
struct OrderServiceImpl {
    next_id: AtomicU64,
}

#[advisable]
impl OrderService for OrderServiceImpl {
    fn place(&self, item: &str, quantity: u32) -> anyhow::Result<u64> {
        if quantity == 0 {
            return Err(OrderError::EmptyOrder.into());
        }
        let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        println!("   📦 Order #{} placed: {} x {}", id, quantity, item);
        Ok(id)
    }

    fn placed(&self) -> anyhow::Result<u64> {
        Ok(self.next_id.load(Ordering::SeqCst))
    }
}

// ==================== 池化的报表生成器 ====================

struct ReportGenerator {
    serial: u64,
}

#[advisable]
impl ReportGenerator {
    pub fn render(&self, order_id: u64) -> String {
        std::thread::sleep(Duration::from_millis(20));
        format!("report for order #{} (generator {})", order_id, self.serial)
    }
}

// ==================== 切面 ====================

#[derive(Default)]
struct AuditAspect;

#[aspect("execution(* OrderService.place(..))", order = 10)]
impl Aspect for AuditAspect {
    fn after_returning(&self, join_point: &JoinPoint<'_>, result: &ReturnValue) {
        if let Some(id) = result.downcast_ref::<u64>() {
            tracing::info!("🧾 [Audit] {} produced order #{}", join_point.signature(), id);
        }
    }

    fn after_throwing(&self, join_point: &JoinPoint<'_>, error: &ErrorInfo) {
        tracing::warn!("🧾 [Audit] {} rejected: {}", join_point.signature(), error.message);
    }
}

// ==================== 主程序 ====================

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    LoggingConfig::from_env().init()?;

    println!("\n╔════════════════════════════════════════════════════╗");
    println!("║     Chimera AOP - Interception Demo               ║");
    println!("╚════════════════════════════════════════════════════╝\n");

    let properties = AopProperties::from_toml_str(include_str!("../application.toml"))?
        .with_env_overrides()?;
    println!("⚙️  AOP properties: {:?}\n", properties);

    let registry = Arc::new(AdvisorRegistry::new());
    registry.load_registered_aspects();
    registry.register_aspect(Arc::new(
        LoggingAspect::new(PointcutExpression::execution("* OrderService.*(..)")).with_args(),
    ));
    registry.register_aspect(Arc::new(PerformanceAspect::new(
        10,
        PointcutExpression::execution("* ReportGenerator.render(..)"),
    )));

    let creator = AutoProxyCreator::from_properties(registry, &properties)
        .with_common_interceptor(Advice::before_fn(|join_point| {
            tracing::debug!("↪ {}", join_point.signature());
            Ok(())
        }))?;

    // 自动代理：容器完成初始化后交给协调器
    println!("🔷 Creating order service through the auto-proxy coordinator...");
    let bean = creator.notify_initialized(Arc::new(OrderServiceImpl::default()), "orderService")?;
    let proxy = bean
        .downcast::<AopProxy>()
        .map_err(|_| anyhow::anyhow!("orderService was not proxied"))?;
    println!("   Strategy: {}", proxy.strategy());
    let orders: Arc<dyn OrderService> = proxy;

    let first = orders.place("keyboard", 2)?;
    let second = orders.place("monitor", 1)?;
    if let Err(error) = orders.place("mouse", 0) {
        println!("   ❌ Rejected: {}", error);
    }
    println!("   Orders placed: {}\n", orders.placed()?);

    // 池化目标源：同时最多 pool-max-size 个实例
    println!("🏊 Rendering reports with a pooled target source...");
    let class = TargetClass::of::<ReportGenerator>()
        .ok_or_else(|| anyhow::anyhow!("ReportGenerator is not advisable"))?;
    let serial = Arc::new(AtomicU64::new(0));
    let mut pool = PooledTargetSource::new(class.clone(), properties.pool_max_size, move || {
        Ok(ReportGenerator {
            serial: serial.fetch_add(1, Ordering::SeqCst) + 1,
        })
    });
    if let Some(max_wait) = properties.pool_max_wait() {
        pool = pool.with_max_wait(max_wait);
    }
    let pool = Arc::new(pool);

    let mut factory = properties.new_proxy_factory().target_source(pool.clone());
    for advisor in creator.find_eligible_advisors(&class) {
        factory = factory.shared_advisor(advisor);
    }
    let reports = factory.get_proxy()?;

    let handles: Vec<_> = [first, second, first, second]
        .into_iter()
        .map(|order_id| {
            let reports = reports.clone();
            tokio::task::spawn_blocking(move || reports.call::<String>("render", args![order_id]))
        })
        .collect();
    for handle in handles {
        println!("   📄 {}", handle.await??);
    }
    println!(
        "   Pool: max {} / idle {} / active {}",
        pool.max_size(),
        pool.idle_count(),
        pool.active_count()
    );

    println!("\n✅ Demo complete");
    Ok(())
}
