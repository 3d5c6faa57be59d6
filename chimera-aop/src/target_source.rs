//! 目标源（TargetSource）
//!
//! 代理每次调用前向目标源取目标对象，调用结束后归还。静态目标源
//! 始终返回同一个对象且不需要归还；池化、原型等非静态目标源在调用结束时
//! （无论成功还是失败）恰好归还一次

use crate::class::{ClassRegistry, TargetClass};
use crate::error::{AopError, AopResult};
use crate::value::{same_target, Target};
use dashmap::DashMap;
use parking_lot::{Condvar, Mutex, RwLock};
use std::any::Any;
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// 目标源
pub trait TargetSource: Send + Sync {
    /// 目标类型；未知时返回 `None`
    fn target_class(&self) -> Option<Arc<TargetClass>>;

    /// 是否每次都返回同一个目标
    fn is_static(&self) -> bool {
        false
    }

    fn get_target(&self) -> anyhow::Result<Target>;

    fn release_target(&self, _target: Target) -> anyhow::Result<()> {
        Ok(())
    }

    fn as_any(&self) -> &dyn Any;

    /// 两个目标源是否等价，用于代理相等性判断
    fn same_source(&self, other: &dyn TargetSource) -> bool {
        std::ptr::eq(
            self.as_any() as *const dyn Any as *const (),
            other.as_any() as *const dyn Any as *const (),
        )
    }

    /// 与 `same_source` 一致的哈希
    fn identity_hash(&self) -> u64 {
        self.as_any() as *const dyn Any as *const () as usize as u64
    }
}

fn resolve_class(target: &Target) -> AopResult<Arc<TargetClass>> {
    ClassRegistry::global()
        .resolve(target)
        .ok_or(AopError::NoTargetClass)
}

/// 单例目标源
///
/// 两个单例目标源持有同一个目标对象时视为相等
pub struct SingletonTargetSource {
    target: Target,
    class: Arc<TargetClass>,
}

impl SingletonTargetSource {
    pub fn new(target: Target, class: Arc<TargetClass>) -> Self {
        Self { target, class }
    }

    /// 从全局类注册表解析目标类型
    pub fn of<T: Any + Send + Sync>(target: T) -> AopResult<Self> {
        Self::from_target(Arc::new(target))
    }

    pub fn from_target(target: Target) -> AopResult<Self> {
        let class = resolve_class(&target)?;
        Ok(Self::new(target, class))
    }

    pub fn target(&self) -> &Target {
        &self.target
    }
}

impl TargetSource for SingletonTargetSource {
    fn target_class(&self) -> Option<Arc<TargetClass>> {
        Some(self.class.clone())
    }

    fn is_static(&self) -> bool {
        true
    }

    fn get_target(&self) -> anyhow::Result<Target> {
        Ok(self.target.clone())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn same_source(&self, other: &dyn TargetSource) -> bool {
        other
            .as_any()
            .downcast_ref::<SingletonTargetSource>()
            .map_or(false, |other| same_target(&self.target, &other.target))
    }

    fn identity_hash(&self) -> u64 {
        Arc::as_ptr(&self.target) as *const () as usize as u64
    }
}

impl fmt::Debug for SingletonTargetSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SingletonTargetSource({})", self.class.name())
    }
}

type TargetFactory = dyn Fn() -> anyhow::Result<Target> + Send + Sync;

fn erase_factory<T, F>(factory: F) -> Box<TargetFactory>
where
    T: Any + Send + Sync,
    F: Fn() -> anyhow::Result<T> + Send + Sync + 'static,
{
    Box::new(move || -> anyhow::Result<Target> { Ok(Arc::new(factory()?)) })
}

/// 原型目标源：每次调用创建新目标，调用结束后丢弃
pub struct PrototypeTargetSource {
    class: Arc<TargetClass>,
    factory: Box<TargetFactory>,
    created: AtomicUsize,
    released: AtomicUsize,
}

impl PrototypeTargetSource {
    pub fn new<T, F>(class: Arc<TargetClass>, factory: F) -> Self
    where
        T: Any + Send + Sync,
        F: Fn() -> anyhow::Result<T> + Send + Sync + 'static,
    {
        Self {
            class,
            factory: erase_factory(factory),
            created: AtomicUsize::new(0),
            released: AtomicUsize::new(0),
        }
    }

    pub fn created_count(&self) -> usize {
        self.created.load(Ordering::Relaxed)
    }

    pub fn released_count(&self) -> usize {
        self.released.load(Ordering::Relaxed)
    }
}

impl TargetSource for PrototypeTargetSource {
    fn target_class(&self) -> Option<Arc<TargetClass>> {
        Some(self.class.clone())
    }

    fn get_target(&self) -> anyhow::Result<Target> {
        let target = (self.factory)()?;
        self.created.fetch_add(1, Ordering::Relaxed);
        Ok(target)
    }

    fn release_target(&self, target: Target) -> anyhow::Result<()> {
        drop(target);
        self.released.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

struct PoolState {
    idle: Vec<Target>,
    active: usize,
}

/// 池化目标源
///
/// 最多同时借出 `max_size` 个目标；池满时阻塞等待归还，
/// 设置了 `max_wait` 时超时返回 [`AopError::PoolExhausted`]
pub struct PooledTargetSource {
    class: Arc<TargetClass>,
    factory: Box<TargetFactory>,
    max_size: usize,
    max_wait: Option<Duration>,
    state: Mutex<PoolState>,
    available: Condvar,
}

impl PooledTargetSource {
    pub fn new<T, F>(class: Arc<TargetClass>, max_size: usize, factory: F) -> Self
    where
        T: Any + Send + Sync,
        F: Fn() -> anyhow::Result<T> + Send + Sync + 'static,
    {
        Self {
            class,
            factory: erase_factory(factory),
            max_size: max_size.max(1),
            max_wait: None,
            state: Mutex::new(PoolState {
                idle: Vec::new(),
                active: 0,
            }),
            available: Condvar::new(),
        }
    }

    pub fn with_max_wait(mut self, max_wait: Duration) -> Self {
        self.max_wait = Some(max_wait);
        self
    }

    pub fn max_size(&self) -> usize {
        self.max_size
    }

    pub fn active_count(&self) -> usize {
        self.state.lock().active
    }

    pub fn idle_count(&self) -> usize {
        self.state.lock().idle.len()
    }

    fn exhausted(&self) -> AopError {
        AopError::PoolExhausted {
            class: self.class.name().to_string(),
            max_size: self.max_size,
        }
    }
}

impl TargetSource for PooledTargetSource {
    fn target_class(&self) -> Option<Arc<TargetClass>> {
        Some(self.class.clone())
    }

    fn get_target(&self) -> anyhow::Result<Target> {
        let mut state = self.state.lock();
        loop {
            if let Some(target) = state.idle.pop() {
                state.active += 1;
                return Ok(target);
            }

            if state.active < self.max_size {
                state.active += 1;
                drop(state);
                return match (self.factory)() {
                    Ok(target) => Ok(target),
                    Err(error) => {
                        self.state.lock().active -= 1;
                        self.available.notify_one();
                        Err(error)
                    }
                };
            }

            match self.max_wait {
                Some(max_wait) => {
                    let timed_out = self.available.wait_for(&mut state, max_wait).timed_out();
                    if timed_out && state.idle.is_empty() && state.active >= self.max_size {
                        tracing::warn!(
                            "Target pool for {} exhausted after waiting {:?}",
                            self.class.name(),
                            max_wait
                        );
                        return Err(self.exhausted().into());
                    }
                }
                None => self.available.wait(&mut state),
            }
        }
    }

    fn release_target(&self, target: Target) -> anyhow::Result<()> {
        let mut state = self.state.lock();
        state.active = state.active.saturating_sub(1);
        state.idle.push(target);
        drop(state);
        self.available.notify_one();
        Ok(())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// 可热替换的目标源
///
/// `swap` 之后的调用使用新目标；正在进行的调用继续使用它们已经取到的目标
pub struct HotSwappableTargetSource {
    class: Arc<TargetClass>,
    target: RwLock<Target>,
}

impl HotSwappableTargetSource {
    pub fn new(target: Target, class: Arc<TargetClass>) -> Self {
        Self {
            class,
            target: RwLock::new(target),
        }
    }

    pub fn of<T: Any + Send + Sync>(target: T) -> AopResult<Self> {
        let target: Target = Arc::new(target);
        let class = resolve_class(&target)?;
        Ok(Self::new(target, class))
    }

    /// 替换目标，返回旧目标；新目标必须与原目标类型相同
    pub fn swap(&self, new_target: Target) -> AopResult<Target> {
        if Any::type_id(&*new_target) != self.class.target_type_id() {
            return Err(AopError::TargetTypeMismatch {
                expected: self.class.name().to_string(),
                actual: ClassRegistry::global()
                    .resolve(&new_target)
                    .map_or_else(|| "<unregistered>".to_string(), |c| c.name().to_string()),
            });
        }
        let old = std::mem::replace(&mut *self.target.write(), new_target);
        tracing::info!("Hot-swapped target of {}", self.class.name());
        Ok(old)
    }

    pub fn current(&self) -> Target {
        self.target.read().clone()
    }
}

impl TargetSource for HotSwappableTargetSource {
    fn target_class(&self) -> Option<Arc<TargetClass>> {
        Some(self.class.clone())
    }

    fn get_target(&self) -> anyhow::Result<Target> {
        Ok(self.current())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// 没有目标对象的目标源
///
/// 用于所有方法都由引入或拦截器处理的纯接口代理
#[derive(Default)]
pub struct EmptyTargetSource {
    class: Option<Arc<TargetClass>>,
}

impl EmptyTargetSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn for_class(class: Arc<TargetClass>) -> Self {
        Self { class: Some(class) }
    }
}

impl TargetSource for EmptyTargetSource {
    fn target_class(&self) -> Option<Arc<TargetClass>> {
        self.class.clone()
    }

    fn is_static(&self) -> bool {
        true
    }

    fn get_target(&self) -> anyhow::Result<Target> {
        Ok(Arc::new(()))
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn same_source(&self, other: &dyn TargetSource) -> bool {
        other
            .as_any()
            .downcast_ref::<EmptyTargetSource>()
            .map_or(false, |other| match (&self.class, &other.class) {
                (Some(a), Some(b)) => a.target_type_id() == b.target_type_id(),
                (None, None) => true,
                _ => false,
            })
    }

    fn identity_hash(&self) -> u64 {
        0
    }
}

/// 在实例化之前为某个 Bean 提供自定义目标源
///
/// 返回 `Some` 时自动代理协调器会直接为该 Bean 创建代理，跳过正常实例化
pub trait TargetSourceCreator: Send + Sync {
    fn target_source(&self, class: &Arc<TargetClass>, bean_name: &str)
        -> Option<Arc<dyn TargetSource>>;
}

/// 按 Bean 名称登记目标源的创建器
#[derive(Default)]
pub struct RegisteredTargetSourceCreator {
    sources: DashMap<String, Arc<dyn TargetSource>>,
}

impl RegisteredTargetSourceCreator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, bean_name: impl Into<String>, source: Arc<dyn TargetSource>) {
        self.sources.insert(bean_name.into(), source);
    }
}

impl TargetSourceCreator for RegisteredTargetSourceCreator {
    fn target_source(
        &self,
        class: &Arc<TargetClass>,
        bean_name: &str,
    ) -> Option<Arc<dyn TargetSource>> {
        let source = self.sources.get(bean_name)?.value().clone();
        let declared = source.target_class();
        match declared {
            Some(declared) if declared.target_type_id() != class.target_type_id() => {
                tracing::warn!(
                    "Registered target source for '{}' produces {}, expected {}",
                    bean_name,
                    declared.name(),
                    class.name()
                );
                None
            }
            _ => Some(source),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Instant;

    struct Connection {
        id: usize,
    }

    fn connection_class() -> Arc<TargetClass> {
        TargetClass::builder::<Connection>("Connection").build()
    }

    fn pool(max_size: usize) -> PooledTargetSource {
        let next = AtomicUsize::new(0);
        PooledTargetSource::new(connection_class(), max_size, move || {
            Ok(Connection {
                id: next.fetch_add(1, Ordering::SeqCst),
            })
        })
    }

    fn id_of(target: &Target) -> usize {
        target.downcast_ref::<Connection>().unwrap().id
    }

    #[test]
    fn test_singleton_equality_follows_target() {
        let target: Target = Arc::new(Connection { id: 1 });
        let a = SingletonTargetSource::new(target.clone(), connection_class());
        let b = SingletonTargetSource::new(target, connection_class());
        let c = SingletonTargetSource::new(Arc::new(Connection { id: 1 }), connection_class());

        assert!(a.is_static());
        assert!(a.same_source(&b));
        assert_eq!(a.identity_hash(), b.identity_hash());
        assert!(!a.same_source(&c));
    }

    #[test]
    fn test_pool_reuses_released_targets() {
        let pool = pool(2);
        let first = pool.get_target().unwrap();
        let first_id = id_of(&first);
        assert_eq!(pool.active_count(), 1);

        pool.release_target(first).unwrap();
        assert_eq!(pool.active_count(), 0);
        assert_eq!(pool.idle_count(), 1);

        let again = pool.get_target().unwrap();
        assert_eq!(id_of(&again), first_id);
    }

    #[test]
    fn test_pool_times_out_when_exhausted() {
        let pool = pool(1).with_max_wait(Duration::from_millis(20));
        let _held = pool.get_target().unwrap();

        let started = Instant::now();
        let error = pool.get_target().unwrap_err();
        assert!(started.elapsed() >= Duration::from_millis(20));
        assert!(matches!(
            error.downcast_ref::<AopError>(),
            Some(AopError::PoolExhausted { max_size: 1, .. })
        ));
    }

    #[test]
    fn test_pool_blocks_until_release() {
        let pool = Arc::new(pool(1));
        let held = pool.get_target().unwrap();
        let held_id = id_of(&held);

        let waiter = {
            let pool = pool.clone();
            thread::spawn(move || id_of(&pool.get_target().unwrap()))
        };

        thread::sleep(Duration::from_millis(20));
        pool.release_target(held).unwrap();
        assert_eq!(waiter.join().unwrap(), held_id);
    }

    #[test]
    fn test_prototype_creates_per_call() {
        let source = PrototypeTargetSource::new(connection_class(), || Ok(Connection { id: 7 }));
        assert!(!source.is_static());
        let a = source.get_target().unwrap();
        let b = source.get_target().unwrap();
        assert!(!same_target(&a, &b));
        source.release_target(a).unwrap();
        assert_eq!(source.created_count(), 2);
        assert_eq!(source.released_count(), 1);
    }

    #[test]
    fn test_hot_swap_requires_same_type() {
        let source = HotSwappableTargetSource::new(Arc::new(Connection { id: 1 }), connection_class());
        let old = source.swap(Arc::new(Connection { id: 2 })).unwrap();
        assert_eq!(id_of(&old), 1);
        assert_eq!(id_of(&source.get_target().unwrap()), 2);

        let error = source.swap(Arc::new("wrong")).unwrap_err();
        assert!(matches!(error, AopError::TargetTypeMismatch { .. }));
    }

    #[test]
    fn test_registered_creator_checks_type() {
        let creator = RegisteredTargetSourceCreator::new();
        creator.register(
            "pooled",
            Arc::new(pool(1)) as Arc<dyn TargetSource>,
        );

        assert!(creator.target_source(&connection_class(), "pooled").is_some());
        assert!(creator.target_source(&connection_class(), "missing").is_none());

        struct Other;
        let other = TargetClass::builder::<Other>("Other").build();
        assert!(creator.target_source(&other, "pooled").is_none());
    }
}
