//! 多线程运行时下的并发调用

use chimera_aop::prelude::*;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

#[derive(Default)]
pub struct Tally {
    total: AtomicU64,
}

#[advisable]
impl Tally {
    pub fn add(&self, amount: u64) -> u64 {
        self.total.fetch_add(amount, Ordering::SeqCst) + amount
    }

    pub fn total(&self) -> u64 {
        self.total.load(Ordering::SeqCst)
    }
}

pub struct Scaler {
    factor: u64,
}

#[advisable]
impl Scaler {
    pub fn scale(&self, value: u64) -> u64 {
        std::thread::sleep(Duration::from_millis(2));
        value * self.factor
    }
}

fn counting_advice() -> (Arc<AtomicUsize>, Advice) {
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();
    let advice = Advice::around_fn(move |invocation| {
        counter.fetch_add(1, Ordering::SeqCst);
        invocation.proceed()
    });
    (calls, advice)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_calls_are_all_intercepted() -> anyhow::Result<()> {
    let (calls, advice) = counting_advice();
    let proxy = ProxyFactory::for_target(Tally::default())?
        .advice(advice)
        .get_proxy()?;

    let handles: Vec<_> = (1..=32u64)
        .map(|amount| {
            let proxy = proxy.clone();
            tokio::task::spawn_blocking(move || proxy.call::<u64>("add", args![amount]))
        })
        .collect();
    for handle in handles {
        handle.await??;
    }

    assert_eq!(calls.load(Ordering::SeqCst), 32);
    assert_eq!(proxy.call::<u64>("total", args![])?, (1..=32).sum::<u64>());
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_callers_share_one_cached_chain() -> anyhow::Result<()> {
    let (_, advice) = counting_advice();
    let proxy = ProxyFactory::for_target(Tally::default())?
        .advice(advice)
        .get_proxy()?;

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let proxy = proxy.clone();
            tokio::task::spawn_blocking(move || proxy.interceptor_chain("add"))
        })
        .collect();

    let mut chains = Vec::new();
    for handle in handles {
        chains.push(handle.await??);
    }
    let first = &chains[0];
    assert!(chains.iter().all(|chain| Arc::ptr_eq(chain, first)));
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn pooled_target_source_bounds_instances() -> anyhow::Result<()> {
    let created = Arc::new(AtomicUsize::new(0));
    let counter = created.clone();
    let class = TargetClass::of::<Scaler>().expect("Scaler should be registered");
    let pool = Arc::new(
        PooledTargetSource::new(class, 2, move || {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(Scaler { factor: 3 })
        })
        .with_max_wait(Duration::from_secs(5)),
    );

    let proxy = ProxyFactory::for_target_source(pool.clone())
        .proxy_target_class(true)
        .get_proxy()?;

    let handles: Vec<_> = (0..16u64)
        .map(|value| {
            let proxy = proxy.clone();
            tokio::task::spawn_blocking(move || proxy.call::<u64>("scale", args![value]))
        })
        .collect();

    let mut results = Vec::new();
    for handle in handles {
        results.push(handle.await??);
    }
    results.sort_unstable();

    assert_eq!(results, (0..16u64).map(|v| v * 3).collect::<Vec<_>>());
    assert!(created.load(Ordering::SeqCst) <= 2);
    assert_eq!(pool.active_count(), 0);
    assert!(pool.idle_count() <= 2);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn hot_swap_while_calls_are_in_flight() -> anyhow::Result<()> {
    let source = Arc::new(HotSwappableTargetSource::of(Scaler { factor: 2 })?);
    let proxy = ProxyFactory::for_target_source(source.clone()).get_proxy()?;

    let handles: Vec<_> = (0..16u64)
        .map(|value| {
            let proxy = proxy.clone();
            tokio::task::spawn_blocking(move || proxy.call::<u64>("scale", args![value]))
        })
        .collect();

    let previous = source.swap(Arc::new(Scaler { factor: 5 }))?;
    assert_eq!(previous.downcast_ref::<Scaler>().map(|s| s.factor), Some(2));

    for (value, handle) in (0..16u64).zip(handles) {
        let result = handle.await??;
        assert!(result == value * 2 || result == value * 5);
    }
    assert_eq!(proxy.call::<u64>("scale", args![4u64])?, 20);
    Ok(())
}
