//! 单元测试共用的夹具

use crate::advice::Advice;
use crate::args;
use crate::class::TargetClass;
use crate::metadata::Interface;
use crate::target_source::TargetSource;
use crate::value::{ReturnValue, Target};
use once_cell::sync::Lazy;
use parking_lot::Mutex;
use std::any::Any;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

#[derive(Clone, Default)]
pub struct Recorder(Arc<Mutex<Vec<String>>>);

impl Recorder {
    pub fn record(&self, entry: impl Into<String>) {
        self.0.lock().push(entry.into());
    }

    pub fn entries(&self) -> Vec<String> {
        self.0.lock().clone()
    }
}

/// 记录进入与退出的环绕通知
pub fn recording(recorder: &Recorder, label: &str) -> Advice {
    let recorder = recorder.clone();
    let label = label.to_string();
    Advice::around_fn(move |invocation| {
        recorder.record(format!("{}>", label));
        let result = invocation.proceed();
        recorder.record(format!("<{}", label));
        result
    })
}

#[derive(Debug, thiserror::Error)]
#[error("greeting failed: {0}")]
pub struct GreetingError(pub String);

pub struct GreetingServiceImpl {
    prefix: String,
    pub calls: AtomicUsize,
    pub recorder: Recorder,
}

impl GreetingServiceImpl {
    pub fn new(prefix: &str) -> Self {
        Lazy::force(&GREETING_CLASS);
        Self {
            prefix: prefix.to_string(),
            calls: AtomicUsize::new(0),
            recorder: Recorder::default(),
        }
    }

    fn greet(&self, name: &str) -> String {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.recorder.record("target");
        format!("{}, {}", self.prefix, name)
    }

    fn fail(&self, reason: &str) -> Result<(), GreetingError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(GreetingError(reason.to_string()))
    }

    fn shout(&self, name: &str) -> String {
        format!("{}, {}!", self.prefix, name.to_uppercase())
    }
}

static GREETING_INTERFACE: Lazy<Arc<Interface>> = Lazy::new(|| {
    Interface::builder("GreetingService")
        .method("greet", &["String"])
        .method("fail", &["String"])
        .build()
});

static GREETING_CLASS: Lazy<Arc<TargetClass>> = Lazy::new(|| {
    TargetClass::builder::<GreetingServiceImpl>("GreetingServiceImpl")
        .implements(GREETING_INTERFACE.clone())
        .interface_method("GreetingService", "greet", &["String"], |s: &GreetingServiceImpl, call| {
            Ok(ReturnValue::new(s.greet(call.arg::<String>(0)?)))
        })
        .interface_method("GreetingService", "fail", &["String"], |s: &GreetingServiceImpl, call| {
            s.fail(call.arg::<String>(0)?)?;
            Ok(ReturnValue::unit())
        })
        .method("shout", &["String"], |s: &GreetingServiceImpl, call| {
            Ok(ReturnValue::new(s.shout(call.arg::<String>(0)?)))
        })
        .method("greet_twice", &["String"], |_: &GreetingServiceImpl, call| {
            let proxy = call.current_proxy()?;
            let name = call.arg_cloned::<String>(0)?;
            let first: String = proxy.call("greet", args![name.clone()])?;
            let second: String = proxy.call("greet", args![name])?;
            Ok(ReturnValue::new(format!("{} / {}", first, second)))
        })
        .register()
});

pub fn greeting_interface() -> Arc<Interface> {
    GREETING_INTERFACE.clone()
}

pub fn greeting_class() -> Arc<TargetClass> {
    GREETING_CLASS.clone()
}

/// 只能使用接口代理的类型
pub struct SealedClock;

static SEALED_CLOCK_CLASS: Lazy<Arc<TargetClass>> = Lazy::new(|| {
    TargetClass::builder::<SealedClock>("SealedClock")
        .implements(Interface::builder("Clock").method("now", &[]).build())
        .interface_method("Clock", "now", &[], |_: &SealedClock, _| Ok(ReturnValue::new(42u64)))
        .sealed()
        .register()
});

impl Default for SealedClock {
    fn default() -> Self {
        Lazy::force(&SEALED_CLOCK_CLASS);
        SealedClock
    }
}

/// 记录借出与归还次数的非静态目标源
pub struct CountingTargetSource {
    target: Target,
    pub acquired: AtomicUsize,
    pub released: AtomicUsize,
    pub fail_next: AtomicBool,
}

impl CountingTargetSource {
    pub fn new(service: GreetingServiceImpl) -> Self {
        Self {
            target: Arc::new(service),
            acquired: AtomicUsize::new(0),
            released: AtomicUsize::new(0),
            fail_next: AtomicBool::new(false),
        }
    }
}

impl TargetSource for CountingTargetSource {
    fn target_class(&self) -> Option<Arc<TargetClass>> {
        Some(greeting_class())
    }

    fn get_target(&self) -> anyhow::Result<Target> {
        if self.fail_next.swap(false, Ordering::SeqCst) {
            anyhow::bail!("target unavailable");
        }
        self.acquired.fetch_add(1, Ordering::SeqCst);
        Ok(self.target.clone())
    }

    fn release_target(&self, _target: Target) -> anyhow::Result<()> {
        self.released.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
