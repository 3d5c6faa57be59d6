//! 类型擦除的参数与返回值
//!
//! 拦截器链只看到 [`Arguments`] 和 [`ReturnValue`]，目标方法被调用前由
//! 方法注册表还原成具体类型

use crate::error::AopError;
use crate::proxy::AopProxy;
use std::any::Any;
use std::fmt;
use std::sync::Arc;

/// 目标对象句柄
pub type Target = Arc<dyn Any + Send + Sync>;

/// 比较两个目标是否是同一个对象（只比较数据指针）
pub fn same_target(a: &Target, b: &Target) -> bool {
    std::ptr::eq(
        Arc::as_ptr(a) as *const (),
        Arc::as_ptr(b) as *const (),
    )
}

#[derive(Clone)]
struct Slot {
    value: Arc<dyn Any + Send + Sync>,
    type_name: &'static str,
}

/// 调用参数
///
/// 拦截器可以在 `proceed()` 之前替换参数
#[derive(Clone, Default)]
pub struct Arguments {
    slots: Vec<Slot>,
}

impl Arguments {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with<T: Any + Send + Sync>(mut self, value: T) -> Self {
        self.push(value);
        self
    }

    pub fn push<T: Any + Send + Sync>(&mut self, value: T) {
        self.slots.push(Slot {
            value: Arc::new(value),
            type_name: std::any::type_name::<T>(),
        });
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn is<T: Any>(&self, index: usize) -> bool {
        self.slots
            .get(index)
            .map_or(false, |slot| slot.value.is::<T>())
    }

    pub fn get<T: Any>(&self, index: usize) -> Result<&T, AopError> {
        let slot = self.slots.get(index).ok_or(AopError::MissingArgument {
            index,
            count: self.slots.len(),
        })?;
        slot.value
            .downcast_ref::<T>()
            .ok_or(AopError::ArgumentMismatch {
                index,
                expected: std::any::type_name::<T>(),
                actual: slot.type_name,
            })
    }

    pub fn cloned<T: Any + Clone>(&self, index: usize) -> Result<T, AopError> {
        self.get::<T>(index).cloned()
    }

    /// 替换第 `index` 个参数
    pub fn set<T: Any + Send + Sync>(&mut self, index: usize, value: T) -> Result<(), AopError> {
        let count = self.slots.len();
        let slot = self
            .slots
            .get_mut(index)
            .ok_or(AopError::MissingArgument { index, count })?;
        *slot = Slot {
            value: Arc::new(value),
            type_name: std::any::type_name::<T>(),
        };
        Ok(())
    }

    pub fn type_names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.slots.iter().map(|slot| slot.type_name)
    }
}

impl fmt::Debug for Arguments {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.type_names()).finish()
    }
}

/// 方法返回值
pub struct ReturnValue {
    value: Box<dyn Any + Send + Sync>,
    type_name: &'static str,
}

impl ReturnValue {
    pub fn new<T: Any + Send + Sync>(value: T) -> Self {
        Self {
            value: Box::new(value),
            type_name: std::any::type_name::<T>(),
        }
    }

    pub fn unit() -> Self {
        Self::new(())
    }

    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    pub fn is<T: Any>(&self) -> bool {
        self.value.is::<T>()
    }

    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.value.downcast_ref::<T>()
    }

    pub fn downcast<T: Any>(self) -> Result<T, AopError> {
        let actual = self.type_name;
        self.value
            .downcast::<T>()
            .map(|value| *value)
            .map_err(|_| AopError::ReturnTypeMismatch {
                expected: std::any::type_name::<T>(),
                actual,
            })
    }
}

impl fmt::Debug for ReturnValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ReturnValue<{}>", self.type_name)
    }
}

/// 目标方法调用上下文
///
/// 注册的方法实现通过它读取参数，以及在代理暴露时取得当前代理
pub struct TargetCall<'a> {
    arguments: &'a Arguments,
    proxy: Option<&'a Arc<AopProxy>>,
}

impl<'a> TargetCall<'a> {
    pub fn new(arguments: &'a Arguments, proxy: Option<&'a Arc<AopProxy>>) -> Self {
        Self { arguments, proxy }
    }

    pub fn arguments(&self) -> &'a Arguments {
        self.arguments
    }

    pub fn arg<T: Any>(&self, index: usize) -> Result<&'a T, AopError> {
        self.arguments.get::<T>(index)
    }

    pub fn arg_cloned<T: Any + Clone>(&self, index: usize) -> Result<T, AopError> {
        self.arguments.cloned::<T>(index)
    }

    /// 当前代理；未开启 `expose_proxy` 时返回 [`AopError::ProxyNotExposed`]
    pub fn current_proxy(&self) -> Result<&'a Arc<AopProxy>, AopError> {
        self.proxy.ok_or(AopError::ProxyNotExposed)
    }

    pub fn proxy_context(&self) -> CurrentProxy {
        CurrentProxy(self.proxy.cloned())
    }
}

/// 显式传递给目标方法的当前代理
///
/// 目标方法声明一个 `CurrentProxy` 参数即可在自调用时经过代理
#[derive(Clone, Default)]
pub struct CurrentProxy(Option<Arc<AopProxy>>);

impl CurrentProxy {
    pub fn get(&self) -> Result<&Arc<AopProxy>, AopError> {
        self.0.as_ref().ok_or(AopError::ProxyNotExposed)
    }

    pub fn is_exposed(&self) -> bool {
        self.0.is_some()
    }
}

impl fmt::Debug for CurrentProxy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("CurrentProxy")
            .field(&self.is_exposed())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_arguments_typed_access() {
        let mut args = Arguments::new().with("alice".to_string()).with(42u32);
        assert_eq!(args.len(), 2);
        assert_eq!(args.get::<String>(0).unwrap(), "alice");
        assert_eq!(args.cloned::<u32>(1).unwrap(), 42);
        assert!(args.is::<u32>(1));

        args.set(1, 7u32).unwrap();
        assert_eq!(*args.get::<u32>(1).unwrap(), 7);
    }

    #[test]
    fn test_arguments_errors() {
        let args = Arguments::new().with(1i64);
        assert!(matches!(
            args.get::<String>(0),
            Err(AopError::ArgumentMismatch { index: 0, actual: "i64", .. })
        ));
        assert!(matches!(
            args.get::<i64>(3),
            Err(AopError::MissingArgument { index: 3, count: 1 })
        ));
    }

    #[test]
    fn test_return_value_downcast() {
        let value = ReturnValue::new(vec![1, 2, 3]);
        assert!(value.is::<Vec<i32>>());
        assert_eq!(value.downcast_ref::<Vec<i32>>().unwrap().len(), 3);
        assert_eq!(value.downcast::<Vec<i32>>().unwrap(), vec![1, 2, 3]);

        let err = ReturnValue::unit().downcast::<String>().unwrap_err();
        assert!(matches!(err, AopError::ReturnTypeMismatch { actual: "()", .. }));
    }

    #[test]
    fn test_target_call_without_proxy() {
        let args = Arguments::new().with(5u8);
        let call = TargetCall::new(&args, None);
        assert_eq!(*call.arg::<u8>(0).unwrap(), 5);
        assert!(matches!(call.current_proxy(), Err(AopError::ProxyNotExposed)));
        assert!(!call.proxy_context().is_exposed());
    }

    #[test]
    fn test_same_target() {
        let a: Target = Arc::new(1u8);
        let b = a.clone();
        let c: Target = Arc::new(1u8);
        assert!(same_target(&a, &b));
        assert!(!same_target(&a, &c));
    }
}
