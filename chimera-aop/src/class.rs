//! 目标类元数据与方法注册表
//!
//! 每个可被代理的类型在 [`ClassRegistry`] 中登记一个 [`TargetClass`]：
//! 类名、实现的接口、以及每个可拦截方法的调用器（[`Invoker`]）。
//! 调用器在注册时捕获具体类型，运行时通过 `Any` 向下转型调用目标方法。
//!
//! 登记方式有两种：
//! - 手动使用 [`TargetClass::builder`]
//! - 使用 `#[advisable]` 宏，通过 `inventory` 在编译期收集 [`MethodContribution`]

use crate::error::AopError;
use crate::metadata::{normalize_type_name, Interface, Method, MethodSignature, ProxyInterface};
use crate::value::{ReturnValue, Target, TargetCall};
use once_cell::sync::Lazy;
use parking_lot::RwLock;
use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

/// 类型擦除的目标方法调用器
pub type Invoker = Arc<
    dyn Fn(&(dyn Any + Send + Sync), &TargetCall<'_>) -> anyhow::Result<ReturnValue>
        + Send
        + Sync,
>;

fn erase<F>(invoker: F) -> Invoker
where
    F: Fn(&(dyn Any + Send + Sync), &TargetCall<'_>) -> anyhow::Result<ReturnValue>
        + Send
        + Sync
        + 'static,
{
    Arc::new(invoker)
}

/// 已注册的方法及其调用器
#[derive(Clone)]
pub struct MethodEntry {
    method: Method,
    invoker: Invoker,
}

impl MethodEntry {
    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn invoker(&self) -> &Invoker {
        &self.invoker
    }
}

/// 目标类元数据
pub struct TargetClass {
    name: String,
    type_id: TypeId,
    interfaces: Vec<Arc<Interface>>,
    methods: Vec<MethodEntry>,
    sealed: bool,
    proxy_class: bool,
    infrastructure: bool,
}

impl TargetClass {
    pub fn builder<T: Any + Send + Sync>(name: impl Into<String>) -> ClassBuilder<T> {
        let mut template = ClassTemplate::new(TypeId::of::<T>(), short_type_name::<T>());
        template.named(name);
        ClassBuilder {
            template,
            _marker: PhantomData,
        }
    }

    /// 从全局注册表查找 `T` 的元数据
    pub fn of<T: Any>() -> Option<Arc<TargetClass>> {
        ClassRegistry::global().get::<T>()
    }

    /// 空目标使用的占位类
    pub fn empty() -> Arc<TargetClass> {
        static EMPTY: Lazy<Arc<TargetClass>> = Lazy::new(|| {
            Arc::new(ClassTemplate::new(TypeId::of::<()>(), "EmptyTarget".to_string()).build())
        });
        EMPTY.clone()
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn target_type_id(&self) -> TypeId {
        self.type_id
    }

    pub fn is_type<T: Any>(&self) -> bool {
        self.type_id == TypeId::of::<T>()
    }

    pub fn interfaces(&self) -> &[Arc<Interface>] {
        &self.interfaces
    }

    /// 非标记接口
    pub fn user_interfaces(&self) -> Vec<Arc<Interface>> {
        self.interfaces
            .iter()
            .filter(|iface| !iface.is_marker())
            .cloned()
            .collect()
    }

    pub fn implements(&self, interface: &str) -> bool {
        self.interfaces.iter().any(|iface| iface.name() == interface)
    }

    pub fn methods(&self) -> impl Iterator<Item = &Method> {
        self.methods.iter().map(|entry| &entry.method)
    }

    pub fn entries(&self) -> &[MethodEntry] {
        &self.methods
    }

    /// 按方法名查找第一个注册的方法
    pub fn find_method(&self, name: &str) -> Option<&Method> {
        self.methods().find(|method| method.name() == name)
    }

    /// 查找某个方法在本类中的实现
    ///
    /// 优先匹配声明类型相同的条目，其次匹配签名相同的条目
    pub fn implementation(&self, method: &Method) -> Option<&MethodEntry> {
        self.methods
            .iter()
            .find(|entry| &entry.method == method)
            .or_else(|| {
                self.methods
                    .iter()
                    .find(|entry| entry.method.signature() == method.signature())
            })
    }

    /// 不允许子类转发代理
    pub fn is_sealed(&self) -> bool {
        self.sealed
    }

    /// 本身就是代理生成的类型
    pub fn is_proxy_class(&self) -> bool {
        self.proxy_class
    }

    /// 框架基础设施类型（通知、切面、切点等），永远不会被自动代理
    pub fn is_infrastructure(&self) -> bool {
        self.infrastructure
    }
}

impl fmt::Debug for TargetClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TargetClass")
            .field("name", &self.name)
            .field(
                "interfaces",
                &self.interfaces.iter().map(|i| i.name()).collect::<Vec<_>>(),
            )
            .field(
                "methods",
                &self.methods().map(|m| m.to_string()).collect::<Vec<_>>(),
            )
            .field("sealed", &self.sealed)
            .finish()
    }
}

fn short_type_name<T: ?Sized>() -> String {
    let full = std::any::type_name::<T>();
    let base = full.split('<').next().unwrap_or(full);
    base.rsplit("::").next().unwrap_or(base).to_string()
}

/// 类型擦除的类模板
///
/// `#[advisable]` 生成的代码向模板中追加方法
pub struct ClassTemplate {
    name: String,
    type_id: TypeId,
    interfaces: Vec<Arc<Interface>>,
    methods: Vec<MethodEntry>,
    sealed: bool,
    proxy_class: bool,
    infrastructure: bool,
}

impl ClassTemplate {
    fn new(type_id: TypeId, name: String) -> Self {
        Self {
            name,
            type_id,
            interfaces: Vec::new(),
            methods: Vec::new(),
            sealed: false,
            proxy_class: false,
            infrastructure: false,
        }
    }

    pub fn named(&mut self, name: impl Into<String>) {
        self.name = name.into();
    }

    pub fn add_interface(&mut self, interface: Arc<Interface>) {
        if !self.interfaces.iter().any(|i| i.name() == interface.name()) {
            self.interfaces.push(interface);
        }
    }

    /// 追加一个方法
    ///
    /// `declaring_type` 为 `None` 时方法属于类本身
    pub fn add_method<T, F>(
        &mut self,
        declaring_type: Option<&str>,
        name: &str,
        parameter_types: &[&str],
        implementation: F,
    ) where
        T: Any + Send + Sync,
        F: Fn(&T, &TargetCall<'_>) -> anyhow::Result<ReturnValue> + Send + Sync + 'static,
    {
        let declaring = declaring_type.unwrap_or(&self.name).to_string();
        let method = Method::new(declaring, MethodSignature::new(name, parameter_types));
        let expected = self.name.clone();
        let invoker = erase(move |target, call| {
            let typed = target.downcast_ref::<T>().ok_or_else(|| AopError::TargetTypeMismatch {
                expected: expected.clone(),
                actual: "<erased>".to_string(),
            })?;
            implementation(typed, call)
        });

        self.methods.retain(|entry| entry.method != method);
        self.methods.push(MethodEntry { method, invoker });
    }

    pub fn mark_sealed(&mut self) {
        self.sealed = true;
    }

    pub fn mark_proxy_class(&mut self) {
        self.proxy_class = true;
    }

    pub fn mark_infrastructure(&mut self) {
        self.infrastructure = true;
    }

    fn build(self) -> TargetClass {
        TargetClass {
            name: self.name,
            type_id: self.type_id,
            interfaces: self.interfaces,
            methods: self.methods,
            sealed: self.sealed,
            proxy_class: self.proxy_class,
            infrastructure: self.infrastructure,
        }
    }
}

/// [`TargetClass`] 构建器
pub struct ClassBuilder<T> {
    template: ClassTemplate,
    _marker: PhantomData<fn() -> T>,
}

impl<T: Any + Send + Sync> ClassBuilder<T> {
    pub fn implements(mut self, interface: Arc<Interface>) -> Self {
        self.template.add_interface(interface);
        self
    }

    pub fn implements_interface<I: ProxyInterface + ?Sized>(self) -> Self {
        self.implements(I::interface())
    }

    /// 注册类自身的方法
    pub fn method<F>(mut self, name: &str, parameter_types: &[&str], implementation: F) -> Self
    where
        F: Fn(&T, &TargetCall<'_>) -> anyhow::Result<ReturnValue> + Send + Sync + 'static,
    {
        self.template
            .add_method::<T, F>(None, name, parameter_types, implementation);
        self
    }

    /// 注册某个接口方法的实现
    pub fn interface_method<F>(
        mut self,
        interface: &str,
        name: &str,
        parameter_types: &[&str],
        implementation: F,
    ) -> Self
    where
        F: Fn(&T, &TargetCall<'_>) -> anyhow::Result<ReturnValue> + Send + Sync + 'static,
    {
        self.template
            .add_method::<T, F>(Some(interface), name, parameter_types, implementation);
        self
    }

    pub fn sealed(mut self) -> Self {
        self.template.mark_sealed();
        self
    }

    pub fn proxy_class(mut self) -> Self {
        self.template.mark_proxy_class();
        self
    }

    pub fn infrastructure(mut self) -> Self {
        self.template.mark_infrastructure();
        self
    }

    pub fn build(self) -> Arc<TargetClass> {
        Arc::new(self.template.build())
    }

    /// 构建并登记到全局注册表
    pub fn register(self) -> Arc<TargetClass> {
        let class = self.build();
        ClassRegistry::global().register(class.clone());
        class
    }
}

/// 编译期收集的方法贡献
///
/// 同一类型可以有多个贡献（固有 impl 与各个 trait impl 分别生成）
pub struct MethodContribution {
    owner: fn() -> TypeId,
    owner_name: fn() -> &'static str,
    contribute: fn(&mut ClassTemplate),
}

impl MethodContribution {
    pub const fn new(
        owner: fn() -> TypeId,
        owner_name: fn() -> &'static str,
        contribute: fn(&mut ClassTemplate),
    ) -> Self {
        Self {
            owner,
            owner_name,
            contribute,
        }
    }
}

inventory::collect!(MethodContribution);

/// 类元数据注册表
#[derive(Default)]
pub struct ClassRegistry {
    classes: RwLock<HashMap<TypeId, Arc<TargetClass>>>,
}

static GLOBAL_CLASS_REGISTRY: Lazy<ClassRegistry> = Lazy::new(ClassRegistry::new);

impl ClassRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn global() -> &'static ClassRegistry {
        &GLOBAL_CLASS_REGISTRY
    }

    pub fn register(&self, class: Arc<TargetClass>) {
        tracing::debug!("Registered target class: {}", class.name());
        self.classes.write().insert(class.target_type_id(), class);
    }

    pub fn get<T: Any>(&self) -> Option<Arc<TargetClass>> {
        self.get_by_type_id(TypeId::of::<T>())
    }

    /// 查找类元数据；未命中时尝试从编译期贡献中组装
    pub fn get_by_type_id(&self, type_id: TypeId) -> Option<Arc<TargetClass>> {
        if let Some(class) = self.classes.read().get(&type_id) {
            return Some(class.clone());
        }

        let class = Arc::new(assemble(type_id)?);
        let mut classes = self.classes.write();
        Some(classes.entry(type_id).or_insert(class).clone())
    }

    /// 解析目标对象的类
    pub fn resolve(&self, target: &Target) -> Option<Arc<TargetClass>> {
        self.get_by_type_id(Any::type_id(&**target))
    }

    pub fn len(&self) -> usize {
        self.classes.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.classes.read().is_empty()
    }
}

fn assemble(type_id: TypeId) -> Option<TargetClass> {
    let mut contributions = inventory::iter::<MethodContribution>
        .into_iter()
        .filter(|c| (c.owner)() == type_id)
        .peekable();

    let first = contributions.peek()?;
    let mut template = ClassTemplate::new(type_id, normalize_type_name((first.owner_name)()));
    for contribution in contributions {
        (contribution.contribute)(&mut template);
    }

    let class = template.build();
    tracing::debug!(
        "Assembled target class {} with {} method(s) from #[advisable] impls",
        class.name(),
        class.methods.len()
    );
    Some(class)
}
