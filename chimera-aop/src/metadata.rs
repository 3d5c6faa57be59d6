//! 方法与接口元数据
//!
//! Rust 没有运行时反射，代理能够看到的方法由 [`Interface`] 和
//! [`TargetClass`](crate::TargetClass) 在注册时显式声明

use std::fmt;
use std::sync::Arc;

/// `equals` 方法名，代理对其做特殊处理（除非接口自己声明了它）
pub const EQUALS_METHOD: &str = "equals";

/// `hash_code` 方法名，代理对其做特殊处理（除非接口自己声明了它）
pub const HASH_CODE_METHOD: &str = "hash_code";

/// 所有代理都会实现的标记接口
pub const ADVISED_INTERFACE: &str = "Advised";

/// 规范化类型名：去掉所有空白，使 `Vec < String >` 与 `Vec<String>` 相同
pub(crate) fn normalize_type_name(name: &str) -> String {
    name.chars().filter(|c| !c.is_whitespace()).collect()
}

/// 方法签名（方法名 + 参数类型）
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MethodSignature {
    name: String,
    parameter_types: Vec<String>,
}

impl MethodSignature {
    pub fn new(name: impl Into<String>, parameter_types: &[&str]) -> Self {
        Self {
            name: name.into(),
            parameter_types: parameter_types
                .iter()
                .map(|ty| normalize_type_name(ty))
                .collect(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn parameter_types(&self) -> &[String] {
        &self.parameter_types
    }

    pub fn arity(&self) -> usize {
        self.parameter_types.len()
    }
}

impl fmt::Display for MethodSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.name, self.parameter_types.join(", "))
    }
}

/// 可被拦截的方法
///
/// `declaring_type` 是声明该方法的接口名或类名。同一个实现类中，
/// 接口方法与同名的固有方法通过声明类型区分
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Method {
    declaring_type: String,
    signature: MethodSignature,
}

impl Method {
    pub fn new(declaring_type: impl Into<String>, signature: MethodSignature) -> Self {
        Self {
            declaring_type: declaring_type.into(),
            signature,
        }
    }

    pub fn name(&self) -> &str {
        self.signature.name()
    }

    pub fn signature(&self) -> &MethodSignature {
        &self.signature
    }

    pub fn declaring_type(&self) -> &str {
        &self.declaring_type
    }

    /// 例如 `EchoService::echo`
    pub fn qualified_name(&self) -> String {
        format!("{}::{}", self.declaring_type, self.signature.name())
    }

    pub fn is_equals(&self) -> bool {
        self.name() == EQUALS_METHOD && self.signature.arity() == 1
    }

    pub fn is_hash_code(&self) -> bool {
        self.name() == HASH_CODE_METHOD && self.signature.arity() == 0
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}::{}", self.declaring_type, self.signature)
    }
}

/// 接口描述
///
/// 一个没有方法的标记接口不算作"用户提供的接口"，不会促使工厂选择接口代理
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Interface {
    name: String,
    methods: Vec<Method>,
    marker: bool,
}

impl Interface {
    pub fn builder(name: impl Into<String>) -> InterfaceBuilder {
        InterfaceBuilder {
            name: name.into(),
            methods: Vec::new(),
            marker: false,
        }
    }

    /// 创建标记接口
    pub fn marker(name: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            name: name.into(),
            methods: Vec::new(),
            marker: true,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn methods(&self) -> &[Method] {
        &self.methods
    }

    pub fn is_marker(&self) -> bool {
        self.marker
    }

    pub fn method(&self, name: &str) -> Option<&Method> {
        self.methods.iter().find(|m| m.name() == name)
    }

    pub fn declares(&self, signature: &MethodSignature) -> bool {
        self.methods.iter().any(|m| m.signature() == signature)
    }

    pub fn defines_equals(&self) -> bool {
        self.methods.iter().any(Method::is_equals)
    }

    pub fn defines_hash_code(&self) -> bool {
        self.methods.iter().any(Method::is_hash_code)
    }
}

/// [`Interface`] 构建器
pub struct InterfaceBuilder {
    name: String,
    methods: Vec<MethodSignature>,
    marker: bool,
}

impl InterfaceBuilder {
    pub fn method(mut self, name: impl Into<String>, parameter_types: &[&str]) -> Self {
        self.methods.push(MethodSignature::new(name, parameter_types));
        self
    }

    pub fn marker(mut self) -> Self {
        self.marker = true;
        self
    }

    pub fn build(self) -> Arc<Interface> {
        let methods = self
            .methods
            .into_iter()
            .map(|signature| Method::new(self.name.clone(), signature))
            .collect();
        Arc::new(Interface {
            name: self.name,
            methods,
            marker: self.marker,
        })
    }
}

/// 可作为代理接口的 trait
///
/// 通常由 `#[proxy_interface]` 为 `dyn Trait` 生成
pub trait ProxyInterface {
    fn interface() -> Arc<Interface>;
}
