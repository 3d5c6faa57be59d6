//! 切点（Pointcut）
//!
//! 切点由类过滤器（[`ClassFilter`]）和方法匹配器（[`MethodMatcher`]）组成。
//! 方法匹配器可以声明自己是"运行时"的，此时静态匹配通过后，
//! 每次调用还会根据实参再匹配一次。
//!
//! [`PointcutExpression`] 提供了基于名称模式的表达式切点，同时实现了两个 trait

use crate::class::TargetClass;
use crate::metadata::Method;
use crate::value::Arguments;
use regex::Regex;
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

/// 类过滤器
pub trait ClassFilter: Send + Sync {
    fn matches(&self, class: &TargetClass) -> bool;
}

/// 方法匹配器
pub trait MethodMatcher: Send + Sync {
    /// 静态匹配
    fn matches(&self, method: &Method, target_class: &TargetClass) -> bool;

    /// 是否需要在每次调用时根据实参再匹配
    fn is_runtime(&self) -> bool {
        false
    }

    /// 运行时匹配，只有在静态匹配通过且 `is_runtime()` 为 true 时才会调用
    fn matches_arguments(
        &self,
        _method: &Method,
        _target_class: &TargetClass,
        _arguments: &Arguments,
    ) -> bool {
        true
    }
}

/// 匹配所有类
#[derive(Debug, Clone, Copy, Default)]
pub struct TrueClassFilter;

impl ClassFilter for TrueClassFilter {
    fn matches(&self, _class: &TargetClass) -> bool {
        true
    }
}

/// 匹配所有方法
#[derive(Debug, Clone, Copy, Default)]
pub struct TrueMethodMatcher;

impl MethodMatcher for TrueMethodMatcher {
    fn matches(&self, _method: &Method, _target_class: &TargetClass) -> bool {
        true
    }
}

/// 按类名或接口名过滤（支持 `*` 通配符）
#[derive(Debug, Clone)]
pub struct NameClassFilter {
    pattern: String,
}

impl NameClassFilter {
    pub fn new(pattern: impl Into<String>) -> Self {
        Self {
            pattern: pattern.into(),
        }
    }
}

impl ClassFilter for NameClassFilter {
    fn matches(&self, class: &TargetClass) -> bool {
        type_matches(&self.pattern, class)
    }
}

/// 按方法名匹配（支持 `*` 通配符）
#[derive(Debug, Clone)]
pub struct NameMethodMatcher {
    pattern: String,
}

impl NameMethodMatcher {
    pub fn new(pattern: impl Into<String>) -> Self {
        Self {
            pattern: pattern.into(),
        }
    }
}

impl MethodMatcher for NameMethodMatcher {
    fn matches(&self, method: &Method, _target_class: &TargetClass) -> bool {
        pattern_matches(&self.pattern, method.name())
    }
}

type ArgumentPredicate = dyn Fn(&Method, &Arguments) -> bool + Send + Sync;

/// 运行时方法匹配器：方法名静态匹配，实参由谓词动态判断
pub struct DynamicMethodMatcher {
    pattern: String,
    predicate: Box<ArgumentPredicate>,
}

impl DynamicMethodMatcher {
    pub fn new<F>(pattern: impl Into<String>, predicate: F) -> Self
    where
        F: Fn(&Method, &Arguments) -> bool + Send + Sync + 'static,
    {
        Self {
            pattern: pattern.into(),
            predicate: Box::new(predicate),
        }
    }
}

impl MethodMatcher for DynamicMethodMatcher {
    fn matches(&self, method: &Method, _target_class: &TargetClass) -> bool {
        pattern_matches(&self.pattern, method.name())
    }

    fn is_runtime(&self) -> bool {
        true
    }

    fn matches_arguments(
        &self,
        method: &Method,
        _target_class: &TargetClass,
        arguments: &Arguments,
    ) -> bool {
        (self.predicate)(method, arguments)
    }
}

/// 切点
#[derive(Clone)]
pub struct Pointcut {
    class_filter: Arc<dyn ClassFilter>,
    method_matcher: Arc<dyn MethodMatcher>,
}

impl Pointcut {
    pub fn new(class_filter: Arc<dyn ClassFilter>, method_matcher: Arc<dyn MethodMatcher>) -> Self {
        Self {
            class_filter,
            method_matcher,
        }
    }

    /// 匹配所有类的所有方法
    pub fn always() -> Self {
        Self::new(Arc::new(TrueClassFilter), Arc::new(TrueMethodMatcher))
    }

    pub fn for_class_filter(class_filter: impl ClassFilter + 'static) -> Self {
        Self::new(Arc::new(class_filter), Arc::new(TrueMethodMatcher))
    }

    pub fn for_method_matcher(method_matcher: impl MethodMatcher + 'static) -> Self {
        Self::new(Arc::new(TrueClassFilter), Arc::new(method_matcher))
    }

    /// 解析 execution 表达式，例如 `* EchoService.echo(..)`
    pub fn execution(expression: &str) -> Self {
        PointcutExpression::execution(expression).into()
    }

    pub fn class_filter(&self) -> &Arc<dyn ClassFilter> {
        &self.class_filter
    }

    pub fn method_matcher(&self) -> &Arc<dyn MethodMatcher> {
        &self.method_matcher
    }
}

impl From<PointcutExpression> for Pointcut {
    fn from(expression: PointcutExpression) -> Self {
        let expression = Arc::new(expression);
        Self::new(expression.clone(), expression)
    }
}

impl std::fmt::Debug for Pointcut {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pointcut")
            .field("runtime", &self.method_matcher.is_runtime())
            .finish_non_exhaustive()
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

fn guarded(kind: &str, subject: &dyn std::fmt::Display, check: impl FnOnce() -> bool) -> bool {
    match panic::catch_unwind(AssertUnwindSafe(check)) {
        Ok(matched) => matched,
        Err(payload) => {
            tracing::warn!(
                "⚠️ [Pointcut] {} panicked while matching {}, treating as non-match: {}",
                kind,
                subject,
                panic_message(payload.as_ref())
            );
            false
        }
    }
}

/// 执行类过滤；匹配器 panic 视为不匹配
pub fn matches_class(filter: &dyn ClassFilter, class: &TargetClass) -> bool {
    guarded("class filter", &class.name(), || filter.matches(class))
}

/// 执行静态方法匹配；匹配器 panic 视为不匹配
pub fn matches_method(matcher: &dyn MethodMatcher, method: &Method, class: &TargetClass) -> bool {
    guarded("method matcher", method, || matcher.matches(method, class))
}

/// 执行运行时匹配；匹配器 panic 视为不匹配
pub fn matches_arguments(
    matcher: &dyn MethodMatcher,
    method: &Method,
    class: &TargetClass,
    arguments: &Arguments,
) -> bool {
    guarded("runtime matcher", method, || {
        matcher.matches_arguments(method, class, arguments)
    })
}

/// 简单的模式匹配（支持 * 通配符）
///
/// 支持的模式：
/// - `*` - 匹配任意字符串
/// - `User*` - 以 User 开头
/// - `*Service` - 以 Service 结尾
/// - `*Service*` - 包含 Service
pub fn pattern_matches(pattern: &str, target: &str) -> bool {
    if pattern == "*" {
        return true;
    }

    if !pattern.contains('*') {
        return pattern == target;
    }

    let mut parts = pattern.split('*');
    let first = parts.next().unwrap_or_default();
    let Some(mut rest) = target.strip_prefix(first) else {
        return false;
    };

    let mut parts: Vec<&str> = parts.collect();
    let last = parts.pop().unwrap_or_default();
    for part in parts {
        match rest.find(part) {
            Some(position) => rest = &rest[position + part.len()..],
            None => return false,
        }
    }
    rest.len() >= last.len() && rest.ends_with(last)
}

/// 类名或任一接口名匹配
fn type_matches(pattern: &str, class: &TargetClass) -> bool {
    pattern_matches(pattern, class.name())
        || class
            .interfaces()
            .iter()
            .any(|iface| pattern_matches(pattern, iface.name()))
}

/// 方法的声明类型或目标类名匹配
fn declaring_matches(pattern: &str, method: &Method, class: &TargetClass) -> bool {
    pattern_matches(pattern, method.declaring_type()) || pattern_matches(pattern, class.name())
}

type CustomMatcher = dyn Fn(&TargetClass, &Method) -> bool + Send + Sync;

/// 切点表达式
#[derive(Clone)]
pub enum PointcutExpression {
    /// 匹配所有方法
    All,

    /// 匹配特定类型的所有方法，类型可以是类名或接口名
    /// 例如：TypePattern("UserService")
    TypePattern(String),

    /// 匹配特定方法名
    /// 例如：MethodPattern("get_user")
    MethodPattern(String),

    /// 匹配特定类型的特定方法
    /// 例如：execution(* UserService.get_user(..))
    Execution {
        type_pattern: String,
        method_pattern: String,
    },

    /// 使用正则表达式匹配类型
    TypeRegex(Regex),

    /// 使用正则表达式匹配方法
    MethodRegex(Regex),

    /// 自定义匹配函数
    Custom(Arc<CustomMatcher>),

    /// 与运算（AND）
    And(Box<PointcutExpression>, Box<PointcutExpression>),

    /// 或运算（OR）
    Or(Box<PointcutExpression>, Box<PointcutExpression>),

    /// 非运算（NOT）
    Not(Box<PointcutExpression>),
}

impl PointcutExpression {
    /// 检查某个类的某个方法是否匹配
    pub fn matches(&self, class: &TargetClass, method: &Method) -> bool {
        match self {
            PointcutExpression::All => true,

            PointcutExpression::TypePattern(pattern) => {
                pattern_matches(pattern, method.declaring_type()) || type_matches(pattern, class)
            }

            PointcutExpression::MethodPattern(pattern) => pattern_matches(pattern, method.name()),

            PointcutExpression::Execution {
                type_pattern,
                method_pattern,
            } => {
                declaring_matches(type_pattern, method, class)
                    && pattern_matches(method_pattern, method.name())
            }

            PointcutExpression::TypeRegex(regex) => {
                regex.is_match(class.name()) || regex.is_match(method.declaring_type())
            }

            PointcutExpression::MethodRegex(regex) => regex.is_match(method.name()),

            PointcutExpression::Custom(func) => func(class, method),

            PointcutExpression::And(left, right) => {
                left.matches(class, method) && right.matches(class, method)
            }

            PointcutExpression::Or(left, right) => {
                left.matches(class, method) || right.matches(class, method)
            }

            PointcutExpression::Not(expr) => !expr.matches(class, method),
        }
    }

    /// 类级别的快速判断
    ///
    /// 返回 false 表示该类的任何方法都不可能匹配；方法相关的子表达式按"可能匹配"处理
    pub fn could_match_class(&self, class: &TargetClass) -> bool {
        match self {
            PointcutExpression::TypePattern(pattern) => type_matches(pattern, class),
            PointcutExpression::Execution { type_pattern, .. } => {
                type_matches(type_pattern, class)
                    || class
                        .methods()
                        .any(|m| pattern_matches(type_pattern, m.declaring_type()))
            }
            PointcutExpression::TypeRegex(regex) => {
                regex.is_match(class.name())
                    || class.interfaces().iter().any(|i| regex.is_match(i.name()))
            }
            PointcutExpression::And(left, right) => {
                left.could_match_class(class) && right.could_match_class(class)
            }
            PointcutExpression::Or(left, right) => {
                left.could_match_class(class) || right.could_match_class(class)
            }
            PointcutExpression::Not(expr) => match expr.as_ref() {
                PointcutExpression::TypePattern(_) | PointcutExpression::TypeRegex(_) => {
                    !expr.could_match_class(class)
                }
                _ => true,
            },
            PointcutExpression::All
            | PointcutExpression::MethodPattern(_)
            | PointcutExpression::MethodRegex(_)
            | PointcutExpression::Custom(_) => true,
        }
    }

    /// 创建 execution 表达式
    ///
    /// 例如：execution("* UserService.get_user(..)")
    /// 格式：返回类型 类型名.方法名(参数)
    ///
    /// 只支持类型和方法名匹配，参数部分被忽略
    pub fn execution(expression: &str) -> Self {
        let expression = expression
            .trim()
            .strip_prefix("execution(")
            .and_then(|inner| inner.strip_suffix(')'))
            .unwrap_or(expression.trim());
        let parts: Vec<&str> = expression.split_whitespace().collect();

        if parts.len() < 2 {
            return PointcutExpression::All;
        }

        let method_part = parts[1];
        let method_part = method_part
            .split_once('(')
            .map_or(method_part, |(head, _)| head);

        if let Some((type_pattern, method_pattern)) = method_part.rsplit_once('.') {
            PointcutExpression::Execution {
                type_pattern: type_pattern.to_string(),
                method_pattern: method_pattern.to_string(),
            }
        } else {
            PointcutExpression::MethodPattern(method_part.to_string())
        }
    }

    pub fn custom<F>(func: F) -> Self
    where
        F: Fn(&TargetClass, &Method) -> bool + Send + Sync + 'static,
    {
        PointcutExpression::Custom(Arc::new(func))
    }

    /// 与运算
    pub fn and(self, other: PointcutExpression) -> Self {
        PointcutExpression::And(Box::new(self), Box::new(other))
    }

    /// 或运算
    pub fn or(self, other: PointcutExpression) -> Self {
        PointcutExpression::Or(Box::new(self), Box::new(other))
    }

    /// 非运算
    #[allow(clippy::should_implement_trait)]
    pub fn not(self) -> Self {
        PointcutExpression::Not(Box::new(self))
    }
}

impl ClassFilter for PointcutExpression {
    fn matches(&self, class: &TargetClass) -> bool {
        self.could_match_class(class)
    }
}

impl MethodMatcher for PointcutExpression {
    fn matches(&self, method: &Method, target_class: &TargetClass) -> bool {
        PointcutExpression::matches(self, target_class, method)
    }
}

impl std::fmt::Debug for PointcutExpression {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PointcutExpression::All => write!(f, "All"),
            PointcutExpression::TypePattern(p) => write!(f, "TypePattern({})", p),
            PointcutExpression::MethodPattern(p) => write!(f, "MethodPattern({})", p),
            PointcutExpression::Execution {
                type_pattern,
                method_pattern,
            } => {
                write!(f, "Execution({}.{})", type_pattern, method_pattern)
            }
            PointcutExpression::TypeRegex(r) => write!(f, "TypeRegex({})", r.as_str()),
            PointcutExpression::MethodRegex(r) => write!(f, "MethodRegex({})", r.as_str()),
            PointcutExpression::Custom(_) => write!(f, "Custom(...)"),
            PointcutExpression::And(l, r) => write!(f, "And({:?}, {:?})", l, r),
            PointcutExpression::Or(l, r) => write!(f, "Or({:?}, {:?})", l, r),
            PointcutExpression::Not(e) => write!(f, "Not({:?})", e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::{Interface, MethodSignature};
    use crate::value::ReturnValue;

    struct UserServiceImpl;

    fn user_service() -> Arc<TargetClass> {
        let iface = Interface::builder("UserService")
            .method("get_user", &["u64"])
            .build();
        TargetClass::builder::<UserServiceImpl>("UserServiceImpl")
            .implements(iface)
            .interface_method("UserService", "get_user", &["u64"], |_: &UserServiceImpl, _| {
                Ok(ReturnValue::unit())
            })
            .method("reset", &[], |_: &UserServiceImpl, _| Ok(ReturnValue::unit()))
            .build()
    }

    fn method(class: &TargetClass, name: &str) -> Method {
        class.find_method(name).unwrap().clone()
    }

    #[test]
    fn test_pattern_matches() {
        assert!(pattern_matches("*", "anything"));
        assert!(pattern_matches("get_*", "get_user"));
        assert!(pattern_matches("*Service", "UserService"));
        assert!(pattern_matches("*Serv*", "UserServiceImpl"));
        assert!(pattern_matches("a*b*c", "axxbyyc"));
        assert!(!pattern_matches("a*b*c", "axxc"));
        assert!(!pattern_matches("ab*ba", "aba"));
        assert!(!pattern_matches("get_*", "find_user"));
        assert!(!pattern_matches("exact", "exactly"));
    }

    #[test]
    fn test_execution_matches_interface_methods() {
        let class = user_service();
        let expr = PointcutExpression::execution("* UserService.get_user(..)");
        assert!(expr.matches(&class, &method(&class, "get_user")));
        assert!(!expr.matches(&class, &method(&class, "reset")));
        assert!(expr.could_match_class(&class));

        let wrapped = PointcutExpression::execution("execution(* UserServiceImpl.*(..))");
        assert!(wrapped.matches(&class, &method(&class, "reset")));
    }

    #[test]
    fn test_type_pattern_matches_class_or_interface() {
        let class = user_service();
        assert!(PointcutExpression::TypePattern("*Impl".into()).could_match_class(&class));
        assert!(PointcutExpression::TypePattern("UserService".into()).could_match_class(&class));
        assert!(!PointcutExpression::TypePattern("Order*".into()).could_match_class(&class));
    }

    #[test]
    fn test_combinators() {
        let class = user_service();
        let get = method(&class, "get_user");
        let reset = method(&class, "reset");

        let expr = PointcutExpression::TypePattern("User*".into())
            .and(PointcutExpression::MethodPattern("reset".into()).not());
        assert!(expr.matches(&class, &get));
        assert!(!expr.matches(&class, &reset));

        let either = PointcutExpression::MethodPattern("reset".into())
            .or(PointcutExpression::MethodRegex(Regex::new("^get_").unwrap()));
        assert!(either.matches(&class, &get));
        assert!(either.matches(&class, &reset));
    }

    #[test]
    fn test_not_type_filters_at_class_level() {
        let class = user_service();
        let expr = PointcutExpression::TypePattern("UserServiceImpl".into()).not();
        assert!(!expr.could_match_class(&class));
        let expr = PointcutExpression::MethodPattern("reset".into()).not();
        assert!(expr.could_match_class(&class));
    }

    #[test]
    fn test_dynamic_matcher() {
        let class = user_service();
        let get = method(&class, "get_user");
        let matcher = DynamicMethodMatcher::new("get_*", |_, args| {
            args.get::<u64>(0).map_or(false, |id| *id > 100)
        });

        assert!(matcher.is_runtime());
        assert!(MethodMatcher::matches(&matcher, &get, &class));
        assert!(matches_arguments(&matcher, &get, &class, &Arguments::new().with(101u64)));
        assert!(!matches_arguments(&matcher, &get, &class, &Arguments::new().with(1u64)));
    }

    #[test]
    fn test_panicking_matcher_is_non_match() {
        struct Exploding;
        impl ClassFilter for Exploding {
            fn matches(&self, _class: &TargetClass) -> bool {
                panic!("boom")
            }
        }

        let class = user_service();
        assert!(!matches_class(&Exploding, &class));

        let method = Method::new("Any", MethodSignature::new("x", &[]));
        let custom = PointcutExpression::custom(|_, _| panic!("custom boom"));
        assert!(!matches_method(&custom, &method, &class));
    }

    #[test]
    fn test_pointcut_from_expression() {
        let class = user_service();
        let pointcut: Pointcut = PointcutExpression::MethodPattern("reset".into()).into();
        assert!(pointcut.class_filter().matches(&class));
        assert!(pointcut
            .method_matcher()
            .matches(&method(&class, "reset"), &class));
        assert!(!pointcut.method_matcher().is_runtime());
    }
}
