//! AOP 错误类型
//!
//! 配置期错误（代理创建、通知注册、冻结配置等）使用 [`AopError`]；
//! 代理调用期间目标方法或通知产生的错误以 `anyhow::Error` 原样传播，
//! 框架不会对其进行包装

use thiserror::Error;

/// AOP 错误
#[derive(Debug, Error)]
pub enum AopError {
    /// 通用配置错误
    #[error("AOP configuration error: {0}")]
    Config(String),

    /// 既没有接口也没有目标类，无法选择代理策略
    #[error(
        "TargetSource cannot determine target class: either an interface or a target is required for proxy creation"
    )]
    NoTargetClass,

    /// 目标类无法被子类转发代理，且没有可用接口
    #[error("cannot proxy class '{class}': {reason}")]
    NoViableStrategy { class: String, reason: String },

    /// 配置已冻结
    #[error("cannot modify advisors of '{class}': configuration is frozen")]
    ConfigFrozen { class: String },

    /// 没有适配器能处理的通知类型
    #[error("advice type '{kind}' is not supported by any registered adapter")]
    UnknownAdviceType { kind: String },

    /// 代理未暴露该方法
    #[error("method '{method}' is not exposed by proxy for '{class}'")]
    MethodNotProxied { class: String, method: String },

    /// 连接点没有可调用的目标方法（例如仅由引入提供的接口方法未被处理）
    #[error("no target implementation for '{method}'")]
    NoTargetMethod { method: String },

    /// 参数数量不足
    #[error("missing argument #{index} (call has {count} arguments)")]
    MissingArgument { index: usize, count: usize },

    /// 参数类型不匹配
    #[error("argument #{index} has type {actual}, expected {expected}")]
    ArgumentMismatch {
        index: usize,
        expected: &'static str,
        actual: &'static str,
    },

    /// 返回值类型不匹配
    #[error("return value has type {actual}, expected {expected}")]
    ReturnTypeMismatch {
        expected: &'static str,
        actual: &'static str,
    },

    /// 目标对象类型与注册的类元数据不一致
    #[error("target type mismatch: expected {expected}, got {actual}")]
    TargetTypeMismatch { expected: String, actual: String },

    /// 当前调用没有暴露代理
    #[error(
        "cannot find current proxy: set 'expose_proxy' to true on the proxy configuration to make it available"
    )]
    ProxyNotExposed,

    /// 对象池已耗尽且等待超时
    #[error("target pool for '{class}' exhausted ({max_size} objects in use)")]
    PoolExhausted { class: String, max_size: usize },

    /// 日志初始化失败
    #[error("failed to initialize logging: {0}")]
    LoggingInit(String),
}

/// AOP 配置期结果
pub type AopResult<T> = std::result::Result<T, AopError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_messages_name_the_subject() {
        let error = AopError::MethodNotProxied {
            class: "EchoService".to_string(),
            method: "shout".to_string(),
        };
        assert_eq!(
            error.to_string(),
            "method 'shout' is not exposed by proxy for 'EchoService'"
        );

        let error = AopError::ArgumentMismatch {
            index: 1,
            expected: "i32",
            actual: "alloc::string::String",
        };
        assert!(error.to_string().contains("argument #1"));
    }

    #[test]
    fn test_converts_into_anyhow() {
        let error: anyhow::Error = AopError::ProxyNotExposed.into();
        assert!(matches!(
            error.downcast_ref::<AopError>(),
            Some(AopError::ProxyNotExposed)
        ));
    }
}
