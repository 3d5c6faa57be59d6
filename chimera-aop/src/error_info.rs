//! 错误信息结构
//!
//! 提供结构化的错误信息传递给切面

use std::error::Error;

/// 结构化的错误信息
///
/// 用于在 after_throwing 通知中传递更丰富的错误信息
#[derive(Debug, Clone)]
pub struct ErrorInfo {
    /// 错误消息
    pub message: String,

    /// 错误类型名称
    pub error_type: String,

    /// 错误源链（cause chain）
    pub source_chain: Vec<String>,
}

impl ErrorInfo {
    /// 从标准错误创建 ErrorInfo
    pub fn from_error<E: Error>(error: &E) -> Self {
        let mut source_chain = Vec::new();
        let mut current = error.source();
        while let Some(source) = current {
            source_chain.push(source.to_string());
            current = source.source();
        }

        Self {
            message: error.to_string(),
            error_type: std::any::type_name::<E>().to_string(),
            source_chain,
        }
    }

    /// 从调用链上传播的 `anyhow::Error` 创建
    ///
    /// 框架自身的 [`AopError`](crate::AopError) 会保留具体类型名
    pub fn from_anyhow(error: &anyhow::Error) -> Self {
        let error_type = if error.downcast_ref::<crate::AopError>().is_some() {
            std::any::type_name::<crate::AopError>()
        } else {
            std::any::type_name::<anyhow::Error>()
        };

        Self {
            message: error.to_string(),
            error_type: error_type.to_string(),
            source_chain: error.chain().skip(1).map(|cause| cause.to_string()).collect(),
        }
    }

    /// 创建简单的 ErrorInfo（只包含消息）
    pub fn simple(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            error_type: "Unknown".to_string(),
            source_chain: Vec::new(),
        }
    }

    /// 获取完整的错误描述（包含源链）
    pub fn full_description(&self) -> String {
        if self.source_chain.is_empty() {
            self.message.clone()
        } else {
            format!(
                "{}\nCaused by:\n  {}",
                self.message,
                self.source_chain.join("\n  ")
            )
        }
    }
}
