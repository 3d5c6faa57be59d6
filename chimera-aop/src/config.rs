//! AOP 配置
//!
//! 从 TOML 文档的 `[aop]` 表读取，再用 `CHIMERA_AOP_*` 环境变量覆盖：
//!
//! ```toml
//! [aop]
//! proxy-target-class = false
//! expose-proxy = true
//! pool-max-size = 16
//! ```

use crate::error::{AopError, AopResult};
use crate::proxy_factory::{AopProxyFactory, ProxyConfig, ProxyFactory};
use serde::Deserialize;
use std::fs;
use std::path::Path;
use std::time::Duration;

/// 环境变量前缀
pub const ENV_PREFIX: &str = "CHIMERA_AOP_";

fn default_pool_max_size() -> usize {
    8
}

fn default_true() -> bool {
    true
}

/// AOP 配置属性
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct AopProperties {
    pub proxy_target_class: bool,
    pub expose_proxy: bool,
    pub frozen: bool,
    pub optimize: bool,
    /// 原生模式：只能使用接口代理
    pub native_image: bool,
    #[serde(default = "default_true")]
    pub apply_common_interceptors_first: bool,
    #[serde(default = "default_pool_max_size")]
    pub pool_max_size: usize,
    pub pool_max_wait_ms: Option<u64>,
}

impl Default for AopProperties {
    fn default() -> Self {
        Self {
            proxy_target_class: false,
            expose_proxy: false,
            frozen: false,
            optimize: false,
            native_image: false,
            apply_common_interceptors_first: true,
            pool_max_size: default_pool_max_size(),
            pool_max_wait_ms: None,
        }
    }
}

#[derive(Deserialize)]
struct Document {
    #[serde(default)]
    aop: AopProperties,
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_lowercase().as_str() {
        "true" | "yes" | "1" => Some(true),
        "false" | "no" | "0" => Some(false),
        _ => None,
    }
}

impl AopProperties {
    /// 从 TOML 字符串解析；没有 `[aop]` 表时使用默认值
    pub fn from_toml_str(content: &str) -> AopResult<Self> {
        let document: Document = toml::from_str(content)
            .map_err(|e| AopError::Config(format!("Failed to parse TOML: {}", e)))?;
        Ok(document.aop)
    }

    /// 从 TOML 文件加载
    pub fn from_file(path: impl AsRef<Path>) -> AopResult<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .map_err(|e| AopError::Config(format!("Failed to read config file {:?}: {}", path, e)))?;
        Self::from_toml_str(&content)
    }

    /// 用进程环境变量覆盖
    pub fn with_env_overrides(self) -> AopResult<Self> {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    /// 用任意键值来源覆盖，键为完整的环境变量名
    pub fn apply_overrides<F>(mut self, lookup: F) -> AopResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let flag = |name: &str, current: bool| -> AopResult<bool> {
            let key = format!("{}{}", ENV_PREFIX, name);
            match lookup(&key) {
                None => Ok(current),
                Some(raw) => parse_bool(&raw).ok_or_else(|| {
                    AopError::Config(format!("{} must be a boolean, got '{}'", key, raw))
                }),
            }
        };

        self.proxy_target_class = flag("PROXY_TARGET_CLASS", self.proxy_target_class)?;
        self.expose_proxy = flag("EXPOSE_PROXY", self.expose_proxy)?;
        self.frozen = flag("FROZEN", self.frozen)?;
        self.optimize = flag("OPTIMIZE", self.optimize)?;
        self.native_image = flag("NATIVE_IMAGE", self.native_image)?;
        self.apply_common_interceptors_first =
            flag("APPLY_COMMON_INTERCEPTORS_FIRST", self.apply_common_interceptors_first)?;

        let key = format!("{}POOL_MAX_SIZE", ENV_PREFIX);
        if let Some(raw) = lookup(&key) {
            self.pool_max_size = raw
                .trim()
                .parse()
                .map_err(|_| AopError::Config(format!("{} must be a number, got '{}'", key, raw)))?;
        }

        let key = format!("{}POOL_MAX_WAIT_MS", ENV_PREFIX);
        if let Some(raw) = lookup(&key) {
            let millis = raw
                .trim()
                .parse()
                .map_err(|_| AopError::Config(format!("{} must be a number, got '{}'", key, raw)))?;
            self.pool_max_wait_ms = Some(millis);
        }

        if self.pool_max_size == 0 {
            return Err(AopError::Config("pool-max-size must be at least 1".to_string()));
        }
        Ok(self)
    }

    /// 代理标志位默认值
    pub fn proxy_config(&self) -> ProxyConfig {
        ProxyConfig {
            proxy_target_class: self.proxy_target_class,
            optimize: self.optimize,
            expose_proxy: self.expose_proxy,
            frozen: self.frozen,
            pre_filtered: false,
        }
    }

    /// 遵循 `native_image` 的策略选择器
    pub fn proxy_factory(&self) -> AopProxyFactory {
        AopProxyFactory::new().native_image(self.native_image)
    }

    /// 预先填好配置的代理工厂
    pub fn new_proxy_factory(&self) -> ProxyFactory {
        ProxyFactory::new()
            .config(self.proxy_config())
            .aop_proxy_factory(self.proxy_factory())
    }

    pub fn pool_max_wait(&self) -> Option<Duration> {
        self.pool_max_wait_ms.map(Duration::from_millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults_without_aop_table() {
        let properties = AopProperties::from_toml_str("[server]\nport = 8080\n").unwrap();
        assert_eq!(properties, AopProperties::default());
        assert_eq!(properties.pool_max_size, 8);
        assert!(properties.apply_common_interceptors_first);
        assert!(properties.pool_max_wait().is_none());
    }

    #[test]
    fn test_reads_kebab_case_keys() {
        let properties = AopProperties::from_toml_str(
            r#"
            [aop]
            proxy-target-class = true
            expose-proxy = true
            native-image = true
            pool-max-size = 3
            pool-max-wait-ms = 250
            "#,
        )
        .unwrap();

        assert!(properties.proxy_target_class);
        assert!(properties.expose_proxy);
        assert!(properties.proxy_factory().is_native_image());
        assert_eq!(properties.pool_max_size, 3);
        assert_eq!(properties.pool_max_wait(), Some(Duration::from_millis(250)));

        let config = properties.proxy_config();
        assert!(config.proxy_target_class && config.expose_proxy);
        assert!(!config.frozen);
    }

    #[test]
    fn test_invalid_toml_is_a_config_error() {
        let result = AopProperties::from_toml_str("[aop\nfrozen = ");
        assert!(matches!(result, Err(AopError::Config(_))));
    }

    #[test]
    fn test_environment_overrides() {
        let env: HashMap<&str, &str> = HashMap::from([
            ("CHIMERA_AOP_FROZEN", "yes"),
            ("CHIMERA_AOP_OPTIMIZE", "1"),
            ("CHIMERA_AOP_POOL_MAX_SIZE", "32"),
            ("CHIMERA_AOP_POOL_MAX_WAIT_MS", "250"),
            ("CHIMERA_AOP_APPLY_COMMON_INTERCEPTORS_FIRST", "false"),
        ]);
        let properties = AopProperties::default()
            .apply_overrides(|key| env.get(key).map(|v| v.to_string()))
            .unwrap();

        assert!(properties.frozen);
        assert!(properties.optimize);
        assert!(!properties.expose_proxy);
        assert_eq!(properties.pool_max_size, 32);
        assert_eq!(properties.pool_max_wait(), Some(Duration::from_millis(250)));
        assert!(!properties.apply_common_interceptors_first);
    }

    #[test]
    fn test_bad_override_values_are_rejected() {
        let bad_flag = AopProperties::default()
            .apply_overrides(|key| (key == "CHIMERA_AOP_EXPOSE_PROXY").then(|| "maybe".to_string()));
        assert!(matches!(bad_flag, Err(AopError::Config(_))));

        let zero_pool = AopProperties::default()
            .apply_overrides(|key| (key == "CHIMERA_AOP_POOL_MAX_SIZE").then(|| "0".to_string()));
        assert!(matches!(zero_pool, Err(AopError::Config(_))));

        let bad_wait = AopProperties::default()
            .apply_overrides(|key| (key == "CHIMERA_AOP_POOL_MAX_WAIT_MS").then(|| "soon".to_string()));
        assert!(matches!(bad_wait, Err(AopError::Config(_))));
    }
}
