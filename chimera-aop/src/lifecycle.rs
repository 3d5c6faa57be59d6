//! 生命周期钩子
//!
//! 对象管理器（容器）在实例化和初始化的各个阶段回调这些处理器，
//! 处理器可以返回原始对象，也可以返回包装后的对象（例如 AOP 代理）

use crate::auto_proxy::ProxyTypeInfo;
use crate::class::TargetClass;
use crate::error::AopResult;
use crate::value::Target;
use std::sync::Arc;

/// Bean 初始化前后的钩子
pub trait BeanPostProcessor: Send + Sync {
    /// 在 Bean 初始化回调（init）之前调用
    fn post_process_before_initialization(&self, bean: Target, _bean_name: &str) -> AopResult<Target> {
        Ok(bean)
    }

    /// 在 Bean 初始化回调（init）之后调用
    ///
    /// # 典型用途
    /// - 创建 AOP 代理
    /// - 包装 Bean
    fn post_process_after_initialization(&self, bean: Target, _bean_name: &str) -> AopResult<Target> {
        Ok(bean)
    }

    /// 获取处理器的名称（用于日志和调试）
    fn name(&self) -> &str {
        "BeanPostProcessor"
    }

    /// 获取处理器的优先级（数字越小优先级越高）
    fn order(&self) -> i32 {
        1000
    }
}

/// 实例化之前的钩子
pub trait InstantiationAwareBeanPostProcessor: BeanPostProcessor {
    /// 返回 `Some` 时容器直接使用返回的对象，跳过正常的实例化流程
    fn post_process_before_instantiation(
        &self,
        _class: &Arc<TargetClass>,
        _bean_name: &str,
    ) -> AopResult<Option<Target>> {
        Ok(None)
    }
}

/// 类型预测与循环引用支持
pub trait SmartInstantiationAwareBeanPostProcessor: InstantiationAwareBeanPostProcessor {
    /// 预测最终暴露的对象类型；未知时返回 `None`
    fn predict_proxy_type(&self, _class: &Arc<TargetClass>, _bean_name: &str) -> Option<ProxyTypeInfo> {
        None
    }

    /// 为尚未初始化完成的 Bean 提供提前暴露的引用
    fn get_early_bean_reference(&self, bean: Target, _bean_name: &str) -> AopResult<Target> {
        Ok(bean)
    }
}

fn ordered(processors: &[Arc<dyn BeanPostProcessor>]) -> Vec<&Arc<dyn BeanPostProcessor>> {
    let mut ordered: Vec<_> = processors.iter().collect();
    ordered.sort_by_key(|processor| processor.order());
    ordered
}

/// 按优先级依次执行初始化前钩子
pub fn apply_before_initialization(
    processors: &[Arc<dyn BeanPostProcessor>],
    mut bean: Target,
    bean_name: &str,
) -> AopResult<Target> {
    for processor in ordered(processors) {
        bean = processor.post_process_before_initialization(bean, bean_name)?;
    }
    Ok(bean)
}

/// 按优先级依次执行初始化后钩子
pub fn apply_after_initialization(
    processors: &[Arc<dyn BeanPostProcessor>],
    mut bean: Target,
    bean_name: &str,
) -> AopResult<Target> {
    for processor in ordered(processors) {
        tracing::trace!("Applying {} to bean '{}'", processor.name(), bean_name);
        bean = processor.post_process_after_initialization(bean, bean_name)?;
    }
    Ok(bean)
}
