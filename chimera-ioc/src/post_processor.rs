//! InstancePostProcessor - 构造流程扩展机制
//!
//! 在类型注册、实例构造前后提供钩子，织入层通过它接入构造流程。

use crate::container::Container;
use crate::error::Result;
use crate::instance::Instance;
use crate::metadata::TypeMeta;
use std::sync::Arc;

/// 构造流程钩子
///
/// 所有方法都有空的默认实现，按 [`order`](InstancePostProcessor::order) 升序执行。
///
/// # 示例
///
/// ```ignore
/// struct Tracing;
///
/// impl InstancePostProcessor for Tracing {
///     fn name(&self) -> &str {
///         "Tracing"
///     }
///
///     fn post_process_after_construction(
///         &self,
///         instance: &Arc<Instance>,
///         _scope: &Arc<dyn Container>,
///     ) -> Result<()> {
///         tracing::info!("Constructed {}", instance.type_meta().name());
///         Ok(())
///     }
/// }
/// ```
pub trait InstancePostProcessor: Send + Sync {
    /// 处理器名称
    fn name(&self) -> &str;

    /// 执行顺序，数值越小越早
    fn order(&self) -> i32 {
        0
    }

    /// 类型注册到注入器时调用
    ///
    /// 处理器晚于类型注册加入时，注入器会对已有类型补发该回调。
    fn on_register(&self, _type_meta: &Arc<TypeMeta>, _scope: &Arc<dyn Container>) -> Result<()> {
        Ok(())
    }

    /// 工厂函数执行之前调用
    fn post_process_before_construction(
        &self,
        _type_meta: &Arc<TypeMeta>,
        _scope: &Arc<dyn Container>,
    ) -> Result<()> {
        Ok(())
    }

    /// 实例创建之后、返回给调用方之前调用
    fn post_process_after_construction(
        &self,
        _instance: &Arc<Instance>,
        _scope: &Arc<dyn Container>,
    ) -> Result<()> {
        Ok(())
    }
}
