// chimera-ioc: 织入层使用的最小依赖注入容器
//
// 提供：
// - 类型元数据（成员、注解、构造参数、扩展元数据）
// - 单例和原型作用域，父子作用域
// - 构造流程钩子（InstancePostProcessor）
// - 配置环境与日志初始化

pub mod component;
pub mod config;
pub mod container;
pub mod error;
pub mod instance;
pub mod invoke;
pub mod logging;
pub mod metadata;
pub mod post_processor;
pub mod scope;

// 重新导出常用类型
pub use component::{get_all_component_registrations, ComponentRegistrar, ComponentRegistration};
pub use config::{Environment, DEFAULT_ENV_PREFIX};
pub use container::{Container, Factory, Injector};
pub use error::{IocError, Result};
pub use instance::Instance;
pub use invoke::{Invocable, MethodFn, Output, Target, Value};
pub use logging::{LogFormat, LogLevel, LoggingConfig};
pub use metadata::{
    target_of, Annotation, MemberKind, MemberMeta, ParamMeta, TypeMeta, TypeMetaBuilder, CONSTRUCTOR,
};
pub use post_processor::InstancePostProcessor;
pub use scope::Scope;

// 重新导出 inventory，供 `inventory::submit!` 使用
pub use inventory;

/// Prelude 模块，包含常用的导入
pub mod prelude {
    pub use crate::{
        target_of, Annotation, Container, Environment, Injector, Instance, InstancePostProcessor,
        Invocable, IocError, LoggingConfig, MemberKind, MethodFn, Output, Result, Scope, Target,
        TypeMeta, Value,
    };
}
