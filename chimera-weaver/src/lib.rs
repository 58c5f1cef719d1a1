//! Chimera Weaver - 面向切面编程的织入引擎
//!
//! 提供：
//! - 切面声明（类级限制、六种通知、通知参数绑定）
//! - 切点表达式：`execution` / `@annotation` / `@within` / `@target` / 正则，支持 `&&`、`||`、`!`
//! - 通知注册表与按成员的通知分组
//! - 同步值、future、stream 三种返回值的通知推进
//! - 通过构造流程钩子为实例成员安装代理
//!
//! # 示例
//!
//! ```ignore
//! use chimera_weaver::prelude::*;
//!
//! let injector = Injector::new("app");
//! Weaver::default().install(&injector)?;
//! injector.register(log_aspect_type(), |_| Ok(LogAspect::default()))?;
//! injector.register(user_service_type(), |_| Ok(UserService::default()))?;
//!
//! let users = injector.resolve_instance("UserService")?;
//! users.invoke("find", vec![json!(42)])?;
//! ```

pub mod advice;
pub mod advisor;
pub mod aspect;
pub mod chain;
pub mod config;
pub mod error;
pub mod error_info;
pub mod joinpoint;
pub mod matcher;
pub mod pointcut;
pub mod proxy;
pub mod returning;
pub mod weaver;

// 重新导出核心类型
pub use advice::{AdviceGroup, AdviceRegistration, AdviceType, Advicer, PointcutSource};
pub use advisor::Advisor;
pub use aspect::{get_all_aspect_registrations, AdviceFn, AspectMeta, AspectMetaBuilder, AspectRegistration, AspectTypeExt};
pub use chain::{invoke_advice, AdviceContext, AdvisorChain, AdvisorChainFactory, Injected};
pub use config::AopConfig;
pub use error::{AopError, Result, SharedError};
pub use error_info::ErrorInfo;
pub use joinpoint::{Joinpoint, JoinpointState};
pub use matcher::{AdviceMatcher, MatchedAdvice};
pub use pointcut::{MatchContext, PointcutExpression, PointcutGrammar};
pub use proxy::{ProxyKind, ProxyMethod};
pub use returning::{proceeding_for, AdviceAction, FutureProceeding, Proceeding, ReturningType, StreamProceeding, SyncProceeding};
pub use weaver::Weaver;

// 导出 inventory 供 `inventory::submit!` 使用
pub use inventory;

/// 预导入模块
pub mod prelude {
    pub use crate::{
        AdviceContext, AdviceRegistration, AdviceType, AopConfig, AopError, AspectMeta, AspectRegistration,
        ErrorInfo, Joinpoint, JoinpointState, PointcutGrammar, ReturningType, Weaver,
    };
    pub use chimera_ioc::prelude::*;
}
