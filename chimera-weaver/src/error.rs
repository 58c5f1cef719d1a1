use std::sync::Arc;
use thiserror::Error;

/// 与容器一致，使用 anyhow::Result 作为统一的返回类型
pub use anyhow::Result;

/// 织入层的错误
///
/// 匹配阶段不会产生错误（非法切点只是匹配不到任何成员），
/// 这里的错误都发生在通知执行阶段，属于配置问题，需要尽早暴露。
#[derive(Debug, Error)]
pub enum AopError {
    #[error("Aspect '{aspect}' cannot be resolved from scope '{scope}'")]
    AspectUnresolved { aspect: String, scope: String },

    #[error("Type '{0}' is not an aspect")]
    NotAnAspect(String),

    #[error("Aspect '{aspect}' has no advice method '{method}'")]
    AdviceMethodMissing { aspect: String, method: String },

    #[error("State '{0}' cannot be driven through process(), use returning()")]
    InvalidTransition(String),

    #[error("Expected a {expected} result, got {actual}")]
    ReturningTypeMismatch {
        expected: &'static str,
        actual: &'static str,
    },

    #[error("Invalid pointcut '{expression}': {reason}")]
    InvalidPointcut { expression: String, reason: String },
}

/// 仍被通知持有的原始错误
///
/// 通知可以克隆连接点上的错误引用，此时无法取回所有权，只能共享返回。
#[derive(Debug, Error)]
#[error("{0}")]
pub struct SharedError(pub Arc<anyhow::Error>);

impl SharedError {
    /// 原始错误
    pub fn inner(&self) -> &anyhow::Error {
        &self.0
    }
}
