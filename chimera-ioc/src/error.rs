use thiserror::Error;

/// 统一的错误处理类型
///
/// 与框架其余部分一致，使用 anyhow::Result 作为统一的返回类型，
/// 具体的错误种类通过 [`IocError`] 表达，调用方可以使用 `downcast_ref` 识别。
///
/// # 示例
///
/// ```rust,ignore
/// let err = injector.resolve("Missing").unwrap_err();
/// assert!(matches!(
///     err.downcast_ref::<IocError>(),
///     Some(IocError::TypeNotRegistered { .. })
/// ));
/// ```
pub use anyhow::Result;

/// 容器层面的错误
#[derive(Debug, Error)]
pub enum IocError {
    #[error("Type '{type_name}' is not registered in scope '{scope}'")]
    TypeNotRegistered { type_name: String, scope: String },

    #[error("Type '{0}' is already registered")]
    DuplicateType(String),

    #[error("Member '{member}' not found on type '{type_name}'")]
    MemberNotFound { type_name: String, member: String },

    #[error("Member '{member}' of type '{type_name}' cannot be {operation}")]
    UnsupportedAccess {
        type_name: String,
        member: String,
        operation: &'static str,
    },

    #[error("Receiver is not a '{expected}'")]
    TargetMismatch { expected: &'static str },

    #[error("Scope '{0}' has already been dropped")]
    ScopeClosed(String),

    #[error("Circular dependency detected: {0}")]
    CircularDependency(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Failed to initialize logging: {0}")]
    LoggingInitFailed(String),
}
