//! 切面（Aspect）定义
//!
//! 切面是横切关注点的模块化。切面声明 [`AspectMeta`] 作为扩展元数据挂在切面类型的
//! [`TypeMeta`] 上，包含类级限制、通知声明以及通知方法的实现。

use crate::advice::{AdviceRegistration, AdviceType};
use crate::chain::AdviceContext;
use crate::error::Result;
use chimera_ioc::{IocError, Output, Target, TypeMeta};
use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

/// 通知方法
///
/// 第一个参数是切面实例，返回值只在返回阶段被使用。
pub type AdviceFn = Arc<dyn Fn(&Target, &mut AdviceContext) -> Result<Option<Output>> + Send + Sync>;

/// 切面声明
pub struct AspectMeta {
    within: Vec<String>,
    annotation: Option<String>,
    advices: Vec<AdviceRegistration>,
    methods: HashMap<String, AdviceFn>,
}

impl AspectMeta {
    /// 为切面类型 `A` 创建声明
    pub fn builder<A: Any + Send + Sync>() -> AspectMetaBuilder<A> {
        AspectMetaBuilder {
            meta: AspectMeta {
                within: Vec::new(),
                annotation: None,
                advices: Vec::new(),
                methods: HashMap::new(),
            },
            _marker: PhantomData,
        }
    }

    /// 只作用于这些类型
    pub fn within(&self) -> &[String] {
        &self.within
    }

    /// 只作用于带有该类注解的类型
    pub fn annotation(&self) -> Option<&str> {
        self.annotation.as_deref()
    }

    /// 通知声明，按声明顺序
    pub fn advices(&self) -> &[AdviceRegistration] {
        &self.advices
    }

    pub fn method(&self, name: &str) -> Option<AdviceFn> {
        self.methods.get(name).cloned()
    }
}

impl fmt::Debug for AspectMeta {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AspectMeta")
            .field("within", &self.within)
            .field("annotation", &self.annotation)
            .field("advices", &self.advices)
            .finish()
    }
}

/// [`AspectMeta`] 构建器
///
/// # 示例
///
/// ```ignore
/// let aspect = AspectMeta::builder::<LogAspect>()
///     .before("execution(UserService.*)", "log_call", |this: &LogAspect, ctx| {
///         this.record(ctx.joinpoint().signature());
///         Ok(None)
///     })
///     .build();
/// ```
pub struct AspectMetaBuilder<A> {
    meta: AspectMeta,
    _marker: PhantomData<fn() -> A>,
}

impl<A: Any + Send + Sync> AspectMetaBuilder<A> {
    /// 限制作用的目标类型
    pub fn within(mut self, types: &[&str]) -> Self {
        self.meta.within = types.iter().map(|t| t.to_string()).collect();
        self
    }

    /// 限制目标类型必须带有该类注解
    pub fn annotated_with(mut self, annotation: &str) -> Self {
        self.meta.annotation = Some(annotation.trim_start_matches('@').to_string());
        self
    }

    /// 声明通知，并提供通知方法的实现
    ///
    /// 多条声明可以共用同一个方法名，后提供的实现覆盖先前的。
    pub fn advice<F>(mut self, registration: AdviceRegistration, func: F) -> Self
    where
        F: Fn(&A, &mut AdviceContext) -> Result<Option<Output>> + Send + Sync + 'static,
    {
        let type_name = std::any::type_name::<A>();
        let method: AdviceFn = Arc::new(move |target: &Target, ctx: &mut AdviceContext| {
            let this = target
                .downcast_ref::<A>()
                .ok_or(IocError::TargetMismatch { expected: type_name })?;
            func(this, ctx)
        });
        self.meta.methods.insert(registration.property_key.clone(), method);
        self.meta.advices.push(registration);
        self
    }

    /// 只追加声明，方法实现由 [`advice`](Self::advice) 提供
    pub fn declare(mut self, registration: AdviceRegistration) -> Self {
        self.meta.advices.push(registration);
        self
    }

    pub fn before<F>(self, pointcut: &str, method: &str, func: F) -> Self
    where
        F: Fn(&A, &mut AdviceContext) -> Result<Option<Output>> + Send + Sync + 'static,
    {
        self.advice(AdviceRegistration::new(AdviceType::Before, pointcut, method), func)
    }

    pub fn after<F>(self, pointcut: &str, method: &str, func: F) -> Self
    where
        F: Fn(&A, &mut AdviceContext) -> Result<Option<Output>> + Send + Sync + 'static,
    {
        self.advice(AdviceRegistration::new(AdviceType::After, pointcut, method), func)
    }

    pub fn around<F>(self, pointcut: &str, method: &str, func: F) -> Self
    where
        F: Fn(&A, &mut AdviceContext) -> Result<Option<Output>> + Send + Sync + 'static,
    {
        self.advice(AdviceRegistration::new(AdviceType::Around, pointcut, method), func)
    }

    /// 在进入成员前、Before 通知之后执行
    pub fn pointcut<F>(self, pointcut: &str, method: &str, func: F) -> Self
    where
        F: Fn(&A, &mut AdviceContext) -> Result<Option<Output>> + Send + Sync + 'static,
    {
        self.advice(AdviceRegistration::new(AdviceType::Pointcut, pointcut, method), func)
    }

    pub fn after_returning<F>(self, pointcut: &str, method: &str, func: F) -> Self
    where
        F: Fn(&A, &mut AdviceContext) -> Result<Option<Output>> + Send + Sync + 'static,
    {
        self.advice(AdviceRegistration::new(AdviceType::AfterReturning, pointcut, method), func)
    }

    pub fn after_throwing<F>(self, pointcut: &str, method: &str, func: F) -> Self
    where
        F: Fn(&A, &mut AdviceContext) -> Result<Option<Output>> + Send + Sync + 'static,
    {
        self.advice(AdviceRegistration::new(AdviceType::AfterThrowing, pointcut, method), func)
    }

    pub fn build(self) -> AspectMeta {
        self.meta
    }
}

/// 在类型描述上读取切面声明
pub trait AspectTypeExt {
    fn aspect(&self) -> Option<Arc<AspectMeta>>;

    /// 是否是切面；被标记为不参与织入的类型永远不是切面
    fn is_aspect(&self) -> bool;
}

impl AspectTypeExt for TypeMeta {
    fn aspect(&self) -> Option<Arc<AspectMeta>> {
        if self.is_non_weavable() {
            return None;
        }
        self.extension::<AspectMeta>()
    }

    fn is_aspect(&self) -> bool {
        !self.is_non_weavable() && self.has_extension::<AspectMeta>()
    }
}

/// 切面注册器
///
/// 用于 inventory 自动收集切面，再由 [`Weaver::load_registered_aspects`](crate::Weaver::load_registered_aspects)
/// 注册到某个注入器中。
pub struct AspectRegistration {
    /// 切面名称
    pub name: &'static str,

    /// 切面类型描述（带有 [`AspectMeta`] 扩展）
    pub type_meta: fn() -> Arc<TypeMeta>,

    /// 创建切面实例的函数
    pub creator: fn() -> Target,
}

impl AspectRegistration {
    /// 创建新的切面注册器
    pub const fn new(name: &'static str, type_meta: fn() -> Arc<TypeMeta>, creator: fn() -> Target) -> Self {
        Self {
            name,
            type_meta,
            creator,
        }
    }

    /// 创建切面实例
    pub fn create_instance(&self) -> Target {
        (self.creator)()
    }
}

// 使用 inventory 收集所有切面注册器
inventory::collect!(AspectRegistration);

/// 获取所有注册的切面注册器
pub fn get_all_aspect_registrations() -> impl Iterator<Item = &'static AspectRegistration> {
    inventory::iter::<AspectRegistration>()
}
