//! 类型元数据
//!
//! 相当于反射服务：描述一个类型的名称、成员、构造参数、类级注解，
//! 以及附加在类型上的强类型元数据（例如切面声明）。

use crate::invoke::{Invocable, MethodFn, Output, Target, Value};
use crate::error::Result;
use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

/// 构造函数在成员列表中的名称
pub const CONSTRUCTOR: &str = "constructor";

/// 注解（装饰器）元数据
#[derive(Debug, Clone, PartialEq)]
pub struct Annotation {
    /// 注解名称，不含 `@`
    pub name: String,

    /// 注解携带的数据
    pub data: Value,
}

impl Annotation {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into().trim_start_matches('@').to_string(),
            data: Value::Null,
        }
    }

    pub fn with_data(mut self, data: impl Into<Value>) -> Self {
        self.data = data.into();
        self
    }
}

/// 参数描述
#[derive(Debug, Clone, PartialEq)]
pub struct ParamMeta {
    pub name: String,
    pub annotations: Vec<Annotation>,
}

impl ParamMeta {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            annotations: Vec::new(),
        }
    }

    pub fn annotated(mut self, annotation: Annotation) -> Self {
        self.annotations.push(annotation);
        self
    }
}

/// 成员实现
#[derive(Clone)]
pub enum MemberKind {
    /// 普通方法
    Method(Arc<dyn Invocable>),

    /// 属性访问器
    Accessor {
        getter: Option<Arc<dyn Invocable>>,
        setter: Option<Arc<dyn Invocable>>,
    },
}

impl fmt::Debug for MemberKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MemberKind::Method(_) => write!(f, "Method"),
            MemberKind::Accessor { getter, setter } => f
                .debug_struct("Accessor")
                .field("getter", &getter.is_some())
                .field("setter", &setter.is_some())
                .finish(),
        }
    }
}

/// 成员描述
#[derive(Debug, Clone)]
pub struct MemberMeta {
    pub name: String,
    pub kind: MemberKind,
    pub params: Vec<ParamMeta>,
    pub annotations: Vec<Annotation>,
}

impl MemberMeta {
    pub fn is_method(&self) -> bool {
        matches!(self.kind, MemberKind::Method(_))
    }

    pub fn has_annotation(&self, name: &str) -> bool {
        let name = name.trim_start_matches('@');
        self.annotations.iter().any(|a| a.name == name)
    }
}

/// 类型描述
pub struct TypeMeta {
    name: String,
    type_id: TypeId,
    members: Vec<MemberMeta>,
    ctor_params: Vec<ParamMeta>,
    class_annotations: Vec<Annotation>,
    extensions: HashMap<TypeId, Arc<dyn Any + Send + Sync>>,
    non_weavable: bool,
}

impl TypeMeta {
    /// 为 Rust 类型 `T` 创建描述
    pub fn builder<T: Any + Send + Sync>(name: impl Into<String>) -> TypeMetaBuilder<T> {
        TypeMetaBuilder {
            meta: TypeMeta {
                name: name.into(),
                type_id: TypeId::of::<T>(),
                members: Vec::new(),
                ctor_params: Vec::new(),
                class_annotations: Vec::new(),
                extensions: HashMap::new(),
                non_weavable: false,
            },
            _marker: PhantomData,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn type_id(&self) -> TypeId {
        self.type_id
    }

    /// 是否与另一个描述指向同一类型
    pub fn is_same_type(&self, other: &TypeMeta) -> bool {
        self.type_id == other.type_id && self.name == other.name
    }

    /// 自有成员，按声明顺序
    pub fn members(&self) -> &[MemberMeta] {
        &self.members
    }

    pub fn member(&self, name: &str) -> Option<&MemberMeta> {
        self.members.iter().find(|m| m.name == name)
    }

    /// 自有属性名，包含隐式的 `constructor`
    pub fn own_property_names(&self) -> Vec<&str> {
        let mut names = Vec::with_capacity(self.members.len() + 1);
        names.push(CONSTRUCTOR);
        names.extend(self.members.iter().map(|m| m.name.as_str()));
        names
    }

    pub fn ctor_params(&self) -> &[ParamMeta] {
        &self.ctor_params
    }

    pub fn class_annotations(&self) -> &[Annotation] {
        &self.class_annotations
    }

    pub fn has_class_annotation(&self, name: &str) -> bool {
        let name = name.trim_start_matches('@');
        self.class_annotations.iter().any(|a| a.name == name)
    }

    /// 读取附加元数据
    pub fn extension<E: Any + Send + Sync>(&self) -> Option<Arc<E>> {
        self.extensions
            .get(&TypeId::of::<E>())
            .cloned()
            .and_then(|ext| ext.downcast::<E>().ok())
    }

    pub fn has_extension<E: Any + Send + Sync>(&self) -> bool {
        self.extensions.contains_key(&TypeId::of::<E>())
    }

    /// 是否被标记为不参与织入
    pub fn is_non_weavable(&self) -> bool {
        self.non_weavable
    }
}

impl fmt::Debug for TypeMeta {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TypeMeta")
            .field("name", &self.name)
            .field("members", &self.members.iter().map(|m| &m.name).collect::<Vec<_>>())
            .field("ctor_params", &self.ctor_params)
            .field("class_annotations", &self.class_annotations)
            .field("non_weavable", &self.non_weavable)
            .finish()
    }
}

/// [`TypeMeta`] 构建器
pub struct TypeMetaBuilder<T> {
    meta: TypeMeta,
    _marker: PhantomData<fn() -> T>,
}

impl<T: Any + Send + Sync> TypeMetaBuilder<T> {
    /// 声明一个方法
    pub fn method<F>(self, name: &str, params: &[&str], func: F) -> Self
    where
        F: Fn(&T, Vec<Value>) -> Result<Output> + Send + Sync + 'static,
    {
        self.member(MemberMeta {
            name: name.to_string(),
            kind: MemberKind::Method(Arc::new(MethodFn::typed(func))),
            params: params.iter().map(|p| ParamMeta::new(*p)).collect(),
            annotations: Vec::new(),
        })
    }

    /// 声明一个只读属性
    pub fn getter<F>(self, name: &str, func: F) -> Self
    where
        F: Fn(&T) -> Result<Value> + Send + Sync + 'static,
    {
        let getter = MethodFn::typed(move |this: &T, _args: Vec<Value>| func(this).map(Output::Sync));
        self.accessor(name, Some(Arc::new(getter)), None)
    }

    /// 为已有属性添加 setter，属性不存在时创建
    pub fn setter<F>(self, name: &str, func: F) -> Self
    where
        F: Fn(&T, Value) -> Result<()> + Send + Sync + 'static,
    {
        let setter = MethodFn::typed(move |this: &T, args: Vec<Value>| {
            let value = args.into_iter().next().unwrap_or(Value::Null);
            func(this, value).map(|_| Output::unit())
        });
        self.accessor(name, None, Some(Arc::new(setter)))
    }

    fn accessor(
        mut self,
        name: &str,
        getter: Option<Arc<dyn Invocable>>,
        setter: Option<Arc<dyn Invocable>>,
    ) -> Self {
        if let Some(existing) = self.meta.members.iter_mut().find(|m| m.name == name) {
            if let MemberKind::Accessor {
                getter: current_getter,
                setter: current_setter,
            } = &mut existing.kind
            {
                if getter.is_some() {
                    *current_getter = getter;
                }
                if setter.is_some() {
                    *current_setter = setter;
                }
                return self;
            }
        }
        self.member(MemberMeta {
            name: name.to_string(),
            kind: MemberKind::Accessor { getter, setter },
            params: Vec::new(),
            annotations: Vec::new(),
        })
    }

    /// 直接添加成员描述，同名成员会被替换
    pub fn member(mut self, member: MemberMeta) -> Self {
        match self.meta.members.iter_mut().find(|m| m.name == member.name) {
            Some(existing) => *existing = member,
            None => self.meta.members.push(member),
        }
        self
    }

    /// 为成员添加注解
    pub fn annotate(mut self, member: &str, annotation: Annotation) -> Self {
        if let Some(existing) = self.meta.members.iter_mut().find(|m| m.name == member) {
            existing.annotations.push(annotation);
        } else {
            tracing::warn!(
                "Annotation '{}' ignored: '{}' has no member '{}'",
                annotation.name,
                self.meta.name,
                member
            );
        }
        self
    }

    /// 为成员的某个参数添加注解
    pub fn annotate_param(mut self, member: &str, param: &str, annotation: Annotation) -> Self {
        if let Some(p) = self
            .meta
            .members
            .iter_mut()
            .find(|m| m.name == member)
            .and_then(|m| m.params.iter_mut().find(|p| p.name == param))
        {
            p.annotations.push(annotation);
        }
        self
    }

    /// 构造函数参数名（通过构造注入绑定的属性）
    pub fn ctor_params(mut self, params: &[&str]) -> Self {
        self.meta.ctor_params = params.iter().map(|p| ParamMeta::new(*p)).collect();
        self
    }

    pub fn class_annotation(mut self, annotation: Annotation) -> Self {
        self.meta.class_annotations.push(annotation);
        self
    }

    /// 附加强类型元数据，同类型的旧值会被覆盖
    pub fn extension<E: Any + Send + Sync>(mut self, extension: E) -> Self {
        self.meta
            .extensions
            .insert(TypeId::of::<E>(), Arc::new(extension));
        self
    }

    /// 标记为不参与织入
    pub fn non_weavable(mut self) -> Self {
        self.meta.non_weavable = true;
        self
    }

    pub fn build(self) -> Arc<TypeMeta> {
        Arc::new(self.meta)
    }
}

/// 便于在测试与示例中直接把实例转换为调用接收者
pub fn target_of<T: Any + Send + Sync>(value: T) -> Target {
    Arc::new(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct Account {
        balance: parking_lot::Mutex<i64>,
    }

    #[derive(Debug, PartialEq)]
    struct Audited(&'static str);

    fn account_type() -> Arc<TypeMeta> {
        TypeMeta::builder::<Account>("Account")
            .method("deposit", &["amount"], |this: &Account, args| {
                let amount = args.first().and_then(Value::as_i64).unwrap_or(0);
                let mut balance = this.balance.lock();
                *balance += amount;
                Ok(Output::value(*balance))
            })
            .getter("balance", |this: &Account| Ok(json!(*this.balance.lock())))
            .setter("balance", |this: &Account, value| {
                *this.balance.lock() = value.as_i64().unwrap_or(0);
                Ok(())
            })
            .annotate("deposit", Annotation::new("@Transactional"))
            .annotate_param("deposit", "amount", Annotation::new("Positive"))
            .ctor_params(&["ledger"])
            .class_annotation(Annotation::new("Service").with_data(json!({"name": "accounts"})))
            .extension(Audited("finance"))
            .build()
    }

    #[test]
    fn test_builder_collects_members_in_order() {
        let meta = account_type();
        assert_eq!(meta.name(), "Account");
        assert_eq!(TypeMeta::type_id(&meta), TypeId::of::<Account>());
        assert_eq!(meta.own_property_names(), vec![CONSTRUCTOR, "deposit", "balance"]);

        let balance = meta.member("balance").unwrap();
        match &balance.kind {
            MemberKind::Accessor { getter, setter } => {
                assert!(getter.is_some());
                assert!(setter.is_some());
            }
            other => panic!("unexpected member kind {:?}", other),
        }
    }

    #[test]
    fn test_annotations_strip_at_sign() {
        let meta = account_type();
        let deposit = meta.member("deposit").unwrap();
        assert!(deposit.has_annotation("Transactional"));
        assert!(deposit.has_annotation("@Transactional"));
        assert_eq!(deposit.params[0].annotations[0].name, "Positive");
        assert!(meta.has_class_annotation("Service"));
        assert!(!meta.has_class_annotation("Controller"));
    }

    #[test]
    fn test_extension_lookup() {
        let meta = account_type();
        assert_eq!(meta.extension::<Audited>().as_deref(), Some(&Audited("finance")));
        assert!(meta.extension::<String>().is_none());
        assert!(!meta.is_non_weavable());
    }

    #[test]
    fn test_member_invocation() {
        let meta = account_type();
        let target = target_of(Account {
            balance: parking_lot::Mutex::new(10),
        });

        let MemberKind::Method(deposit) = &meta.member("deposit").unwrap().kind else {
            panic!("deposit should be a method");
        };
        let output = deposit.invoke(&target, vec![json!(5)]).unwrap();
        assert_eq!(output.into_sync(), Some(json!(15)));
    }
}
