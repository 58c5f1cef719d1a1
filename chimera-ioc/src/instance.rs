//! 受容器管理的实例
//!
//! [`Instance`] 把原始对象与其成员表放在一起，成员表中的调用实现可以被替换
//! （织入层正是通过替换来安装代理）。

use crate::error::{IocError, Result};
use crate::invoke::{Invocable, Output, Target, Value};
use crate::metadata::{MemberKind, TypeMeta};
use parking_lot::RwLock;
use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// 实例
pub struct Instance {
    target: Target,
    type_meta: Arc<TypeMeta>,
    members: RwLock<HashMap<String, MemberKind>>,
    attachments: RwLock<HashMap<TypeId, Arc<dyn Any + Send + Sync>>>,
}

impl Instance {
    /// 以类型描述中的成员实现初始化
    pub fn new(target: Target, type_meta: Arc<TypeMeta>) -> Self {
        let members = type_meta
            .members()
            .iter()
            .map(|m| (m.name.clone(), m.kind.clone()))
            .collect();
        Self {
            target,
            type_meta,
            members: RwLock::new(members),
            attachments: RwLock::new(HashMap::new()),
        }
    }

    pub fn target(&self) -> &Target {
        &self.target
    }

    pub fn type_meta(&self) -> &Arc<TypeMeta> {
        &self.type_meta
    }

    /// 以具体类型访问原始对象
    pub fn downcast<T: Any + Send + Sync>(&self) -> Option<Arc<T>> {
        self.target.clone().downcast::<T>().ok()
    }

    /// 当前的成员实现
    pub fn member(&self, name: &str) -> Option<MemberKind> {
        self.members.read().get(name).cloned()
    }

    /// 调用方法
    pub fn invoke(&self, name: &str, args: Vec<Value>) -> Result<Output> {
        match self.member(name) {
            Some(MemberKind::Method(method)) => method.invoke(&self.target, args),
            Some(MemberKind::Accessor { .. }) => Err(self.unsupported(name, "invoked").into()),
            None => Err(self.not_found(name).into()),
        }
    }

    /// 读取属性
    pub fn get(&self, name: &str) -> Result<Output> {
        match self.member(name) {
            Some(MemberKind::Accessor {
                getter: Some(getter),
                ..
            }) => getter.invoke(&self.target, Vec::new()),
            Some(_) => Err(self.unsupported(name, "read").into()),
            None => Err(self.not_found(name).into()),
        }
    }

    /// 写入属性
    pub fn set(&self, name: &str, value: Value) -> Result<()> {
        match self.member(name) {
            Some(MemberKind::Accessor {
                setter: Some(setter),
                ..
            }) => setter.invoke(&self.target, vec![value]).map(|_| ()),
            Some(_) => Err(self.unsupported(name, "written").into()),
            None => Err(self.not_found(name).into()),
        }
    }

    /// 替换方法实现
    pub fn replace_method(&self, name: &str, method: Arc<dyn Invocable>) -> Result<()> {
        let mut members = self.members.write();
        match members.get_mut(name) {
            Some(kind @ MemberKind::Method(_)) => {
                *kind = MemberKind::Method(method);
                Ok(())
            }
            Some(_) => Err(self.unsupported(name, "replaced by a method").into()),
            None => Err(self.not_found(name).into()),
        }
    }

    /// 替换访问器实现，`None` 表示保留原实现
    pub fn replace_accessor(
        &self,
        name: &str,
        getter: Option<Arc<dyn Invocable>>,
        setter: Option<Arc<dyn Invocable>>,
    ) -> Result<()> {
        let mut members = self.members.write();
        match members.get_mut(name) {
            Some(MemberKind::Accessor {
                getter: current_getter,
                setter: current_setter,
            }) => {
                if getter.is_some() {
                    *current_getter = getter;
                }
                if setter.is_some() {
                    *current_setter = setter;
                }
                Ok(())
            }
            Some(_) => Err(self.unsupported(name, "replaced by an accessor").into()),
            None => Err(self.not_found(name).into()),
        }
    }

    /// 附加任意数据到实例上（例如构造阶段的连接点）
    pub fn attach<A: Any + Send + Sync>(&self, value: Arc<A>) {
        self.attachments.write().insert(TypeId::of::<A>(), value);
    }

    pub fn attachment<A: Any + Send + Sync>(&self) -> Option<Arc<A>> {
        self.attachments
            .read()
            .get(&TypeId::of::<A>())
            .cloned()
            .and_then(|value| value.downcast::<A>().ok())
    }

    fn not_found(&self, member: &str) -> IocError {
        IocError::MemberNotFound {
            type_name: self.type_meta.name().to_string(),
            member: member.to_string(),
        }
    }

    fn unsupported(&self, member: &str, operation: &'static str) -> IocError {
        IocError::UnsupportedAccess {
            type_name: self.type_meta.name().to_string(),
            member: member.to_string(),
            operation,
        }
    }
}

impl fmt::Debug for Instance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Instance")
            .field("type", &self.type_meta.name())
            .finish()
    }
}
