//! 连接点（Joinpoint）定义
//!
//! 连接点表示一次被拦截的调用。它在代理方法被调用时创建，
//! 每条通知拿到的都是一份独立的快照，只有调用链显式回写的字段才会影响后续通知。

use crate::advice::Advicer;
use crate::returning::ReturningType;
use chimera_ioc::{Annotation, ParamMeta, Target, TypeMeta, Value};
use std::fmt;
use std::sync::{Arc, Weak};
use std::time::Instant;

/// 连接点所处的阶段
///
/// `Before → Pointcut → After → {AfterThrowing | AfterReturning}`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JoinpointState {
    Before,
    Pointcut,
    After,
    AfterReturning,
    AfterThrowing,
}

impl JoinpointState {
    /// 是否已经越过目标方法调用
    pub fn is_after(&self) -> bool {
        matches!(
            self,
            JoinpointState::After | JoinpointState::AfterReturning | JoinpointState::AfterThrowing
        )
    }
}

impl fmt::Display for JoinpointState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// 返回值：同步值，或尚未完成的异步结果
#[derive(Debug, Clone)]
enum Returning {
    Value(Value),
    Pending(ReturningType),
}

/// 连接点信息
#[derive(Clone)]
pub struct Joinpoint {
    /// 方法或属性名
    pub name: String,

    /// `类型名.成员名`
    pub full_name: String,

    pub state: JoinpointState,

    /// 调用接收者，构造前的连接点没有接收者
    pub target: Option<Target>,

    pub target_type: Arc<TypeMeta>,

    /// 调用参数
    pub args: Vec<Value>,

    /// 声明的参数
    pub params: Vec<ParamMeta>,

    /// 成员上的注解
    pub annotations: Vec<Annotation>,

    /// 正在执行的通知
    pub advicer: Option<Advicer>,

    /// 上级连接点（例如方法连接点对应的构造连接点），不持有所有权
    pub prov_joinpoint: Option<Weak<Joinpoint>>,

    /// 调用时间戳
    pub timestamp: Instant,

    returning: Option<Returning>,
    returning_value: Option<Value>,
    throwing: Option<Arc<anyhow::Error>>,
}

impl Joinpoint {
    /// 创建新的连接点
    pub fn new(name: impl Into<String>, target_type: Arc<TypeMeta>) -> Self {
        let name = name.into();
        Self {
            full_name: format!("{}.{}", target_type.name(), name),
            name,
            state: JoinpointState::Before,
            target: None,
            target_type,
            args: Vec::new(),
            params: Vec::new(),
            annotations: Vec::new(),
            advicer: None,
            prov_joinpoint: None,
            timestamp: Instant::now(),
            returning: None,
            returning_value: None,
            throwing: None,
        }
    }

    pub fn with_target(mut self, target: Target) -> Self {
        self.target = Some(target);
        self
    }

    pub fn with_args(mut self, args: Vec<Value>) -> Self {
        self.args = args;
        self
    }

    pub fn with_params(mut self, params: Vec<ParamMeta>) -> Self {
        self.params = params;
        self
    }

    pub fn with_annotations(mut self, annotations: Vec<Annotation>) -> Self {
        self.annotations = annotations;
        self
    }

    pub fn with_prov_joinpoint(mut self, prov: Weak<Joinpoint>) -> Self {
        self.prov_joinpoint = Some(prov);
        self
    }

    /// 获取完整的方法签名
    pub fn signature(&self) -> &str {
        &self.full_name
    }

    /// 以具体类型访问调用接收者
    pub fn target_as<T: 'static>(&self) -> Option<&T> {
        self.target.as_ref()?.downcast_ref::<T>()
    }

    /// 按名称读取参数
    pub fn arg(&self, name: &str) -> Option<&Value> {
        let index = self.params.iter().position(|p| p.name == name)?;
        self.args.get(index)
    }

    /// 同步返回值
    pub fn returning(&self) -> Option<&Value> {
        match &self.returning {
            Some(Returning::Value(value)) => Some(value),
            _ => None,
        }
    }

    /// 返回值的形态，未返回时为 None
    pub fn returning_type(&self) -> Option<ReturningType> {
        match &self.returning {
            Some(Returning::Value(_)) => Some(ReturningType::Sync),
            Some(Returning::Pending(returning_type)) => Some(*returning_type),
            None => None,
        }
    }

    pub fn has_returning(&self) -> bool {
        self.returning.is_some()
    }

    /// 设置返回值，同时清除异常
    pub fn set_returning(&mut self, value: Value) {
        self.returning = Some(Returning::Value(value));
        self.throwing = None;
    }

    /// 目标方法返回了尚未完成的异步结果
    pub fn set_pending_returning(&mut self, returning_type: ReturningType) {
        self.returning = Some(Returning::Pending(returning_type));
        self.throwing = None;
    }

    /// 清除返回值
    pub fn clear_returning(&mut self) {
        self.returning = None;
    }

    /// 返回值在经过通知链时的当前值（异步结果完成后才有）
    pub fn returning_value(&self) -> Option<&Value> {
        self.returning_value.as_ref()
    }

    pub(crate) fn set_returning_value(&mut self, value: Value) {
        self.returning_value = Some(value);
    }

    pub fn throwing(&self) -> Option<&anyhow::Error> {
        self.throwing.as_deref()
    }

    pub fn throwing_shared(&self) -> Option<Arc<anyhow::Error>> {
        self.throwing.clone()
    }

    /// 设置异常，同时清除返回值
    pub fn set_throwing(&mut self, error: Arc<anyhow::Error>) {
        self.throwing = Some(error);
        self.returning = None;
        self.returning_value = None;
    }

    /// After 之后的阶段恰好有返回值或异常之一，之前两者都没有
    pub fn is_consistent(&self) -> bool {
        if self.state.is_after() {
            self.returning.is_some() != self.throwing.is_some()
        } else {
            self.returning.is_none() && self.throwing.is_none()
        }
    }

    /// 当前可见的注解
    ///
    /// 自身没有注解时沿 `prov_joinpoint` 向上查找。
    pub fn resolve_annotations(&self) -> Vec<Annotation> {
        if !self.annotations.is_empty() {
            return self.annotations.clone();
        }
        let mut prov = self.prov_joinpoint.as_ref().and_then(Weak::upgrade);
        while let Some(joinpoint) = prov {
            if !joinpoint.annotations.is_empty() {
                return joinpoint.annotations.clone();
            }
            prov = joinpoint.prov_joinpoint.as_ref().and_then(Weak::upgrade);
        }
        Vec::new()
    }

    /// 为某条通知生成快照
    pub fn snapshot(&self, advicer: &Advicer) -> Joinpoint {
        let mut snapshot = self.clone();
        snapshot.advicer = Some(advicer.clone());
        snapshot
    }
}

impl fmt::Debug for Joinpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Joinpoint")
            .field("full_name", &self.full_name)
            .field("state", &self.state)
            .field("args", &self.args)
            .field("returning", &self.returning)
            .field("throwing", &self.throwing.as_ref().map(|e| e.to_string()))
            .field("advicer", &self.advicer)
            .field("timestamp", &self.timestamp)
            .finish()
    }
}

impl fmt::Display for Joinpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.signature())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::advice::{AdviceRegistration, AdviceType};
    use serde_json::json;

    struct OrderService;

    fn order_type() -> Arc<TypeMeta> {
        TypeMeta::builder::<OrderService>("OrderService").build()
    }

    #[test]
    fn test_new_joinpoint_signature() {
        let joinpoint = Joinpoint::new("place", order_type())
            .with_args(vec![json!(3)])
            .with_params(vec![ParamMeta::new("quantity")]);

        assert_eq!(joinpoint.to_string(), "OrderService.place");
        assert_eq!(joinpoint.state, JoinpointState::Before);
        assert_eq!(joinpoint.arg("quantity"), Some(&json!(3)));
        assert!(joinpoint.arg("missing").is_none());
        assert!(joinpoint.is_consistent());
    }

    #[test]
    fn test_returning_and_throwing_are_exclusive() {
        let mut joinpoint = Joinpoint::new("place", order_type());
        joinpoint.state = JoinpointState::After;
        joinpoint.set_returning(json!("ok"));
        assert!(joinpoint.is_consistent());

        joinpoint.set_throwing(Arc::new(anyhow::anyhow!("out of stock")));
        assert!(joinpoint.returning().is_none());
        assert_eq!(joinpoint.throwing().unwrap().to_string(), "out of stock");
        assert!(joinpoint.is_consistent());

        joinpoint.set_pending_returning(ReturningType::Future);
        assert!(joinpoint.throwing().is_none());
        assert!(joinpoint.returning().is_none());
        assert_eq!(joinpoint.returning_type(), Some(ReturningType::Future));
        assert!(joinpoint.is_consistent());
    }

    #[test]
    fn test_snapshot_is_isolated() {
        let aspect = TypeMeta::builder::<()>("LogAspect").build();
        let advicer = Advicer::new(
            AdviceRegistration::new(AdviceType::Before, "execution(*)", "log"),
            aspect,
        );
        let joinpoint = Joinpoint::new("place", order_type()).with_args(vec![json!(1)]);

        let mut snapshot = joinpoint.snapshot(&advicer);
        snapshot.args[0] = json!(2);

        assert_eq!(joinpoint.args, vec![json!(1)]);
        assert!(joinpoint.advicer.is_none());
        assert_eq!(snapshot.advicer.unwrap().signature(), "LogAspect.log");
    }

    #[test]
    fn test_annotations_resolve_through_prov_joinpoint() {
        let constructor = Arc::new(
            Joinpoint::new("constructor", order_type()).with_annotations(vec![Annotation::new("Audited")]),
        );
        let method = Joinpoint::new("place", order_type()).with_prov_joinpoint(Arc::downgrade(&constructor));
        assert_eq!(method.resolve_annotations(), vec![Annotation::new("Audited")]);

        let own = Joinpoint::new("place", order_type())
            .with_annotations(vec![Annotation::new("Cached")])
            .with_prov_joinpoint(Arc::downgrade(&constructor));
        assert_eq!(own.resolve_annotations(), vec![Annotation::new("Cached")]);

        drop(constructor);
        assert!(method.resolve_annotations().is_empty());
    }
}
