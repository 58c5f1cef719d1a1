//! ProxyMethod - 安装在实例成员上的织入代理
//!
//! 代理实现与原始成员相同的 [`Invocable`] 接口，每次调用创建新的连接点，
//! 依次驱动 Before → Pointcut → 原始调用 → After → AfterReturning / AfterThrowing。

use crate::advice::AdviceGroup;
use crate::chain::AdvisorChainFactory;
use crate::error::{Result, SharedError};
use crate::joinpoint::{Joinpoint, JoinpointState};
use crate::returning::ReturningType;
use chimera_ioc::{Annotation, Invocable, Output, ParamMeta, Target, TypeMeta, Value};
use std::fmt;
use std::sync::{Arc, Weak};

/// 被代理的成员形态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProxyKind {
    Method,
    Getter,
    Setter,
}

impl fmt::Display for ProxyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProxyKind::Method => write!(f, "method"),
            ProxyKind::Getter => write!(f, "getter"),
            ProxyKind::Setter => write!(f, "setter"),
        }
    }
}

/// 织入代理
pub struct ProxyMethod {
    name: String,
    full_name: String,
    kind: ProxyKind,
    target_type: Arc<TypeMeta>,
    params: Vec<ParamMeta>,
    annotations: Vec<Annotation>,
    original: Arc<dyn Invocable>,
    advices: Arc<AdviceGroup>,
    chain_factory: AdvisorChainFactory,
    prov_joinpoint: Option<Weak<Joinpoint>>,
}

impl ProxyMethod {
    /// 包装一个成员
    ///
    /// 通知分组在此时从注册表取出（不存在时登记一个空分组），
    /// 之后追加到同一连接点的通知对代理同样可见。
    pub fn new(
        name: impl Into<String>,
        kind: ProxyKind,
        target_type: Arc<TypeMeta>,
        original: Arc<dyn Invocable>,
        chain_factory: AdvisorChainFactory,
    ) -> Self {
        let name = name.into();
        let full_name = format!("{}.{}", target_type.name(), name);
        let advisor = chain_factory.advisor();
        let advices = match advisor.get_advices(&full_name) {
            Some(group) => group,
            None => advisor.set_advices(&full_name, Arc::new(AdviceGroup::new())),
        };
        Self {
            name,
            full_name,
            kind,
            target_type,
            params: Vec::new(),
            annotations: Vec::new(),
            original,
            advices,
            chain_factory,
            prov_joinpoint: None,
        }
    }

    pub fn with_params(mut self, params: Vec<ParamMeta>) -> Self {
        self.params = params;
        self
    }

    pub fn with_annotations(mut self, annotations: Vec<Annotation>) -> Self {
        self.annotations = annotations;
        self
    }

    /// 关联构造阶段的连接点，供注解查找使用
    pub fn with_prov_joinpoint(mut self, prov: Weak<Joinpoint>) -> Self {
        self.prov_joinpoint = Some(prov);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn full_name(&self) -> &str {
        &self.full_name
    }

    pub fn kind(&self) -> ProxyKind {
        self.kind
    }

    pub fn advices(&self) -> &Arc<AdviceGroup> {
        &self.advices
    }

    fn joinpoint(&self, target: &Target, args: Vec<Value>) -> Joinpoint {
        let joinpoint = Joinpoint::new(self.name.clone(), Arc::clone(&self.target_type))
            .with_target(Arc::clone(target))
            .with_args(args)
            .with_params(self.params.clone())
            .with_annotations(self.annotations.clone());
        match &self.prov_joinpoint {
            Some(prov) => joinpoint.with_prov_joinpoint(prov.clone()),
            None => joinpoint,
        }
    }
}

impl Invocable for ProxyMethod {
    fn invoke(&self, target: &Target, args: Vec<Value>) -> Result<Output> {
        tracing::trace!("Entering proxied {} '{}'", self.kind, self.full_name);

        let mut chain = self
            .chain_factory
            .create(self.joinpoint(target, args), Arc::clone(&self.advices));
        chain.process(JoinpointState::Before)?;
        chain.process(JoinpointState::Pointcut)?;

        let args = chain.joinpoint().args.clone();
        match self.original.invoke(target, args) {
            Ok(output) => {
                match &output {
                    Output::Sync(value) => chain.joinpoint_mut().set_returning(value.clone()),
                    pending => chain
                        .joinpoint_mut()
                        .set_pending_returning(ReturningType::of(pending)),
                }
                chain.process(JoinpointState::After)?;
                chain.returning(output)
            }
            Err(error) => {
                tracing::debug!("'{}' failed: {}", self.full_name, error);
                let error = Arc::new(error);
                chain.joinpoint_mut().set_throwing(Arc::clone(&error));
                chain.process(JoinpointState::After)?;
                chain.process(JoinpointState::AfterThrowing)?;
                drop(chain);

                Err(match Arc::try_unwrap(error) {
                    Ok(error) => error,
                    Err(shared) => SharedError(shared).into(),
                })
            }
        }
    }
}

impl fmt::Debug for ProxyMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProxyMethod")
            .field("full_name", &self.full_name)
            .field("kind", &self.kind)
            .field("advices", &self.advices)
            .finish()
    }
}
