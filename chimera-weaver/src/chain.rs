//! AdvisorChain - 驱动连接点的状态迁移
//!
//! 每次迁移先执行 Around 通知，再执行同阶段的通知。每条通知拿到连接点的快照，
//! 只有 Before / Pointcut 阶段的 `args` 与返回阶段的 `returning` 会被回写。

use crate::advice::{AdviceGroup, AdviceType, Advicer};
use crate::advisor::Advisor;
use crate::aspect::AspectTypeExt;
use crate::error::{AopError, Result};
use crate::error_info::ErrorInfo;
use crate::joinpoint::{Joinpoint, JoinpointState};
use crate::returning::{proceeding_for, AdviceAction, ReturningType};
use chimera_ioc::{Annotation, Container, Instance, IocError, Output, Value};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Weak};

/// 注入到通知中的值
#[derive(Clone)]
pub enum Injected {
    Value(Value),
    Error(Arc<anyhow::Error>),
    Annotations(Vec<Annotation>),
}

impl fmt::Debug for Injected {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Injected::Value(value) => f.debug_tuple("Value").field(value).finish(),
            Injected::Error(error) => f.debug_tuple("Error").field(&error.to_string()).finish(),
            Injected::Annotations(annotations) => f.debug_tuple("Annotations").field(annotations).finish(),
        }
    }
}

/// 通知方法的调用上下文
///
/// 持有连接点快照和按声明绑定的参数。对快照的修改只在调用链允许时回写。
pub struct AdviceContext {
    joinpoint: Joinpoint,
    bindings: HashMap<String, Injected>,
    scope: Option<Arc<dyn Container>>,
}

impl AdviceContext {
    /// 不绑定任何参数、也没有作用域的上下文
    pub fn detached(joinpoint: Joinpoint) -> Self {
        Self {
            joinpoint,
            bindings: HashMap::new(),
            scope: None,
        }
    }

    pub fn joinpoint(&self) -> &Joinpoint {
        &self.joinpoint
    }

    pub fn joinpoint_mut(&mut self) -> &mut Joinpoint {
        &mut self.joinpoint
    }

    pub fn binding(&self, name: &str) -> Option<&Injected> {
        self.bindings.get(name)
    }

    /// 绑定的值（`args` 或 `returning`）
    pub fn value(&self, name: &str) -> Option<&Value> {
        match self.bindings.get(name) {
            Some(Injected::Value(value)) => Some(value),
            _ => None,
        }
    }

    /// 绑定的异常（`throwing`）
    pub fn error(&self, name: &str) -> Option<&anyhow::Error> {
        match self.bindings.get(name) {
            Some(Injected::Error(error)) => Some(error.as_ref()),
            _ => None,
        }
    }

    pub fn error_info(&self, name: &str) -> Option<ErrorInfo> {
        self.error(name).map(ErrorInfo::from_anyhow)
    }

    /// 绑定的注解列表
    pub fn annotations(&self, name: &str) -> Option<&[Annotation]> {
        match self.bindings.get(name) {
            Some(Injected::Annotations(annotations)) => Some(annotations),
            _ => None,
        }
    }

    /// 从切面所属的作用域解析依赖
    pub fn resolve(&self, type_name: &str) -> Result<Arc<Instance>> {
        match &self.scope {
            Some(scope) => scope.resolve(type_name),
            None => Err(IocError::TypeNotRegistered {
                type_name: type_name.to_string(),
                scope: "<detached>".to_string(),
            }
            .into()),
        }
    }

    pub fn scope(&self) -> Option<&Arc<dyn Container>> {
        self.scope.as_ref()
    }

    fn bind(&mut self, name: &Option<String>, value: Option<Injected>) {
        if let (Some(name), Some(value)) = (name, value) {
            self.bindings.insert(name.clone(), value);
        }
    }
}

/// 在切面所属的作用域中执行一条通知
///
/// 返回通知修改后的快照以及通知自己的结果。
pub fn invoke_advice(
    advisor: &Advisor,
    fallback: &Arc<dyn Container>,
    advicer: &Advicer,
    joinpoint: Joinpoint,
) -> Result<(Joinpoint, Option<Output>)> {
    let aspect_type = &advicer.aspect_type;
    let advice = &advicer.advice;

    let aspect = aspect_type
        .aspect()
        .ok_or_else(|| AopError::NotAnAspect(aspect_type.name().to_string()))?;
    let method = aspect
        .method(&advice.property_key)
        .ok_or_else(|| AopError::AdviceMethodMissing {
            aspect: aspect_type.name().to_string(),
            method: advice.property_key.clone(),
        })?;

    let scope = advisor.get_scope(aspect_type, fallback);
    let instance = scope.resolve(aspect_type.name()).map_err(|e| {
        e.context(AopError::AspectUnresolved {
            aspect: aspect_type.name().to_string(),
            scope: scope.scope_name().to_string(),
        })
    })?;

    tracing::trace!(
        "Invoking {} advice {} at '{}' ({})",
        advice.advice_name,
        advicer.signature(),
        joinpoint.full_name,
        joinpoint.state
    );

    let args = Value::Array(joinpoint.args.clone());
    let returning = joinpoint
        .returning_value()
        .or_else(|| joinpoint.returning())
        .cloned()
        .map(Injected::Value);
    let throwing = joinpoint.throwing_shared().map(Injected::Error);
    let annotations = advice.annotation_arg_name.as_ref().and_then(|_| {
        let visible = joinpoint.resolve_annotations();
        if visible.is_empty() {
            return None;
        }
        let filtered = match &advice.annotation_name {
            Some(name) => visible.into_iter().filter(|a| &a.name == name).collect(),
            None => visible,
        };
        Some(Injected::Annotations(filtered))
    });

    let mut ctx = AdviceContext {
        joinpoint,
        bindings: HashMap::new(),
        scope: Some(Arc::clone(&scope)),
    };
    ctx.bind(&advice.args, Some(Injected::Value(args)));
    ctx.bind(&advice.returning, returning);
    ctx.bind(&advice.throwing, throwing);
    ctx.bind(&advice.annotation_arg_name, annotations);

    let result = method(instance.target(), &mut ctx)?;
    Ok((ctx.joinpoint, result))
}

/// 通知链工厂
///
/// 持有注册表和当前构造所在的作用域（弱引用，避免作用域与其实例之间形成环）。
#[derive(Clone)]
pub struct AdvisorChainFactory {
    advisor: Arc<Advisor>,
    scope: Weak<dyn Container>,
    scope_name: String,
}

impl AdvisorChainFactory {
    pub fn new(advisor: Arc<Advisor>, scope: &Arc<dyn Container>) -> Self {
        Self {
            advisor,
            scope: Arc::downgrade(scope),
            scope_name: scope.scope_name().to_string(),
        }
    }

    pub fn advisor(&self) -> &Arc<Advisor> {
        &self.advisor
    }

    /// 为一次调用创建通知链
    pub fn create(&self, joinpoint: Joinpoint, advices: Arc<AdviceGroup>) -> AdvisorChain {
        AdvisorChain {
            factory: self.clone(),
            joinpoint,
            advices,
        }
    }

    fn scope(&self) -> Result<Arc<dyn Container>> {
        self.scope
            .upgrade()
            .ok_or_else(|| IocError::ScopeClosed(self.scope_name.clone()).into())
    }
}

/// 一次调用的通知链，持有权威的连接点
pub struct AdvisorChain {
    factory: AdvisorChainFactory,
    joinpoint: Joinpoint,
    advices: Arc<AdviceGroup>,
}

impl AdvisorChain {
    pub fn joinpoint(&self) -> &Joinpoint {
        &self.joinpoint
    }

    pub fn joinpoint_mut(&mut self) -> &mut Joinpoint {
        &mut self.joinpoint
    }

    pub fn into_joinpoint(self) -> Joinpoint {
        self.joinpoint
    }

    /// 迁移到 `state` 并执行该阶段的通知
    ///
    /// AfterReturning 需要经过返回值推进，只能通过 [`returning`](Self::returning) 驱动。
    pub fn process(&mut self, state: JoinpointState) -> Result<()> {
        let advice_type = match state {
            JoinpointState::Before => AdviceType::Before,
            JoinpointState::Pointcut => AdviceType::Pointcut,
            JoinpointState::After => AdviceType::After,
            JoinpointState::AfterThrowing => AdviceType::AfterThrowing,
            JoinpointState::AfterReturning => {
                return Err(AopError::InvalidTransition(state.to_string()).into());
            }
        };

        self.joinpoint.state = state;
        let around = self.advices.get(AdviceType::Around);
        let same = self.advices.get(advice_type);
        if around.is_empty() && same.is_empty() {
            return Ok(());
        }

        let scope = self.factory.scope()?;
        for advicer in around.iter().chain(same.iter()) {
            let snapshot = self.joinpoint.snapshot(advicer);
            let (snapshot, result) = invoke_advice(&self.factory.advisor, &scope, advicer, snapshot)?;

            if matches!(state, JoinpointState::Before | JoinpointState::Pointcut) {
                self.joinpoint.args = snapshot.args;
            }
            if let Some(output) = result {
                if !output.is_sync() {
                    tracing::warn!(
                        "Advice {} returned a {} result during {}, it will not be awaited",
                        advicer.signature(),
                        ReturningType::of(&output),
                        state
                    );
                }
            }
        }
        Ok(())
    }

    /// 执行返回阶段：Around 与 AfterReturning 通知按返回值形态推进
    pub fn returning(self, output: Output) -> Result<Output> {
        let AdvisorChain {
            factory,
            mut joinpoint,
            advices,
        } = self;
        joinpoint.state = JoinpointState::AfterReturning;

        let actions: Vec<AdviceAction> = advices
            .get(AdviceType::Around)
            .into_iter()
            .chain(advices.get(AdviceType::AfterReturning))
            .map(|advicer| returning_action(factory.clone(), advicer))
            .collect();
        if actions.is_empty() {
            return Ok(output);
        }

        let returning_type = ReturningType::of(&output);
        tracing::trace!(
            "Proceeding {} advice over {} result of '{}'",
            actions.len(),
            returning_type,
            joinpoint.full_name
        );
        proceeding_for(returning_type).proceed(joinpoint, output, actions)
    }
}

fn returning_action(factory: AdvisorChainFactory, advicer: Advicer) -> AdviceAction {
    Arc::new(move |joinpoint: &mut Joinpoint| {
        let scope = factory.scope()?;
        let snapshot = joinpoint.snapshot(&advicer);
        let (snapshot, result) = invoke_advice(&factory.advisor, &scope, &advicer, snapshot)?;
        if let Some(value) = snapshot.returning() {
            joinpoint.set_returning(value.clone());
        }
        Ok(result)
    })
}

impl fmt::Debug for AdvisorChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AdvisorChain")
            .field("joinpoint", &self.joinpoint)
            .field("advices", &self.advices)
            .finish()
    }
}
