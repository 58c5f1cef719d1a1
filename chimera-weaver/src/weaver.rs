//! Weaver - 把织入接入容器的构造流程
//!
//! 作为 [`InstancePostProcessor`] 安装到注入器上，提供四个钩子：
//!
//! 1. 类型注册时登记切面
//! 2. 构造前把已登记的切面与目标类型匹配
//! 3. 构造前后执行针对 `constructor` 的通知
//! 4. 构造后为实例成员安装 [`ProxyMethod`]

use crate::advice::AdviceGroup;
use crate::advisor::Advisor;
use crate::aspect::get_all_aspect_registrations;
use crate::chain::AdvisorChainFactory;
use crate::config::AopConfig;
use crate::error::{AopError, Result};
use crate::joinpoint::{Joinpoint, JoinpointState};
use crate::matcher::AdviceMatcher;
use crate::proxy::{ProxyKind, ProxyMethod};
use anyhow::Context;
use chimera_ioc::{
    Container, Environment, Injector, Instance, InstancePostProcessor, Invocable, MemberKind, MemberMeta, Scope,
    Target, TypeMeta, Value, CONSTRUCTOR,
};
use parking_lot::Mutex;
use std::any::TypeId;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Weak};

/// 织入器
pub struct Weaver {
    advisor: Arc<Advisor>,
    matcher: AdviceMatcher,
    config: AopConfig,

    /// 每个目标类型已经匹配过的切面数量
    matched: Mutex<HashMap<TypeId, usize>>,
}

impl Weaver {
    pub fn new(config: AopConfig) -> Self {
        Self {
            advisor: Arc::new(Advisor::new()),
            matcher: AdviceMatcher::new(config.pointcut_grammar),
            config,
            matched: Mutex::new(HashMap::new()),
        }
    }

    /// 使用 `[aop]` 配置段创建
    pub fn from_environment(env: &Environment) -> Result<Self> {
        Ok(Self::new(AopConfig::from_environment(env)?))
    }

    pub fn advisor(&self) -> &Arc<Advisor> {
        &self.advisor
    }

    pub fn matcher(&self) -> &AdviceMatcher {
        &self.matcher
    }

    pub fn config(&self) -> &AopConfig {
        &self.config
    }

    /// 安装到注入器（及其所有子作用域）
    pub fn install(self, injector: &Injector) -> Result<Arc<Self>> {
        let weaver = Arc::new(self);
        injector.add_post_processor(Arc::clone(&weaver) as Arc<dyn InstancePostProcessor>)?;
        tracing::info!(
            "AOP weaver installed on scope '{}' (enabled: {}, grammar: {:?})",
            injector.name(),
            weaver.config.enabled,
            weaver.config.pointcut_grammar
        );
        Ok(weaver)
    }

    /// 把 inventory 收集到的切面注册为单例
    pub fn load_registered_aspects(injector: &Injector) -> Result<usize> {
        let mut loaded = 0;
        for registration in get_all_aspect_registrations() {
            tracing::debug!("  ├─ Loading aspect: {}", registration.name);
            let creator = registration.creator;
            injector
                .register_factory(
                    (registration.type_meta)(),
                    Scope::Singleton,
                    Arc::new(move |_: &Injector| -> Result<Target> { Ok(creator()) }),
                )
                .with_context(|| format!("Failed to load aspect '{}'", registration.name))?;
            loaded += 1;
        }
        tracing::info!("Loaded {} aspect(s) into scope '{}'", loaded, injector.name());
        Ok(loaded)
    }

    fn is_weavable(&self, type_meta: &TypeMeta) -> bool {
        self.config.enabled && !type_meta.is_non_weavable()
    }

    /// 登记切面，非切面类型或重复登记返回 false
    pub fn register_aspect(&self, type_meta: &Arc<TypeMeta>, scope: &Arc<dyn Container>) -> bool {
        if !self.is_weavable(type_meta) {
            return false;
        }
        self.advisor.add(type_meta, scope)
    }

    /// 用尚未匹配过的切面匹配目标类型，返回新增的通知数
    pub fn match_pointcuts(&self, target_type: &Arc<TypeMeta>, scope: &Arc<dyn Container>) -> usize {
        if !self.is_weavable(target_type) {
            return 0;
        }

        let aspects = self.advisor.aspects();
        let start = {
            let mut matched = self.matched.lock();
            let seen = matched.entry(target_type.type_id()).or_insert(0);
            std::mem::replace(seen, aspects.len())
        };
        if start >= aspects.len() {
            return 0;
        }

        let mut added = 0;
        for (aspect_type, aspect) in &aspects[start..] {
            let matches = self
                .matcher
                .match_aspect(aspect_type, aspect, target_type, &**scope);
            added += self.advisor.register_matches(matches);
        }
        if added > 0 {
            tracing::debug!("Matched {} advice for '{}'", added, target_type.name());
        }
        added
    }

    /// 为实例成员安装代理，返回安装的代理数
    ///
    /// 访问器的 getter 与 setter 分别包装；`constructor` 不会被代理。
    pub fn bind_method_pointcuts(&self, instance: &Arc<Instance>, scope: &Arc<dyn Container>) -> Result<usize> {
        let type_meta = instance.type_meta();
        if !self.is_weavable(type_meta) {
            return Ok(0);
        }
        if !self.config.proxy_unadvised_members && !self.advisor.has_registered_advices(type_meta) {
            return Ok(0);
        }

        let factory = AdvisorChainFactory::new(Arc::clone(&self.advisor), scope);
        let prov = instance.attachment::<Joinpoint>().map(|joinpoint| Arc::downgrade(&joinpoint));
        let mut bound = 0;

        for member in type_meta.members() {
            if member.name == CONSTRUCTOR || !self.should_proxy(type_meta, &member.name) {
                continue;
            }
            let proxy = |kind: ProxyKind, original: Arc<dyn Invocable>| -> Arc<dyn Invocable> {
                Arc::new(self.proxy(member, kind, type_meta, original, &factory, prov.as_ref()))
            };

            match instance.member(&member.name) {
                Some(MemberKind::Method(original)) => {
                    instance.replace_method(&member.name, proxy(ProxyKind::Method, original))?;
                    bound += 1;
                }
                Some(MemberKind::Accessor { getter, setter }) => {
                    let getter = getter.map(|g| proxy(ProxyKind::Getter, g));
                    let setter = setter.map(|s| proxy(ProxyKind::Setter, s));
                    bound += usize::from(getter.is_some()) + usize::from(setter.is_some());
                    instance.replace_accessor(&member.name, getter, setter)?;
                }
                None => {}
            }
        }

        tracing::debug!(
            "Bound {} proxy member(s) on '{}' in scope '{}'",
            bound,
            type_meta.name(),
            scope.scope_name()
        );
        Ok(bound)
    }

    fn should_proxy(&self, type_meta: &TypeMeta, member: &str) -> bool {
        if self.config.proxy_unadvised_members {
            return true;
        }
        self.advisor
            .get_advices(&format!("{}.{}", type_meta.name(), member))
            .map_or(false, |group| !group.is_empty())
    }

    fn proxy(
        &self,
        member: &MemberMeta,
        kind: ProxyKind,
        type_meta: &Arc<TypeMeta>,
        original: Arc<dyn Invocable>,
        factory: &AdvisorChainFactory,
        prov: Option<&Weak<Joinpoint>>,
    ) -> ProxyMethod {
        let proxy = ProxyMethod::new(member.name.clone(), kind, Arc::clone(type_meta), original, factory.clone())
            .with_params(member.params.clone())
            .with_annotations(member.annotations.clone());
        match prov {
            Some(prov) => proxy.with_prov_joinpoint(prov.clone()),
            None => proxy,
        }
    }

    /// 执行针对构造函数的 Before / After 通知
    ///
    /// 构造连接点以类注解作为自身注解，构造参数作为参数描述；
    /// After 阶段的返回值是空值。
    pub fn invoke_constructor_advices(
        &self,
        state: JoinpointState,
        type_meta: &Arc<TypeMeta>,
        target: Option<Target>,
        scope: &Arc<dyn Container>,
    ) -> Result<Arc<Joinpoint>> {
        if !matches!(state, JoinpointState::Before | JoinpointState::After) {
            return Err(AopError::InvalidTransition(state.to_string()).into());
        }

        let mut joinpoint = Joinpoint::new(CONSTRUCTOR, Arc::clone(type_meta))
            .with_params(type_meta.ctor_params().to_vec())
            .with_annotations(type_meta.class_annotations().to_vec());
        if let Some(target) = target {
            joinpoint = joinpoint.with_target(target);
        }
        if state == JoinpointState::After {
            joinpoint.set_returning(Value::Null);
        }

        let advices = self
            .advisor
            .get_advices(&joinpoint.full_name)
            .unwrap_or_else(|| Arc::new(AdviceGroup::new()));
        let mut chain = AdvisorChainFactory::new(Arc::clone(&self.advisor), scope).create(joinpoint, advices);
        chain.process(state)?;
        Ok(Arc::new(chain.into_joinpoint()))
    }
}

impl Default for Weaver {
    fn default() -> Self {
        Self::new(AopConfig::default())
    }
}

impl fmt::Debug for Weaver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Weaver")
            .field("config", &self.config)
            .field("advisor", &self.advisor)
            .finish()
    }
}

impl InstancePostProcessor for Weaver {
    fn name(&self) -> &str {
        "Weaver"
    }

    fn order(&self) -> i32 {
        2000
    }

    fn on_register(&self, type_meta: &Arc<TypeMeta>, scope: &Arc<dyn Container>) -> Result<()> {
        self.register_aspect(type_meta, scope);
        Ok(())
    }

    fn post_process_before_construction(&self, type_meta: &Arc<TypeMeta>, scope: &Arc<dyn Container>) -> Result<()> {
        if !self.is_weavable(type_meta) {
            return Ok(());
        }
        self.match_pointcuts(type_meta, scope);
        self.invoke_constructor_advices(JoinpointState::Before, type_meta, None, scope)?;
        Ok(())
    }

    fn post_process_after_construction(&self, instance: &Arc<Instance>, scope: &Arc<dyn Container>) -> Result<()> {
        let type_meta = instance.type_meta();
        if !self.is_weavable(type_meta) {
            tracing::trace!("'{}' is not weavable, skipping", type_meta.name());
            return Ok(());
        }

        let joinpoint = self.invoke_constructor_advices(
            JoinpointState::After,
            type_meta,
            Some(Arc::clone(instance.target())),
            scope,
        )?;
        instance.attach(joinpoint);
        self.bind_method_pointcuts(instance, scope)?;
        Ok(())
    }
}
