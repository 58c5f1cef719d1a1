//! Advisor - 通知注册表与切面目录
//!
//! 按连接点完整名（`类型名.成员名`）存放六类通知，
//! 并记录每个切面类型由哪个作用域负责实例化。

use crate::advice::{AdviceGroup, Advicer};
use crate::aspect::{AspectMeta, AspectTypeExt};
use crate::matcher::MatchedAdvice;
use chimera_ioc::{Container, TypeMeta};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Weak};

struct AspectEntry {
    type_meta: Arc<TypeMeta>,
    aspect: Arc<AspectMeta>,
    scope: Weak<dyn Container>,
}

/// 通知注册表
///
/// 只追加不删除。由织入器创建并显式传递，不存在全局实例。
#[derive(Default)]
pub struct Advisor {
    advices: RwLock<HashMap<String, Arc<AdviceGroup>>>,
    aspects: RwLock<Vec<AspectEntry>>,
}

impl Advisor {
    pub fn new() -> Self {
        Self::default()
    }

    /// 登记切面类型及其所属作用域，重复登记无效果
    pub fn add(&self, aspect_type: &Arc<TypeMeta>, scope: &Arc<dyn Container>) -> bool {
        let Some(aspect) = aspect_type.aspect() else {
            tracing::trace!("'{}' is not an aspect, skipping", aspect_type.name());
            return false;
        };

        let mut aspects = self.aspects.write();
        if aspects.iter().any(|entry| entry.type_meta.is_same_type(aspect_type)) {
            return false;
        }
        tracing::debug!(
            "Registering aspect '{}' ({} advice) owned by scope '{}'",
            aspect_type.name(),
            aspect.advices().len(),
            scope.scope_name()
        );
        aspects.push(AspectEntry {
            type_meta: Arc::clone(aspect_type),
            aspect,
            scope: Arc::downgrade(scope),
        });
        true
    }

    pub fn is_registered(&self, aspect_type: &TypeMeta) -> bool {
        self.aspects
            .read()
            .iter()
            .any(|entry| entry.type_meta.is_same_type(aspect_type))
    }

    /// 已登记的切面，按登记顺序
    pub fn aspects(&self) -> Vec<(Arc<TypeMeta>, Arc<AspectMeta>)> {
        self.aspects
            .read()
            .iter()
            .map(|entry| (Arc::clone(&entry.type_meta), Arc::clone(&entry.aspect)))
            .collect()
    }

    /// 设置连接点的通知分组，已存在时保留原分组并返回它
    pub fn set_advices(&self, key: &str, group: Arc<AdviceGroup>) -> Arc<AdviceGroup> {
        Arc::clone(self.advices.write().entry(key.to_string()).or_insert(group))
    }

    pub fn get_advices(&self, key: &str) -> Option<Arc<AdviceGroup>> {
        self.advices.read().get(key).cloned()
    }

    /// 向连接点追加一条通知，相同声明只保留一份
    pub fn add_advice(&self, key: &str, advicer: Advicer) -> bool {
        let group = match self.get_advices(key) {
            Some(group) => group,
            None => self.set_advices(key, Arc::new(AdviceGroup::new())),
        };
        group.push(advicer)
    }

    /// 写入匹配结果，返回新增的通知数
    pub fn register_matches(&self, matches: Vec<MatchedAdvice>) -> usize {
        matches
            .into_iter()
            .filter(|m| self.add_advice(&m.full_name, m.advicer.clone()))
            .count()
    }

    /// 目标类型是否已经有成员登记了通知
    pub fn has_registered_advices(&self, target_type: &TypeMeta) -> bool {
        let advices = self.advices.read();
        target_type.own_property_names().into_iter().any(|member| {
            advices
                .get(&format!("{}.{}", target_type.name(), member))
                .map_or(false, |group| !group.is_empty())
        })
    }

    /// 切面所属的作用域，未登记（或作用域已释放）时返回 `fallback`
    pub fn get_scope(&self, aspect_type: &TypeMeta, fallback: &Arc<dyn Container>) -> Arc<dyn Container> {
        self.aspects
            .read()
            .iter()
            .find(|entry| entry.type_meta.is_same_type(aspect_type))
            .and_then(|entry| entry.scope.upgrade())
            .unwrap_or_else(|| Arc::clone(fallback))
    }

    /// 已登记通知的连接点数量
    pub fn len(&self) -> usize {
        self.advices.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.advices.read().is_empty()
    }
}

impl fmt::Debug for Advisor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Advisor")
            .field(
                "aspects",
                &self
                    .aspects
                    .read()
                    .iter()
                    .map(|entry| entry.type_meta.name().to_string())
                    .collect::<Vec<_>>(),
            )
            .field("joinpoints", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::advice::{AdviceRegistration, AdviceType};
    use chimera_ioc::{Injector, Output};

    struct AuditAspect;
    struct PaymentService;

    fn audit_type() -> Arc<TypeMeta> {
        TypeMeta::builder::<AuditAspect>("AuditAspect")
            .extension(
                AspectMeta::builder::<AuditAspect>()
                    .before("execution(PaymentService.*)", "audit", |_, _| Ok(None))
                    .build(),
            )
            .build()
    }

    fn payment_type() -> Arc<TypeMeta> {
        TypeMeta::builder::<PaymentService>("PaymentService")
            .method("charge", &["amount"], |_, _| Ok(Output::unit()))
            .build()
    }

    fn advicer(pointcut: &str) -> Advicer {
        Advicer::new(AdviceRegistration::new(AdviceType::Before, pointcut, "audit"), audit_type())
    }

    #[test]
    fn test_add_is_idempotent_and_ignores_plain_types() {
        let advisor = Advisor::new();
        let scope = Injector::new("root").as_container().unwrap();

        assert!(advisor.add(&audit_type(), &scope));
        assert!(!advisor.add(&audit_type(), &scope));
        assert!(!advisor.add(&payment_type(), &scope));
        assert_eq!(advisor.aspects().len(), 1);
        assert!(advisor.is_registered(&audit_type()));
    }

    #[test]
    fn test_non_weavable_aspect_is_not_registered() {
        let advisor = Advisor::new();
        let scope = Injector::new("root").as_container().unwrap();
        let opted_out = TypeMeta::builder::<AuditAspect>("AuditAspect")
            .extension(AspectMeta::builder::<AuditAspect>().build())
            .non_weavable()
            .build();
        assert!(!advisor.add(&opted_out, &scope));
        assert!(advisor.aspects().is_empty());
    }

    #[test]
    fn test_set_advices_keeps_first_group() {
        let advisor = Advisor::new();
        assert!(advisor.get_advices("PaymentService.charge").is_none());

        let first = advisor.set_advices("PaymentService.charge", Arc::new(AdviceGroup::new()));
        let second = advisor.set_advices("PaymentService.charge", Arc::new(AdviceGroup::new()));
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[test]
    fn test_add_advice_deduplicates() {
        let advisor = Advisor::new();
        assert!(!advisor.has_registered_advices(&payment_type()));

        assert!(advisor.add_advice("PaymentService.charge", advicer("execution(PaymentService.*)")));
        assert!(!advisor.add_advice("PaymentService.charge", advicer("execution(PaymentService.*)")));

        let group = advisor.get_advices("PaymentService.charge").unwrap();
        assert_eq!(group.count(AdviceType::Before), 1);
        assert!(advisor.has_registered_advices(&payment_type()));
    }

    #[test]
    fn test_get_scope_prefers_owner() {
        let advisor = Advisor::new();
        let root = Injector::new("root");
        let child = root.child("request");
        let owner = child.as_container().unwrap();
        let fallback = root.as_container().unwrap();

        assert_eq!(advisor.get_scope(&audit_type(), &fallback).scope_name(), "root");
        advisor.add(&audit_type(), &owner);
        assert_eq!(advisor.get_scope(&audit_type(), &fallback).scope_name(), "request");

        drop(owner);
        drop(child);
        assert_eq!(advisor.get_scope(&audit_type(), &fallback).scope_name(), "root");
    }
}
