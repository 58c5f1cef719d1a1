//! AdviceMatcher - 把切面的通知声明与目标类型的成员进行匹配

use crate::advice::{Advicer, PointcutSource};
use crate::aspect::AspectMeta;
use crate::pointcut::{MatchContext, PointcutExpression, PointcutGrammar};
use chimera_ioc::{Container, TypeMeta};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

/// 一条匹配结果
#[derive(Debug, Clone)]
pub struct MatchedAdvice {
    /// 成员名
    pub name: String,

    /// `类型名.成员名`
    pub full_name: String,

    pub advicer: Advicer,
}

/// 通知匹配器
///
/// 编译后的切点按表达式文本缓存。
pub struct AdviceMatcher {
    grammar: PointcutGrammar,
    cache: RwLock<HashMap<String, Arc<PointcutExpression>>>,
}

impl AdviceMatcher {
    pub fn new(grammar: PointcutGrammar) -> Self {
        Self {
            grammar,
            cache: RwLock::new(HashMap::new()),
        }
    }

    pub fn grammar(&self) -> PointcutGrammar {
        self.grammar
    }

    /// 将一个切面的所有通知与目标类型匹配
    pub fn match_aspect(
        &self,
        aspect_type: &Arc<TypeMeta>,
        aspect: &AspectMeta,
        target_type: &TypeMeta,
        scope: &dyn Container,
    ) -> Vec<MatchedAdvice> {
        if target_type.is_non_weavable() {
            return Vec::new();
        }
        if !aspect.within().is_empty() && !aspect.within().iter().any(|t| t == target_type.name()) {
            tracing::trace!(
                "'{}' is outside the scope of aspect '{}'",
                target_type.name(),
                aspect_type.name()
            );
            return Vec::new();
        }
        if let Some(annotation) = aspect.annotation() {
            if !target_type.has_class_annotation(annotation) {
                tracing::trace!(
                    "'{}' lacks @{} required by aspect '{}'",
                    target_type.name(),
                    annotation,
                    aspect_type.name()
                );
                return Vec::new();
            }
        }

        let self_match = aspect_type.is_same_type(target_type);
        let mut matched = Vec::new();
        for member in candidate_members(target_type) {
            let full_name = format!("{}.{}", target_type.name(), member);
            let ctx = MatchContext {
                member: &member,
                full_name: &full_name,
                target_type,
                scope,
            };

            for advice in aspect.advices() {
                let hit = if self_match {
                    advice.pointcut.as_str().starts_with(member.as_str()) && advice.property_key != member
                } else {
                    self.compile(&advice.pointcut).matches(&ctx)
                };
                if hit {
                    tracing::debug!(
                        "{} advice {}.{} matched '{}'",
                        advice.advice_name,
                        aspect_type.name(),
                        advice.property_key,
                        full_name
                    );
                    matched.push(MatchedAdvice {
                        name: member.clone(),
                        full_name: full_name.clone(),
                        advicer: Advicer::new(advice.clone(), Arc::clone(aspect_type)),
                    });
                }
            }
        }
        matched
    }

    /// 编译切点，按表达式文本缓存
    pub fn compile(&self, source: &PointcutSource) -> Arc<PointcutExpression> {
        let expression = match source {
            PointcutSource::Regex(regex) => return Arc::new(PointcutExpression::Regex(regex.clone())),
            PointcutSource::Expression(expression) => expression,
        };

        if let Some(compiled) = self.cache.read().get(expression) {
            return Arc::clone(compiled);
        }
        let compiled = Arc::new(PointcutExpression::parse(expression, self.grammar));
        tracing::trace!("Compiled pointcut '{}' into {:?}", expression, compiled);
        self.cache
            .write()
            .entry(expression.clone())
            .or_insert(compiled)
            .clone()
    }

    pub fn cached(&self) -> usize {
        self.cache.read().len()
    }
}

impl Default for AdviceMatcher {
    fn default() -> Self {
        Self::new(PointcutGrammar::default())
    }
}

/// 候选成员：自有成员（含 `constructor`）加上只通过构造注入的属性
fn candidate_members(target_type: &TypeMeta) -> Vec<String> {
    let mut names: Vec<String> = target_type
        .own_property_names()
        .into_iter()
        .map(str::to_string)
        .collect();
    for param in target_type.ctor_params() {
        if !names.contains(&param.name) {
            names.push(param.name.clone());
        }
    }
    names
}
