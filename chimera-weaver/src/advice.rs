//! 通知（Advice）定义
//!
//! 一条通知声明描述了"在哪些连接点、以何种时机、调用切面的哪个方法"。
//! 匹配成功后，声明与切面类型一起组成 [`Advicer`]，按连接点分组存放在 [`AdviceGroup`] 中。

use chimera_ioc::TypeMeta;
use parking_lot::RwLock;
use regex::Regex;
use std::fmt;
use std::sync::Arc;

/// 通知类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AdviceType {
    /// 前置通知
    Before,
    /// 切点通知（紧挨着目标方法执行之前）
    Pointcut,
    /// 后置通知（无论成功还是失败都执行）
    After,
    /// 环绕通知（在每个阶段先于同阶段通知执行）
    Around,
    /// 返回后通知（成功返回时执行）
    AfterReturning,
    /// 异常通知（抛出异常时执行）
    AfterThrowing,
}

impl AdviceType {
    pub const ALL: [AdviceType; 6] = [
        AdviceType::Before,
        AdviceType::Pointcut,
        AdviceType::After,
        AdviceType::Around,
        AdviceType::AfterReturning,
        AdviceType::AfterThrowing,
    ];
}

impl fmt::Display for AdviceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// 切点来源：表达式字符串或正则表达式
#[derive(Clone)]
pub enum PointcutSource {
    Expression(String),
    Regex(Regex),
}

impl PointcutSource {
    /// 原始文本，用于去重和自匹配
    pub fn as_str(&self) -> &str {
        match self {
            PointcutSource::Expression(expression) => expression,
            PointcutSource::Regex(regex) => regex.as_str(),
        }
    }
}

impl PartialEq for PointcutSource {
    fn eq(&self, other: &Self) -> bool {
        matches!(
            (self, other),
            (PointcutSource::Expression(_), PointcutSource::Expression(_))
                | (PointcutSource::Regex(_), PointcutSource::Regex(_))
        ) && self.as_str() == other.as_str()
    }
}

impl fmt::Debug for PointcutSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PointcutSource::Expression(expression) => write!(f, "{:?}", expression),
            PointcutSource::Regex(regex) => write!(f, "/{}/", regex.as_str()),
        }
    }
}

impl From<&str> for PointcutSource {
    fn from(expression: &str) -> Self {
        PointcutSource::Expression(expression.to_string())
    }
}

impl From<String> for PointcutSource {
    fn from(expression: String) -> Self {
        PointcutSource::Expression(expression)
    }
}

impl From<Regex> for PointcutSource {
    fn from(regex: Regex) -> Self {
        PointcutSource::Regex(regex)
    }
}

/// 一条通知声明
///
/// 创建后不再修改。`args` / `returning` / `throwing` / `annotation_arg_name`
/// 是注入到通知方法中的参数名。
#[derive(Debug, Clone, PartialEq)]
pub struct AdviceRegistration {
    /// 通知类型
    pub advice_name: AdviceType,

    /// 切点
    pub pointcut: PointcutSource,

    /// 切面上的通知方法名
    pub property_key: String,

    pub args: Option<String>,
    pub returning: Option<String>,
    pub throwing: Option<String>,
    pub annotation_arg_name: Option<String>,

    /// 只注入该名称的注解
    pub annotation_name: Option<String>,
}

impl AdviceRegistration {
    pub fn new(
        advice_name: AdviceType,
        pointcut: impl Into<PointcutSource>,
        property_key: impl Into<String>,
    ) -> Self {
        Self {
            advice_name,
            pointcut: pointcut.into(),
            property_key: property_key.into(),
            args: None,
            returning: None,
            throwing: None,
            annotation_arg_name: None,
            annotation_name: None,
        }
    }

    pub fn bind_args(mut self, name: impl Into<String>) -> Self {
        self.args = Some(name.into());
        self
    }

    pub fn bind_returning(mut self, name: impl Into<String>) -> Self {
        self.returning = Some(name.into());
        self
    }

    pub fn bind_throwing(mut self, name: impl Into<String>) -> Self {
        self.throwing = Some(name.into());
        self
    }

    /// 注入连接点上可见的注解，`filter` 为空时注入全部
    pub fn bind_annotations(mut self, name: impl Into<String>, filter: Option<&str>) -> Self {
        self.annotation_arg_name = Some(name.into());
        self.annotation_name = filter.map(|f| f.trim_start_matches('@').to_string());
        self
    }

    /// `(advice_name, pointcut, property_key)` 是否相同
    pub fn same_declaration(&self, other: &AdviceRegistration) -> bool {
        self.advice_name == other.advice_name
            && self.pointcut == other.pointcut
            && self.property_key == other.property_key
    }
}

/// 匹配成功的通知：声明加上所属切面类型
#[derive(Clone)]
pub struct Advicer {
    pub advice: AdviceRegistration,
    pub aspect_type: Arc<TypeMeta>,
}

impl Advicer {
    pub fn new(advice: AdviceRegistration, aspect_type: Arc<TypeMeta>) -> Self {
        Self { advice, aspect_type }
    }

    pub fn advice_name(&self) -> AdviceType {
        self.advice.advice_name
    }

    /// `切面.方法`，用于日志
    pub fn signature(&self) -> String {
        format!("{}.{}", self.aspect_type.name(), self.advice.property_key)
    }

    fn is_duplicate_of(&self, other: &Advicer) -> bool {
        self.advice.same_declaration(&other.advice) && self.aspect_type.is_same_type(&other.aspect_type)
    }
}

impl fmt::Debug for Advicer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Advicer")
            .field("advice_name", &self.advice.advice_name)
            .field("pointcut", &self.advice.pointcut)
            .field("method", &self.signature())
            .finish()
    }
}

#[derive(Default)]
struct AdviceLists {
    before: Vec<Advicer>,
    pointcut: Vec<Advicer>,
    after: Vec<Advicer>,
    around: Vec<Advicer>,
    after_returning: Vec<Advicer>,
    after_throwing: Vec<Advicer>,
}

impl AdviceLists {
    fn list(&self, advice_type: AdviceType) -> &Vec<Advicer> {
        match advice_type {
            AdviceType::Before => &self.before,
            AdviceType::Pointcut => &self.pointcut,
            AdviceType::After => &self.after,
            AdviceType::Around => &self.around,
            AdviceType::AfterReturning => &self.after_returning,
            AdviceType::AfterThrowing => &self.after_throwing,
        }
    }

    fn list_mut(&mut self, advice_type: AdviceType) -> &mut Vec<Advicer> {
        match advice_type {
            AdviceType::Before => &mut self.before,
            AdviceType::Pointcut => &mut self.pointcut,
            AdviceType::After => &mut self.after,
            AdviceType::Around => &mut self.around,
            AdviceType::AfterReturning => &mut self.after_returning,
            AdviceType::AfterThrowing => &mut self.after_throwing,
        }
    }
}

/// 一个连接点上按类型分组的通知
///
/// 代理在构造时持有分组的引用，之后追加的通知对已安装的代理同样可见。
#[derive(Default)]
pub struct AdviceGroup {
    lists: RwLock<AdviceLists>,
}

impl AdviceGroup {
    pub fn new() -> Self {
        Self::default()
    }

    /// 追加通知，相同声明只保留一份
    pub fn push(&self, advicer: Advicer) -> bool {
        let mut lists = self.lists.write();
        let list = lists.list_mut(advicer.advice_name());
        if list.iter().any(|existing| existing.is_duplicate_of(&advicer)) {
            return false;
        }
        list.push(advicer);
        true
    }

    /// 某一类型的通知，按注册顺序
    pub fn get(&self, advice_type: AdviceType) -> Vec<Advicer> {
        self.lists.read().list(advice_type).clone()
    }

    pub fn count(&self, advice_type: AdviceType) -> usize {
        self.lists.read().list(advice_type).len()
    }

    pub fn len(&self) -> usize {
        let lists = self.lists.read();
        AdviceType::ALL.iter().map(|t| lists.list(*t).len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl fmt::Debug for AdviceGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let lists = self.lists.read();
        let mut debug = f.debug_struct("AdviceGroup");
        for advice_type in AdviceType::ALL {
            let names: Vec<String> = lists.list(advice_type).iter().map(Advicer::signature).collect();
            debug.field(&advice_type.to_string(), &names);
        }
        debug.finish()
    }
}
