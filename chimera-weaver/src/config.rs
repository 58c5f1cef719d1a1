//! 织入配置
//!
//! 对应配置文件中的 `[aop]` 段：
//!
//! ```toml
//! [aop]
//! enabled = true
//! pointcut_grammar = "left-scan"   # 或 "precedence"
//! proxy_unadvised_members = true
//! ```

use crate::error::Result;
use crate::pointcut::PointcutGrammar;
use chimera_ioc::Environment;
use serde::Deserialize;

/// AOP 配置
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct AopConfig {
    /// 关闭后织入器的所有钩子都不做任何事
    pub enabled: bool,

    /// 切点表达式混合使用 `&&` / `||` 时的解析方式
    pub pointcut_grammar: PointcutGrammar,

    /// 没有匹配到通知的成员也安装代理，之后登记的通知才能生效
    pub proxy_unadvised_members: bool,
}

impl Default for AopConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            pointcut_grammar: PointcutGrammar::default(),
            proxy_unadvised_members: true,
        }
    }
}

impl AopConfig {
    /// 配置段名称
    pub const SECTION: &'static str = "aop";

    pub fn new() -> Self {
        Self::default()
    }

    /// 从配置环境读取 `[aop]` 段
    pub fn from_environment(env: &Environment) -> Result<Self> {
        env.bind(Self::SECTION)
    }

    pub fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    pub fn pointcut_grammar(mut self, grammar: PointcutGrammar) -> Self {
        self.pointcut_grammar = grammar;
        self
    }

    pub fn proxy_unadvised_members(mut self, proxy: bool) -> Self {
        self.proxy_unadvised_members = proxy;
        self
    }
}
