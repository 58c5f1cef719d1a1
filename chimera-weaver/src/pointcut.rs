//! 切点（Pointcut）表达式系统
//!
//! 表达式先被解析为 [`PointcutExpression`] 树，再针对
//! `(成员名, 完整名, 目标类型, 作用域)` 求值。支持的原子：
//!
//! - `execution(pattern)`：`*` / `*.*` 匹配所有非切面类型；`*` 匹配一段标识符，
//!   `**` 匹配任意多段以 `.` 或 `/` 分隔的标识符；只锚定结尾，裸标识符永远不匹配
//! - `@annotation(Name)`：成员带有该注解，且目标不是切面
//! - `@within(A, B)`：目标类型名在列表中
//! - `@target(ident)`：标识符在作用域中解析到目标类型
//! - 不含以上函数语法的表达式整体作为正则，对完整名求值
//!
//! 原子之间用 `&&`、`||`、`!` 与括号组合。非法表达式不会报错，只是什么都不匹配。

use crate::aspect::AspectTypeExt;
use crate::error::AopError;
use chimera_ioc::{Container, TypeMeta};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;
use std::fmt;

static BARE_IDENTIFIER: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\w+$").expect("valid identifier regex"));

const FUNCTIONS: [&str; 4] = ["execution(", "@annotation(", "@within(", "@target("];

/// `&&` 与 `||` 混用时的结合方式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PointcutGrammar {
    /// 从左到右扫描第一个运算符进行拆分：两种运算符都存在且 `&&` 先出现时按 `&&` 拆分，
    /// 否则按第一个 `||` 拆分
    #[default]
    LeftScan,

    /// 标准优先级：`!` > `&&` > `||`，左结合，需在 `[aop]` 中显式开启
    Precedence,
}

/// 求值上下文
pub struct MatchContext<'a> {
    pub member: &'a str,
    pub full_name: &'a str,
    pub target_type: &'a TypeMeta,
    pub scope: &'a dyn Container,
}

/// 切点表达式
#[derive(Clone)]
pub enum PointcutExpression {
    /// 匹配所有非切面类型的成员
    All,

    /// 永远不匹配
    Never,

    /// `execution(...)` 编译得到的正则，对完整名求值
    Execution(Regex),

    /// 成员带有该注解
    Annotation(String),

    /// 目标类型名在列表中
    Within(Vec<String>),

    /// 标识符解析到目标类型
    Target(String),

    /// 直接对完整名求值的正则
    Regex(Regex),

    /// 与运算（AND）
    And(Box<PointcutExpression>, Box<PointcutExpression>),

    /// 或运算（OR）
    Or(Box<PointcutExpression>, Box<PointcutExpression>),

    /// 非运算（NOT）
    Not(Box<PointcutExpression>),
}

impl PointcutExpression {
    /// 解析表达式，非法表达式得到 [`PointcutExpression::Never`]
    pub fn parse(expression: &str, grammar: PointcutGrammar) -> Self {
        match Self::try_parse(expression, grammar) {
            Ok(parsed) => parsed,
            Err(err) => {
                tracing::debug!("{}, pointcut will not match anything", err);
                PointcutExpression::Never
            }
        }
    }

    /// 解析表达式，返回具体的错误原因
    pub fn try_parse(expression: &str, grammar: PointcutGrammar) -> Result<Self, AopError> {
        let invalid = |reason: String| AopError::InvalidPointcut {
            expression: expression.to_string(),
            reason,
        };

        if !FUNCTIONS.iter().any(|f| expression.contains(f)) {
            return Regex::new(expression.trim())
                .map(PointcutExpression::Regex)
                .map_err(|e| invalid(e.to_string()));
        }

        let tokens = tokenize(expression).map_err(invalid)?;
        match grammar {
            PointcutGrammar::Precedence => {
                let mut parser = Parser { tokens: &tokens, pos: 0 };
                let parsed = parser.or().map_err(invalid)?;
                if parser.pos != tokens.len() {
                    return Err(invalid(format!("unexpected token at position {}", parser.pos)));
                }
                Ok(parsed)
            }
            PointcutGrammar::LeftScan => left_scan(&tokens).map_err(invalid),
        }
    }

    /// 编译 `execution(...)` 中的模式
    ///
    /// 兼容 `* Type.method(..)` 形式的返回类型前缀和参数后缀。
    pub fn execution(pattern: &str) -> Self {
        let pattern = pattern.trim();
        let pattern = pattern.strip_prefix("* ").unwrap_or(pattern).trim();
        let pattern = pattern.trim_end_matches("(..)").trim_end_matches("()");

        if pattern == "*" || pattern == "*.*" {
            return PointcutExpression::All;
        }
        if pattern.is_empty() || BARE_IDENTIFIER.is_match(pattern) {
            return PointcutExpression::Never;
        }

        let mut source = String::new();
        let mut rest = pattern;
        while !rest.is_empty() {
            if let Some(tail) = rest.strip_prefix("**.").or_else(|| rest.strip_prefix("**/")) {
                source.push_str(r"(?:\w+[./])*");
                rest = tail;
            } else if let Some(tail) = rest.strip_prefix("**") {
                source.push_str(r"\w+(?:[./]\w+)*");
                rest = tail;
            } else if let Some(tail) = rest.strip_prefix('*') {
                source.push_str(r"\w+");
                rest = tail;
            } else {
                let mut chars = rest.chars();
                if let Some(ch) = chars.next() {
                    source.push_str(&regex::escape(ch.encode_utf8(&mut [0; 4])));
                }
                rest = chars.as_str();
            }
        }
        source.push('$');

        match Regex::new(&source) {
            Ok(regex) => PointcutExpression::Execution(regex),
            Err(err) => {
                tracing::debug!("Invalid execution pattern '{}': {}", pattern, err);
                PointcutExpression::Never
            }
        }
    }

    /// 检查是否匹配
    pub fn matches(&self, ctx: &MatchContext<'_>) -> bool {
        match self {
            PointcutExpression::All => !ctx.target_type.is_aspect(),
            PointcutExpression::Never => false,
            PointcutExpression::Execution(regex) | PointcutExpression::Regex(regex) => {
                regex.is_match(ctx.full_name)
            }
            PointcutExpression::Annotation(name) => {
                !ctx.target_type.is_aspect()
                    && ctx
                        .target_type
                        .member(ctx.member)
                        .map_or(false, |member| member.has_annotation(name))
            }
            PointcutExpression::Within(types) => types.iter().any(|t| t == ctx.target_type.name()),
            PointcutExpression::Target(identifier) => ctx
                .scope
                .type_of(identifier)
                .map_or(false, |resolved| resolved.is_same_type(ctx.target_type)),
            PointcutExpression::And(left, right) => left.matches(ctx) && right.matches(ctx),
            PointcutExpression::Or(left, right) => left.matches(ctx) || right.matches(ctx),
            PointcutExpression::Not(expr) => !expr.matches(ctx),
        }
    }

    /// 与运算
    pub fn and(self, other: PointcutExpression) -> Self {
        PointcutExpression::And(Box::new(self), Box::new(other))
    }

    /// 或运算
    pub fn or(self, other: PointcutExpression) -> Self {
        PointcutExpression::Or(Box::new(self), Box::new(other))
    }

    /// 非运算
    #[allow(clippy::should_implement_trait)]
    pub fn not(self) -> Self {
        PointcutExpression::Not(Box::new(self))
    }
}

impl fmt::Debug for PointcutExpression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PointcutExpression::All => write!(f, "All"),
            PointcutExpression::Never => write!(f, "Never"),
            PointcutExpression::Execution(regex) => write!(f, "Execution(/{}/)", regex.as_str()),
            PointcutExpression::Annotation(name) => write!(f, "Annotation({})", name),
            PointcutExpression::Within(types) => write!(f, "Within({})", types.join(", ")),
            PointcutExpression::Target(identifier) => write!(f, "Target({})", identifier),
            PointcutExpression::Regex(regex) => write!(f, "Regex(/{}/)", regex.as_str()),
            PointcutExpression::And(l, r) => write!(f, "And({:?}, {:?})", l, r),
            PointcutExpression::Or(l, r) => write!(f, "Or({:?}, {:?})", l, r),
            PointcutExpression::Not(e) => write!(f, "Not({:?})", e),
        }
    }
}

#[derive(Debug, Clone)]
enum Token {
    And,
    Or,
    Not,
    Open,
    Close,
    Atom(PointcutExpression),
}

fn tokenize(expression: &str) -> Result<Vec<Token>, String> {
    let mut tokens = Vec::new();
    let mut rest = expression.trim_start();

    while !rest.is_empty() {
        if let Some(tail) = rest.strip_prefix("&&") {
            tokens.push(Token::And);
            rest = tail;
        } else if let Some(tail) = rest.strip_prefix("||") {
            tokens.push(Token::Or);
            rest = tail;
        } else if let Some(tail) = rest.strip_prefix('!') {
            tokens.push(Token::Not);
            rest = tail;
        } else if let Some(tail) = rest.strip_prefix('(') {
            tokens.push(Token::Open);
            rest = tail;
        } else if let Some(tail) = rest.strip_prefix(')') {
            tokens.push(Token::Close);
            rest = tail;
        } else if let Some(function) = FUNCTIONS.iter().find(|f| rest.starts_with(**f)) {
            let (argument, tail) = read_argument(&rest[function.len()..])
                .ok_or_else(|| format!("unbalanced parentheses after '{}'", function))?;
            tokens.push(Token::Atom(function_atom(function, argument)));
            rest = tail;
        } else {
            let end = rest
                .find(|c: char| c.is_whitespace() || "&|!()".contains(c))
                .unwrap_or(rest.len());
            if end == 0 {
                return Err(format!("unexpected character '{}'", &rest[..1]));
            }
            let regex = Regex::new(&rest[..end]).map_err(|e| e.to_string())?;
            tokens.push(Token::Atom(PointcutExpression::Regex(regex)));
            rest = &rest[end..];
        }
        rest = rest.trim_start();
    }
    Ok(tokens)
}

/// 读取到与之配对的右括号，返回括号内的内容和剩余部分
fn read_argument(input: &str) -> Option<(&str, &str)> {
    let mut depth = 0usize;
    for (index, ch) in input.char_indices() {
        match ch {
            '(' => depth += 1,
            ')' if depth == 0 => return Some((&input[..index], &input[index + 1..])),
            ')' => depth -= 1,
            _ => {}
        }
    }
    None
}

fn function_atom(function: &str, argument: &str) -> PointcutExpression {
    let argument = argument.trim();
    match function {
        "execution(" => PointcutExpression::execution(argument),
        "@annotation(" => PointcutExpression::Annotation(argument.trim_start_matches('@').to_string()),
        "@within(" => PointcutExpression::Within(
            argument
                .split(',')
                .map(str::trim)
                .filter(|t| !t.is_empty())
                .map(str::to_string)
                .collect(),
        ),
        _ => PointcutExpression::Target(argument.to_string()),
    }
}

/// 标准优先级的递归下降解析
struct Parser<'a> {
    tokens: &'a [Token],
    pos: usize,
}

impl Parser<'_> {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn or(&mut self) -> Result<PointcutExpression, String> {
        let mut left = self.and()?;
        while matches!(self.peek(), Some(Token::Or)) {
            self.pos += 1;
            left = left.or(self.and()?);
        }
        Ok(left)
    }

    fn and(&mut self) -> Result<PointcutExpression, String> {
        let mut left = self.unary()?;
        while matches!(self.peek(), Some(Token::And)) {
            self.pos += 1;
            left = left.and(self.unary()?);
        }
        Ok(left)
    }

    fn unary(&mut self) -> Result<PointcutExpression, String> {
        if matches!(self.peek(), Some(Token::Not)) {
            self.pos += 1;
            return Ok(self.unary()?.not());
        }
        self.primary()
    }

    fn primary(&mut self) -> Result<PointcutExpression, String> {
        let token = self.peek().cloned();
        self.pos += 1;
        match token {
            Some(Token::Atom(atom)) => Ok(atom),
            Some(Token::Open) => {
                let inner = self.or()?;
                match self.peek() {
                    Some(Token::Close) => {
                        self.pos += 1;
                        Ok(inner)
                    }
                    _ => Err("missing ')'".to_string()),
                }
            }
            Some(other) => Err(format!("unexpected {:?}", other)),
            None => Err("unexpected end of expression".to_string()),
        }
    }
}

/// 从左到右扫描的兼容语法
fn left_scan(tokens: &[Token]) -> Result<PointcutExpression, String> {
    let tokens = strip_outer_parens(tokens);
    if tokens.is_empty() {
        return Err("empty expression".to_string());
    }

    let mut depth = 0i32;
    let mut first_and = None;
    let mut first_or = None;
    for (index, token) in tokens.iter().enumerate() {
        match token {
            Token::Open => depth += 1,
            Token::Close => depth -= 1,
            Token::And if depth == 0 && first_and.is_none() => first_and = Some(index),
            Token::Or if depth == 0 && first_or.is_none() => first_or = Some(index),
            _ => {}
        }
        if depth < 0 {
            return Err("unbalanced ')'".to_string());
        }
    }
    if depth != 0 {
        return Err("missing ')'".to_string());
    }

    let split = match (first_and, first_or) {
        (Some(and), Some(or)) if and < or => Some((and, true)),
        (_, Some(or)) => Some((or, false)),
        (Some(and), None) => Some((and, true)),
        (None, None) => None,
    };
    if let Some((index, is_and)) = split {
        let left = left_scan(&tokens[..index])?;
        let right = left_scan(&tokens[index + 1..])?;
        return Ok(if is_and { left.and(right) } else { left.or(right) });
    }

    match tokens {
        [Token::Not, rest @ ..] => Ok(left_scan(rest)?.not()),
        [Token::Atom(atom)] => Ok(atom.clone()),
        _ => Err("expected an operand".to_string()),
    }
}

/// 去掉包裹整个表达式的括号，一次一层
fn strip_outer_parens(mut tokens: &[Token]) -> &[Token] {
    while let [Token::Open, inner @ .., Token::Close] = tokens {
        let mut depth = 0i32;
        let wraps_all = inner.iter().all(|token| {
            match token {
                Token::Open => depth += 1,
                Token::Close => depth -= 1,
                _ => {}
            }
            depth >= 0
        });
        if !wraps_all || depth != 0 {
            break;
        }
        tokens = inner;
    }
    tokens
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aspect::AspectMeta;
    use chimera_ioc::{Annotation, Injector, Output};
    use std::sync::Arc;

    struct UserService;
    struct OrderService;
    struct LogAspect;

    fn user_type() -> Arc<TypeMeta> {
        TypeMeta::builder::<UserService>("UserService")
            .method("find", &["id"], |_, _| Ok(Output::unit()))
            .method("save", &["user"], |_, _| Ok(Output::unit()))
            .annotate("save", Annotation::new("Transactional"))
            .build()
    }

    fn aspect_type() -> Arc<TypeMeta> {
        TypeMeta::builder::<LogAspect>("LogAspect")
            .method("find", &[], |_, _| Ok(Output::unit()))
            .annotate("find", Annotation::new("Transactional"))
            .extension(AspectMeta::builder::<LogAspect>().build())
            .build()
    }

    fn matches(expression: &str, grammar: PointcutGrammar, target: &TypeMeta, member: &str) -> bool {
        let scope = Injector::new("test");
        let full_name = format!("{}.{}", target.name(), member);
        let ctx = MatchContext {
            member,
            full_name: &full_name,
            target_type: target,
            scope: &*scope,
        };
        PointcutExpression::parse(expression, grammar).matches(&ctx)
    }

    fn check(expression: &str, member: &str) -> bool {
        matches(expression, PointcutGrammar::Precedence, &user_type(), member)
    }

    #[test]
    fn test_execution_patterns() {
        assert!(check("execution(UserService.find)", "find"));
        assert!(!check("execution(UserService.find)", "save"));
        assert!(check("execution(UserService.*)", "save"));
        assert!(check("execution(* UserService.find(..))", "find"));
        assert!(check("execution(*)", "find"));
        assert!(check("execution(*.*)", "save"));
        assert!(!check("execution(find)", "find"));
        assert!(!check("execution(Service.save)", "find"));
    }

    #[test]
    fn test_execution_is_anchored_at_end_only() {
        assert!(check("execution(Service.find)", "find"));
        assert!(check("execution(Service.*)", "save"));
        assert!(!check("execution(UserService.fin)", "find"));
        assert!(!check("execution(Service)", "find"));
    }

    #[test]
    fn test_match_all_excludes_aspects() {
        let aspect = aspect_type();
        assert!(!matches("execution(*)", PointcutGrammar::Precedence, &aspect, "find"));
        assert!(matches("execution(LogAspect.find)", PointcutGrammar::Precedence, &aspect, "find"));
        assert!(!matches("@annotation(Transactional)", PointcutGrammar::Precedence, &aspect, "find"));
    }

    #[test]
    fn test_double_star_spans_segments() {
        struct Invoices;
        let invoices = TypeMeta::builder::<Invoices>("billing.invoice.InvoiceService").build();
        assert!(matches("execution(billing.**.issue)", PointcutGrammar::Precedence, &invoices, "issue"));
        assert!(matches("execution(**.issue)", PointcutGrammar::Precedence, &invoices, "issue"));
        assert!(matches("execution(billing.**)", PointcutGrammar::Precedence, &invoices, "issue"));
        assert!(!matches("execution(billing.*.issue)", PointcutGrammar::Precedence, &invoices, "issue"));
        assert!(!matches("execution(shipping.**.issue)", PointcutGrammar::Precedence, &invoices, "issue"));
        assert!(matches("execution(invoice.**.issue)", PointcutGrammar::Precedence, &invoices, "issue"));
    }

    #[test]
    fn test_annotation_within_and_plain_regex() {
        assert!(check("@annotation(Transactional)", "save"));
        assert!(check("@annotation(@Transactional)", "save"));
        assert!(!check("@annotation(Transactional)", "find"));
        assert!(check("@within(OrderService, UserService)", "find"));
        assert!(!check("@within(OrderService)", "find"));
        assert!(check("UserService\\.fi", "find"));
        assert!(check("^UserService\\.(find|save)$", "save"));
        assert!(!check("OrderService", "find"));
    }

    #[test]
    fn test_target_resolves_through_scope() {
        let scope = Injector::new("root");
        scope.register(user_type(), |_| Ok(UserService)).unwrap();
        scope
            .register(TypeMeta::builder::<OrderService>("OrderService").build(), |_| Ok(OrderService))
            .unwrap();

        let user = user_type();
        let ctx = MatchContext {
            member: "find",
            full_name: "UserService.find",
            target_type: &user,
            scope: &*scope,
        };
        assert!(PointcutExpression::parse("@target(UserService)", PointcutGrammar::Precedence).matches(&ctx));
        assert!(!PointcutExpression::parse("@target(OrderService)", PointcutGrammar::Precedence).matches(&ctx));
        assert!(!PointcutExpression::parse("@target(Unknown)", PointcutGrammar::Precedence).matches(&ctx));
    }

    #[test]
    fn test_boolean_combinations() {
        assert!(check("execution(UserService.find) || execution(UserService.save)", "save"));
        assert!(!check("execution(UserService.*) && !@annotation(Transactional)", "save"));
        assert!(check("execution(UserService.*) && !@annotation(Transactional)", "find"));
        assert!(check("(execution(OrderService.*) || @within(UserService)) && execution(*.find)", "find"));
        assert!(!check("(execution(OrderService.*) || @within(UserService)) && execution(*.find)", "save"));
    }

    #[test]
    fn test_grammars_differ_on_mixed_operators() {
        // a && b || c
        let expression = "execution(OrderService.*) && execution(*.find) || @within(UserService)";
        assert!(matches(expression, PointcutGrammar::Precedence, &user_type(), "save"));
        assert!(!matches(expression, PointcutGrammar::LeftScan, &user_type(), "save"));

        // a || b && c 在两种语法下相同
        let expression = "@within(UserService) || execution(OrderService.*) && execution(*.find)";
        assert!(matches(expression, PointcutGrammar::Precedence, &user_type(), "save"));
        assert!(matches(expression, PointcutGrammar::LeftScan, &user_type(), "save"));
    }

    #[test]
    fn test_default_grammar_is_left_scan() {
        assert_eq!(PointcutGrammar::default(), PointcutGrammar::LeftScan);

        let expression = "execution(OrderService.*) && execution(*.find) || @within(UserService)";
        assert!(!matches(expression, PointcutGrammar::default(), &user_type(), "save"));
    }

    #[test]
    fn test_left_scan_strips_outer_parentheses() {
        let expression = "((execution(UserService.find)))";
        assert!(matches(expression, PointcutGrammar::LeftScan, &user_type(), "find"));
        assert!(matches("!(execution(UserService.save))", PointcutGrammar::LeftScan, &user_type(), "find"));
    }

    #[test]
    fn test_malformed_expressions_match_nothing() {
        for expression in [
            "execution(UserService.find",
            "execution(UserService.find) &&",
            "(execution(*)",
            "execution(*) execution(*)",
            "[unclosed",
        ] {
            assert!(!check(expression, "find"), "{} should not match", expression);
            assert!(PointcutExpression::try_parse(expression, PointcutGrammar::Precedence).is_err());
        }
        assert!(!matches("execution(*) &&", PointcutGrammar::LeftScan, &user_type(), "find"));
    }
}
