//! 配置环境
//!
//! 从 TOML 加载配置，并允许使用带前缀的环境变量覆盖，
//! 各模块通过 [`Environment::bind`] 取得自己的强类型配置段。

use crate::error::{IocError, Result};
use serde::de::DeserializeOwned;
use std::fs;
use std::path::Path;

/// 默认的环境变量前缀
pub const DEFAULT_ENV_PREFIX: &str = "CHIMERA_";

/// Environment - 配置管理器
#[derive(Debug, Clone)]
pub struct Environment {
    root: toml::Table,
    prefix: String,
}

impl Default for Environment {
    fn default() -> Self {
        Self::new()
    }
}

impl Environment {
    /// 创建空环境（只有环境变量生效）
    pub fn new() -> Self {
        Self {
            root: toml::Table::new(),
            prefix: DEFAULT_ENV_PREFIX.to_string(),
        }
    }

    /// 从字符串解析 TOML 配置
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let root: toml::Table = toml::from_str(content)
            .map_err(|e| IocError::Config(format!("Failed to parse TOML: {}", e)))?;
        Ok(Self {
            root,
            prefix: DEFAULT_ENV_PREFIX.to_string(),
        })
    }

    /// 从文件加载 TOML 配置
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .map_err(|e| IocError::Config(format!("Failed to read config file {:?}: {}", path, e)))?;
        tracing::debug!("Loaded configuration from {:?}", path);
        Self::from_toml_str(&content)
    }

    /// 设置环境变量前缀，例如 "APP_"
    pub fn with_env_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    /// 获取配置值，键使用点号分隔，例如 `aop.enabled`
    ///
    /// 环境变量优先：`aop.enabled` 对应 `CHIMERA_AOP_ENABLED`。
    pub fn get(&self, key: &str) -> Option<toml::Value> {
        if let Ok(raw) = std::env::var(self.key_to_env(key)) {
            return Some(parse_env_value(&raw));
        }

        let mut parts = key.split('.');
        let first = parts.next()?;
        let mut current = self.root.get(first)?;
        for part in parts {
            current = current.as_table()?.get(part)?;
        }
        Some(current.clone())
    }

    /// 将一个配置段绑定到强类型结构
    ///
    /// 配置段不存在时使用结构体的 serde 默认值，
    /// 环境变量 `<PREFIX><SECTION>_<KEY>` 覆盖段内的同名键。
    pub fn bind<T: DeserializeOwned>(&self, section: &str) -> Result<T> {
        let mut table = self
            .root
            .get(section)
            .and_then(|value| value.as_table())
            .cloned()
            .unwrap_or_default();

        let env_prefix = format!("{}{}_", self.prefix, section.to_uppercase());
        for (name, raw) in std::env::vars() {
            if let Some(key) = name.strip_prefix(&env_prefix) {
                tracing::debug!("Config '{}.{}' overridden by environment variable {}", section, key.to_lowercase(), name);
                table.insert(key.to_lowercase(), parse_env_value(&raw));
            }
        }

        toml::Value::Table(table)
            .try_into()
            .map_err(|e| IocError::Config(format!("Invalid [{}] section: {}", section, e)).into())
    }

    /// 将配置键转换为环境变量名
    /// 例如: aop.pointcut_grammar -> CHIMERA_AOP_POINTCUT_GRAMMAR
    fn key_to_env(&self, key: &str) -> String {
        format!("{}{}", self.prefix, key.replace('.', "_").to_uppercase())
    }
}

/// 环境变量值按 TOML 字面量解析，失败时视为字符串
fn parse_env_value(raw: &str) -> toml::Value {
    toml::from_str::<toml::Table>(&format!("value = {}", raw))
        .ok()
        .and_then(|mut table| table.remove("value"))
        .unwrap_or_else(|| toml::Value::String(raw.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Deserialize, PartialEq)]
    #[serde(default)]
    struct ServerSection {
        port: i64,
        host: String,
        secure: bool,
    }

    impl Default for ServerSection {
        fn default() -> Self {
            Self {
                port: 80,
                host: "localhost".to_string(),
                secure: false,
            }
        }
    }

    const CONFIG: &str = r#"
        [server]
        port = 8080
        host = "0.0.0.0"

        [server.tls]
        enabled = true
    "#;

    #[test]
    fn test_get_nested_keys() {
        let env = Environment::from_toml_str(CONFIG).unwrap().with_env_prefix("CHIMERA_TEST_GET_");
        assert_eq!(env.get("server.port").and_then(|v| v.as_integer()), Some(8080));
        assert_eq!(env.get("server.tls.enabled").and_then(|v| v.as_bool()), Some(true));
        assert!(env.get("server.missing").is_none());
    }

    #[test]
    fn test_bind_uses_defaults_for_missing_keys() {
        let env = Environment::from_toml_str(CONFIG).unwrap().with_env_prefix("CHIMERA_TEST_BIND_");
        let server: ServerSection = env.bind("server").unwrap();
        assert_eq!(
            server,
            ServerSection {
                port: 8080,
                host: "0.0.0.0".to_string(),
                secure: false,
            }
        );

        let missing: ServerSection = env.bind("absent").unwrap();
        assert_eq!(missing, ServerSection::default());
    }

    #[test]
    fn test_environment_variables_override_file() {
        std::env::set_var("CHIMERA_TEST_ENV_SERVER_PORT", "9090");
        std::env::set_var("CHIMERA_TEST_ENV_SERVER_HOST", "example.org");

        let env = Environment::from_toml_str(CONFIG).unwrap().with_env_prefix("CHIMERA_TEST_ENV_");
        let server: ServerSection = env.bind("server").unwrap();
        assert_eq!(server.port, 9090);
        assert_eq!(server.host, "example.org");
        assert_eq!(env.get("server.port").and_then(|v| v.as_integer()), Some(9090));

        std::env::remove_var("CHIMERA_TEST_ENV_SERVER_PORT");
        std::env::remove_var("CHIMERA_TEST_ENV_SERVER_HOST");
    }

    #[test]
    fn test_invalid_toml_is_config_error() {
        let err = Environment::from_toml_str("[server").unwrap_err();
        assert!(matches!(err.downcast_ref::<IocError>(), Some(IocError::Config(_))));
    }
}
