//! # Configuration Parameters Module / 配置参数模块
//!
//! The engine consumes configuration as an opaque named string lookup with
//! optional typed coercion. Parameters can be layered: explicit in-memory
//! overrides win over values loaded from a TOML file. The engine itself
//! reads only three keys — default execution mode, default instance
//! lifecycle, and parallelism.
//!
//! 引擎将配置视为带可选类型强制转换的不透明命名字符串查找。
//! 参数可以分层：显式的内存覆盖优先于从 TOML 文件加载的值。
//! 引擎自身只读取三个键——默认执行模式、默认实例生命周期和并行度。

use anyhow::{Context, Result, bail};
use std::collections::HashMap;
use std::path::Path;
use std::str::FromStr;

/// Key picking the default execution mode for nodes without a declaration.
pub const DEFAULT_EXECUTION_MODE_KEY: &str = "hierarchy.execution.mode.default";
/// Key picking the default container instance lifecycle.
pub const DEFAULT_LIFECYCLE_KEY: &str = "hierarchy.lifecycle.default";
/// Key bounding the number of concurrently running sibling subtrees.
pub const PARALLELISM_KEY: &str = "hierarchy.execution.parallelism";

/// Opaque named string parameters with typed coercion helpers.
/// 带类型强制转换辅助方法的不透明命名字符串参数。
#[derive(Debug, Clone, Default)]
pub struct ConfigurationParameters {
    values: HashMap<String, String>,
}

impl ConfigurationParameters {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Builds parameters from explicit key/value pairs.
    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            values: pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }

    /// Loads parameters from a flat TOML file of string-convertible values.
    /// 从一个由可转为字符串的值组成的扁平 TOML 文件加载参数。
    pub fn from_toml_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read configuration file: {}", path.display()))?;
        let table: toml::Table = toml::from_str(&content)
            .with_context(|| format!("failed to parse configuration file: {}", path.display()))?;

        let mut values = HashMap::new();
        for (key, value) in table {
            let rendered = match value {
                toml::Value::String(s) => s,
                toml::Value::Integer(i) => i.to_string(),
                toml::Value::Float(f) => f.to_string(),
                toml::Value::Boolean(b) => b.to_string(),
                other => bail!(
                    "configuration key \"{key}\" has unsupported value type: {}",
                    other.type_str()
                ),
            };
            values.insert(key, rendered);
        }
        Ok(Self { values })
    }

    /// Layers explicit overrides on top of these parameters.
    pub fn with_overrides<I, K, V>(mut self, overrides: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        for (key, value) in overrides {
            self.values.insert(key.into(), value.into());
        }
        self
    }

    /// Raw string lookup.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    /// Boolean coercion; a present but malformed value is an error rather
    /// than a silent default.
    /// 布尔强制转换；存在但格式错误的值是错误，而不是静默的默认值。
    pub fn get_bool(&self, key: &str) -> Result<Option<bool>> {
        self.get_parsed::<bool>(key)
    }

    /// Unsigned integer coercion.
    pub fn get_usize(&self, key: &str) -> Result<Option<usize>> {
        self.get_parsed::<usize>(key)
    }

    fn get_parsed<T: FromStr>(&self, key: &str) -> Result<Option<T>>
    where
        T::Err: std::error::Error + Send + Sync + 'static,
    {
        match self.get(key) {
            None => Ok(None),
            Some(raw) => raw
                .parse::<T>()
                .map(Some)
                .with_context(|| format!("configuration key \"{key}\" has invalid value \"{raw}\"")),
        }
    }

    /// Enum-like coercion through a caller-supplied parser.
    pub fn get_enum<T>(&self, key: &str, parse: fn(&str) -> Result<T>) -> Result<Option<T>> {
        match self.get(key) {
            None => Ok(None),
            Some(raw) => parse(raw)
                .map(Some)
                .with_context(|| format!("configuration key \"{key}\" has invalid value \"{raw}\"")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn overrides_win_over_file_values() {
        let params = ConfigurationParameters::from_pairs([(PARALLELISM_KEY, "2")])
            .with_overrides([(PARALLELISM_KEY, "8")]);
        assert_eq!(params.get_usize(PARALLELISM_KEY).unwrap(), Some(8));
    }

    #[test]
    fn malformed_values_are_errors_not_defaults() {
        let params = ConfigurationParameters::from_pairs([(PARALLELISM_KEY, "lots")]);
        assert!(params.get_usize(PARALLELISM_KEY).is_err());
    }

    #[test]
    fn absent_keys_are_none() {
        let params = ConfigurationParameters::empty();
        assert_eq!(params.get(DEFAULT_EXECUTION_MODE_KEY), None);
        assert_eq!(params.get_bool("anything").unwrap(), None);
    }

    #[test]
    fn loads_flat_toml_files() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("engine.toml");
        std::fs::write(
            &path,
            "\"hierarchy.execution.parallelism\" = 4\n\"hierarchy.lifecycle.default\" = \"per_container\"\n",
        )
        .unwrap();

        let params = ConfigurationParameters::from_toml_file(&path).unwrap();
        assert_eq!(params.get_usize(PARALLELISM_KEY).unwrap(), Some(4));
        assert_eq!(params.get(DEFAULT_LIFECYCLE_KEY), Some("per_container"));
    }
}
