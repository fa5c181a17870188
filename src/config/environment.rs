use crate::utils::error::{MsLibError, Result};
use regex::Regex;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use std::path::Path;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Structured formats a config document can be decoded from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigFormat {
    Toml,
    Json,
}

impl ConfigFormat {
    /// 依副檔名判斷格式
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        match path.as_ref().extension().and_then(|ext| ext.to_str()) {
            Some("toml") => Ok(ConfigFormat::Toml),
            Some("json") => Ok(ConfigFormat::Json),
            _ => Err(MsLibError::ConfigError {
                message: "Invalid config type specified.".to_string(),
            }),
        }
    }
}

/// A requirement checked by [`Environment::conf_check`].
#[derive(Debug, Clone)]
pub enum Requirement<'a> {
    /// A top-level key holding a non-empty value.
    Key(&'a str),
    /// A section whose listed fields must all be set.
    Section(&'a str, &'a [&'a str]),
}

/// Flat key/value configuration store shared by every component.
#[derive(Debug, Default)]
pub struct Environment {
    conf: RwLock<Map<String, Value>>,
}

impl Environment {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, Map<String, Value>> {
        self.conf.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, Map<String, Value>> {
        self.conf.write().unwrap_or_else(|e| e.into_inner())
    }

    /// Returns the value stored under `key`, or `None` when it is absent.
    pub fn get(&self, key: &str) -> Option<Value> {
        self.read().get(key).cloned()
    }

    pub fn get_str(&self, key: &str) -> Option<String> {
        self.read()
            .get(key)
            .and_then(|v| v.as_str())
            .map(str::to_string)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.read().contains_key(key)
    }

    pub fn set(&self, key: impl ToString, value: impl Into<Value>) {
        self.write().insert(key.to_string(), value.into());
    }

    /// Deserializes a whole section into a typed config struct.
    pub fn section<T: DeserializeOwned>(&self, key: &str) -> Result<T> {
        let value = self.get(key).ok_or_else(|| MsLibError::MissingConfigError {
            field: key.to_string(),
        })?;

        serde_json::from_value(value).map_err(|e| MsLibError::ConfigValidationError {
            field: key.to_string(),
            message: e.to_string(),
        })
    }

    /// Like [`Environment::section`] but yields the default when the key is absent.
    pub fn section_or_default<T: DeserializeOwned + Default>(&self, key: &str) -> Result<T> {
        if self.contains(key) {
            self.section(key)
        } else {
            Ok(T::default())
        }
    }

    /// Loads a config document and merges its top-level keys into the store.
    pub fn populate<P: AsRef<Path>>(&self, format: ConfigFormat, source: P) -> Result<()> {
        let source = source.as_ref();
        if !source.exists() {
            return Err(MsLibError::ConfigError {
                message: format!("Unable to access requested config file {}", source.display()),
            });
        }

        let content = std::fs::read_to_string(source)?;
        let loaded = Self::parse(format, &content).map_err(|e| match e {
            MsLibError::ConfigValidationError { message, .. } => {
                MsLibError::ConfigValidationError {
                    field: source.display().to_string(),
                    message,
                }
            }
            other => other,
        })?;

        let count = self.merge(loaded);
        tracing::debug!("Loaded {} config keys from {}", count, source.display());
        Ok(())
    }

    /// Same as [`Environment::populate`] for an in-memory document.
    pub fn populate_str(&self, format: ConfigFormat, content: &str) -> Result<()> {
        let loaded = Self::parse(format, content)?;
        self.merge(loaded);
        Ok(())
    }

    fn merge(&self, loaded: Map<String, Value>) -> usize {
        let mut conf = self.write();
        let mut count = 0;
        for (key, value) in loaded {
            if value.is_null() {
                continue;
            }
            conf.insert(key, value);
            count += 1;
        }
        count
    }

    fn parse(format: ConfigFormat, content: &str) -> Result<Map<String, Value>> {
        // 處理環境變數替換
        let processed = Self::substitute_env_vars(content)?;

        let value: Value = match format {
            ConfigFormat::Toml => {
                let table: toml::Table =
                    toml::from_str(&processed).map_err(|e| MsLibError::ConfigValidationError {
                        field: "toml_parsing".to_string(),
                        message: format!("TOML parsing error: {}", e),
                    })?;
                serde_json::to_value(table)?
            }
            ConfigFormat::Json => {
                serde_json::from_str(&processed).map_err(|e| MsLibError::ConfigValidationError {
                    field: "json_parsing".to_string(),
                    message: format!("JSON parsing error: {}", e),
                })?
            }
        };

        match value {
            Value::Object(map) => Ok(map),
            _ => Err(MsLibError::ConfigError {
                message: "Config document must be a table of keys".to_string(),
            }),
        }
    }

    /// 替換環境變數 (例如 ${SMTP_PASSWORD})
    fn substitute_env_vars(content: &str) -> Result<String> {
        let re = Regex::new(r"\$\{([^}]+)\}").map_err(|e| MsLibError::ConfigError {
            message: e.to_string(),
        })?;

        let result = re.replace_all(content, |caps: &regex::Captures| {
            let var_name = &caps[1];
            std::env::var(var_name).unwrap_or_else(|_| format!("${{{}}}", var_name))
        });

        Ok(result.to_string())
    }

    /// Checks that every requirement is present and non-empty.
    pub fn conf_check(&self, requirements: &[Requirement<'_>]) -> bool {
        let conf = self.read();
        requirements.iter().all(|req| match req {
            Requirement::Key(key) => conf.get(*key).is_some_and(is_truthy),
            Requirement::Section(key, fields) => match conf.get(*key) {
                Some(section) if is_truthy(section) => fields
                    .iter()
                    .all(|field| section.get(*field).is_some_and(is_set)),
                _ => false,
            },
        })
    }
}

fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty() && s != "0",
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
    }
}

fn is_set(value: &Value) -> bool {
    !matches!(value, Value::Null | Value::Bool(false)) && value.as_str() != Some("")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::io::Write;

    const BASIC: &str = r#"
SecuritySalt = "pepper"

[Options]
Mailer = true
FileMaker = false

[FMServer]
host = "fms.example.com"
database = "Orders"
username = "web"
password = ""
"#;

    #[test]
    fn test_get_and_set() {
        let env = Environment::new();
        assert_eq!(env.get("missing"), None);

        env.set("CodeRoot", "/srv/app");
        env.set(42, json!({"a": 1}));
        assert_eq!(env.get_str("CodeRoot").as_deref(), Some("/srv/app"));
        assert_eq!(env.get("42"), Some(json!({"a": 1})));
    }

    #[test]
    fn test_populate_toml_string() {
        let env = Environment::new();
        env.populate_str(ConfigFormat::Toml, BASIC).unwrap();

        assert_eq!(env.get_str("SecuritySalt").as_deref(), Some("pepper"));
        assert_eq!(env.get("Options").unwrap()["Mailer"], json!(true));
    }

    #[test]
    fn test_populate_json_skips_nulls() {
        let env = Environment::new();
        env.set("Kept", "old");
        env.populate_str(ConfigFormat::Json, r#"{"Kept": null, "New": [1, 2]}"#)
            .unwrap();

        assert_eq!(env.get_str("Kept").as_deref(), Some("old"));
        assert_eq!(env.get("New"), Some(json!([1, 2])));
    }

    #[test]
    fn test_env_var_substitution() {
        std::env::set_var("MSLIB_TEST_SALT", "from-env");
        let env = Environment::new();
        env.populate_str(
            ConfigFormat::Toml,
            "SecuritySalt = \"${MSLIB_TEST_SALT}\"\nOther = \"${MSLIB_TEST_UNSET_VAR}\"",
        )
        .unwrap();

        assert_eq!(env.get_str("SecuritySalt").as_deref(), Some("from-env"));
        assert_eq!(
            env.get_str("Other").as_deref(),
            Some("${MSLIB_TEST_UNSET_VAR}")
        );
        std::env::remove_var("MSLIB_TEST_SALT");
    }

    #[test]
    fn test_populate_from_file() {
        let mut temp_file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        temp_file.write_all(BASIC.as_bytes()).unwrap();

        let env = Environment::new();
        let format = ConfigFormat::from_path(temp_file.path()).unwrap();
        env.populate(format, temp_file.path()).unwrap();
        assert!(env.contains("FMServer"));
    }

    #[test]
    fn test_populate_missing_file() {
        let env = Environment::new();
        let err = env
            .populate(ConfigFormat::Toml, "/definitely/not/here/config.toml")
            .unwrap_err();
        assert!(err
            .to_string()
            .contains("Unable to access requested config file"));
    }

    #[test]
    fn test_unknown_format_rejected() {
        let err = ConfigFormat::from_path("app/config.php").unwrap_err();
        assert_eq!(
            err.to_string(),
            "Configuration error: Invalid config type specified."
        );
    }

    #[test]
    fn test_conf_check() {
        let env = Environment::new();
        env.populate_str(ConfigFormat::Toml, BASIC).unwrap();

        assert!(env.conf_check(&[Requirement::Key("SecuritySalt")]));
        assert!(!env.conf_check(&[Requirement::Key("Nope")]));
        assert!(env.conf_check(&[Requirement::Section(
            "FMServer",
            &["host", "database", "username"]
        )]));
        // empty password fails
        assert!(!env.conf_check(&[Requirement::Section(
            "FMServer",
            &["host", "password"]
        )]));
        assert!(!env.conf_check(&[Requirement::Section("Mailer", &["Type"])]));
    }

    #[test]
    fn test_conf_check_falsy_keys() {
        let env = Environment::new();
        env.set("Zero", 0);
        env.set("Off", false);
        env.set("Empty", "");
        env.set("On", true);
        assert!(!env.conf_check(&[Requirement::Key("Zero")]));
        assert!(!env.conf_check(&[Requirement::Key("Off")]));
        assert!(!env.conf_check(&[Requirement::Key("Empty")]));
        assert!(env.conf_check(&[Requirement::Key("On")]));
    }

    #[test]
    fn test_typed_section() {
        #[derive(serde::Deserialize)]
        struct Fm {
            host: String,
        }

        let env = Environment::new();
        env.populate_str(ConfigFormat::Toml, BASIC).unwrap();
        let fm: Fm = env.section("FMServer").unwrap();
        assert_eq!(fm.host, "fms.example.com");
        assert!(env.section::<Fm>("Missing").is_err());
    }
}
