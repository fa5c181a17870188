//! Typed views of the application's config sections.
//!
//! Key names follow the application's config files (`[Mailer]`, `[FMServer]`,
//! `[Curl]`, ...), which is why most fields carry a serde rename.

use crate::utils::error::{MsLibError, Result};
use crate::utils::validation::{
    validate_host, validate_non_empty_string, validate_path, validate_range,
    validate_required_field, Validate,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use url::Url;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MailerType {
    Smtp,
    Sendmail,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MailerConfig {
    #[serde(rename = "Type")]
    pub kind: MailerType,
    #[serde(rename = "From")]
    pub from_name: String,
    #[serde(rename = "Email")]
    pub email: String,
    #[serde(rename = "SMTP")]
    pub smtp: Option<SmtpConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SmtpConfig {
    #[serde(rename = "Host")]
    pub host: String,
    #[serde(rename = "Port", default = "default_smtp_port")]
    pub port: u16,
    #[serde(rename = "Auth", default)]
    pub auth: bool,
    #[serde(rename = "Username")]
    pub username: Option<String>,
    #[serde(rename = "Password")]
    pub password: Option<String>,
    #[serde(rename = "SSL", default)]
    pub ssl: bool,
}

fn default_smtp_port() -> u16 {
    25
}

impl Validate for MailerConfig {
    fn validate(&self) -> Result<()> {
        validate_non_empty_string("Mailer.Email", &self.email)?;

        if self.kind == MailerType::Smtp {
            let smtp = validate_required_field("Mailer.SMTP", &self.smtp)?;
            validate_host("Mailer.SMTP.Host", &smtp.host)?;
            validate_range("Mailer.SMTP.Port", smtp.port, 1, u16::MAX)?;

            if smtp.auth {
                let username = smtp.username.as_deref().unwrap_or_default();
                validate_non_empty_string("Mailer.SMTP.Username", username)?;
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SiteAdminConfig {
    #[serde(rename = "Name", default)]
    pub name: String,
    #[serde(rename = "Email")]
    pub email: String,
    #[serde(rename = "ErrorSubject", default)]
    pub error_subject: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FmServerConfig {
    pub host: String,
    pub database: String,
    pub username: String,
    pub password: String,
    pub log_layout: Option<String>,
    pub fmp_container_protocol: Option<String>,
    #[serde(rename = "cURLAuthType")]
    pub curl_auth_type: Option<AuthMethod>,
    /// Scheme used for Data API calls, https unless overridden.
    pub protocol: Option<String>,
    /// Data API version segment, `vLatest` unless overridden.
    pub version: Option<String>,
}

impl FmServerConfig {
    /// `{protocol}://{host}/fmi/data/{version}/databases/{database}`
    pub fn data_api_url(&self) -> Result<Url> {
        let root = format!("{}://{}/", self.protocol.as_deref().unwrap_or("https"), self.host);
        let mut url = Url::parse(&root).map_err(|e| MsLibError::InvalidUrl {
            url: root.clone(),
            reason: e.to_string(),
        })?;

        url.path_segments_mut()
            .map_err(|_| MsLibError::InvalidUrl {
                url: root.clone(),
                reason: "URL cannot be a base".to_string(),
            })?
            .pop_if_empty()
            .extend([
                "fmi",
                "data",
                self.version.as_deref().unwrap_or("vLatest"),
                "databases",
                self.database.as_str(),
            ]);
        Ok(url)
    }
}

impl Validate for FmServerConfig {
    fn validate(&self) -> Result<()> {
        validate_host("FMServer.host", &self.host)?;
        validate_non_empty_string("FMServer.database", &self.database)?;
        validate_non_empty_string("FMServer.username", &self.username)?;

        for (field, scheme) in [
            ("FMServer.protocol", &self.protocol),
            ("FMServer.fmpContainerProtocol", &self.fmp_container_protocol),
        ] {
            if let Some(scheme) = scheme {
                if scheme != "http" && scheme != "https" {
                    return Err(MsLibError::InvalidConfigValueError {
                        field: field.to_string(),
                        value: scheme.clone(),
                        reason: "Expected http or https".to_string(),
                    });
                }
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthMethod {
    /// Let the client pick; only basic credentials are ever sent.
    #[default]
    Any,
    Basic,
    Bearer,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CurlConfig {
    /// Close the handle after every request instead of keeping it open.
    #[serde(rename = "Single", default)]
    pub single: bool,
    #[serde(rename = "HTTPHeader", default)]
    pub http_header: Vec<String>,
    #[serde(rename = "Agent", default = "default_agent")]
    pub agent: String,
    #[serde(rename = "Redirect", default = "default_true")]
    pub redirect: bool,
    /// Seconds; 0 disables the limit.
    #[serde(rename = "Timelimit", default)]
    pub timelimit: u64,
    #[serde(rename = "VerifyPeer", default = "default_true")]
    pub verify_peer: bool,
    #[serde(rename = "VerifyHost", default = "default_true")]
    pub verify_host: bool,
    #[serde(rename = "Username")]
    pub username: Option<String>,
    #[serde(rename = "Password")]
    pub password: Option<String>,
    #[serde(rename = "AuthMethod", default)]
    pub auth_method: AuthMethod,
    #[serde(rename = "CookieJar")]
    pub cookie_jar: Option<String>,
    #[serde(rename = "Verbose", default)]
    pub verbose: bool,
}

fn default_agent() -> String {
    concat!("mslib/", env!("CARGO_PKG_VERSION")).to_string()
}

fn default_true() -> bool {
    true
}

impl Default for CurlConfig {
    fn default() -> Self {
        Self {
            single: false,
            http_header: Vec::new(),
            agent: default_agent(),
            redirect: true,
            timelimit: 0,
            verify_peer: true,
            verify_host: true,
            username: None,
            password: None,
            auth_method: AuthMethod::Any,
            cookie_jar: None,
            verbose: false,
        }
    }
}

impl CurlConfig {
    /// Credentials are only used when both halves are non-empty.
    pub fn credentials(&self) -> Option<(&str, &str)> {
        match (self.username.as_deref(), self.password.as_deref()) {
            (Some(u), Some(p)) if !u.is_empty() && !p.is_empty() => Some((u, p)),
            _ => None,
        }
    }

    /// Splits the `"Name: value"` header lines.
    pub fn header_pairs(&self) -> Result<Vec<(String, String)>> {
        self.http_header
            .iter()
            .map(|line| {
                line.split_once(':')
                    .map(|(name, value)| (name.trim().to_string(), value.trim().to_string()))
                    .filter(|(name, _)| !name.is_empty())
                    .ok_or_else(|| MsLibError::InvalidConfigValueError {
                        field: "Curl.HTTPHeader".to_string(),
                        value: line.clone(),
                        reason: "Expected 'Name: value'".to_string(),
                    })
            })
            .collect()
    }
}

impl Validate for CurlConfig {
    fn validate(&self) -> Result<()> {
        self.header_pairs()?;
        if let Some(jar) = &self.cookie_jar {
            validate_path("Curl.CookieJar", jar)?;
        }
        Ok(())
    }
}

/// Which components the bootstrap constructs.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct Options {
    #[serde(rename = "Helpers", default)]
    pub helpers: bool,
    #[serde(rename = "Mailer", default)]
    pub mailer: bool,
    #[serde(rename = "Errors", default)]
    pub errors: bool,
    #[serde(rename = "FileMaker", default)]
    pub filemaker: bool,
    #[serde(rename = "Log", default)]
    pub log: bool,
}

/// One entry of the `errors` table, keyed by error id.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorDefinition {
    #[serde(default)]
    pub error_action: String,
    #[serde(default)]
    pub alert_sys_admin: bool,
    #[serde(default)]
    pub sys_admin_message: String,
    /// Remaining keys are passed to the error template untouched.
    #[serde(flatten)]
    pub display: HashMap<String, serde_json::Value>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_mailer_section() {
        let config: MailerConfig = toml::from_str(
            r#"
Type = "smtp"
From = "Order Desk"
Email = "orders@example.com"

[SMTP]
Host = "smtp.example.com"
Port = 465
Auth = true
Username = "mailer"
Password = "secret"
SSL = true
"#,
        )
        .unwrap();

        assert_eq!(config.kind, MailerType::Smtp);
        let smtp = config.smtp.as_ref().unwrap();
        assert_eq!(smtp.port, 465);
        assert!(smtp.ssl);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_smtp_mailer_requires_smtp_section() {
        let config: MailerConfig =
            toml::from_str("Type = \"smtp\"\nFrom = \"x\"\nEmail = \"x@example.com\"").unwrap();
        assert!(config.validate().is_err());

        let config: MailerConfig =
            toml::from_str("Type = \"sendmail\"\nFrom = \"x\"\nEmail = \"x@example.com\"")
                .unwrap();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_curl_defaults() {
        let config: CurlConfig = toml::from_str("").unwrap();
        assert!(config.redirect);
        assert!(config.verify_peer);
        assert!(!config.single);
        assert_eq!(config.auth_method, AuthMethod::Any);
        assert!(config.credentials().is_none());
    }

    #[test]
    fn test_curl_header_pairs() {
        let config = CurlConfig {
            http_header: vec![
                "Accept: application/json".to_string(),
                "X-Token:abc".to_string(),
            ],
            ..CurlConfig::default()
        };
        let pairs = config.header_pairs().unwrap();
        assert_eq!(pairs[0], ("Accept".to_string(), "application/json".to_string()));
        assert_eq!(pairs[1], ("X-Token".to_string(), "abc".to_string()));

        let bad = CurlConfig {
            http_header: vec!["no separator".to_string()],
            ..CurlConfig::default()
        };
        assert!(bad.validate().is_err());
    }

    #[test]
    fn test_fm_server_base_url() {
        let config: FmServerConfig = serde_json::from_value(serde_json::json!({
            "host": "fms.example.com",
            "database": "Orders",
            "username": "web",
            "password": "pw",
            "logLayout": "Log",
            "cURLAuthType": "basic"
        }))
        .unwrap();

        assert_eq!(
            config.data_api_url().unwrap().as_str(),
            "https://fms.example.com/fmi/data/vLatest/databases/Orders"
        );
        assert_eq!(config.log_layout.as_deref(), Some("Log"));
        assert_eq!(config.curl_auth_type, Some(AuthMethod::Basic));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_error_definition_keeps_display_fields() {
        let def: ErrorDefinition = serde_json::from_value(serde_json::json!({
            "errorAction": "Loading order",
            "alertSysAdmin": true,
            "sysAdminMessage": "Code #errorCode#",
            "title": "Something went wrong"
        }))
        .unwrap();

        assert!(def.alert_sys_admin);
        assert_eq!(def.display["title"], "Something went wrong");
    }
}
