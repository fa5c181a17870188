use crate::config::environment::Environment;
use crate::utils::error::{MsLibError, Result};
use md5::{Digest, Md5};
use std::collections::HashMap;
use std::path::{PathBuf, MAIN_SEPARATOR};
use std::sync::Arc;

/// Signed links stop validating this many seconds after their timestamp.
pub const TIMEBASED_URL_LIFETIME_SECS: i64 = 120;

/// Route parameters of the current request, as captured by the router.
pub type RouteParams = HashMap<String, String>;

pub fn correct_path(path: &str) -> String {
    path.replace('/', &MAIN_SEPARATOR.to_string())
}

/// `{CodeRoot}/assets/templates`, shared by the mailer and the error pages.
pub fn template_dir(env: &Environment) -> Result<PathBuf> {
    let root = env
        .get_str("CodeRoot")
        .ok_or_else(|| MsLibError::MissingConfigError {
            field: "CodeRoot".to_string(),
        })?;
    Ok(PathBuf::from(root).join(correct_path("assets/templates")))
}

/// Renders an HTML debug block for `data`, tagged with the caller's location.
#[track_caller]
pub fn show_me<T: serde::Serialize + ?Sized>(data: &T, title: Option<&str>, location: bool) -> String {
    let caller = std::panic::Location::caller();
    let rule = "================================================";
    let mut out = String::from("<div class=\"debug\">");

    if location || title.is_some() {
        out.push_str(&format!("  <p>{}<br/>", rule));
    }
    if let Some(title) = title {
        out.push_str(title);
        if location {
            out.push_str(&format!("<br/>{}</br/>", rule));
        }
    }
    if location {
        out.push_str(&format!("{} # {}", caller.file(), caller.line()));
    }
    if location || title.is_some() {
        out.push_str(&format!("<br/>{}</p>", rule));
    }

    match serde_json::to_value(data) {
        Ok(serde_json::Value::Array(_)) | Ok(serde_json::Value::Object(_)) => {
            let pretty = serde_json::to_string_pretty(data).unwrap_or_default();
            out.push_str(&format!("<pre>{}</pre>", pretty));
        }
        Ok(serde_json::Value::String(s)) => out.push_str(&format!("<p>{}</p>", s)),
        Ok(other) => out.push_str(&format!("<p>{}</p>", other)),
        Err(e) => out.push_str(&format!("<p>{}</p>", e)),
    }
    out.push_str("</div>");
    out
}

/// Request validation helpers bound to the shared config.
#[derive(Debug, Clone)]
pub struct Helpers {
    env: Arc<Environment>,
}

impl Helpers {
    pub fn new(env: Arc<Environment>) -> Self {
        Self { env }
    }

    fn sign(&self, value: &str) -> String {
        let salt = self.env.get_str("SecuritySalt").unwrap_or_default();
        let mut hasher = Md5::new();
        hasher.update(value.as_bytes());
        hasher.update(salt.as_bytes());
        hex::encode_upper(hasher.finalize())
    }

    fn required<'a>(route: &'a RouteParams, key: &str) -> Result<&'a str> {
        match route.get(key).map(String::as_str) {
            Some(value) if !value.is_empty() => Ok(value),
            _ => Err(MsLibError::ValidationError {
                code: 1003,
                message: "Missing validation parameters".to_string(),
            }),
        }
    }

    fn check_hash(&self, value: &str, hash: &str) -> Result<()> {
        if self.sign(value) != hash {
            return Err(MsLibError::ValidationError {
                code: 1004,
                message: "Invalid security token".to_string(),
            });
        }
        Ok(())
    }

    /// Checks that `hash` is the upper-case MD5 of `id` + `SecuritySalt`.
    pub fn validate_url(&self, route: &RouteParams) -> Result<()> {
        let id = Self::required(route, "id")?;
        let hash = Self::required(route, "hash")?;
        self.check_hash(id, hash)
    }

    /// Like [`Helpers::validate_url`] over `timestamp`, which must also be recent.
    pub fn validate_fm_timebased_url(&self, route: &RouteParams) -> Result<()> {
        let timestamp = Self::required(route, "timestamp")?;
        let hash = Self::required(route, "hash")?;
        self.check_hash(timestamp, hash)?;

        let now = chrono::Utc::now().timestamp();
        let issued = timestamp.trim().parse::<i64>().unwrap_or(i64::MIN);
        if issued.saturating_add(TIMEBASED_URL_LIFETIME_SECS) < now {
            return Err(MsLibError::ValidationError {
                code: 1004,
                message: "URL has expired".to_string(),
            });
        }
        Ok(())
    }

    pub fn split_path(&self, route: &RouteParams) -> Vec<String> {
        route
            .get("path")
            .map(|path| path.split('/').map(str::to_string).collect())
            .unwrap_or_else(|| vec![String::new()])
    }

    pub fn correct_path(&self, path: &str) -> String {
        correct_path(path)
    }
}
