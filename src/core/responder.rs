use crate::config::environment::Environment;
use crate::config::sections::ErrorDefinition;
use crate::core::mailer::EmailSender;
use crate::domain::model::HttpReply;
use crate::utils::error::{MsLibError, Result};
use crate::utils::helpers::template_dir;
use serde_json::{json, Value};
use std::sync::Arc;

pub const ERROR_TEMPLATE: &str = "error.html.twig";

/// Fallback entry used when an error id has no definition of its own.
pub const DEFAULT_ERROR_ID: u32 = 1000;

pub fn reason_phrase(code: u16) -> Option<&'static str> {
    let reason = match code {
        100 => "Continue",
        101 => "Switching Protocols",
        102 => "Processing",
        200 => "OK",
        201 => "Created",
        202 => "Accepted",
        203 => "Non-Authoritative Information",
        204 => "No Content",
        205 => "Reset Content",
        206 => "Partial Content",
        207 => "Multi-Status",
        300 => "Multiple Choices",
        301 => "Moved Permanently",
        302 => "Found",
        303 => "See Other",
        304 => "Not Modified",
        305 => "Use Proxy",
        306 => "Switch Proxy",
        307 => "Temporary Redirect",
        400 => "Bad Request",
        401 => "Unauthorized",
        402 => "Payment Required",
        403 => "Forbidden",
        404 => "Not Found",
        405 => "Method Not Allowed",
        406 => "Not Acceptable",
        407 => "Proxy Authentication Required",
        408 => "Request Timeout",
        409 => "Conflict",
        410 => "Gone",
        411 => "Length Required",
        412 => "Precondition Failed",
        413 => "Request Entity Too Large",
        414 => "Request-URI Too Long",
        415 => "Unsupported Media Type",
        416 => "Requested Range Not Satisfiable",
        417 => "Expectation Failed",
        418 => "I'm a teapot",
        422 => "Unprocessable Entity",
        423 => "Locked",
        424 => "Failed Dependency",
        425 => "Unordered Collection",
        426 => "Upgrade Required",
        449 => "Retry With",
        450 => "Blocked by Windows Parental Controls",
        500 => "Internal Server Error",
        501 => "Not Implemented",
        502 => "Bad Gateway",
        503 => "Service Unavailable",
        504 => "Gateway Timeout",
        505 => "HTTP Version Not Supported",
        506 => "Variant Also Negotiates",
        507 => "Insufficient Storage",
        509 => "Bandwidth Limit Exceeded",
        510 => "Not Extended",
        _ => return None,
    };
    Some(reason)
}

pub fn status_line(code: u16) -> String {
    format!("HTTP/1.1 {} {}", code, reason_phrase(code).unwrap_or_default())
}

/// JSON error replies for API routes and rendered error pages for users.
pub struct ErrorResponder {
    env: Arc<Environment>,
    mailer: Option<Arc<EmailSender>>,
}

impl ErrorResponder {
    pub fn new(env: Arc<Environment>, mailer: Option<Arc<EmailSender>>) -> Self {
        Self { env, mailer }
    }

    pub fn set_header(&self, code: u16) -> String {
        status_line(code)
    }

    /// `{"Error": code, "ErrorMessage": <reason phrase>}`
    pub fn default_error(&self, code: u16) -> HttpReply {
        api_error(code, reason_phrase(code).unwrap_or_default())
    }

    pub fn custom_message(&self, code: u16, message: &str) -> HttpReply {
        api_error(code, message)
    }

    pub fn output_json(&self, code: u16, json: &Value) -> HttpReply {
        output_json(code, json)
    }

    /// Records the error for display, alerts the administrator when the
    /// definition asks for it, and renders the user error page.
    pub async fn fatal_user_error(&self, id: u32, error: &MsLibError) -> Result<HttpReply> {
        self.set_error(id, error).await?;
        self.html_exit()
    }

    async fn set_error(&self, id: u32, error: &MsLibError) -> Result<()> {
        let definition = self.definition(id)?;

        let mut alerts = match self.env.get("alerts") {
            Some(Value::Array(items)) => items,
            _ => Vec::new(),
        };
        alerts.push(serde_json::to_value(&definition)?);
        self.env.set("alerts", alerts);

        if definition.alert_sys_admin {
            self.error_alert(&definition, error).await;
        }
        Ok(())
    }

    fn definition(&self, id: u32) -> Result<ErrorDefinition> {
        let errors = self.env.get("errors").unwrap_or(Value::Null);
        let entry = errors
            .get(id.to_string())
            .or_else(|| errors.get(DEFAULT_ERROR_ID.to_string()))
            .cloned()
            .ok_or_else(|| MsLibError::MissingConfigError {
                field: format!("errors.{}", DEFAULT_ERROR_ID),
            })?;

        serde_json::from_value(entry).map_err(|e| MsLibError::ConfigValidationError {
            field: format!("errors.{}", id),
            message: e.to_string(),
        })
    }

    async fn error_alert(&self, definition: &ErrorDefinition, error: &MsLibError) {
        let Some(mailer) = &self.mailer else {
            tracing::warn!(
                "Error '{}' requests an admin alert but no mailer is configured",
                definition.error_action
            );
            return;
        };

        let message = definition
            .sys_admin_message
            .replace("#errorCode#", &error.code().to_string())
            .replace("#errorMessage#", &error.message());

        if let Err(e) = mailer
            .alert_sys_admin(&definition.error_action, &message)
            .await
        {
            tracing::warn!("Failed to alert site administrator: {}", e);
        }
    }

    fn html_exit(&self) -> Result<HttpReply> {
        let mut templates = minijinja::Environment::new();
        templates.set_loader(minijinja::path_loader(template_dir(&self.env)?));

        let alerts = self.env.get("alerts").unwrap_or_else(|| json!([]));
        let body = templates
            .get_template(ERROR_TEMPLATE)?
            .render(minijinja::context! { err => alerts })?;

        Ok(HttpReply {
            status: 200,
            headers: vec![(
                "Content-Type".to_string(),
                "text/html; charset=utf-8".to_string(),
            )],
            body,
        })
    }
}

fn api_error(code: u16, message: &str) -> HttpReply {
    output_json(code, &json!({ "Error": code, "ErrorMessage": message }))
}

fn output_json(code: u16, json: &Value) -> HttpReply {
    HttpReply {
        status: code,
        headers: vec![
            ("Content-Type".to_string(), "application/json".to_string()),
            ("Status".to_string(), status_line(code)),
        ],
        body: json.to_string(),
    }
}
