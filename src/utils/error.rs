use thiserror::Error;

/// A FileMaker error code and message, as reported by the Data API.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("FileMaker error {code}: {}", self.fm_error())]
pub struct FmError {
    pub code: i64,
    pub message: String,
}

impl FmError {
    pub fn new(code: i64, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn fm_code(&self) -> i64 {
        self.code
    }

    /// Falls back to a generic description when FileMaker sent no message.
    pub fn fm_error(&self) -> String {
        if self.message.is_empty() {
            format!("Database error code {}", self.code)
        } else {
            self.message.clone()
        }
    }
}

#[derive(Error, Debug)]
pub enum MsLibError {
    #[error(transparent)]
    FileMaker(#[from] FmError),

    #[error("HTTP request failed: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("Template error: {0}")]
    TemplateError(#[from] minijinja::Error),

    #[error("Mail error: {message}")]
    MailError { message: String },

    #[error("Configuration error: {message}")]
    ConfigError { message: String },

    #[error("Configuration validation error in '{field}': {message}")]
    ConfigValidationError { field: String, message: String },

    #[error("Invalid value '{value}' for '{field}': {reason}")]
    InvalidConfigValueError {
        field: String,
        value: String,
        reason: String,
    },

    #[error("Missing required configuration: {field}")]
    MissingConfigError { field: String },

    #[error("Unable to instantiate {component} because config variables are missing")]
    ComponentConfigMissing { component: &'static str },

    #[error("Invalid URL '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("{message}")]
    ValidationError { code: i64, message: String },

    #[error("Data processing error: {message}")]
    ProcessingError { message: String },
}

impl MsLibError {
    /// Numeric code carried by the error, 0 when it has none.
    pub fn code(&self) -> i64 {
        match self {
            MsLibError::FileMaker(e) => e.code,
            MsLibError::ValidationError { code, .. } => *code,
            _ => 0,
        }
    }

    /// Bare message for display to an administrator. FileMaker errors give
    /// their own text and message-carrying variants drop the prefix.
    pub fn message(&self) -> String {
        match self {
            MsLibError::FileMaker(e) => e.fm_error(),
            MsLibError::MailError { message }
            | MsLibError::ConfigError { message }
            | MsLibError::ConfigValidationError { message, .. }
            | MsLibError::ValidationError { message, .. }
            | MsLibError::ProcessingError { message } => message.clone(),
            other => other.to_string(),
        }
    }

    pub fn mail(message: impl std::fmt::Display) -> Self {
        MsLibError::MailError {
            message: message.to_string(),
        }
    }
}

impl From<lettre::error::Error> for MsLibError {
    fn from(e: lettre::error::Error) -> Self {
        MsLibError::mail(e)
    }
}

impl From<lettre::transport::smtp::Error> for MsLibError {
    fn from(e: lettre::transport::smtp::Error) -> Self {
        MsLibError::mail(e)
    }
}

impl From<lettre::transport::sendmail::Error> for MsLibError {
    fn from(e: lettre::transport::sendmail::Error) -> Self {
        MsLibError::mail(e)
    }
}

pub type Result<T> = std::result::Result<T, MsLibError>;
