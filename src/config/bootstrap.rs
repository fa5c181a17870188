//! Builds the shared environment and the components enabled under `[Options]`.

use crate::config::environment::{ConfigFormat, Environment};
use crate::config::sections::Options;
use crate::core::filemaker::FmConnector;
use crate::core::mailer::EmailSender;
use crate::core::responder::ErrorResponder;
use crate::domain::model::{HttpReply, SendResult};
use crate::utils::error::MsLibError;
use crate::utils::helpers::Helpers;
use crate::utils::logger;
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;

pub const CONFIG_FILE: &str = "config.toml";
pub const ERRORS_FILE: &str = "errors.toml";
pub const LOG_DIR: &str = "log";

/// Components constructed for one application root.
pub struct Services {
    pub env: Arc<Environment>,
    pub helpers: Option<Helpers>,
    pub mailer: Option<Arc<EmailSender>>,
    pub errors: Option<ErrorResponder>,
    pub filemaker: Option<FmConnector>,
}

impl Services {
    /// Names of the components that were built, in construction order.
    pub fn enabled(&self) -> Vec<&'static str> {
        let mut names = Vec::new();
        if self.helpers.is_some() {
            names.push("Helpers");
        }
        if self.mailer.is_some() {
            names.push("Mailer");
        }
        if self.errors.is_some() {
            names.push("Errors");
        }
        if self.filemaker.is_some() {
            names.push("FileMaker");
        }
        names
    }
}

/// A failed bootstrap, with the 500 reply to send in place of the page.
#[derive(Error, Debug)]
#[error("{error}")]
pub struct BootstrapFailure {
    pub error: MsLibError,
    pub response: HttpReply,
    /// Outcome of the administrator alert. `None` when no mailer was built
    /// or the alert could not be composed.
    pub alert: Option<SendResult>,
}

pub async fn build_environment<P: AsRef<Path>>(root: P) -> Result<Services, BootstrapFailure> {
    let root = root.as_ref();
    let env = Arc::new(Environment::new());
    let mut mailer = None;

    match build(&env, root, &mut mailer).await {
        Ok(services) => Ok(services),
        Err(error) => {
            tracing::error!("Failed to build environment for {}: {}", root.display(), error);

            let mut alert = None;
            if let Some(mailer) = &mailer {
                match mailer
                    .alert_sys_admin("Loading classes", &error.to_string())
                    .await
                {
                    Ok(result) => alert = Some(result),
                    Err(e) => tracing::warn!("Failed to alert site administrator: {}", e),
                }
            }

            let response = ErrorResponder::new(env, None).custom_message(500, &error.to_string());
            Err(BootstrapFailure {
                error,
                response,
                alert,
            })
        }
    }
}

async fn build(
    env: &Arc<Environment>,
    root: &Path,
    mailer: &mut Option<Arc<EmailSender>>,
) -> crate::Result<Services> {
    let app = root.join("app");
    env.populate(ConfigFormat::Toml, app.join(CONFIG_FILE))?;
    env.set("CodeRoot", root.display().to_string());

    let options: Options = env.section_or_default("Options")?;
    tracing::debug!("Bootstrapping {} with {:?}", root.display(), options);

    let helpers = options.helpers.then(|| Helpers::new(env.clone()));

    if options.mailer {
        *mailer = Some(Arc::new(EmailSender::new(env.clone())?));
    }

    let errors = if options.errors {
        env.populate(ConfigFormat::Toml, app.join(ERRORS_FILE))?;
        Some(ErrorResponder::new(env.clone(), mailer.clone()))
    } else {
        None
    };

    let filemaker = if options.filemaker {
        let connector = FmConnector::new(env.clone())?;
        Some(match mailer {
            Some(m) => connector.with_mailer(m.clone()),
            None => connector,
        })
    } else {
        None
    };

    if options.log {
        let dir = root.join(LOG_DIR);
        if !logger::init_file_logger(&dir)? {
            tracing::debug!("Subscriber already installed, not logging to {}", dir.display());
        }
    }

    Ok(Services {
        env: env.clone(),
        helpers,
        mailer: mailer.clone(),
        errors,
        filemaker,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;
    use tempfile::TempDir;

    fn write_app(root: &Path, config: &str, errors: Option<&str>) {
        let app = root.join("app");
        std::fs::create_dir_all(&app).unwrap();
        std::fs::write(app.join(CONFIG_FILE), config).unwrap();
        if let Some(errors) = errors {
            std::fs::write(app.join(ERRORS_FILE), errors).unwrap();
        }
    }

    #[tokio::test]
    async fn test_build_with_no_options() {
        let root = TempDir::new().unwrap();
        write_app(root.path(), "SecuritySalt = \"x\"\n", None);

        let services = build_environment(root.path()).await.unwrap();
        assert!(services.enabled().is_empty());
        assert_eq!(
            services.env.get_str("CodeRoot"),
            Some(root.path().display().to_string())
        );
    }

    #[tokio::test]
    async fn test_build_helpers_and_errors() {
        let root = TempDir::new().unwrap();
        write_app(
            root.path(),
            "[Options]\nHelpers = true\nErrors = true\n",
            Some("[errors.1000]\ntitle = \"Oops\"\n"),
        );

        let services = build_environment(root.path()).await.unwrap();
        assert_eq!(services.enabled(), vec!["Helpers", "Errors"]);
        assert!(services.env.get("errors").unwrap().get("1000").is_some());
    }

    #[tokio::test]
    async fn test_missing_mailer_config_fails_with_500() {
        let root = TempDir::new().unwrap();
        write_app(root.path(), "[Options]\nMailer = true\n", None);

        let failure = build_environment(root.path()).await.err().unwrap();
        assert!(matches!(
            failure.error,
            MsLibError::ComponentConfigMissing {
                component: "EmailSender"
            }
        ));
        assert_eq!(failure.response.status, 500);
        assert!(failure.alert.is_none());

        let body: Value = serde_json::from_str(&failure.response.body).unwrap();
        assert_eq!(
            body["ErrorMessage"],
            "Unable to instantiate EmailSender because config variables are missing"
        );
    }

    #[tokio::test]
    async fn test_missing_config_file() {
        let root = TempDir::new().unwrap();
        let failure = build_environment(root.path()).await.err().unwrap();
        assert!(failure
            .to_string()
            .contains("Unable to access requested config file"));
    }
}
