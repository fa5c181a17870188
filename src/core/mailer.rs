use crate::config::environment::{Environment, Requirement};
use crate::config::sections::{MailerConfig, MailerType, SiteAdminConfig};
use crate::domain::model::{Recipient, RecipientKind, SendResult};
use crate::domain::ports::MailTransport;
use crate::utils::error::{MsLibError, Result};
use crate::utils::helpers::template_dir;
use crate::utils::validation::Validate;
use async_trait::async_trait;
use lettre::message::{Mailbox, MultiPart};
use lettre::transport::smtp::authentication::Credentials;
use lettre::transport::smtp::client::{Tls, TlsParameters};
use lettre::{
    Address, AsyncSendmailTransport, AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
};
use serde::Serialize;
use std::sync::Arc;

const MAILER_REQUIREMENTS: Requirement<'static> =
    Requirement::Section("Mailer", &["Type", "From", "Email"]);

pub const ALERT_TEMPLATE: &str = "alert.html";

pub struct SmtpMailTransport {
    inner: AsyncSmtpTransport<Tokio1Executor>,
}

#[async_trait]
impl MailTransport for SmtpMailTransport {
    async fn deliver(&self, message: Message) -> Result<()> {
        self.inner.send(message).await?;
        Ok(())
    }
}

pub struct SendmailMailTransport {
    inner: AsyncSendmailTransport<Tokio1Executor>,
}

#[async_trait]
impl MailTransport for SendmailMailTransport {
    async fn deliver(&self, message: Message) -> Result<()> {
        self.inner.send(message).await?;
        Ok(())
    }
}

/// Sends HTML mail using the `[Mailer]` settings.
pub struct EmailSender {
    env: Arc<Environment>,
    config: MailerConfig,
    transport: Arc<dyn MailTransport>,
}

impl EmailSender {
    pub fn new(env: Arc<Environment>) -> Result<Self> {
        if !env.conf_check(&[MAILER_REQUIREMENTS]) {
            return Err(MsLibError::ComponentConfigMissing {
                component: "EmailSender",
            });
        }

        let config: MailerConfig = env.section("Mailer")?;
        let transport = Self::connect(&config)?;
        Ok(Self {
            env,
            config,
            transport,
        })
    }

    /// Skips the `[Mailer]` lookup and uses the given transport.
    pub fn with_transport(
        env: Arc<Environment>,
        config: MailerConfig,
        transport: Arc<dyn MailTransport>,
    ) -> Self {
        Self {
            env,
            config,
            transport,
        }
    }

    pub fn connect(config: &MailerConfig) -> Result<Arc<dyn MailTransport>> {
        config.validate()?;

        match config.kind {
            MailerType::Smtp => {
                let smtp = config
                    .smtp
                    .as_ref()
                    .ok_or_else(|| MsLibError::MissingConfigError {
                        field: "Mailer.SMTP".to_string(),
                    })?;

                let mut builder = if smtp.ssl {
                    AsyncSmtpTransport::<Tokio1Executor>::relay(&smtp.host)?
                } else {
                    let tls = TlsParameters::new(smtp.host.clone())?;
                    AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(smtp.host.as_str())
                        .tls(Tls::Opportunistic(tls))
                };
                builder = builder.port(smtp.port);

                if smtp.auth {
                    builder = builder.credentials(Credentials::new(
                        smtp.username.clone().unwrap_or_default(),
                        smtp.password.clone().unwrap_or_default(),
                    ));
                }

                tracing::debug!(
                    "SMTP transport ready for {}:{} (ssl: {}, auth: {})",
                    smtp.host,
                    smtp.port,
                    smtp.ssl,
                    smtp.auth
                );
                Ok(Arc::new(SmtpMailTransport {
                    inner: builder.build(),
                }))
            }
            MailerType::Sendmail => Ok(Arc::new(SendmailMailTransport {
                inner: AsyncSendmailTransport::<Tokio1Executor>::new(),
            })),
        }
    }

    pub fn config(&self) -> &MailerConfig {
        &self.config
    }

    /// Sends an HTML message with a generated plain-text alternative.
    ///
    /// Recipients with an empty address or an unknown type are skipped.
    pub async fn send_email(&self, recipients: &[Recipient], subject: &str, body: &str) -> SendResult {
        match self.build_message(recipients, subject, body) {
            Ok(message) => match self.transport.deliver(message).await {
                Ok(()) => SendResult {
                    sent: true,
                    message: "Message sent.".to_string(),
                },
                Err(e) => {
                    tracing::warn!("Mail delivery failed: {}", e);
                    SendResult {
                        sent: false,
                        message: format!("Error: {}", e),
                    }
                }
            },
            Err(e) => SendResult {
                sent: false,
                message: format!("Error: {}", e),
            },
        }
    }

    fn build_message(&self, recipients: &[Recipient], subject: &str, body: &str) -> Result<Message> {
        let address: Address = self.config.email.parse().map_err(MsLibError::mail)?;
        let from = Mailbox::new(Some(self.config.from_name.clone()), address);

        let mut builder = Message::builder()
            .from(from.clone())
            .sender(from)
            .subject(subject);

        let mut added = 0;
        for recipient in recipients {
            if recipient.address.is_empty() {
                continue;
            }
            let Some(kind) = RecipientKind::parse(&recipient.kind) else {
                tracing::debug!("Skipping recipient with type '{}'", recipient.kind);
                continue;
            };
            let address: Address = match recipient.address.parse() {
                Ok(address) => address,
                Err(e) => {
                    tracing::warn!("Skipping invalid address '{}': {}", recipient.address, e);
                    continue;
                }
            };

            let name = (!recipient.name.is_empty()).then(|| recipient.name.clone());
            let mailbox = Mailbox::new(name, address);
            builder = match kind {
                RecipientKind::To => builder.to(mailbox),
                RecipientKind::Cc => builder.cc(mailbox),
                RecipientKind::Bcc => builder.bcc(mailbox),
            };
            added += 1;
        }

        if added == 0 {
            return Err(MsLibError::mail(
                "You must provide at least one recipient email address.",
            ));
        }

        Ok(builder.multipart(MultiPart::alternative_plain_html(
            alt_body(body),
            body.to_string(),
        ))?)
    }

    /// Mails the site administrator using the `alert.html` template.
    ///
    /// Strings are inserted as-is; anything else is pretty-printed in a `<pre>` block.
    pub async fn alert_sys_admin<E: Serialize + ?Sized>(
        &self,
        action: &str,
        error: &E,
    ) -> Result<SendResult> {
        let admin: SiteAdminConfig = self.env.section("SiteAdmin")?;
        let path = template_dir(&self.env)?.join(ALERT_TEMPLATE);
        let template = tokio::fs::read_to_string(&path).await?;

        let error_str = match serde_json::to_value(error)? {
            serde_json::Value::String(s) => s,
            other => format!("<pre>{}</pre>", serde_json::to_string_pretty(&other)?),
        };
        let body = template
            .replace("{action}", action)
            .replace("{error}", &error_str);

        let recipients = [Recipient::new(admin.email, admin.name, RecipientKind::To)];
        let result = self
            .send_email(&recipients, &admin.error_subject, &body)
            .await;

        if !result.sent {
            tracing::error!("Unable to alert the site administrator: {}", result.message);
        }
        Ok(result)
    }
}

fn alt_body(body: &str) -> String {
    body.replace("<p>", "\n\n").replace("<br />", "\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::environment::ConfigFormat;
    use crate::config::sections::SmtpConfig;
    use std::sync::Mutex;
    use tempfile::TempDir;

    #[derive(Clone, Default)]
    struct CapturingTransport {
        sent: Arc<Mutex<Vec<Message>>>,
    }

    #[async_trait]
    impl MailTransport for CapturingTransport {
        async fn deliver(&self, message: Message) -> Result<()> {
            self.sent.lock().unwrap().push(message);
            Ok(())
        }
    }

    struct FailingTransport;

    #[async_trait]
    impl MailTransport for FailingTransport {
        async fn deliver(&self, _message: Message) -> Result<()> {
            Err(MsLibError::mail("connection refused"))
        }
    }

    fn mailer_config() -> MailerConfig {
        MailerConfig {
            kind: MailerType::Smtp,
            from_name: "Order Desk".to_string(),
            email: "orders@example.com".to_string(),
            smtp: Some(SmtpConfig {
                host: "smtp.example.com".to_string(),
                port: 25,
                auth: false,
                username: None,
                password: None,
                ssl: false,
            }),
        }
    }

    fn sender_with(transport: Arc<dyn MailTransport>) -> (EmailSender, Arc<Environment>) {
        let env = Arc::new(Environment::new());
        let sender = EmailSender::with_transport(env.clone(), mailer_config(), transport);
        (sender, env)
    }

    #[test]
    fn test_alt_body() {
        assert_eq!(alt_body("<p>Hi<br />there"), "\n\nHi\nthere");
    }

    #[test]
    fn test_new_requires_mailer_config() {
        let env = Arc::new(Environment::new());
        env.populate_str(ConfigFormat::Toml, "[Mailer]\nType = \"smtp\"\nFrom = \"x\"")
            .unwrap();

        let err = EmailSender::new(env).err().unwrap();
        assert_eq!(
            err.to_string(),
            "Unable to instantiate EmailSender because config variables are missing"
        );
    }

    #[test]
    fn test_new_with_sendmail() {
        let env = Arc::new(Environment::new());
        env.populate_str(
            ConfigFormat::Toml,
            "[Mailer]\nType = \"sendmail\"\nFrom = \"Desk\"\nEmail = \"desk@example.com\"",
        )
        .unwrap();

        let sender = EmailSender::new(env).unwrap();
        assert_eq!(sender.config().kind, MailerType::Sendmail);
    }

    #[tokio::test]
    async fn test_send_email_routes_recipients() {
        let transport = CapturingTransport::default();
        let (sender, _env) = sender_with(Arc::new(transport.clone()));

        let recipients = vec![
            Recipient::new("fred@example.com", "Fred Spoon", RecipientKind::To),
            Recipient::new("copy@example.com", "", RecipientKind::Cc),
            Recipient::new("hidden@example.com", "", RecipientKind::Bcc),
            Recipient::new("", "Nobody", RecipientKind::To),
            Recipient {
                address: "odd@example.com".to_string(),
                name: String::new(),
                kind: "reply-to".to_string(),
            },
        ];

        let result = sender
            .send_email(&recipients, "Hello", "<p>Hello there</p>")
            .await;
        assert!(result.sent);
        assert_eq!(result.message, "Message sent.");

        let sent = transport.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].envelope().to().len(), 3);

        let formatted = String::from_utf8(sent[0].formatted()).unwrap();
        assert!(formatted.contains("Subject: Hello"));
        assert!(formatted.contains("Fred Spoon"));
        assert!(formatted.contains("Sender: "));
        assert!(!formatted.contains("odd@example.com"));
    }

    #[tokio::test]
    async fn test_send_email_recipient_type_is_case_insensitive() {
        let transport = CapturingTransport::default();
        let (sender, _env) = sender_with(Arc::new(transport.clone()));

        let recipients = vec![Recipient {
            address: "fred@example.com".to_string(),
            name: String::new(),
            kind: "TO".to_string(),
        }];
        assert!(sender.send_email(&recipients, "Hi", "Hi").await.sent);
    }

    #[tokio::test]
    async fn test_send_email_without_recipients() {
        let transport = CapturingTransport::default();
        let (sender, _env) = sender_with(Arc::new(transport.clone()));

        let result = sender.send_email(&[], "Hello", "body").await;
        assert!(!result.sent);
        assert!(result.message.starts_with("Error: "));
        assert!(transport.sent.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_send_email_reports_transport_failure() {
        let (sender, _env) = sender_with(Arc::new(FailingTransport));
        let recipients = [Recipient::new("a@example.com", "A", RecipientKind::To)];

        let result = sender.send_email(&recipients, "Hello", "body").await;
        assert!(!result.sent);
        assert_eq!(result.message, "Error: Mail error: connection refused");
    }

    #[tokio::test]
    async fn test_alert_sys_admin_fills_template() {
        let root = TempDir::new().unwrap();
        let templates = root.path().join("assets").join("templates");
        std::fs::create_dir_all(&templates).unwrap();
        std::fs::write(
            templates.join(ALERT_TEMPLATE),
            "<p>Action: {action}</p><p>Error: {error}</p>",
        )
        .unwrap();

        let transport = CapturingTransport::default();
        let (sender, env) = sender_with(Arc::new(transport.clone()));
        env.set("CodeRoot", root.path().display().to_string());
        env.populate_str(
            ConfigFormat::Toml,
            "[SiteAdmin]\nName = \"Admin\"\nEmail = \"admin@example.com\"\nErrorSubject = \"Site error\"",
        )
        .unwrap();

        let result = sender
            .alert_sys_admin("Loading classes", &serde_json::json!({"code": 7}))
            .await
            .unwrap();
        assert!(result.sent);

        let sent = transport.sent.lock().unwrap();
        assert_eq!(
            sent[0].envelope().to()[0].to_string(),
            "admin@example.com"
        );
        let formatted = String::from_utf8(sent[0].formatted()).unwrap();
        assert!(formatted.contains("Subject: Site error"));
        assert!(formatted.contains("Action: Loading classes"));
        assert!(formatted.contains("<pre>"));
    }

    #[tokio::test]
    async fn test_alert_sys_admin_without_template() {
        let root = TempDir::new().unwrap();
        let (sender, env) = sender_with(Arc::new(CapturingTransport::default()));
        env.set("CodeRoot", root.path().display().to_string());
        env.populate_str(
            ConfigFormat::Toml,
            "[SiteAdmin]\nEmail = \"admin@example.com\"",
        )
        .unwrap();

        let err = sender.alert_sys_admin("x", "y").await.unwrap_err();
        assert!(matches!(err, MsLibError::IoError(_)));
    }
}
