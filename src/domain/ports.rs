use crate::utils::error::Result;
use async_trait::async_trait;
use lettre::Message;

/// Delivers a fully built message. Implemented for SMTP and sendmail, and by
/// test doubles that capture outgoing mail.
#[async_trait]
pub trait MailTransport: Send + Sync {
    async fn deliver(&self, message: Message) -> Result<()>;
}
