pub mod filemaker;
pub mod http_client;
pub mod mailer;
pub mod responder;

pub use crate::domain::model::{HttpReply, Record};
pub use crate::domain::ports::MailTransport;
pub use crate::utils::error::Result;
