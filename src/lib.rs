pub mod config;
pub mod core;
pub mod domain;
pub mod utils;

#[cfg(feature = "cli")]
pub use crate::config::CliConfig;

pub use crate::config::{build_environment, BootstrapFailure, Environment, Services};
pub use crate::core::filemaker::{FindOptions, FmConnector, Returned, Returning};
pub use crate::core::http_client::HttpClient;
pub use crate::core::mailer::EmailSender;
pub use crate::core::responder::ErrorResponder;
pub use crate::utils::error::{FmError, MsLibError, Result};
pub use crate::utils::helpers::Helpers;
