pub mod bootstrap;
#[cfg(feature = "cli")]
pub mod cli;
pub mod environment;
pub mod sections;

pub use bootstrap::{build_environment, BootstrapFailure, Services};
#[cfg(feature = "cli")]
pub use cli::{CliConfig, Command};
pub use environment::{ConfigFormat, Environment, Requirement};
