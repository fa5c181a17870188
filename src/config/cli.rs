use crate::utils::error::Result;
use crate::utils::validation::{validate_non_empty_string, validate_range, validate_url, Validate};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Debug, Clone, Parser)]
#[command(name = "mslib")]
#[command(about = "Inspect and exercise an MSLib application root")]
pub struct CliConfig {
    /// Application root containing app/config.toml
    #[arg(short, long, default_value = ".", global = true)]
    pub root: PathBuf,

    #[arg(short, long, global = true, help = "Enable verbose output")]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Clone, Subcommand)]
pub enum Command {
    /// Bootstrap the root and list the services it enables
    Check,

    /// Print the JSON error body for an HTTP status code
    Status {
        code: u16,
        /// Replace the standard reason phrase
        #[arg(long)]
        message: Option<String>,
    },

    /// GET a URL using the [Curl] settings
    Fetch {
        url: String,
        /// Write the body here instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Find FileMaker records matching field=value pairs
    Find {
        layout: String,
        #[arg(value_parser = parse_criterion)]
        criteria: Vec<(String, String)>,
        #[arg(long)]
        max: Option<usize>,
        #[arg(long, default_value = "0")]
        start: usize,
        /// Return raw field values instead of HTML-escaped ones
        #[arg(long)]
        decode: bool,
    },

    /// Send an alert to the site administrator
    Alert { action: String, message: String },
}

fn parse_criterion(s: &str) -> std::result::Result<(String, String), String> {
    match s.split_once('=') {
        Some((field, value)) if !field.is_empty() => Ok((field.to_string(), value.to_string())),
        _ => Err(format!("expected field=value, got '{}'", s)),
    }
}

impl Validate for CliConfig {
    fn validate(&self) -> Result<()> {
        match &self.command {
            Command::Status { code, .. } => validate_range("code", *code, 100, 599),
            Command::Fetch { url, .. } => validate_url("url", url),
            Command::Find { layout, .. } => validate_non_empty_string("layout", layout),
            Command::Alert { action, .. } => validate_non_empty_string("action", action),
            Command::Check => Ok(()),
        }
    }
}
