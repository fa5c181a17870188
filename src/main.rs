use anyhow::Context;
use clap::Parser;
use mslib::config::{bootstrap, CliConfig, Command, ConfigFormat};
use mslib::utils::{logger, validation::Validate};
use mslib::{build_environment, Environment, ErrorResponder, FindOptions, HttpClient, Services};
use serde_json::{Map, Value};
use std::path::Path;
use std::sync::Arc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = CliConfig::parse();

    // 初始化日誌
    logger::init_cli_logger(config.verbose);

    tracing::info!("Starting mslib CLI");
    if config.verbose {
        tracing::debug!("CLI config: {:?}", config);
    }

    // 驗證參數
    if let Err(e) = config.validate() {
        tracing::error!("❌ Invalid arguments: {}", e);
        eprintln!("❌ {}", e);
        std::process::exit(1);
    }

    match config.command {
        Command::Check => {
            let services = bootstrap_or_exit(&config.root).await;
            let enabled = services.enabled();
            println!("✅ Environment built for {}", config.root.display());
            if enabled.is_empty() {
                println!("   no services enabled");
            } else {
                println!("   services: {}", enabled.join(", "));
            }
        }

        Command::Status { code, message } => {
            let responder = ErrorResponder::new(Arc::new(Environment::new()), None);
            let reply = match message {
                Some(message) => responder.custom_message(code, &message),
                None => responder.default_error(code),
            };
            println!("{}", responder.set_header(code));
            println!("{}", reply.body);
        }

        Command::Fetch { url, output } => {
            let env = Environment::new();
            let config_file = config.root.join("app").join(bootstrap::CONFIG_FILE);
            if config_file.exists() {
                env.populate(ConfigFormat::Toml, &config_file)?;
            }

            let mut client = HttpClient::new(&env)?;
            let response = client
                .send_get(&url)
                .await
                .with_context(|| format!("GET {} failed", url))?;
            tracing::info!("📥 {} -> {} ({} bytes)", url, response.status, response.body.len());

            match output {
                Some(path) => {
                    std::fs::write(&path, &response.body)?;
                    println!("📁 Saved to {}", path.display());
                }
                None => println!("{}", response.text()),
            }
        }

        Command::Find {
            layout,
            criteria,
            max,
            start,
            decode,
        } => {
            let services = bootstrap_or_exit(&config.root).await;
            let fm = services
                .filemaker
                .as_ref()
                .context("FileMaker is not enabled under [Options]")?;

            let query: Map<String, Value> = criteria
                .into_iter()
                .map(|(field, value)| (field, Value::String(value)))
                .collect();
            let options = FindOptions {
                max_records: max,
                start,
                decode,
                ..FindOptions::default()
            };

            let result = fm.select(&layout, &query, &options).await;
            if let Err(e) = fm.close().await {
                tracing::warn!("Failed to close Data API session: {}", e);
            }

            let records: Vec<_> = result?.into_iter().map(|r| r.data).collect();
            tracing::info!("Found {} record(s) on {}", records.len(), layout);
            println!("{}", serde_json::to_string_pretty(&records)?);
        }

        Command::Alert { action, message } => {
            let services = bootstrap_or_exit(&config.root).await;
            let mailer = services
                .mailer
                .as_ref()
                .context("Mailer is not enabled under [Options]")?;

            let result = mailer.alert_sys_admin(&action, &message).await?;
            if result.sent {
                println!("✅ {}", result.message);
            } else {
                eprintln!("❌ {}", result.message);
                std::process::exit(2);
            }
        }
    }

    Ok(())
}

async fn bootstrap_or_exit(root: &Path) -> Services {
    match build_environment(root).await {
        Ok(services) => services,
        Err(failure) => {
            tracing::error!("❌ Bootstrap failed: {}", failure);
            eprintln!("❌ {}", failure.response.body);
            std::process::exit(1);
        }
    }
}
