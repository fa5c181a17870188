use super::client::{FileMakerClient, Range, RawRecord, ResultSet, ScriptCall};
use super::extract::{extract_records, process_return, FindOptions, Returned, Returning};
use crate::config::environment::{Environment, Requirement};
use crate::config::sections::{CurlConfig, FmServerConfig};
use crate::core::http_client::HttpClient;
use crate::core::mailer::EmailSender;
use crate::domain::model::Record;
use crate::utils::error::{FmError, MsLibError, Result};
use crate::utils::validation::Validate;
use serde_json::{Map, Value};
use std::sync::Arc;

const FM_REQUIREMENTS: Requirement<'static> =
    Requirement::Section("FMServer", &["host", "database", "username", "password"]);

/// Simplified access to one FileMaker database.
///
/// The Data API session is opened on first use and shared by every call.
/// Call [`FmConnector::close`] when done to release it on the server.
pub struct FmConnector {
    env: Arc<Environment>,
    config: FmServerConfig,
    client: FileMakerClient,
    mailer: Option<Arc<EmailSender>>,
}

impl FmConnector {
    pub fn new(env: Arc<Environment>) -> Result<Self> {
        if !env.conf_check(&[FM_REQUIREMENTS]) {
            return Err(MsLibError::ComponentConfigMissing {
                component: "FmConnector",
            });
        }

        let config: FmServerConfig = env.section("FMServer")?;
        config.validate()?;
        let client = FileMakerClient::new(config.clone())?;

        tracing::debug!("FileMaker connector ready for {}", client.base_url());
        Ok(Self {
            env,
            config,
            client,
            mailer: None,
        })
    }

    /// Mailer used to report failed log writes.
    pub fn with_mailer(mut self, mailer: Arc<EmailSender>) -> Self {
        self.mailer = Some(mailer);
        self
    }

    /// The underlying connection, for requests this wrapper does not cover.
    pub fn get(&self) -> &FileMakerClient {
        &self.client
    }

    /// Ends the Data API session. Does nothing when none is open.
    pub async fn close(&self) -> Result<()> {
        self.client.logout().await
    }

    /// AND find over `query`. An empty query selects every record.
    pub async fn select(
        &self,
        layout: &str,
        query: &Map<String, Value>,
        options: &FindOptions,
    ) -> Result<Vec<Record>> {
        let range = Range::new(options.start, options.max_records);
        let set = if query.is_empty() {
            self.client.list(layout, range).await?
        } else {
            self.client.find(layout, query, range).await?
        };
        extract_records(&set, options)
    }

    pub async fn select_any(&self, layout: &str, returning: &Returning) -> Result<Returned> {
        let set = self.client.find_any(layout).await?;
        process_return(&set, returning, &FindOptions::default())
    }

    /// `set_size` of `None` returns every record from `start` on.
    pub async fn select_all(
        &self,
        layout: &str,
        start: usize,
        set_size: Option<usize>,
        options: &FindOptions,
        returning: &Returning,
    ) -> Result<Returned> {
        let set = self.client.list(layout, Range::new(start, set_size)).await?;
        process_return(&set, returning, options)
    }

    pub async fn insert(
        &self,
        layout: &str,
        data: &Map<String, Value>,
        returning: &Returning,
        script: Option<&ScriptCall>,
    ) -> Result<Returned> {
        let created = self.client.create(layout, data, script).await?;
        tracing::debug!("Created record {} on {}", created.record_id, layout);

        let set = self.reload(layout, created, returning).await?;
        match process_return(&set, returning, &FindOptions::default())? {
            Returned::Records(records) => Ok(records
                .into_iter()
                .next()
                .map(Returned::Record)
                .unwrap_or(Returned::Nothing)),
            other => Ok(other),
        }
    }

    pub async fn update(
        &self,
        layout: &str,
        record_id: &str,
        data: &Map<String, Value>,
        returning: &Returning,
        script: Option<&ScriptCall>,
    ) -> Result<Returned> {
        let mod_id = self.client.edit(layout, record_id, data, script).await?;
        tracing::debug!("Updated record {} on {} (mod {})", record_id, layout, mod_id);

        let edited = RawRecord {
            record_id: record_id.to_string(),
            mod_id,
            ..Default::default()
        };
        let set = self.reload(layout, edited, returning).await?;
        process_return(&set, returning, &FindOptions::default())
    }

    /// Create and edit replies carry ids only, so field data is fetched when asked for.
    async fn reload(
        &self,
        layout: &str,
        record: RawRecord,
        returning: &Returning,
    ) -> Result<ResultSet> {
        match returning {
            Returning::Records | Returning::Field(_) => {
                self.client.get_record(layout, &record.record_id).await
            }
            Returning::RecordId | Returning::Nothing => Ok(ResultSet {
                records: vec![record],
                data_info: None,
            }),
        }
    }

    /// Writes an entry to the `logLayout` layout.
    ///
    /// Arrays and objects are stored as pretty-printed JSON. FileMaker
    /// failures are reported to the site administrator and yield `Ok(None)`.
    pub async fn log(&self, entry: &Map<String, Value>) -> Result<Option<Record>> {
        let layout = self
            .config
            .log_layout
            .as_deref()
            .filter(|l| !l.is_empty())
            .ok_or_else(|| MsLibError::MissingConfigError {
                field: "FMServer.logLayout".to_string(),
            })?;

        let mut flattened = Map::new();
        for (key, value) in entry {
            let value = match value {
                Value::Array(_) | Value::Object(_) => {
                    Value::String(serde_json::to_string_pretty(value)?)
                }
                other => other.clone(),
            };
            flattened.insert(key.clone(), value);
        }

        match self.insert(layout, &flattened, &Returning::Records, None).await {
            Ok(Returned::Record(record)) => Ok(Some(record)),
            Ok(_) => Ok(None),
            Err(MsLibError::FileMaker(e)) => {
                tracing::warn!("Failed to write log entry: {}", e);
                self.alert_log_failure(&e).await;
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    async fn alert_log_failure(&self, error: &FmError) {
        let Some(mailer) = &self.mailer else {
            return;
        };

        let message = format!(
            "FileMaker returned error code: {} message: {}",
            error.fm_code(),
            error.fm_error()
        );
        if let Err(e) = mailer
            .alert_sys_admin("Attempting to write log entry", &message)
            .await
        {
            tracing::warn!("Failed to alert site administrator: {}", e);
        }
    }

    /// Fetches an externally stored container file using the FileMaker credentials.
    pub async fn get_external_container_content(&self, path: &str) -> Result<Vec<u8>> {
        let protocol = self
            .config
            .fmp_container_protocol
            .as_deref()
            .filter(|p| !p.is_empty())
            .unwrap_or("https");
        let url = format!("{}://{}{}", protocol, self.config.host, path);

        let mut curl: CurlConfig = self.env.section_or_default("Curl")?;
        curl.username = Some(self.config.username.clone());
        curl.password = Some(self.config.password.clone());
        if let Some(method) = self.config.curl_auth_type {
            curl.auth_method = method;
        }

        let mut client = HttpClient::from_config(curl)?;
        let response = client.send_get(&url).await?;
        if response.status != 200 {
            tracing::debug!(
                "Failed to load container {} (status {}): {}",
                path,
                response.status,
                response.text()
            );
            return Err(FmError::new(
                i64::from(response.status),
                "Unable to load container content.",
            )
            .into());
        }
        Ok(response.body)
    }
}
