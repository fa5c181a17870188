//! Thin async wrapper over the FileMaker Data API.

use crate::config::sections::FmServerConfig;
use crate::utils::error::{FmError, MsLibError, Result};
use rand_core::{OsRng, RngCore};
use reqwest::{Client, Method};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;
use std::future::Future;
use tokio::sync::Mutex;
use url::Url;

/// Data API code for an expired or unknown session token.
pub const INVALID_TOKEN: i64 = 952;

/// Records fetched per request when a caller asks for everything.
pub const PAGE_SIZE: usize = 100;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DataInfo {
    #[serde(default)]
    pub total_record_count: u64,
    #[serde(default)]
    pub found_count: u64,
    #[serde(default)]
    pub returned_count: u64,
}

/// One record as the Data API returns it.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawRecord {
    #[serde(default)]
    pub field_data: Map<String, Value>,
    #[serde(default)]
    pub portal_data: BTreeMap<String, Vec<Map<String, Value>>>,
    #[serde(default, deserialize_with = "string_or_number")]
    pub record_id: String,
    #[serde(default, deserialize_with = "string_or_number")]
    pub mod_id: String,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ResultSet {
    #[serde(rename = "data", default)]
    pub records: Vec<RawRecord>,
    #[serde(rename = "dataInfo", default)]
    pub data_info: Option<DataInfo>,
}

/// A script to run after a create or edit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptCall {
    pub name: String,
    pub param: Option<String>,
}

impl ScriptCall {
    pub fn new(name: impl Into<String>, param: Option<String>) -> Self {
        Self {
            name: name.into(),
            param,
        }
    }
}

/// Zero-based start and optional size of a found-set window.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Range {
    pub start: usize,
    pub limit: Option<usize>,
}

impl Range {
    pub fn new(start: usize, limit: Option<usize>) -> Self {
        Self { start, limit }
    }
}

#[derive(Deserialize)]
struct Envelope {
    #[serde(default)]
    response: Value,
    #[serde(default)]
    messages: Vec<ApiMessage>,
}

#[derive(Deserialize)]
struct ApiMessage {
    #[serde(deserialize_with = "string_or_number")]
    code: String,
    #[serde(default)]
    message: String,
}

fn string_or_number<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<String, D::Error> {
    match Value::deserialize(deserializer)? {
        Value::String(s) => Ok(s),
        Value::Number(n) => Ok(n.to_string()),
        Value::Null => Ok(String::new()),
        other => Err(serde::de::Error::custom(format!(
            "expected a string or number, got {}",
            other
        ))),
    }
}

/// Session-holding Data API connection for one database.
///
/// Logs in lazily on the first call and keeps the token until [`logout`](Self::logout).
pub struct FileMakerClient {
    config: FmServerConfig,
    base: Url,
    http: Client,
    token: Mutex<Option<String>>,
}

impl FileMakerClient {
    pub fn new(config: FmServerConfig) -> Result<Self> {
        let base = config.data_api_url()?;
        let http = Client::builder()
            .user_agent(concat!("mslib/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            config,
            base,
            http,
            token: Mutex::new(None),
        })
    }

    pub fn config(&self) -> &FmServerConfig {
        &self.config
    }

    pub fn base_url(&self) -> &Url {
        &self.base
    }

    pub async fn has_session(&self) -> bool {
        self.token.lock().await.is_some()
    }

    /// Opens a fresh session, replacing any token already held.
    pub async fn login(&self) -> Result<()> {
        let token = self.open_session().await?;
        *self.token.lock().await = Some(token);
        Ok(())
    }

    pub async fn logout(&self) -> Result<()> {
        let Some(token) = self.token.lock().await.take() else {
            return Ok(());
        };

        let url = self.endpoint(&["sessions", token.as_str()])?;
        let response = self.http.delete(url).send().await?;
        let status = response.status().as_u16();
        unwrap_envelope(status, &response.text().await?)?;
        tracing::debug!("Closed Data API session for {}", self.config.database);
        Ok(())
    }

    /// AND find over `query`; an empty range limit pages through the whole found set.
    pub async fn find(&self, layout: &str, query: &Map<String, Value>, range: Range) -> Result<ResultSet> {
        self.paged(range, |start, limit| self.find_page(layout, query, start, limit))
            .await
    }

    pub async fn list(&self, layout: &str, range: Range) -> Result<ResultSet> {
        self.paged(range, |start, limit| self.list_page(layout, start, limit))
            .await
    }

    /// One record picked at random from the layout's table.
    pub async fn find_any(&self, layout: &str) -> Result<ResultSet> {
        let probe = self.list_page(layout, 0, 1).await?;
        let found = probe.data_info.map_or(0, |info| info.found_count);
        if found <= 1 {
            return Ok(probe);
        }

        let offset = (OsRng.next_u64() % found) as usize;
        self.list_page(layout, offset, 1).await
    }

    pub async fn get_record(&self, layout: &str, record_id: &str) -> Result<ResultSet> {
        let response = self
            .call(Method::GET, &["layouts", layout, "records", record_id], &[], None)
            .await?;
        Ok(serde_json::from_value(response)?)
    }

    /// Returns the new record's ids; field data is not part of the reply.
    pub async fn create(
        &self,
        layout: &str,
        field_data: &Map<String, Value>,
        script: Option<&ScriptCall>,
    ) -> Result<RawRecord> {
        let body = with_script(json!({ "fieldData": field_data }), script);
        let response = self
            .call(Method::POST, &["layouts", layout, "records"], &[], Some(&body))
            .await?;
        Ok(serde_json::from_value(response)?)
    }

    /// Returns the record's new modification id.
    pub async fn edit(
        &self,
        layout: &str,
        record_id: &str,
        field_data: &Map<String, Value>,
        script: Option<&ScriptCall>,
    ) -> Result<String> {
        let body = with_script(json!({ "fieldData": field_data }), script);
        let response = self
            .call(
                Method::PATCH,
                &["layouts", layout, "records", record_id],
                &[],
                Some(&body),
            )
            .await?;

        let edited: RawRecord = serde_json::from_value(response)?;
        Ok(edited.mod_id)
    }

    async fn find_page(
        &self,
        layout: &str,
        query: &Map<String, Value>,
        start: usize,
        limit: usize,
    ) -> Result<ResultSet> {
        let body = json!({
            "query": [query],
            "offset": (start + 1).to_string(),
            "limit": limit.to_string(),
        });
        let response = self
            .call(Method::POST, &["layouts", layout, "_find"], &[], Some(&body))
            .await?;
        Ok(serde_json::from_value(response)?)
    }

    async fn list_page(&self, layout: &str, start: usize, limit: usize) -> Result<ResultSet> {
        let query = [
            ("_offset", (start + 1).to_string()),
            ("_limit", limit.to_string()),
        ];
        let response = self
            .call(Method::GET, &["layouts", layout, "records"], &query, None)
            .await?;
        Ok(serde_json::from_value(response)?)
    }

    async fn paged<F, Fut>(&self, range: Range, fetch: F) -> Result<ResultSet>
    where
        F: Fn(usize, usize) -> Fut,
        Fut: Future<Output = Result<ResultSet>>,
    {
        if let Some(limit) = range.limit {
            return fetch(range.start, limit).await;
        }

        let mut set = fetch(range.start, PAGE_SIZE).await?;
        let found = set.data_info.map_or(0, |info| info.found_count) as usize;
        let mut last = set.records.len();

        while last == PAGE_SIZE && range.start + set.records.len() < found {
            let page = fetch(range.start + set.records.len(), PAGE_SIZE).await?;
            last = page.records.len();
            set.records.extend(page.records);
        }

        if let Some(info) = set.data_info.as_mut() {
            info.returned_count = set.records.len() as u64;
        }
        Ok(set)
    }

    async fn call(
        &self,
        method: Method,
        segments: &[&str],
        query: &[(&str, String)],
        body: Option<&Value>,
    ) -> Result<Value> {
        let token = self.token().await?;
        match self.request(method.clone(), segments, query, body, &token).await {
            Err(MsLibError::FileMaker(e)) if e.code == INVALID_TOKEN => {
                tracing::debug!("Data API token rejected, opening a new session");
                self.token.lock().await.take();
                let token = self.token().await?;
                self.request(method, segments, query, body, &token).await
            }
            other => other,
        }
    }

    async fn request(
        &self,
        method: Method,
        segments: &[&str],
        query: &[(&str, String)],
        body: Option<&Value>,
        token: &str,
    ) -> Result<Value> {
        let url = self.endpoint(segments)?;
        tracing::debug!("{} {}", method, url);

        let mut request = self.http.request(method, url).bearer_auth(token);
        if !query.is_empty() {
            request = request.query(query);
        }
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = request.send().await?;
        let status = response.status().as_u16();
        unwrap_envelope(status, &response.text().await?)
    }

    async fn token(&self) -> Result<String> {
        let mut guard = self.token.lock().await;
        if let Some(token) = guard.as_ref() {
            return Ok(token.clone());
        }

        let token = self.open_session().await?;
        *guard = Some(token.clone());
        Ok(token)
    }

    async fn open_session(&self) -> Result<String> {
        let url = self.endpoint(&["sessions"])?;
        let response = self
            .http
            .post(url)
            .basic_auth(&self.config.username, Some(&self.config.password))
            .json(&json!({}))
            .send()
            .await?;

        let status = response.status().as_u16();
        let reply = unwrap_envelope(status, &response.text().await?)?;
        let token = reply
            .get("token")
            .and_then(Value::as_str)
            .filter(|t| !t.is_empty())
            .ok_or_else(|| FmError::new(-1, "Data API login returned no token"))?;

        tracing::debug!("Opened Data API session for {}", self.config.database);
        Ok(token.to_string())
    }

    fn endpoint(&self, segments: &[&str]) -> Result<Url> {
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|_| MsLibError::InvalidUrl {
                url: self.base.to_string(),
                reason: "URL cannot be a base".to_string(),
            })?
            .extend(segments);
        Ok(url)
    }
}

fn with_script(mut body: Value, script: Option<&ScriptCall>) -> Value {
    if let Some(script) = script {
        body["script"] = Value::String(script.name.clone());
        if let Some(param) = &script.param {
            body["script.param"] = Value::String(param.clone());
        }
    }
    body
}

/// Returns the `response` member, or the first non-zero message as an [`FmError`].
fn unwrap_envelope(status: u16, text: &str) -> Result<Value> {
    let envelope: Envelope = serde_json::from_str(text).map_err(|_| {
        FmError::new(
            i64::from(status),
            format!("Unexpected Data API response (HTTP {})", status),
        )
    })?;

    if let Some(message) = envelope.messages.iter().find(|m| m.code != "0") {
        let code = message.code.parse().unwrap_or(-1);
        return Err(FmError::new(code, message.message.clone()).into());
    }
    Ok(envelope.response)
}
