use crate::config::environment::Environment;
use crate::config::sections::{AuthMethod, CurlConfig};
use crate::utils::error::{MsLibError, Result};
use crate::utils::validation::Validate;
use reqwest::cookie::{CookieStore, Jar};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, CONTENT_TYPE};
use reqwest::redirect::Policy;
use reqwest::{Client, Method};
use serde_json::{Map, Value};
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};
use url::{form_urlencoded, Url};

const MAX_REDIRECTS: usize = 10;
const FORM_CONTENT_TYPE: &str = "application/x-www-form-urlencoded";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    pub body: Vec<u8>,
}

impl HttpResponse {
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

/// Details of the last transfer on the open handle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferInfo {
    pub status: u16,
    pub effective_url: String,
    pub content_type: Option<String>,
    pub elapsed: Duration,
}

struct Handle {
    client: Client,
    jar: Option<Arc<Jar>>,
    visited: Vec<Url>,
    info: Option<TransferInfo>,
}

/// HTTP client over one reusable handle, configured from the `[Curl]` section.
///
/// The handle is opened on the first request. It stays open across calls
/// unless `Single` is set, in which case every call closes it.
pub struct HttpClient {
    config: CurlConfig,
    handle: Option<Handle>,
    response: Option<Vec<u8>>,
}

impl HttpClient {
    pub fn new(env: &Environment) -> Result<Self> {
        Self::from_config(env.section_or_default("Curl")?)
    }

    pub fn from_config(config: CurlConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            handle: None,
            response: None,
        })
    }

    pub fn config(&self) -> &CurlConfig {
        &self.config
    }

    pub async fn send_get(&mut self, url: &str) -> Result<HttpResponse> {
        self.send(Method::GET, url, None).await
    }

    /// `data` is sent as-is; see [`post_pack`] and [`post_pack_flat`].
    pub async fn send_post(&mut self, url: &str, data: impl Into<String>) -> Result<HttpResponse> {
        self.send(Method::POST, url, Some(data.into())).await
    }

    pub async fn send_put(&mut self, url: &str, data: impl Into<String>) -> Result<HttpResponse> {
        self.send(Method::PUT, url, Some(data.into())).await
    }

    async fn send(&mut self, method: Method, url: &str, data: Option<String>) -> Result<HttpResponse> {
        let target = Url::parse(url).map_err(|e| MsLibError::InvalidUrl {
            url: url.to_string(),
            reason: e.to_string(),
        })?;

        if self.handle.is_none() {
            self.handle = Some(self.connect()?);
        }

        let result = self.exchange(method, target, data).await;
        if self.config.single {
            self.close();
        }
        result
    }

    async fn exchange(&mut self, method: Method, target: Url, data: Option<String>) -> Result<HttpResponse> {
        let config = &self.config;
        let Some(handle) = self.handle.as_mut() else {
            return Err(MsLibError::ProcessingError {
                message: "HTTP handle is not open".to_string(),
            });
        };

        let mut request = handle.client.request(method.clone(), target.clone());

        if let Some((username, password)) = config.credentials() {
            request = match config.auth_method {
                AuthMethod::Any | AuthMethod::Basic => request.basic_auth(username, Some(password)),
                AuthMethod::Bearer => request.bearer_auth(password),
            };
        }

        if let Some(body) = data {
            let has_content_type = config
                .http_header
                .iter()
                .any(|line| line.to_ascii_lowercase().starts_with("content-type"));
            if !has_content_type {
                request = request.header(CONTENT_TYPE, FORM_CONTENT_TYPE);
            }
            request = request.body(body);
        }

        let started = Instant::now();
        let response = request.send().await?;
        let status = response.status().as_u16();
        let effective_url = response.url().to_string();
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let body = response.bytes().await?.to_vec();
        let elapsed = started.elapsed();

        if config.verbose {
            tracing::info!(
                "{} {} -> {} ({} bytes, {:?}, content-type: {:?})",
                method,
                target,
                status,
                body.len(),
                elapsed,
                content_type
            );
        } else {
            tracing::debug!("{} {} -> {}", method, target, status);
        }

        if !handle.visited.contains(&target) {
            handle.visited.push(target);
        }
        handle.info = Some(TransferInfo {
            status,
            effective_url,
            content_type,
            elapsed,
        });

        self.response = Some(body.clone());
        Ok(HttpResponse { status, body })
    }

    fn connect(&self) -> Result<Handle> {
        let config = &self.config;

        let mut headers = HeaderMap::new();
        for (name, value) in config.header_pairs()? {
            let header_name = HeaderName::from_bytes(name.as_bytes()).map_err(|e| {
                MsLibError::InvalidConfigValueError {
                    field: "Curl.HTTPHeader".to_string(),
                    value: name.clone(),
                    reason: e.to_string(),
                }
            })?;
            let header_value =
                HeaderValue::from_str(&value).map_err(|e| MsLibError::InvalidConfigValueError {
                    field: "Curl.HTTPHeader".to_string(),
                    value: value.clone(),
                    reason: e.to_string(),
                })?;
            headers.append(header_name, header_value);
        }

        let redirect = if config.redirect {
            Policy::limited(MAX_REDIRECTS)
        } else {
            Policy::none()
        };

        let mut builder = Client::builder()
            .default_headers(headers)
            .user_agent(config.agent.clone())
            .redirect(redirect)
            // rustls has no separate host-name switch
            .danger_accept_invalid_certs(!config.verify_peer || !config.verify_host)
            .connection_verbose(config.verbose);

        if config.timelimit > 0 {
            builder = builder.timeout(Duration::from_secs(config.timelimit));
        }

        let jar = match &config.cookie_jar {
            Some(path) => {
                let jar = Arc::new(Jar::default());
                load_cookie_jar(&jar, Path::new(path))?;
                builder = builder.cookie_provider(jar.clone());
                Some(jar)
            }
            None => None,
        };

        tracing::debug!("Opened HTTP handle (agent: {})", config.agent);
        Ok(Handle {
            client: builder.build()?,
            jar,
            visited: Vec::new(),
            info: None,
        })
    }

    /// Body of the most recent response, kept after the handle closes.
    pub fn response(&self) -> Option<&[u8]> {
        self.response.as_deref()
    }

    /// Transfer details, available only while the handle is open.
    pub fn interrogate(&self) -> Option<&TransferInfo> {
        self.handle.as_ref().and_then(|h| h.info.as_ref())
    }

    pub fn is_open(&self) -> bool {
        self.handle.is_some()
    }

    /// Drops the handle, writing the cookie jar if one is configured.
    pub fn close(&mut self) {
        let Some(handle) = self.handle.take() else {
            return;
        };

        if let (Some(jar), Some(path)) = (&handle.jar, &self.config.cookie_jar) {
            if let Err(e) = save_cookie_jar(jar, &handle.visited, Path::new(path)) {
                tracing::warn!("Failed to write cookie jar {}: {}", path, e);
            }
        }
    }
}

impl Drop for HttpClient {
    fn drop(&mut self) {
        self.close();
    }
}

/// Each line holds a URL and the cookies it sends, separated by a tab.
fn load_cookie_jar(jar: &Jar, path: &Path) -> Result<()> {
    if !path.exists() {
        return Ok(());
    }

    for line in std::fs::read_to_string(path)?.lines() {
        let Some((url, cookies)) = line.split_once('\t') else {
            continue;
        };
        let Ok(url) = Url::parse(url) else {
            continue;
        };
        for cookie in cookies.split("; ").filter(|c| !c.is_empty()) {
            jar.add_cookie_str(cookie, &url);
        }
    }
    Ok(())
}

fn save_cookie_jar(jar: &Jar, visited: &[Url], path: &Path) -> Result<()> {
    let mut lines = Vec::new();
    for url in visited {
        if let Some(cookies) = jar.cookies(url) {
            if let Ok(cookies) = cookies.to_str() {
                lines.push(format!("{}\t{}", url, cookies));
            }
        }
    }

    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    std::fs::write(path, lines.join("\n"))?;
    Ok(())
}

fn urlencode(value: &str) -> String {
    form_urlencoded::byte_serialize(value.as_bytes()).collect()
}

fn scalar_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Bool(true) => "1".to_string(),
        Value::Bool(false) | Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// Packs a map into a form body: `key=value&` per entry.
///
/// Nested arrays and objects are sent as their JSON text.
pub fn post_pack(args: &Map<String, Value>) -> String {
    args.iter()
        .map(|(key, value)| {
            let value = match value {
                Value::Array(_) | Value::Object(_) => value.to_string(),
                scalar => scalar_string(scalar),
            };
            format!("{}={}&", urlencode(key), urlencode(&value))
        })
        .collect()
}

/// Packs a map into a form body using `parent[key]` for nested entries.
///
/// Only one level is named correctly: deeper entries take their immediate
/// parent's key.
pub fn post_pack_flat(args: &Map<String, Value>) -> String {
    pack_flat(&mut args.iter().map(|(k, v)| (k.clone(), v)), None)
}

fn pack_flat<'a>(entries: &mut dyn Iterator<Item = (String, &'a Value)>, parent: Option<&str>) -> String {
    let mut out = String::new();
    for (key, value) in entries {
        match value {
            Value::Object(map) => {
                out.push_str(&pack_flat(&mut map.iter().map(|(k, v)| (k.clone(), v)), Some(&key)));
            }
            Value::Array(items) => {
                out.push_str(&pack_flat(
                    &mut items.iter().enumerate().map(|(i, v)| (i.to_string(), v)),
                    Some(&key),
                ));
            }
            scalar => {
                let name = match parent {
                    Some(parent) => format!("{}[{}]", parent, key),
                    None => key,
                };
                out.push_str(&format!(
                    "{}={}&",
                    urlencode(&name),
                    urlencode(&scalar_string(scalar))
                ));
            }
        }
    }
    out
}
