//! Outbound HTTP used by the `doGet`/`doPost` capabilities.

use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::{Client, RequestBuilder};
use tracing::{debug, warn};

use crate::error::{BridgeError, Result};

/// Default per-call timeout in seconds.
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Connect timeout in seconds.
const CONNECT_TIMEOUT_SECS: u64 = 10;

/// Maximum number of redirects to follow.
const MAX_REDIRECTS: usize = 5;

/// User agent string for script requests.
const USER_AGENT: &str = "botbridge/0.1 (script)";

/// HTTP method of a script request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpMethod {
    Get,
    Post,
}

/// A request built from script arguments.
#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub method: HttpMethod,
    pub url: String,
    /// Query parameters for GET, form fields for POST.
    pub params: Vec<(String, String)>,
    pub headers: Vec<(String, String)>,
    pub timeout: Duration,
}

impl HttpRequest {
    pub fn new(method: HttpMethod, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            params: Vec::new(),
            headers: Vec::new(),
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
        }
    }
}

/// Shared HTTP client. Cloning shares the connection pool.
#[derive(Clone)]
pub struct HttpClient {
    client: Client,
}

impl HttpClient {
    pub fn new() -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(CONNECT_TIMEOUT_SECS))
            .redirect(reqwest::redirect::Policy::limited(MAX_REDIRECTS))
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| BridgeError::Http(format!("failed to create HTTP client: {}", e)))?;

        Ok(Self { client })
    }

    /// Perform the request and return the response body.
    ///
    /// Non-2xx responses are errors.
    pub async fn fetch(&self, request: &HttpRequest) -> Result<String> {
        let url = validate_url(&request.url)?;
        debug!(method = ?request.method, url = %url, "Script HTTP request");

        let builder = match request.method {
            HttpMethod::Get => self.client.get(url).query(&request.params),
            HttpMethod::Post => self.client.post(url).form(&request.params),
        };
        let response = with_headers(builder, &request.headers)
            .timeout(request.timeout)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(BridgeError::Http(format!("HTTP status {}", status)));
        }
        Ok(response.text().await?)
    }
}

fn with_headers(builder: RequestBuilder, headers: &[(String, String)]) -> RequestBuilder {
    let mut map = HeaderMap::new();
    for (name, value) in headers {
        match (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(value),
        ) {
            (Ok(name), Ok(value)) => {
                map.insert(name, value);
            }
            _ => warn!(header = %name, "Skipping invalid request header"),
        }
    }
    builder.headers(map)
}

/// Accept only absolute http(s) URLs.
pub fn validate_url(url: &str) -> Result<url::Url> {
    let parsed =
        url::Url::parse(url.trim()).map_err(|e| BridgeError::Http(format!("invalid URL: {}", e)))?;

    match parsed.scheme() {
        "http" | "https" => {}
        scheme => {
            return Err(BridgeError::Http(format!(
                "unsupported URL scheme: {}",
                scheme
            )));
        }
    }
    if !parsed.has_host() {
        return Err(BridgeError::Http("URL has no host".to_string()));
    }
    Ok(parsed)
}
