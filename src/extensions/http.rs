//! HTTP facade and host transport.
//!
//! Scripts call [`HttpFacade::request`] with a path relative to the
//! extension's website, or [`HttpFacade::raw_request`] with a full URL. The
//! facade normalises the options, forwards the call over the bridge and
//! decodes the body as JSON when it can.
//!
//! The reserved `Miru-Url` header replaces the website for a single call and
//! is never forwarded to the transport.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::cookie::Jar;
use reqwest::Method;
use serde_json::Value;
use tracing::debug;

use super::error::{ExtensionError, ExtensionResult};
use super::ipc::{Bridge, Operation, RequestOptions};

/// Header carrying a per-call host override.
pub const OVERRIDE_HOST_HEADER: &str = "Miru-Url";

/// User agent sent when a request does not set one.
pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36";

/// Body of a response after best-effort JSON decoding.
#[derive(Debug, Clone, PartialEq)]
pub enum ResponseBody {
    Json(Value),
    Raw(String),
}

impl ResponseBody {
    /// Decode `body` as JSON, keeping the exact string when it is not JSON.
    pub fn decode(body: String) -> Self {
        match serde_json::from_str(&body) {
            Ok(value) => ResponseBody::Json(value),
            Err(_) => ResponseBody::Raw(body),
        }
    }

    pub fn as_json(&self) -> Option<&Value> {
        match self {
            ResponseBody::Json(value) => Some(value),
            ResponseBody::Raw(_) => None,
        }
    }

    pub fn as_raw(&self) -> Option<&str> {
        match self {
            ResponseBody::Json(_) => None,
            ResponseBody::Raw(body) => Some(body),
        }
    }

    /// Collapse into a JSON value, raw bodies becoming strings.
    pub fn into_value(self) -> Value {
        match self {
            ResponseBody::Json(value) => value,
            ResponseBody::Raw(body) => Value::String(body),
        }
    }
}

/// Strip the override header, returning its value.
///
/// Header names are matched case-insensitively.
pub fn take_override_host(options: &mut RequestOptions) -> Option<String> {
    let keys: Vec<String> = options
        .headers
        .keys()
        .filter(|k| k.eq_ignore_ascii_case(OVERRIDE_HOST_HEADER))
        .cloned()
        .collect();

    let mut host = None;
    for key in keys {
        let value = options.headers.remove(&key);
        if host.is_none() {
            host = value;
        }
    }
    host
}

/// Script-side HTTP entry points of one extension.
#[derive(Debug, Clone)]
pub struct HttpFacade {
    website: String,
    bridge: Bridge,
}

impl HttpFacade {
    pub fn new(website: impl Into<String>, bridge: Bridge) -> Self {
        Self {
            website: website.into(),
            bridge,
        }
    }

    pub fn website(&self) -> &str {
        &self.website
    }

    /// Resolve the target URL and forwarded options of a host-relative request.
    pub fn prepare(&self, path: &str, options: Option<RequestOptions>) -> (String, RequestOptions) {
        let mut options = options.unwrap_or_default();
        let host = take_override_host(&mut options).unwrap_or_else(|| self.website.clone());
        if options.method.as_deref().map_or(true, str::is_empty) {
            options.method = Some("get".to_string());
        }
        (format!("{host}{path}"), options)
    }

    /// Options of a raw request: the URL is used as given.
    pub fn prepare_raw(options: Option<RequestOptions>) -> RequestOptions {
        let mut options = options.unwrap_or_default();
        take_override_host(&mut options);
        if options.method.as_deref().map_or(true, str::is_empty) {
            options.method = Some("GET".to_string());
        }
        options
    }

    /// Request `path` relative to the website or the override host.
    pub async fn request(
        &self,
        path: &str,
        options: Option<RequestOptions>,
    ) -> ExtensionResult<ResponseBody> {
        let (url, options) = self.prepare(path, options);
        debug!(extension = self.bridge.context(), url = %url, "request");
        self.send(Operation::Request, url, options).await
    }

    /// Request a literal URL.
    pub async fn raw_request(
        &self,
        url: &str,
        options: Option<RequestOptions>,
    ) -> ExtensionResult<ResponseBody> {
        let options = Self::prepare_raw(options);
        debug!(extension = self.bridge.context(), url, "raw request");
        self.send(Operation::RawRequest, url.to_string(), options).await
    }

    async fn send(
        &self,
        operation: Operation,
        url: String,
        options: RequestOptions,
    ) -> ExtensionResult<ResponseBody> {
        let reply = self
            .bridge
            .invoke(operation, vec![Value::String(url), serde_json::to_value(&options)?])
            .await?;

        let body = match reply {
            Value::String(body) => body,
            other => other.to_string(),
        };
        Ok(ResponseBody::decode(body))
    }
}

/// Host primitive performing the network I/O.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Perform the request and return the raw body.
    async fn perform_request(&self, url: &str, options: &RequestOptions) -> ExtensionResult<String>;
}

/// Map a script-supplied verb onto the methods the transport supports.
pub fn normalize_method(method: Option<&str>) -> Method {
    match method.map(str::to_ascii_uppercase).as_deref() {
        Some("POST") => Method::POST,
        Some("PUT") => Method::PUT,
        Some("DELETE") => Method::DELETE,
        Some("PATCH") => Method::PATCH,
        _ => Method::GET,
    }
}

/// [`Transport`] backed by `reqwest`.
#[derive(Clone)]
pub struct ReqwestTransport {
    client: reqwest::Client,
    user_agent: String,
}

impl ReqwestTransport {
    /// Build a client that shares `jar` with the cookie store.
    pub fn new(
        jar: Arc<Jar>,
        user_agent: impl Into<String>,
        timeout: Duration,
    ) -> ExtensionResult<Self> {
        let client = reqwest::Client::builder()
            .cookie_provider(jar)
            .timeout(timeout)
            .build()?;
        Ok(Self {
            client,
            user_agent: user_agent.into(),
        })
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn perform_request(&self, url: &str, options: &RequestOptions) -> ExtensionResult<String> {
        let method = normalize_method(options.method.as_deref());
        debug!(%method, url, "performing request");

        let mut builder = self.client.request(method.clone(), url);

        let mut has_user_agent = false;
        for (key, value) in &options.headers {
            has_user_agent |= key.eq_ignore_ascii_case("user-agent");
            builder = builder.header(key.as_str(), value.as_str());
        }
        if !has_user_agent {
            builder = builder.header(reqwest::header::USER_AGENT, self.user_agent.as_str());
        }

        if let Some(body) = &options.body {
            if matches!(method, Method::POST | Method::PUT | Method::PATCH) {
                builder = builder.body(body.clone());
            }
        }

        if let Some(timeout) = options.timeout.filter(|ms| *ms > 0) {
            builder = builder.timeout(Duration::from_millis(timeout));
        }

        let response = builder
            .send()
            .await
            .map_err(|e| ExtensionError::Transport(e.to_string()))?;

        response
            .text()
            .await
            .map_err(|e| ExtensionError::Transport(format!("failed to read response body: {e}")))
    }
}
