//! Cookie jar access for extensions.
//!
//! Cookies are exchanged as `name=value` strings. The default store wraps the
//! same `reqwest` jar the HTTP transport sends requests with, so cookies set
//! by an extension are attached to its later requests and vice versa.

use std::sync::Arc;

use reqwest::cookie::{CookieStore as _, Jar};
use reqwest::header::HeaderValue;
use url::Url;

use super::error::{ExtensionError, ExtensionResult};

/// Host-side cookie jar.
pub trait CookieStore: Send + Sync {
    /// Cookies that would be sent to `url`.
    fn cookies(&self, url: &str) -> ExtensionResult<Vec<String>>;

    /// Store `name=value` cookies for `url`.
    fn set_cookies(&self, url: &str, cookies: &[String]) -> ExtensionResult<()>;
}

/// [`CookieStore`] over a shared `reqwest` cookie jar.
#[derive(Clone, Default)]
pub struct JarCookieStore {
    jar: Arc<Jar>,
}

impl JarCookieStore {
    pub fn new(jar: Arc<Jar>) -> Self {
        Self { jar }
    }

    /// The underlying jar, for wiring into an HTTP client.
    pub fn jar(&self) -> Arc<Jar> {
        self.jar.clone()
    }
}

fn parse_url(url: &str) -> ExtensionResult<Url> {
    Url::parse(url).map_err(|e| ExtensionError::InvalidUrl {
        url: url.to_string(),
        message: e.to_string(),
    })
}

/// Split a cookie string into a trimmed `(name, value)` pair.
pub fn parse_cookie(cookie: &str) -> ExtensionResult<(String, String)> {
    let (name, value) = cookie
        .split_once('=')
        .ok_or_else(|| ExtensionError::InvalidCookie(format!("invalid cookie format: {cookie}")))?;
    let name = name.trim();
    if name.is_empty() {
        return Err(ExtensionError::InvalidCookie(format!(
            "cookie has no name: {cookie}"
        )));
    }
    Ok((name.to_string(), value.trim().to_string()))
}

fn split_header(header: &HeaderValue) -> Vec<String> {
    header
        .to_str()
        .map(|s| {
            s.split(';')
                .map(str::trim)
                .filter(|c| !c.is_empty())
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

impl CookieStore for JarCookieStore {
    fn cookies(&self, url: &str) -> ExtensionResult<Vec<String>> {
        let url = parse_url(url)?;
        Ok(self
            .jar
            .cookies(&url)
            .map(|header| split_header(&header))
            .unwrap_or_default())
    }

    fn set_cookies(&self, url: &str, cookies: &[String]) -> ExtensionResult<()> {
        let url = parse_url(url)?;
        // Validate everything before touching the jar.
        let parsed = cookies
            .iter()
            .map(|c| parse_cookie(c))
            .collect::<ExtensionResult<Vec<_>>>()?;

        for (name, value) in parsed {
            self.jar
                .add_cookie_str(&format!("{name}={value}; Path=/"), &url);
        }
        Ok(())
    }
}
