//! Proxy Configuration Types
//!
//! Outbound proxy for gateway traffic, given as one URL
//! (`socks5://host:1080`). Credentials are kept apart from the URL so they
//! never end up in logs or serialized settings. The client factory that
//! applies it lives in `codeforge-llm`.

use serde::{Deserialize, Serialize};

/// Supported proxy schemes
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ProxyProtocol {
    Http,
    Https,
    Socks5,
}

impl ProxyProtocol {
    pub fn from_scheme(scheme: &str) -> Option<Self> {
        match scheme.to_ascii_lowercase().as_str() {
            "http" => Some(ProxyProtocol::Http),
            "https" => Some(ProxyProtocol::Https),
            "socks5" | "socks5h" => Some(ProxyProtocol::Socks5),
            _ => None,
        }
    }
}

/// Proxy configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProxyConfig {
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing)]
    pub password: Option<String>,
}

impl ProxyConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            username: None,
            password: None,
        }
    }

    pub fn with_auth(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self.password = Some(password.into());
        self
    }

    /// Scheme of the URL, if supported
    pub fn protocol(&self) -> Option<ProxyProtocol> {
        let (scheme, _) = self.url.split_once("://")?;
        ProxyProtocol::from_scheme(scheme)
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.protocol().is_none() {
            return Err(format!(
                "proxy url must start with http://, https:// or socks5://, got {}",
                self.url
            ));
        }
        let host = self
            .url
            .split_once("://")
            .map(|(_, rest)| rest.trim_end_matches('/'))
            .unwrap_or("");
        if host.is_empty() {
            return Err("proxy url has no host".to_string());
        }
        if host.contains('@') {
            return Err("put proxy credentials in username/password, not the url".to_string());
        }
        if self.username.is_some() != self.password.is_some() {
            return Err("proxy username and password must be set together".to_string());
        }
        Ok(())
    }
}
