//! Startup configuration: credentials and endpoint URLs.
//!
//! Credentials are read once from the environment; the secret never
//! appears in `Debug` output or logs. Endpoint URLs default to production
//! and can be overridden for a sandbox environment.

use std::fmt;

use mexc_core::{MexcError, MexcResult};

pub const DEFAULT_BASE_URL: &str = "https://api.mexc.com";
pub const DEFAULT_WS_URL: &str = "wss://wbs.mexc.com/ws";

const API_KEY_ENV: &str = "MEXC_API_KEY";
const SECRET_KEY_ENV: &str = "MEXC_SECRET_KEY";
const BASE_URL_ENV: &str = "MEXC_BASE_URL";
const WS_URL_ENV: &str = "MEXC_WS_URL";

/// API credentials, immutable for the process lifetime.
#[derive(Clone)]
pub struct Credentials {
    api_key: String,
    secret_key: String,
}

impl Credentials {
    pub fn new(api_key: impl Into<String>, secret_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            secret_key: secret_key.into(),
        }
    }

    /// Load from `MEXC_API_KEY` / `MEXC_SECRET_KEY`. Absence is a fatal
    /// configuration error.
    pub fn from_env() -> MexcResult<Self> {
        let api_key = require_env(API_KEY_ENV)?;
        let secret_key = require_env(SECRET_KEY_ENV)?;
        Ok(Self::new(api_key, secret_key))
    }

    pub fn api_key(&self) -> &str {
        &self.api_key
    }

    pub fn secret_key(&self) -> &str {
        &self.secret_key
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("api_key", &self.api_key)
            .field("secret_key", &"<redacted>")
            .finish()
    }
}

fn require_env(name: &str) -> MexcResult<String> {
    let value = std::env::var(name)
        .map_err(|_| MexcError::config(format!("{name} not set")))?
        .trim()
        .to_string();
    if value.is_empty() {
        return Err(MexcError::config(format!("{name} is empty")));
    }
    Ok(value)
}

/// Full connectivity configuration for one credential set.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub base_url: String,
    pub ws_url: String,
    pub credentials: Credentials,
}

impl GatewayConfig {
    pub fn new(credentials: Credentials) -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            ws_url: DEFAULT_WS_URL.to_string(),
            credentials,
        }
    }

    /// Credentials plus optional `MEXC_BASE_URL` / `MEXC_WS_URL` overrides.
    pub fn from_env() -> MexcResult<Self> {
        let credentials = Credentials::from_env()?;
        let base_url = std::env::var(BASE_URL_ENV)
            .ok()
            .filter(|v| !v.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string());
        let ws_url = std::env::var(WS_URL_ENV)
            .ok()
            .filter(|v| !v.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_WS_URL.to_string());
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            ws_url,
            credentials,
        })
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_ws_url(mut self, ws_url: impl Into<String>) -> Self {
        self.ws_url = ws_url.into();
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn secret_is_redacted_in_debug() {
        let creds = Credentials::new("key-id", "very-secret");
        let debug = format!("{creds:?}");
        assert!(debug.contains("key-id"));
        assert!(!debug.contains("very-secret"));
        assert!(debug.contains("<redacted>"));
    }

    #[test]
    fn base_url_trailing_slash_is_trimmed() {
        let config = GatewayConfig::new(Credentials::new("k", "s"))
            .with_base_url("https://sandbox.example.com/");
        assert_eq!(config.base_url, "https://sandbox.example.com");
    }
}
