//! Client properties with validation
//!
//! `ClientProps` is the single configuration object for the whole client.
//! Unknown options are unrepresentable; required fields are checked once,
//! when the facade is constructed.

use std::path::PathBuf;
use std::time::Duration;

use crate::constants::{
    DEFAULT_ENDPOINT_PORT, DEFAULT_REFRESH_INTERVAL_MS, DEFAULT_REQUEST_TIMEOUT_MS,
};
use crate::error::{DiamondError, Result};

/// Configuration for the Diamond client
#[derive(Clone, Debug)]
pub struct ClientProps {
    /// Discovery host, optionally `host:port`. Default port 8080.
    pub endpoint: String,
    /// Tenant id.
    pub namespace: String,
    /// Signing credentials.
    pub access_key: String,
    pub secret_key: String,
    /// Optional identifier attached to aggregate writes.
    pub app_name: String,
    /// Optional application key.
    pub app_key: String,
    /// TLS on the wire towards config servers.
    pub ssl: bool,
    /// DANGER: skips peer-certificate verification. The Diamond wire
    /// protocol requires this against its self-signed endpoints; turn it
    /// off only when fronted by a properly certified proxy.
    pub danger_accept_invalid_certs: bool,
    /// Per-request timeout (long polling uses its own, larger one).
    pub request_timeout: Duration,
    /// Server-list refresh cadence.
    pub refresh_interval: Duration,
    /// Root directory of the local snapshot store.
    pub cache_dir: PathBuf,
}

impl Default for ClientProps {
    fn default() -> Self {
        Self {
            endpoint: String::new(),
            namespace: String::new(),
            access_key: String::new(),
            secret_key: String::new(),
            app_name: String::new(),
            app_key: String::new(),
            ssl: true,
            danger_accept_invalid_certs: true,
            request_timeout: Duration::from_millis(DEFAULT_REQUEST_TIMEOUT_MS),
            refresh_interval: Duration::from_millis(DEFAULT_REFRESH_INTERVAL_MS),
            cache_dir: default_cache_dir(),
        }
    }
}

impl ClientProps {
    /// Create properties for the given discovery endpoint and tenant.
    pub fn new(endpoint: &str, namespace: &str) -> Self {
        Self {
            endpoint: endpoint.to_string(),
            namespace: namespace.to_string(),
            ..Default::default()
        }
    }

    /// Set signing credentials.
    pub fn with_auth(mut self, access_key: &str, secret_key: &str) -> Self {
        self.access_key = access_key.to_string();
        self.secret_key = secret_key.to_string();
        self
    }

    /// Set the application identifiers.
    pub fn with_app(mut self, app_name: &str, app_key: &str) -> Self {
        self.app_name = app_name.to_string();
        self.app_key = app_key.to_string();
        self
    }

    /// Toggle TLS towards config servers.
    pub fn with_ssl(mut self, ssl: bool) -> Self {
        self.ssl = ssl;
        self
    }

    /// Set per-request and refresh timings.
    pub fn with_timeouts(mut self, request_timeout: Duration, refresh_interval: Duration) -> Self {
        self.request_timeout = request_timeout;
        self.refresh_interval = refresh_interval;
        self
    }

    /// Set the snapshot root directory.
    pub fn with_cache_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cache_dir = dir.into();
        self
    }

    /// Check the required fields. Called once by the facade constructor.
    pub fn validate(&self) -> Result<()> {
        for (name, value) in [
            ("endpoint", &self.endpoint),
            ("namespace", &self.namespace),
            ("accessKey", &self.access_key),
            ("secretKey", &self.secret_key),
        ] {
            if value.is_empty() {
                return Err(DiamondError::InvalidProps(format!("{} is required", name)));
            }
        }
        Ok(())
    }

    /// Discovery authority as `host:port`, port defaulted to 8080.
    pub fn endpoint_authority(&self) -> String {
        if self.endpoint.contains(':') {
            self.endpoint.clone()
        } else {
            format!("{}:{}", self.endpoint, DEFAULT_ENDPOINT_PORT)
        }
    }
}

/// `$HOME/.diamond-client-cache`, falling back to a relative directory when
/// no home is available.
fn default_cache_dir() -> PathBuf {
    if let Ok(home) = std::env::var("HOME") {
        return PathBuf::from(home).join(".diamond-client-cache");
    }
    PathBuf::from(".diamond-client-cache")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let props = ClientProps::default();
        assert!(props.ssl);
        assert!(props.danger_accept_invalid_certs);
        assert_eq!(props.request_timeout, Duration::from_millis(6000));
        assert_eq!(props.refresh_interval, Duration::from_millis(30000));
    }

    #[test]
    fn test_builder() {
        let props = ClientProps::new("diamond.example.com", "my-tenant")
            .with_auth("ak", "sk")
            .with_app("my-app", "app-key-1")
            .with_ssl(false)
            .with_timeouts(Duration::from_secs(3), Duration::from_secs(10));

        assert_eq!(props.endpoint, "diamond.example.com");
        assert_eq!(props.namespace, "my-tenant");
        assert_eq!(props.access_key, "ak");
        assert_eq!(props.secret_key, "sk");
        assert_eq!(props.app_name, "my-app");
        assert!(!props.ssl);
        assert_eq!(props.request_timeout, Duration::from_secs(3));
    }

    #[test]
    fn test_validate_rejects_missing_credentials() {
        let props = ClientProps::new("diamond.example.com", "my-tenant");
        let err = props.validate().unwrap_err();
        assert!(err.to_string().contains("accessKey"));

        let props = props.with_auth("ak", "sk");
        assert!(props.validate().is_ok());
    }

    #[test]
    fn test_endpoint_authority_default_port() {
        let props = ClientProps::new("diamond.example.com", "t");
        assert_eq!(props.endpoint_authority(), "diamond.example.com:8080");

        let props = ClientProps::new("diamond.example.com:9090", "t");
        assert_eq!(props.endpoint_authority(), "diamond.example.com:9090");
    }
}
