//! HTTP transport contract and the reqwest-backed production transport
//!
//! The whole client speaks to servers through the `HttpTransport` trait so
//! tests can stub the wire. The production implementation wraps
//! `reqwest::Client` with the TLS posture the Diamond endpoints require.

use std::time::Duration;

use async_trait::async_trait;

use crate::error::{DiamondError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
}

/// One outbound request, fully described before it reaches the wire.
#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub url: String,
    pub method: Method,
    /// Form fields; serialized into the query string for GET, the body
    /// for POST.
    pub form: Vec<(String, String)>,
    pub headers: Vec<(String, String)>,
    pub timeout: Duration,
    /// URL-encode form-field values before serialization. Used by write
    /// operations; probe bodies go out raw.
    pub encode: bool,
}

#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: u16,
    pub body: String,
}

/// Transport contract: one request in, status and body out.
///
/// Implementations must map transport-level failures (DNS, connect,
/// timeout) to `DiamondError::Transport`; HTTP status handling belongs to
/// the caller.
#[async_trait]
pub trait HttpTransport: Send + Sync + 'static {
    async fn request(&self, req: HttpRequest) -> Result<HttpResponse>;
}

/// Serialize form fields as `k=v&k=v`.
///
/// Values are percent-encoded only when `encode` is set; probe payloads
/// carry the raw `\u{1}`/`\u{2}` framing bytes.
pub(crate) fn serialize_form(fields: &[(String, String)], encode: bool) -> String {
    fields
        .iter()
        .map(|(k, v)| {
            if encode {
                let encoded: String = url::form_urlencoded::byte_serialize(v.as_bytes()).collect();
                format!("{}={}", k, encoded)
            } else {
                format!("{}={}", k, v)
            }
        })
        .collect::<Vec<_>>()
        .join("&")
}

/// Append a query string to a URL that may already carry one.
pub(crate) fn with_query(url: &str, query: &str) -> String {
    if query.is_empty() {
        url.to_string()
    } else if url.contains('?') {
        format!("{}&{}", url, query)
    } else {
        format!("{}?{}", url, query)
    }
}

/// Production transport over `reqwest`.
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    /// Build the transport.
    ///
    /// `danger_accept_invalid_certs` disables peer-certificate checks and
    /// pins TLS 1.2, matching what the Diamond config servers answer with.
    pub fn new(danger_accept_invalid_certs: bool) -> Result<Self> {
        let mut builder = reqwest::Client::builder();
        if danger_accept_invalid_certs {
            builder = builder
                .danger_accept_invalid_certs(true)
                .min_tls_version(reqwest::tls::Version::TLS_1_2);
        }
        let client = builder
            .build()
            .map_err(|e| DiamondError::InvalidProps(format!("failed to build transport: {}", e)))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn request(&self, req: HttpRequest) -> Result<HttpResponse> {
        let builder = match req.method {
            Method::Get => {
                let url = with_query(&req.url, &serialize_form(&req.form, true));
                self.client.get(url)
            }
            Method::Post => self
                .client
                .post(&req.url)
                .body(serialize_form(&req.form, req.encode)),
        };

        let mut builder = builder.timeout(req.timeout);
        for (name, value) in &req.headers {
            builder = builder.header(name, value);
        }

        let response = builder.send().await.map_err(|e| DiamondError::Transport {
            url: req.url.clone(),
            message: e.to_string(),
        })?;

        let status = response.status().as_u16();
        let body = response.text().await.map_err(|e| DiamondError::Transport {
            url: req.url,
            message: e.to_string(),
        })?;

        Ok(HttpResponse { status, body })
    }
}
