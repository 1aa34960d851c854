//! Spas request signing
//!
//! Every request carries an HMAC-SHA1 signature over the sign body and a
//! millisecond timestamp, base64 encoded, plus the fixed Spas headers.

use std::time::{SystemTime, UNIX_EPOCH};

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use hmac::{Hmac, Mac};
use sha1::Sha1;

use crate::constants::CLIENT_VERSION;

type HmacSha1 = Hmac<Sha1>;

/// The string the signature covers, before the timestamp is appended:
/// `tenant+group` when both are present, else whichever one is.
pub fn sign_body(tenant: &str, group: &str) -> String {
    if !tenant.is_empty() && !group.is_empty() {
        format!("{}+{}", tenant, group)
    } else if !group.is_empty() {
        group.to_string()
    } else {
        tenant.to_string()
    }
}

/// base64( HMAC-SHA1( secret, payload ) )
pub fn sign(secret_key: &str, payload: &str) -> String {
    let mut mac =
        HmacSha1::new_from_slice(secret_key.as_bytes()).expect("HMAC can take key of any size");
    mac.update(payload.as_bytes());
    BASE64.encode(mac.finalize().into_bytes())
}

/// Current epoch milliseconds as a decimal string.
pub fn timestamp_millis() -> String {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or(0)
        .to_string()
}

/// The headers added to every outbound request.
pub fn spas_headers(
    access_key: &str,
    secret_key: &str,
    tenant: &str,
    group: &str,
    timestamp: &str,
) -> Vec<(String, String)> {
    let body = sign_body(tenant, group);
    let signature = sign(secret_key, &format!("{}+{}", body, timestamp));
    vec![
        ("Client-Version".to_string(), CLIENT_VERSION.to_string()),
        (
            "Content-Type".to_string(),
            "application/x-www-form-urlencoded; charset=UTF-8".to_string(),
        ),
        ("Spas-AccessKey".to_string(), access_key.to_string()),
        ("timeStamp".to_string(), timestamp.to_string()),
        ("exConfigInfo".to_string(), "true".to_string()),
        ("Spas-Signature".to_string(), signature),
    ]
}
