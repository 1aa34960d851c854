//! Protocol constants shared with the Diamond server
//!
//! The wire values must match the server exactly; the framing bytes and
//! status semantics are not negotiable.

/// Separator between fields within one probe entry.
pub const WORD_SEPARATOR: char = '\u{2}';

/// Separator between probe entries.
pub const LINE_SEPARATOR: char = '\u{1}';

/// Fixed identifier advertised in every request.
pub const CLIENT_VERSION: &str = "Diamond-Rust-Client/0.1.0";

/// Context path prefixed to every server-side route.
pub const CONTEXT_PATH: &str = "/diamond-server";

/// Pool key for the unit the process itself runs in.
pub const CURRENT_UNIT: &str = "CURRENT_UNIT";

/// Directory segment used in snapshot keys when no tenant is configured.
pub const DEFAULT_TENANT_DIR: &str = "default_tenant";

/// Server-side maximum hold of a long-poll connection, advertised in the
/// `longPullingTimeout` header.
pub const LONG_PULLING_TIMEOUT_MS: u64 = 30_000;

/// Transport timeout for probe requests. Greater than the server hold so
/// the client never times out before the server replies.
pub const LONG_PULLING_TRANSPORT_TIMEOUT_MS: u64 = 40_000;

/// Sleep before the next long-poll iteration after an error.
pub const LONG_PULLING_RETRY_DELAY_MS: u64 = 2_000;

/// Upper bound on concurrent config re-fetches during a resync.
pub const SYNC_CONCURRENCY: usize = 5;

/// Page size used when walking the full config listing.
pub const LIST_PAGE_SIZE: u64 = 200;

pub const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 6_000;
pub const DEFAULT_REFRESH_INTERVAL_MS: u64 = 30_000;

/// Discovery endpoint port when the configured endpoint carries none.
pub const DEFAULT_ENDPOINT_PORT: u16 = 8080;

/// Config server port under TLS, for hosts discovered without one.
pub const HTTPS_PORT: u16 = 443;

/// Config server port on plain HTTP, for hosts discovered without one.
pub const HTTP_PORT: u16 = 8080;
