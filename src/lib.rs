//! Diamond Client - Rust SDK for the Diamond configuration service
//!
//! This crate provides:
//! - Multi-unit facade sharing one transport, snapshot store, and server
//!   list manager across lazily created per-unit clients
//! - Signed request layer (Spas HMAC-SHA1) with per-request host failover
//! - Config read/write operations with snapshot write-through and
//!   snapshot fallback on server failure
//! - Batched long-polling subscriptions with md5 debouncing
//! - Per-unit server discovery with round-robin selection and background
//!   refresh
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use diamond_client::{ClientProps, DiamondClient, FnConfigListener};
//!
//! # async fn run() -> diamond_client::Result<()> {
//! let props = ClientProps::new("diamond.example.com", "my-tenant")
//!     .with_auth("access-key", "secret-key");
//! let client = DiamondClient::new(props)?;
//!
//! let value = client.get_config("app.properties", "DEFAULT_GROUP").await?;
//! println!("config: {:?}", value);
//!
//! client.subscribe(
//!     "app.properties",
//!     "DEFAULT_GROUP",
//!     Arc::new(FnConfigListener::new(|info| {
//!         println!("changed: {:?}", info.content);
//!     })),
//! );
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod constants;
pub mod error;
pub mod events;
pub mod facade;
pub mod http;
pub mod model;
pub mod props;
pub mod server_list;
pub mod sign;
pub mod snapshot;

pub use config::listener::{ConfigListener, ConfigResponse, FnConfigListener};
pub use config::UnitClient;
pub use error::{DiamondError, Result};
pub use facade::DiamondClient;
pub use http::{HttpRequest, HttpResponse, HttpTransport, Method, ReqwestTransport};
pub use model::{BatchItem, ConfigInfo, ConfigInfoPage};
pub use props::ClientProps;
pub use server_list::ServerListManager;
pub use snapshot::SnapshotStore;
