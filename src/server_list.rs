//! Per-unit server discovery and selection
//!
//! For every unit ever asked for, keeps a host pool fetched from the
//! discovery endpoint, hands hosts out round-robin, and refreshes all known
//! units in the background. Fetch failures fall back to the snapshot store;
//! an unusable unit stays on the refresh roster as a null entry.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use futures::future::join_all;
use rand::Rng;
use tokio::sync::OnceCell;
use tracing::{debug, warn};

use crate::constants::{CONTEXT_PATH, CURRENT_UNIT};
use crate::error::{DiamondError, Result};
use crate::events::ErrorSink;
use crate::http::{HttpRequest, HttpTransport, Method};
use crate::props::ClientProps;
use crate::snapshot::{server_list_key, SnapshotStore};

/// One unit's host list plus the rotation cursor.
///
/// The cursor starts at a uniformly random position each time the list is
/// (re)fetched and advances on every pick, returned host working or not.
pub(crate) struct ServerPool {
    hosts: Vec<String>,
    index: usize,
}

impl ServerPool {
    /// `hosts` must be non-empty.
    fn new(hosts: Vec<String>) -> Self {
        let index = rand::thread_rng().gen_range(0..hosts.len());
        Self { hosts, index }
    }

    fn rotate(&mut self) -> String {
        let host = self.hosts[self.index].clone();
        self.index = (self.index + 1) % self.hosts.len();
        host
    }
}

/// Discovery client and host pool registry, one per facade.
pub struct ServerListManager {
    props: Arc<ClientProps>,
    transport: Arc<dyn HttpTransport>,
    snapshot: Arc<SnapshotStore>,
    sink: ErrorSink,
    /// `None` means the last fetch failed everywhere; the unit is still
    /// refreshed on the next tick.
    pools: DashMap<String, Option<ServerPool>>,
    current_unit: OnceCell<String>,
    closed: AtomicBool,
}

impl ServerListManager {
    pub fn new(
        props: Arc<ClientProps>,
        transport: Arc<dyn HttpTransport>,
        snapshot: Arc<SnapshotStore>,
        sink: ErrorSink,
    ) -> Self {
        Self {
            props,
            transport,
            snapshot,
            sink,
            pools: DashMap::new(),
            current_unit: OnceCell::new(),
            closed: AtomicBool::new(false),
        }
    }

    fn base_url(&self) -> String {
        format!("http://{}", self.props.endpoint_authority())
    }

    /// Next host for a unit in round-robin order, or `None` when neither
    /// the wire nor the snapshot yields a list. Callers do their own retry.
    pub async fn get_one(&self, unit: &str) -> Option<String> {
        let needs_fetch = match self.pools.get(unit) {
            Some(entry) => entry.is_none(),
            None => true,
        };
        if needs_fetch {
            if let Some(err) = self.sync_unit(unit).await {
                self.sink.emit(err);
            }
        }
        let mut entry = self.pools.get_mut(unit)?;
        entry.as_mut().map(ServerPool::rotate)
    }

    /// All unit names known to the discovery endpoint.
    pub async fn fetch_unit_lists(&self) -> Result<Vec<String>> {
        let url = format!("{}{}/unit-list?nofix=1", self.base_url(), CONTEXT_PATH);
        let body = self.discovery_get(&url).await?;
        Ok(parse_host_lines(&body))
    }

    /// The unit this process runs in, resolved at most once per process.
    pub async fn get_current_unit(&self) -> Result<String> {
        self.current_unit
            .get_or_try_init(|| async {
                let url = format!("{}/env", self.base_url());
                let body = self.discovery_get(&url).await?;
                Ok(body.trim().to_string())
            })
            .await
            .map(|unit| unit.clone())
    }

    /// Spawn the background refresh loop. Call once, right after
    /// construction.
    pub fn start(self: &Arc<Self>) {
        let manager = Arc::clone(self);
        tokio::spawn(async move {
            debug!("server list refresh loop started");
            loop {
                tokio::time::sleep(manager.props.refresh_interval).await;
                if manager.closed.load(Ordering::SeqCst) {
                    break;
                }
                manager.refresh_all().await;
            }
            debug!("server list refresh loop stopped");
        });
    }

    /// Stop the refresh loop on its next tick.
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    /// Re-fetch every unit ever asked for, in parallel. Per-unit failures
    /// are reported and never stop the loop.
    async fn refresh_all(&self) {
        let units: Vec<String> = self.pools.iter().map(|e| e.key().clone()).collect();
        join_all(units.into_iter().map(|unit| async move {
            if let Some(err) = self.sync_unit(&unit).await {
                warn!(unit = %unit, "server list refresh failed");
                self.sink.emit(DiamondError::UpdateServers {
                    unit,
                    source: Box::new(err),
                });
            }
        }))
        .await;
    }

    /// Fetch one unit's list and replace its pool entry. Returns the wire
    /// error when the fetch failed, whether or not the snapshot rescued it.
    async fn sync_unit(&self, unit: &str) -> Option<DiamondError> {
        match self.fetch_hosts(unit).await {
            Ok(hosts) => {
                if let Ok(json) = serde_json::to_string(&hosts) {
                    self.snapshot
                        .save(&server_list_key(unit), Some(json.as_str()))
                        .await;
                }
                self.pools
                    .insert(unit.to_string(), Some(ServerPool::new(hosts)));
                None
            }
            Err(err) => {
                let fallback = self.hosts_from_snapshot(unit).await;
                self.pools
                    .insert(unit.to_string(), fallback.map(ServerPool::new));
                Some(err)
            }
        }
    }

    async fn fetch_hosts(&self, unit: &str) -> Result<Vec<String>> {
        let url = if unit == CURRENT_UNIT {
            format!("{}{}/diamond", self.base_url(), CONTEXT_PATH)
        } else {
            format!(
                "{}{}/diamond-unit-{}?nofix=1",
                self.base_url(),
                CONTEXT_PATH,
                unit
            )
        };
        let body = self.discovery_get(&url).await?;
        let hosts = parse_host_lines(&body);
        if hosts.is_empty() {
            return Err(DiamondError::ServerHostEmpty {
                unit: unit.to_string(),
            });
        }
        Ok(hosts)
    }

    /// Last-known-good list from disk. A corrupt snapshot is deleted and
    /// reported so it cannot poison the cache again.
    async fn hosts_from_snapshot(&self, unit: &str) -> Option<Vec<String>> {
        let key = server_list_key(unit);
        let json = self.snapshot.get(&key).await?;
        match serde_json::from_str::<Vec<String>>(&json) {
            Ok(hosts) if !hosts.is_empty() => Some(hosts),
            Ok(_) => None,
            Err(e) => {
                self.snapshot.delete(&key).await;
                self.sink.emit(DiamondError::ServerListSnapshotParse {
                    unit: unit.to_string(),
                    source: e,
                });
                None
            }
        }
    }

    async fn discovery_get(&self, url: &str) -> Result<String> {
        let response = self
            .transport
            .request(HttpRequest {
                url: url.to_string(),
                method: Method::Get,
                form: Vec::new(),
                headers: Vec::new(),
                timeout: self.props.request_timeout,
                encode: false,
            })
            .await?;
        if response.status != 200 {
            return Err(DiamondError::ServerResponse {
                status: Some(response.status),
                url: url.to_string(),
                message: response.body,
            });
        }
        Ok(response.body)
    }
}

/// One host per line; lines trimmed, blanks dropped.
fn parse_host_lines(body: &str) -> Vec<String> {
    body.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect()
}
