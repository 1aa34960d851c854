//! Multi-unit client facade
//!
//! `DiamondClient` is the entry point: it owns the snapshot store, the
//! server list manager, and a lazily populated registry of per-unit
//! clients, all sharing one transport and one set of credentials. Verbs
//! without an explicit unit go to the current unit; "to all units" verbs
//! enumerate units through the server list manager and fan out.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use dashmap::DashMap;
use futures::future::join_all;
use tokio::sync::mpsc::UnboundedReceiver;
use tracing::info;

use crate::config::listener::ConfigListener;
use crate::config::UnitClient;
use crate::constants::CURRENT_UNIT;
use crate::error::{DiamondError, Result};
use crate::events::ErrorSink;
use crate::http::{HttpTransport, ReqwestTransport};
use crate::model::{BatchItem, ConfigInfo};
use crate::props::ClientProps;
use crate::server_list::ServerListManager;
use crate::snapshot::SnapshotStore;

/// Facade over one Diamond deployment, all units included.
pub struct DiamondClient {
    props: Arc<ClientProps>,
    transport: Arc<dyn HttpTransport>,
    snapshot: Arc<SnapshotStore>,
    server_list: Arc<ServerListManager>,
    units: DashMap<String, Arc<UnitClient>>,
    sink: ErrorSink,
    errors: Mutex<Option<UnboundedReceiver<DiamondError>>>,
    closed: AtomicBool,
}

impl std::fmt::Debug for DiamondClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DiamondClient")
            .field("closed", &self.closed.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl DiamondClient {
    /// Build a client over the production transport.
    pub fn new(props: ClientProps) -> Result<Self> {
        let transport = Arc::new(ReqwestTransport::new(props.danger_accept_invalid_certs)?);
        Self::with_transport(props, transport)
    }

    /// Build a client over an injected transport. This is also the test
    /// seam: every scenario is reproducible with a scripted transport.
    pub fn with_transport(props: ClientProps, transport: Arc<dyn HttpTransport>) -> Result<Self> {
        props.validate()?;
        let props = Arc::new(props);
        let (sink, errors) = ErrorSink::channel();
        let snapshot = Arc::new(SnapshotStore::new(props.cache_dir.clone(), sink.clone()));
        let server_list = Arc::new(ServerListManager::new(
            Arc::clone(&props),
            Arc::clone(&transport),
            Arc::clone(&snapshot),
            sink.clone(),
        ));
        server_list.start();
        info!(endpoint = %props.endpoint, namespace = %props.namespace, "diamond client ready");
        Ok(Self {
            props,
            transport,
            snapshot,
            server_list,
            units: DashMap::new(),
            sink,
            errors: Mutex::new(Some(errors)),
            closed: AtomicBool::new(false),
        })
    }

    /// Receiving half of the error event stream. Can be taken once;
    /// without a consumer, events are logged and dropped.
    pub fn take_error_stream(&self) -> Option<UnboundedReceiver<DiamondError>> {
        self.errors.lock().unwrap_or_else(|e| e.into_inner()).take()
    }

    /// The sub-client of one unit, created on first use. `None` selects
    /// the current unit.
    pub fn unit_client(&self, unit: Option<&str>) -> Arc<UnitClient> {
        let unit = unit.unwrap_or(CURRENT_UNIT);
        self.units
            .entry(unit.to_string())
            .or_insert_with(|| {
                Arc::new(UnitClient::new(
                    unit,
                    Arc::clone(&self.props),
                    Arc::clone(&self.transport),
                    Arc::clone(&self.snapshot),
                    Arc::clone(&self.server_list),
                    self.sink.clone(),
                ))
            })
            .clone()
    }

    // ---- current-unit verbs ----

    pub async fn get_config(&self, data_id: &str, group: &str) -> Result<Option<String>> {
        self.unit_client(None).get_config(data_id, group).await
    }

    pub async fn publish_single(&self, data_id: &str, group: &str, content: &str) -> Result<()> {
        self.unit_client(None)
            .publish_single(data_id, group, content)
            .await
    }

    pub async fn remove(&self, data_id: &str, group: &str) -> Result<()> {
        self.unit_client(None).remove(data_id, group).await
    }

    pub async fn publish_aggr(
        &self,
        data_id: &str,
        group: &str,
        datum_id: &str,
        content: &str,
    ) -> Result<()> {
        self.unit_client(None)
            .publish_aggr(data_id, group, datum_id, content)
            .await
    }

    pub async fn remove_aggr(&self, data_id: &str, group: &str, datum_id: &str) -> Result<()> {
        self.unit_client(None)
            .remove_aggr(data_id, group, datum_id)
            .await
    }

    pub async fn batch_get_config(
        &self,
        data_ids: &[String],
        group: &str,
    ) -> Result<Vec<BatchItem>> {
        self.unit_client(None).batch_get_config(data_ids, group).await
    }

    pub async fn batch_query(&self, data_ids: &[String], group: &str) -> Result<Vec<BatchItem>> {
        self.unit_client(None).batch_query(data_ids, group).await
    }

    pub async fn get_all_config_info(&self) -> Result<Vec<ConfigInfo>> {
        self.unit_client(None).get_all_config_info().await
    }

    pub fn subscribe(&self, data_id: &str, group: &str, listener: Arc<dyn ConfigListener>) {
        self.unit_client(None).subscribe(data_id, group, listener);
    }

    pub fn unsubscribe(
        &self,
        data_id: &str,
        group: &str,
        listener: Option<&Arc<dyn ConfigListener>>,
    ) {
        self.unit_client(None).unsubscribe(data_id, group, listener);
    }

    // ---- unit enumeration ----

    /// The unit this process runs in, resolved once.
    pub async fn get_current_unit(&self) -> Result<String> {
        self.server_list.get_current_unit().await
    }

    /// All unit names known to the discovery endpoint.
    pub async fn unit_names(&self) -> Result<Vec<String>> {
        self.server_list.fetch_unit_lists().await
    }

    // ---- all-unit fan-out ----

    /// Publish the same config in every unit, in parallel. Fails when any
    /// unit's write fails; the other units keep whatever they accepted.
    pub async fn publish_to_all_unit(
        &self,
        data_id: &str,
        group: &str,
        content: &str,
    ) -> Result<()> {
        let units = self.server_list.fetch_unit_lists().await?;
        let results = join_all(units.iter().map(|unit| {
            let client = self.unit_client(Some(unit.as_str()));
            async move { client.publish_single(data_id, group, content).await }
        }))
        .await;
        for result in results {
            result?;
        }
        Ok(())
    }

    /// Remove a config from every unit, in parallel.
    pub async fn remove_to_all_unit(&self, data_id: &str, group: &str) -> Result<()> {
        let units = self.server_list.fetch_unit_lists().await?;
        let results = join_all(units.iter().map(|unit| {
            let client = self.unit_client(Some(unit.as_str()));
            async move { client.remove(data_id, group).await }
        }))
        .await;
        for result in results {
            result?;
        }
        Ok(())
    }

    /// Read the same key from every unit, in parallel.
    pub async fn get_config_all_unit(
        &self,
        data_id: &str,
        group: &str,
    ) -> Result<Vec<(String, Option<String>)>> {
        let units = self.server_list.fetch_unit_lists().await?;
        let results = join_all(units.iter().map(|unit| {
            let client = self.unit_client(Some(unit.as_str()));
            let unit = unit.clone();
            async move { (unit, client.get_config(data_id, group).await) }
        }))
        .await;
        let mut values = Vec::with_capacity(results.len());
        for (unit, result) in results {
            values.push((unit, result?));
        }
        Ok(values)
    }

    /// Stop the refresh loop and every unit client, then drop the
    /// registry. Idempotent; loops exit on their next iteration.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.server_list.close();
        for entry in self.units.iter() {
            entry.value().close();
        }
        self.units.clear();
        info!("diamond client closed");
    }
}

impl Drop for DiamondClient {
    fn drop(&mut self) {
        self.close();
    }
}
