//! Per-unit configuration client
//!
//! `UnitClient` owns everything one unit needs: the signed request layer
//! with per-request host failover, the read/write operations, and the
//! subscription engine (see `polling`). All unit clients of one facade
//! share the same transport, snapshot store, and server list manager.

pub mod cache;
pub mod listener;
mod polling;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use dashmap::DashMap;
use tracing::debug;

use crate::constants::{CONTEXT_PATH, HTTPS_PORT, HTTP_PORT, LIST_PAGE_SIZE, WORD_SEPARATOR};
use crate::error::{DiamondError, Result};
use crate::events::ErrorSink;
use crate::http::{HttpRequest, HttpTransport, Method};
use crate::model::{BatchItem, ConfigInfo, ConfigInfoPage, BATCH_STATUS_OK};
use crate::props::ClientProps;
use crate::server_list::ServerListManager;
use crate::sign::{spas_headers, timestamp_millis};
use crate::snapshot::{config_key, SnapshotStore};

use self::cache::Subscription;

/// One fully described server call, before host selection and signing.
struct RequestSpec {
    /// Path and query under `/diamond-server`.
    path: String,
    method: Method,
    fields: Vec<(String, String)>,
    headers: Vec<(String, String)>,
    timeout: Duration,
    encode: bool,
    /// Group part of the sign body; empty when the request spans groups.
    sign_group: String,
}

/// Client for a single unit.
pub struct UnitClient {
    unit: String,
    props: Arc<ClientProps>,
    transport: Arc<dyn HttpTransport>,
    snapshot: Arc<SnapshotStore>,
    server_list: Arc<ServerListManager>,
    sink: ErrorSink,
    /// Host all requests of this unit go to until one fails.
    current_host: RwLock<Option<String>>,
    subscriptions: DashMap<String, Subscription>,
    /// Re-entrancy guard of the long-polling loop.
    polling: AtomicBool,
    closed: AtomicBool,
}

impl UnitClient {
    pub(crate) fn new(
        unit: &str,
        props: Arc<ClientProps>,
        transport: Arc<dyn HttpTransport>,
        snapshot: Arc<SnapshotStore>,
        server_list: Arc<ServerListManager>,
        sink: ErrorSink,
    ) -> Self {
        Self {
            unit: unit.to_string(),
            props,
            transport,
            snapshot,
            server_list,
            sink,
            current_host: RwLock::new(None),
            subscriptions: DashMap::new(),
            polling: AtomicBool::new(false),
            closed: AtomicBool::new(false),
        }
    }

    pub fn unit(&self) -> &str {
        &self.unit
    }

    /// Stop the subscription engine; the loop exits on its next iteration.
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    // ---- signed request layer ----

    /// Send one signed request to the current host.
    ///
    /// `Ok(Some(body))` for 200, `Ok(None)` for 404 (an absent config is a
    /// value, not an error). Any transport failure or unexpected status
    /// re-selects the host before failing.
    async fn request(&self, spec: RequestSpec) -> Result<Option<String>> {
        let host = self.pick_host().await?;
        let url = self.build_url(&host, &spec.path);
        let timestamp = timestamp_millis();
        let mut headers = spas_headers(
            &self.props.access_key,
            &self.props.secret_key,
            &self.props.namespace,
            &spec.sign_group,
            &timestamp,
        );
        headers.extend(spec.headers);

        let response = self
            .transport
            .request(HttpRequest {
                url: url.clone(),
                method: spec.method,
                form: spec.fields,
                headers,
                timeout: spec.timeout,
                encode: spec.encode,
            })
            .await;

        match response {
            Ok(r) if r.status == 200 => Ok(Some(r.body)),
            Ok(r) if r.status == 404 => Ok(None),
            Ok(r) if r.status == 409 => Err(DiamondError::ServerConflict { url }),
            Ok(r) => {
                self.rotate_host().await;
                Err(DiamondError::ServerResponse {
                    status: Some(r.status),
                    url,
                    message: r.body,
                })
            }
            Err(e) => {
                self.rotate_host().await;
                Err(DiamondError::ServerResponse {
                    status: None,
                    url,
                    message: e.to_string(),
                })
            }
        }
    }

    async fn pick_host(&self) -> Result<String> {
        let current = {
            let guard = self.current_host.read().unwrap_or_else(|e| e.into_inner());
            guard.clone()
        };
        match current {
            Some(host) => Ok(host),
            None => self.rotate_host().await,
        }
    }

    /// Select the next host from the server list, remembering it even when
    /// none is available so the next call retries discovery.
    async fn rotate_host(&self) -> Result<String> {
        let next = self.server_list.get_one(&self.unit).await;
        {
            let mut guard = self.current_host.write().unwrap_or_else(|e| e.into_inner());
            *guard = next.clone();
        }
        match next {
            Some(host) => {
                debug!(unit = %self.unit, host = %host, "selected config server host");
                Ok(host)
            }
            None => Err(DiamondError::ServerUnavailable {
                unit: self.unit.clone(),
            }),
        }
    }

    /// A host that carries an explicit port keeps it; bare hosts get the
    /// scheme default (443 under TLS, 8080 otherwise).
    fn build_url(&self, host: &str, path: &str) -> String {
        let scheme = if self.props.ssl { "https" } else { "http" };
        let authority = if host.contains(':') {
            host.to_string()
        } else if self.props.ssl {
            format!("{}:{}", host, HTTPS_PORT)
        } else {
            format!("{}:{}", host, HTTP_PORT)
        };
        format!("{}://{}{}{}", scheme, authority, CONTEXT_PATH, path)
    }

    fn fields(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    // ---- read / write operations ----

    /// Read one config. On success the body is written through to the
    /// snapshot; on failure a cached snapshot (if any) is returned and the
    /// original error goes to the event stream.
    pub async fn get_config(&self, data_id: &str, group: &str) -> Result<Option<String>> {
        let tenant = self.props.namespace.clone();
        let key = config_key(&self.unit, &tenant, group, data_id);
        let spec = RequestSpec {
            path: "/config.co".to_string(),
            method: Method::Get,
            fields: Self::fields(&[("dataId", data_id), ("group", group), ("tenant", &tenant)]),
            headers: Vec::new(),
            timeout: self.props.request_timeout,
            encode: false,
            sign_group: group.to_string(),
        };
        match self.request(spec).await {
            Ok(Some(content)) => {
                self.snapshot.save(&key, Some(content.as_str())).await;
                Ok(Some(content))
            }
            Ok(None) => Ok(None),
            Err(err) => match self.snapshot.get(&key).await {
                Some(cached) => {
                    self.sink.emit(err);
                    Ok(Some(cached))
                }
                None => Err(err),
            },
        }
    }

    /// Create or replace one config.
    pub async fn publish_single(&self, data_id: &str, group: &str, content: &str) -> Result<()> {
        let tenant = self.props.namespace.clone();
        let spec = RequestSpec {
            path: "/basestone.do?method=syncUpdateAll".to_string(),
            method: Method::Post,
            fields: Self::fields(&[
                ("dataId", data_id),
                ("group", group),
                ("content", content),
                ("tenant", &tenant),
            ]),
            headers: Vec::new(),
            timeout: self.props.request_timeout,
            encode: true,
            sign_group: group.to_string(),
        };
        self.request(spec).await.map(|_| ())
    }

    /// Remove one config and all its datums.
    pub async fn remove(&self, data_id: &str, group: &str) -> Result<()> {
        let tenant = self.props.namespace.clone();
        let spec = RequestSpec {
            path: "/datum.do?method=deleteAllDatums".to_string(),
            method: Method::Post,
            fields: Self::fields(&[("dataId", data_id), ("group", group), ("tenant", &tenant)]),
            headers: Vec::new(),
            timeout: self.props.request_timeout,
            encode: false,
            sign_group: group.to_string(),
        };
        self.request(spec).await.map(|_| ())
    }

    /// Add or replace a single datum of an aggregate config.
    pub async fn publish_aggr(
        &self,
        data_id: &str,
        group: &str,
        datum_id: &str,
        content: &str,
    ) -> Result<()> {
        let tenant = self.props.namespace.clone();
        let spec = RequestSpec {
            path: "/datum.do?method=addDatum".to_string(),
            method: Method::Post,
            fields: Self::fields(&[
                ("dataId", data_id),
                ("group", group),
                ("datumId", datum_id),
                ("content", content),
                ("appName", &self.props.app_name),
                ("tenant", &tenant),
            ]),
            headers: Vec::new(),
            timeout: self.props.request_timeout,
            encode: false,
            sign_group: group.to_string(),
        };
        self.request(spec).await.map(|_| ())
    }

    /// Remove a single datum of an aggregate config.
    pub async fn remove_aggr(&self, data_id: &str, group: &str, datum_id: &str) -> Result<()> {
        let tenant = self.props.namespace.clone();
        let spec = RequestSpec {
            path: "/datum.do?method=deleteDatum".to_string(),
            method: Method::Post,
            fields: Self::fields(&[
                ("dataId", data_id),
                ("group", group),
                ("datumId", datum_id),
                ("tenant", &tenant),
            ]),
            headers: Vec::new(),
            timeout: self.props.request_timeout,
            encode: false,
            sign_group: group.to_string(),
        };
        self.request(spec).await.map(|_| ())
    }

    /// Read several configs of one group at once. Found entries are
    /// written through to the snapshot.
    pub async fn batch_get_config(
        &self,
        data_ids: &[String],
        group: &str,
    ) -> Result<Vec<BatchItem>> {
        let items = self
            .batch_request("/config.co?method=batchGetConfig", data_ids, group)
            .await?;
        for item in &items {
            if item.status == BATCH_STATUS_OK {
                if let Some(content) = &item.content {
                    let key = config_key(
                        &self.unit,
                        &self.props.namespace,
                        &item.group,
                        &item.data_id,
                    );
                    self.snapshot.save(&key, Some(content.as_str())).await;
                }
            }
        }
        Ok(items)
    }

    /// Admin-side batch query; no snapshot writes.
    pub async fn batch_query(&self, data_ids: &[String], group: &str) -> Result<Vec<BatchItem>> {
        self.batch_request("/admin.do?method=batchQuery", data_ids, group)
            .await
    }

    async fn batch_request(
        &self,
        path: &str,
        data_ids: &[String],
        group: &str,
    ) -> Result<Vec<BatchItem>> {
        let tenant = self.props.namespace.clone();
        let joined = data_ids.join(&WORD_SEPARATOR.to_string());
        let spec = RequestSpec {
            path: path.to_string(),
            method: Method::Post,
            fields: Self::fields(&[("dataIds", &joined), ("group", group), ("tenant", &tenant)]),
            headers: Vec::new(),
            timeout: self.props.request_timeout,
            encode: false,
            sign_group: group.to_string(),
        };
        let body = self.request(spec).await?.unwrap_or_default();
        serde_json::from_str(&body).map_err(|e| DiamondError::BatchDeserialize { body, source: e })
    }

    /// Walk the full config listing of this tenant: one probe page to
    /// learn the total, then sequential pages of 200.
    pub async fn get_all_config_info(&self) -> Result<Vec<ConfigInfo>> {
        let probe = self.config_info_page(1, 1).await?;
        if probe.total_count == 0 {
            return Ok(Vec::new());
        }
        let pages = probe.total_count.div_ceil(LIST_PAGE_SIZE);
        let mut items = Vec::with_capacity(probe.total_count as usize);
        for page_no in 1..=pages {
            let page = self.config_info_page(page_no, LIST_PAGE_SIZE).await?;
            items.extend(page.page_items);
        }
        Ok(items)
    }

    async fn config_info_page(&self, page_no: u64, page_size: u64) -> Result<ConfigInfoPage> {
        let tenant = self.props.namespace.clone();
        let spec = RequestSpec {
            path: "/basestone.do".to_string(),
            method: Method::Get,
            fields: Self::fields(&[
                ("pageNo", &page_no.to_string()),
                ("pageSize", &page_size.to_string()),
                ("method", "getAllConfigInfoByTenant"),
                ("tenant", &tenant),
            ]),
            headers: Vec::new(),
            timeout: self.props.request_timeout,
            encode: false,
            sign_group: String::new(),
        };
        let body = self.request(spec).await?.unwrap_or_default();
        serde_json::from_str(&body).map_err(|e| DiamondError::BatchDeserialize { body, source: e })
    }
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;
    use crate::http::testing::{down, ok, status, MockTransport};

    fn client(
        dir: &TempDir,
        transport: Arc<MockTransport>,
    ) -> (
        Arc<UnitClient>,
        tokio::sync::mpsc::UnboundedReceiver<DiamondError>,
    ) {
        let (sink, rx) = ErrorSink::channel();
        let props = Arc::new(
            ClientProps::new("endpoint.test", "tenant-a")
                .with_auth("ak", "sk")
                .with_ssl(false),
        );
        let snapshot = Arc::new(SnapshotStore::new(dir.path(), sink.clone()));
        let server_list = Arc::new(ServerListManager::new(
            Arc::clone(&props),
            Arc::clone(&transport) as Arc<dyn HttpTransport>,
            Arc::clone(&snapshot),
            sink.clone(),
        ));
        let client = Arc::new(UnitClient::new(
            "hz",
            props,
            transport,
            snapshot,
            server_list,
            sink,
        ));
        (client, rx)
    }

    /// Discovery answers with one host; config routes dispatch on path.
    pub(crate) fn route(
        req: &HttpRequest,
        config: impl Fn(&HttpRequest) -> crate::error::Result<crate::http::HttpResponse>,
    ) -> crate::error::Result<crate::http::HttpResponse> {
        if req.url.contains("diamond-unit-") {
            ok("server1\n")
        } else {
            config(req)
        }
    }

    #[tokio::test]
    async fn test_get_config_saves_snapshot() {
        let dir = TempDir::new().unwrap();
        let transport = Arc::new(MockTransport::new(|req| route(req, |_| ok("v1"))));
        let (client, _rx) = client(&dir, Arc::clone(&transport));

        assert_eq!(
            client.get_config("d", "g").await.unwrap(),
            Some("v1".to_string())
        );
        let key = config_key("hz", "tenant-a", "g", "d");
        assert_eq!(client.snapshot.get(&key).await, Some("v1".to_string()));

        // Config request went to the discovered host, plain HTTP port.
        let config_req = transport
            .requests()
            .into_iter()
            .find(|r| r.url.contains("/config.co"))
            .unwrap();
        assert_eq!(config_req.url, "http://server1:8080/diamond-server/config.co");
    }

    #[tokio::test]
    async fn test_get_config_404_is_none_and_writes_nothing() {
        let dir = TempDir::new().unwrap();
        let transport = Arc::new(MockTransport::new(|req| route(req, |_| status(404, ""))));
        let (client, mut rx) = client(&dir, transport);

        assert_eq!(client.get_config("d", "g").await.unwrap(), None);
        let key = config_key("hz", "tenant-a", "g", "d");
        assert_eq!(client.snapshot.get(&key).await, None);
        assert!(rx.try_recv().is_err(), "404 emits no error event");
    }

    #[tokio::test]
    async fn test_get_config_falls_back_to_snapshot() {
        let dir = TempDir::new().unwrap();
        let transport = Arc::new(MockTransport::new(|req| {
            route(req, |r| down(&r.url))
        }));
        let (client, mut rx) = client(&dir, transport);

        let key = config_key("hz", "tenant-a", "g", "d");
        client.snapshot.save(&key, Some("v_old")).await;

        assert_eq!(
            client.get_config("d", "g").await.unwrap(),
            Some("v_old".to_string())
        );
        let err = rx.recv().await.unwrap();
        assert!(matches!(err, DiamondError::ServerResponse { status: None, .. }));
    }

    #[tokio::test]
    async fn test_get_config_fails_without_snapshot() {
        let dir = TempDir::new().unwrap();
        let transport = Arc::new(MockTransport::new(|req| {
            route(req, |r| down(&r.url))
        }));
        let (client, _rx) = client(&dir, transport);

        let err = client.get_config("d", "g").await.unwrap_err();
        assert!(matches!(err, DiamondError::ServerResponse { .. }));
    }

    #[tokio::test]
    async fn test_conflict_on_write() {
        let dir = TempDir::new().unwrap();
        let transport = Arc::new(MockTransport::new(|req| {
            route(req, |_| status(409, "conflict"))
        }));
        let (client, _rx) = client(&dir, transport);

        let err = client.publish_single("d", "g", "v").await.unwrap_err();
        assert!(matches!(err, DiamondError::ServerConflict { .. }));
    }

    #[tokio::test]
    async fn test_request_carries_spas_headers() {
        let dir = TempDir::new().unwrap();
        let transport = Arc::new(MockTransport::new(|req| route(req, |_| ok("v"))));
        let (client, _rx) = client(&dir, Arc::clone(&transport));

        client.get_config("d", "g").await.unwrap();
        let config_req = transport
            .requests()
            .into_iter()
            .find(|r| r.url.contains("/config.co"))
            .unwrap();
        let names: Vec<&str> = config_req.headers.iter().map(|(k, _)| k.as_str()).collect();
        for expected in [
            "Client-Version",
            "Content-Type",
            "Spas-AccessKey",
            "timeStamp",
            "exConfigInfo",
            "Spas-Signature",
        ] {
            assert!(names.contains(&expected), "missing header {}", expected);
        }
    }

    #[tokio::test]
    async fn test_host_rotates_after_failure() {
        let dir = TempDir::new().unwrap();
        let transport = Arc::new(MockTransport::new(|req| {
            if req.url.contains("diamond-unit-") {
                ok("server1\nserver2\n")
            } else {
                status(500, "boom")
            }
        }));
        let (client, _rx) = client(&dir, Arc::clone(&transport));

        client.get_config("d", "g").await.unwrap_err();
        client.get_config("d", "g").await.unwrap_err();

        let hosts: Vec<String> = transport
            .requests()
            .into_iter()
            .filter(|r| r.url.contains("/config.co"))
            .map(|r| r.url)
            .collect();
        assert_eq!(hosts.len(), 2);
        assert_ne!(hosts[0], hosts[1], "second attempt hits the other host");
    }

    #[tokio::test]
    async fn test_batch_get_config_saves_found_entries() {
        let dir = TempDir::new().unwrap();
        let transport = Arc::new(MockTransport::new(|req| {
            route(req, |_| {
                ok(r#"[{"status":1,"dataId":"a","group":"g","content":"va"},
                       {"status":0,"dataId":"b","group":"g"}]"#)
            })
        }));
        let (client, _rx) = client(&dir, transport);

        let items = client
            .batch_get_config(&["a".to_string(), "b".to_string()], "g")
            .await
            .unwrap();
        assert_eq!(items.len(), 2);

        let key_a = config_key("hz", "tenant-a", "g", "a");
        let key_b = config_key("hz", "tenant-a", "g", "b");
        assert_eq!(client.snapshot.get(&key_a).await, Some("va".to_string()));
        assert_eq!(client.snapshot.get(&key_b).await, None);
    }

    #[tokio::test]
    async fn test_batch_get_config_joins_data_ids_with_word_separator() {
        let dir = TempDir::new().unwrap();
        let transport = Arc::new(MockTransport::new(|req| route(req, |_| ok("[]"))));
        let (client, _rx) = client(&dir, Arc::clone(&transport));

        client
            .batch_get_config(&["a".to_string(), "b".to_string()], "g")
            .await
            .unwrap();

        let batch_req = transport
            .requests()
            .into_iter()
            .find(|r| r.url.contains("batchGetConfig"))
            .unwrap();
        let data_ids = batch_req
            .form
            .iter()
            .find(|(k, _)| k == "dataIds")
            .map(|(_, v)| v.clone())
            .unwrap();
        assert_eq!(data_ids, "a\u{2}b");
    }

    #[tokio::test]
    async fn test_batch_deserialize_error_keeps_body() {
        let dir = TempDir::new().unwrap();
        let transport = Arc::new(MockTransport::new(|req| route(req, |_| ok("<html>"))));
        let (client, _rx) = client(&dir, transport);

        let err = client
            .batch_get_config(&["a".to_string()], "g")
            .await
            .unwrap_err();
        match err {
            DiamondError::BatchDeserialize { body, .. } => assert_eq!(body, "<html>"),
            other => panic!("unexpected error: {}", other),
        }
    }

    #[tokio::test]
    async fn test_get_all_config_info_pages() {
        let dir = TempDir::new().unwrap();
        let transport = Arc::new(MockTransport::new(|req| {
            route(req, |r| {
                let page_no = r
                    .form
                    .iter()
                    .find(|(k, _)| k == "pageNo")
                    .map(|(_, v)| v.clone())
                    .unwrap();
                let page_size = r
                    .form
                    .iter()
                    .find(|(k, _)| k == "pageSize")
                    .map(|(_, v)| v.clone())
                    .unwrap();
                if page_size == "1" {
                    ok(r#"{"totalCount":401,"pageItems":[]}"#)
                } else if page_no == "1" || page_no == "2" {
                    ok(r#"{"totalCount":401,"pageItems":[
                        {"dataId":"x","group":"g"},{"dataId":"y","group":"g"}]}"#)
                } else {
                    ok(r#"{"totalCount":401,"pageItems":[{"dataId":"z","group":"g"}]}"#)
                }
            })
        }));
        let (client, _rx) = client(&dir, Arc::clone(&transport));

        let items = client.get_all_config_info().await.unwrap();
        // 401 configs at page size 200 means three data pages.
        assert_eq!(items.len(), 5);

        let list_requests: Vec<_> = transport
            .requests()
            .into_iter()
            .filter(|r| r.url.contains("/basestone.do"))
            .collect();
        assert_eq!(list_requests.len(), 4, "one probe page plus three pages");
    }
}
