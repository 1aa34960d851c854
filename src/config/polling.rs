//! Subscription registration and the long-polling loop
//!
//! One cooperative loop per unit client probes the server with the current
//! `(dataId, group, md5)` set, re-fetches whatever the server flags as
//! changed, and fans new content out to listeners. Deliveries go through
//! each subscription's ordered queue, never inline; an md5 that did not
//! move is silently dropped.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use percent_encoding::percent_decode_str;
use tokio::sync::Semaphore;
use tracing::debug;

use crate::constants::{
    LINE_SEPARATOR, LONG_PULLING_RETRY_DELAY_MS, LONG_PULLING_TIMEOUT_MS,
    LONG_PULLING_TRANSPORT_TIMEOUT_MS, SYNC_CONCURRENCY, WORD_SEPARATOR,
};
use crate::error::{DiamondError, Result};
use crate::http::Method;

use super::cache::{subscription_key, Subscription};
use super::listener::{ConfigListener, ConfigResponse};
use super::{RequestSpec, UnitClient};

impl UnitClient {
    /// Register a listener for `(dataId, group)`.
    ///
    /// The first listener of a key triggers an initial sync; the polling
    /// loop starts only after that sync completes, so every subscriber
    /// sees an initial value before any delta. A listener joining an
    /// already-synced key receives the cached content on a later tick,
    /// without disturbing the existing listeners.
    pub fn subscribe(self: &Arc<Self>, data_id: &str, group: &str, listener: Arc<dyn ConfigListener>) {
        let key = subscription_key(data_id, group, &self.unit);
        let mut first_subscription = false;
        {
            match self.subscriptions.entry(key) {
                dashmap::mapref::entry::Entry::Occupied(mut entry) => {
                    let sub = entry.get_mut();
                    sub.listeners.push(Arc::clone(&listener));
                    if sub.md5.is_some() {
                        // Late joiner: replay the cached value to the new
                        // listener only, through the ordered queue.
                        let response = self.config_response(sub);
                        sub.deliveries.push(vec![listener], response);
                    }
                }
                dashmap::mapref::entry::Entry::Vacant(entry) => {
                    let mut sub = Subscription::new(data_id, group);
                    sub.listeners.push(listener);
                    entry.insert(sub);
                    first_subscription = true;
                }
            }
        }

        if first_subscription {
            let client = Arc::clone(self);
            let data_id = data_id.to_string();
            let group = group.to_string();
            tokio::spawn(async move {
                client.sync_configs(vec![(data_id, group)]).await;
                client.start_long_polling();
            });
        }
    }

    /// Remove one listener, or all of them when `listener` is `None`.
    /// The key leaves the polling set as soon as no listener remains.
    pub fn unsubscribe(
        &self,
        data_id: &str,
        group: &str,
        listener: Option<&Arc<dyn ConfigListener>>,
    ) {
        let key = subscription_key(data_id, group, &self.unit);
        let mut remove = false;
        if let Some(mut entry) = self.subscriptions.get_mut(&key) {
            match listener {
                Some(l) => entry.listeners.retain(|x| !Arc::ptr_eq(x, l)),
                None => entry.listeners.clear(),
            }
            remove = entry.listeners.is_empty();
        }
        if remove {
            self.subscriptions.remove(&key);
        }
    }

    /// Number of live subscriptions, polling-roster view.
    pub fn subscription_count(&self) -> usize {
        self.subscriptions.len()
    }

    /// Start the long-polling loop unless it is already running.
    ///
    /// The guard is set on entry and cleared on every exit, error exits
    /// included; the loop ends when the client closes or the subscription
    /// set drains.
    pub(crate) fn start_long_polling(self: &Arc<Self>) {
        if self.polling.swap(true, Ordering::SeqCst) {
            return;
        }
        let client = Arc::clone(self);
        tokio::spawn(async move {
            debug!(unit = %client.unit, "long polling loop started");
            loop {
                if client.closed.load(Ordering::SeqCst) || client.subscriptions.is_empty() {
                    break;
                }
                if let Err(err) = client.poll_once().await {
                    let err = match err {
                        e @ DiamondError::LongPulling { .. } => e,
                        other => DiamondError::LongPulling {
                            message: other.to_string(),
                        },
                    };
                    client.sink.emit(err);
                    tokio::time::sleep(Duration::from_millis(LONG_PULLING_RETRY_DELAY_MS)).await;
                }
            }
            client.polling.store(false, Ordering::SeqCst);
            debug!(unit = %client.unit, "long polling loop stopped");
            // A subscribe that raced the shutdown re-arms the loop.
            if !client.closed.load(Ordering::SeqCst) && !client.subscriptions.is_empty() {
                client.start_long_polling();
            }
        });
    }

    /// One probe round trip: ask which md5s moved, then resync those keys.
    async fn poll_once(&self) -> Result<()> {
        let probe = self.build_probe_body();
        if probe.is_empty() {
            return Ok(());
        }
        let spec = RequestSpec {
            path: "/config.co".to_string(),
            method: Method::Post,
            fields: vec![("Probe-Modify-Request".to_string(), probe)],
            headers: vec![(
                "longPullingTimeout".to_string(),
                LONG_PULLING_TIMEOUT_MS.to_string(),
            )],
            timeout: Duration::from_millis(LONG_PULLING_TRANSPORT_TIMEOUT_MS),
            encode: false,
            sign_group: String::new(),
        };
        let body = match self.request(spec).await? {
            Some(body) => body,
            None => return Ok(()),
        };
        if body.is_empty() {
            return Ok(());
        }
        let updated = parse_probe_response(&body)?;
        if !updated.is_empty() {
            self.sync_configs(updated).await;
        }
        Ok(())
    }

    /// Serialize the subscription set into the probe wire format.
    fn build_probe_body(&self) -> String {
        let tenant = &self.props.namespace;
        let mut body = String::new();
        for entry in self.subscriptions.iter() {
            let sub = entry.value();
            body.push_str(&sub.data_id);
            body.push(WORD_SEPARATOR);
            body.push_str(&sub.group);
            body.push(WORD_SEPARATOR);
            body.push_str(sub.md5.as_deref().unwrap_or(""));
            if tenant.is_empty() {
                body.push(LINE_SEPARATOR);
            } else {
                body.push(WORD_SEPARATOR);
                body.push_str(tenant);
                body.push(LINE_SEPARATOR);
            }
        }
        body
    }

    /// Re-fetch the given keys (at most five in flight) and emit changed
    /// content. Keys unsubscribed mid-flight are dropped silently; fetch
    /// failures keep the old md5 so the next probe retries them.
    pub(crate) async fn sync_configs(&self, updates: Vec<(String, String)>) {
        let limit = Arc::new(Semaphore::new(SYNC_CONCURRENCY));
        let results = join_all(updates.into_iter().map(|(data_id, group)| {
            let limit = Arc::clone(&limit);
            async move {
                let _permit = limit.acquire().await;
                let result = self.get_config(&data_id, &group).await;
                (data_id, group, result)
            }
        }))
        .await;

        for (data_id, group, result) in results {
            let content = match result {
                Ok(content) => content,
                Err(err) => {
                    self.sink.emit(DiamondError::SyncConfig {
                        data_id,
                        group,
                        source: Box::new(err),
                    });
                    continue;
                }
            };

            let key = subscription_key(&data_id, &group, &self.unit);
            let Some(mut sub) = self.subscriptions.get_mut(&key) else {
                continue;
            };
            if !sub.update_content(content.as_deref()) {
                continue;
            }
            // Accepted in md5 order; the per-key queue keeps delivery in
            // the same order even when fetches complete out of order.
            let listeners = sub.listeners.clone();
            let response = self.config_response(&sub);
            sub.deliveries.push(listeners, response);
        }
    }

    fn config_response(&self, sub: &Subscription) -> ConfigResponse {
        ConfigResponse {
            data_id: sub.data_id.clone(),
            group: sub.group.clone(),
            tenant: self.props.namespace.clone(),
            unit: self.unit.clone(),
            content: sub.content.clone(),
        }
    }
}

/// Decode a probe response into the `(dataId, group)` keys whose md5 moved.
///
/// The body is percent-encoded; an undecodable body is a long-pulling
/// error, not a crash.
pub(crate) fn parse_probe_response(body: &str) -> Result<Vec<(String, String)>> {
    let decoded = percent_decode_str(body)
        .decode_utf8()
        .map_err(|e| DiamondError::LongPulling {
            message: format!("probe response decode failed: {}", e),
        })?;
    let mut updated = Vec::new();
    for segment in decoded.split(LINE_SEPARATOR) {
        if segment.is_empty() {
            continue;
        }
        let fields: Vec<&str> = segment.split(WORD_SEPARATOR).collect();
        if fields.len() >= 2 {
            updated.push((fields[0].to_string(), fields[1].to_string()));
        }
    }
    Ok(updated)
}
