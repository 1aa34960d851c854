//! Config change listener trait and notification types

use std::sync::Arc;

use tokio::sync::mpsc;

/// Information about a config change delivered to listeners.
#[derive(Clone, Debug)]
pub struct ConfigResponse {
    pub data_id: String,
    pub group: String,
    pub tenant: String,
    pub unit: String,
    /// New content; `None` when the config was removed on the server.
    pub content: Option<String>,
}

/// Trait for receiving config change notifications.
///
/// Implement this to be notified whenever the subscribed config's content
/// changes. Delivery runs on a task of its own, never inline with the
/// polling engine, so a listener that panics cannot destabilize it.
pub trait ConfigListener: Send + Sync + 'static {
    fn receive_config_info(&self, config_info: ConfigResponse);
}

type Delivery = (Vec<Arc<dyn ConfigListener>>, ConfigResponse);

/// Ordered delivery channel of one subscription.
///
/// A single drain task consumes the queue, so the contents one key
/// accepts reach its listeners in acceptance order even when fetches of
/// successive polls complete out of order.
pub(crate) struct DeliveryQueue {
    tx: mpsc::UnboundedSender<Delivery>,
}

impl DeliveryQueue {
    /// Spawn the drain task; requires a running runtime. The task exits
    /// when the queue is dropped with its subscription.
    pub(crate) fn spawn() -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<Delivery>();
        tokio::spawn(async move {
            while let Some((listeners, response)) = rx.recv().await {
                for listener in listeners {
                    listener.receive_config_info(response.clone());
                }
            }
        });
        Self { tx }
    }

    /// Enqueue one delivery; the drain task picks it up on a later tick.
    pub(crate) fn push(&self, listeners: Vec<Arc<dyn ConfigListener>>, response: ConfigResponse) {
        let _ = self.tx.send((listeners, response));
    }
}

/// A listener that invokes a closure.
pub struct FnConfigListener<F>
where
    F: Fn(ConfigResponse) + Send + Sync + 'static,
{
    f: F,
}

impl<F> FnConfigListener<F>
where
    F: Fn(ConfigResponse) + Send + Sync + 'static,
{
    pub fn new(f: F) -> Self {
        Self { f }
    }
}

impl<F> ConfigListener for FnConfigListener<F>
where
    F: Fn(ConfigResponse) + Send + Sync + 'static,
{
    fn receive_config_info(&self, config_info: ConfigResponse) {
        (self.f)(config_info);
    }
}
