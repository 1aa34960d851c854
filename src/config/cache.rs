//! Per-config subscription state

use std::sync::Arc;

use md5::{Digest, Md5};

use super::listener::{ConfigListener, DeliveryQueue};

/// One subscribed `(dataId, group)` within one unit client: last accepted
/// content, its digest, the listeners to fan changes out to, and the
/// ordered channel those deliveries go through.
pub struct Subscription {
    pub data_id: String,
    pub group: String,
    /// Hex MD5 of the last accepted content; `None` before the first
    /// successful sync.
    pub md5: Option<String>,
    pub content: Option<String>,
    pub listeners: Vec<Arc<dyn ConfigListener>>,
    pub(crate) deliveries: DeliveryQueue,
}

impl Subscription {
    /// Requires a running runtime: the subscription owns a drain task for
    /// its delivery queue.
    pub fn new(data_id: &str, group: &str) -> Self {
        Self {
            data_id: data_id.to_string(),
            group: group.to_string(),
            md5: None,
            content: None,
            listeners: Vec::new(),
            deliveries: DeliveryQueue::spawn(),
        }
    }

    /// Accept newly fetched content (`None` when the config is absent).
    /// Returns `true` only when the digest actually moved; an unchanged
    /// digest is the debounce that keeps duplicate polls silent.
    pub fn update_content(&mut self, content: Option<&str>) -> bool {
        let new_md5 = content.map(compute_md5);
        if new_md5 == self.md5 {
            return false;
        }
        self.md5 = new_md5;
        self.content = content.map(str::to_string);
        true
    }
}

/// In-memory subscription key: `<dataId>@<group>@<unit>`.
pub fn subscription_key(data_id: &str, group: &str, unit: &str) -> String {
    format!("{}@{}@{}", data_id, group, unit)
}

/// Hex MD5 digest of a string.
pub fn compute_md5(content: &str) -> String {
    let mut hasher = Md5::new();
    hasher.update(content.as_bytes());
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compute_md5() {
        assert_eq!(compute_md5("hello world"), "5eb63bbbe01eeed093cb22bb8f5acdc3");
        assert_eq!(compute_md5(""), "d41d8cd98f00b204e9800998ecf8427e");
    }

    #[test]
    fn test_subscription_key() {
        assert_eq!(subscription_key("d", "g", "hz"), "d@g@hz");
    }

    #[tokio::test]
    async fn test_update_content_debounces() {
        let mut sub = Subscription::new("d", "g");
        assert!(sub.md5.is_none());

        assert!(sub.update_content(Some("v1")));
        assert_eq!(sub.content.as_deref(), Some("v1"));
        let md5_v1 = sub.md5.clone().unwrap();

        // Same content twice: second application is silent.
        assert!(!sub.update_content(Some("v1")));
        assert_eq!(sub.md5.as_deref(), Some(md5_v1.as_str()));

        assert!(sub.update_content(Some("v2")));
        assert_ne!(sub.md5.as_deref(), Some(md5_v1.as_str()));
    }

    #[tokio::test]
    async fn test_update_content_absent_config() {
        let mut sub = Subscription::new("d", "g");

        // Absent before and after the first sync: nothing changed.
        assert!(!sub.update_content(None));

        assert!(sub.update_content(Some("v1")));
        // Config deleted on the server: that is a change.
        assert!(sub.update_content(None));
        assert!(sub.md5.is_none());
        assert!(sub.content.is_none());
    }
}
