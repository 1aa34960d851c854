//! Response model types for batch and listing operations

use serde::{Deserialize, Serialize};

/// One entry of a `batchGetConfig` / `batchQuery` response.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchItem {
    #[serde(default)]
    pub status: i32,
    #[serde(default)]
    pub data_id: String,
    #[serde(default)]
    pub group: String,
    #[serde(default)]
    pub content: Option<String>,
}

/// Batch entry status the server uses for "found".
pub const BATCH_STATUS_OK: i32 = 1;

/// One page of the full config listing.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigInfoPage {
    #[serde(default)]
    pub total_count: u64,
    #[serde(default)]
    pub page_number: u64,
    #[serde(default)]
    pub pages_available: u64,
    #[serde(default)]
    pub page_items: Vec<ConfigInfo>,
}

/// One config row of the full listing.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigInfo {
    #[serde(default)]
    pub data_id: String,
    #[serde(default)]
    pub group: String,
    #[serde(default)]
    pub tenant: String,
    #[serde(default)]
    pub app_name: String,
    #[serde(default)]
    pub content: Option<String>,
}
