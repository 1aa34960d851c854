//! Client error types for the Diamond SDK

/// Error type for Diamond client operations
#[derive(Debug, thiserror::Error)]
pub enum DiamondError {
    /// No host could be chosen for a unit.
    #[error("no diamond server available for unit {unit}")]
    ServerUnavailable { unit: String },

    /// Transport failure or unexpected HTTP status.
    #[error("server response error: status={status:?}, url={url}: {message}")]
    ServerResponse {
        status: Option<u16>,
        url: String,
        message: String,
    },

    /// Server reported concurrent modification (HTTP 409) on a write.
    #[error("concurrent modification rejected by server: url={url}")]
    ServerConflict { url: String },

    /// Discovery returned an empty host list.
    #[error("discovery returned an empty host list for unit {unit}")]
    ServerHostEmpty { unit: String },

    /// Background server-list refresh failed for one unit.
    #[error("server list refresh failed for unit {unit}: {source}")]
    UpdateServers {
        unit: String,
        #[source]
        source: Box<DiamondError>,
    },

    /// Re-fetch of a single subscribed config failed.
    #[error("config sync failed: dataId={data_id}, group={group}: {source}")]
    SyncConfig {
        data_id: String,
        group: String,
        #[source]
        source: Box<DiamondError>,
    },

    /// Probe request or probe response handling failed.
    #[error("long pulling failed: {message}")]
    LongPulling { message: String },

    /// Unparseable batch response; carries the raw body.
    #[error("batch response deserialize failed: {body}")]
    BatchDeserialize {
        body: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("snapshot read failed: key={key}")]
    SnapshotRead {
        key: String,
        #[source]
        source: std::io::Error,
    },

    #[error("snapshot write failed: key={key}")]
    SnapshotWrite {
        key: String,
        #[source]
        source: std::io::Error,
    },

    #[error("snapshot delete failed: key={key}")]
    SnapshotDelete {
        key: String,
        #[source]
        source: std::io::Error,
    },

    /// Corrupt local server-list cache.
    #[error("server list snapshot is not valid JSON: unit={unit}")]
    ServerListSnapshotParse {
        unit: String,
        #[source]
        source: serde_json::Error,
    },

    /// Transport-level failure before any HTTP status was received.
    #[error("transport error: url={url}: {message}")]
    Transport { url: String, message: String },

    /// Rejected client properties at construction time.
    #[error("invalid client properties: {0}")]
    InvalidProps(String),
}

pub type Result<T> = std::result::Result<T, DiamondError>;
