use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Running counters kept by a viewer for the lifetime of a mount.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ViewerMetrics {
    pub requests_issued: u64,
    pub frames_presented: u64,
    pub stale_discarded: u64,
    pub load_failures: u64,
    pub pauses: u64,
    pub placeholder_pauses: u64,
    pub last_frame_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SessionTelemetry {
    pub camera: String,
    pub metrics: ViewerMetrics,
    pub notes: Vec<String>,
}
