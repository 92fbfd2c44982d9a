use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    frame::CaptureOrigin,
    playback::{PlaybackState, RequestToken},
    telemetry::ViewerMetrics,
};

/// High-level event bus message kinds emitted by a viewer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventKind {
    Lifecycle,
    Playback,
    Frame,
    Failure,
}

/// Immutable event envelope for logging, telemetry and the dashboard.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ViewerEvent {
    pub id: Uuid,
    pub kind: EventKind,
    /// Camera the viewer is showing, or the raw source URL when unnamed.
    pub camera: String,
    pub timestamp: DateTime<Utc>,
    pub payload: EventPayload,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum EventPayload {
    Mounted { url: String },
    StateChanged { from: PlaybackState, to: PlaybackState },
    FramePresented { token: RequestToken, width: u32, height: u32 },
    LoadFailed { token: RequestToken, consecutive: u32, message: String },
    Paused { origin: CaptureOrigin },
    Resumed { token: RequestToken },
    Refreshed,
    SourceChanged { url: String, status: String },
    /// Carries the viewer's final counters for the session.
    Unmounted { metrics: ViewerMetrics },
}

impl EventPayload {
    pub fn kind(&self) -> EventKind {
        match self {
            EventPayload::Mounted { .. }
            | EventPayload::SourceChanged { .. }
            | EventPayload::Unmounted { .. } => EventKind::Lifecycle,
            EventPayload::StateChanged { .. }
            | EventPayload::Paused { .. }
            | EventPayload::Resumed { .. }
            | EventPayload::Refreshed => EventKind::Playback,
            EventPayload::FramePresented { .. } => EventKind::Frame,
            EventPayload::LoadFailed { .. } => EventKind::Failure,
        }
    }
}

impl ViewerEvent {
    pub fn new(camera: impl Into<String>, payload: EventPayload) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind: payload.kind(),
            camera: camera.into(),
            timestamp: Utc::now(),
            payload,
        }
    }
}
