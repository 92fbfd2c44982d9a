use std::fmt;

use serde::{Deserialize, Serialize};

/// Monotonic cache-busting token attached to every frame request.
///
/// Tokens are seeded from wall-clock milliseconds so they read like
/// timestamps in URLs, but a new token is always strictly greater than the
/// previous one even if the clock stalls or steps backwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub struct RequestToken(pub u64);

impl RequestToken {
    pub fn next_after(previous: RequestToken, now_ms: u64) -> Self {
        RequestToken(now_ms.max(previous.0.saturating_add(1)))
    }
}

impl fmt::Display for RequestToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Session generation; completions tagged with an older epoch are no longer wanted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub struct Epoch(pub u64);

impl Epoch {
    pub fn next(self) -> Self {
        Epoch(self.0.wrapping_add(1))
    }
}

/// Reason a viewer sits in the `Errored` state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ViewerFault {
    CameraInactive,
    NoStreamConfigured,
    InvalidSource(String),
    StreamUnavailable {
        consecutive_failures: u32,
        last_error: String,
    },
}

impl ViewerFault {
    /// Configuration faults are re-evaluated on retry instead of polling again.
    pub fn is_configuration(&self) -> bool {
        !matches!(self, ViewerFault::StreamUnavailable { .. })
    }

    pub fn message(&self) -> String {
        match self {
            ViewerFault::CameraInactive => {
                "Camera is inactive. Live view is unavailable until it is reactivated.".into()
            }
            ViewerFault::NoStreamConfigured => "No stream configured for this camera.".into(),
            ViewerFault::InvalidSource(reason) => format!("Invalid stream address: {reason}"),
            ViewerFault::StreamUnavailable { .. } => {
                "Failed to load stream. Please check the connection or try again.".into()
            }
        }
    }
}

impl fmt::Display for ViewerFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PlaybackState {
    Loading,
    Live,
    Paused,
    Errored(ViewerFault),
}

impl PlaybackState {
    /// Polling runs while waiting for the first frame and while live.
    pub fn is_polling(&self) -> bool {
        matches!(self, PlaybackState::Loading | PlaybackState::Live)
    }

    pub fn is_paused(&self) -> bool {
        matches!(self, PlaybackState::Paused)
    }

    pub fn fault(&self) -> Option<&ViewerFault> {
        match self {
            PlaybackState::Errored(fault) => Some(fault),
            _ => None,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            PlaybackState::Loading => "Loading",
            PlaybackState::Live => "Live",
            PlaybackState::Paused => "Paused",
            PlaybackState::Errored(_) => "Error",
        }
    }
}
