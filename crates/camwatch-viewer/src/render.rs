use camwatch_types::{
    frame::{DecodedFrame, FrozenFrame},
    playback::{PlaybackState, RequestToken},
    telemetry::ViewerMetrics,
};
use chrono::{DateTime, Utc};

/// What a viewer should put on screen right now.
#[derive(Debug, Clone)]
pub enum Display {
    Live(DecodedFrame),
    Frozen(FrozenFrame),
    Loading,
    /// Error panel; a retry control is always offered.
    Error { message: String },
}

impl Display {
    pub fn is_error(&self) -> bool {
        matches!(self, Display::Error { .. })
    }
}

/// Render model published after every state change.
#[derive(Debug, Clone)]
pub struct ViewerSnapshot {
    pub camera: String,
    pub url: String,
    pub state: PlaybackState,
    pub display: Display,
    /// True while waiting for the first frame of a (re)started stream.
    pub loading: bool,
    pub error_count: u32,
    pub last_token: RequestToken,
    pub last_requested_at: Option<DateTime<Utc>>,
    pub metrics: ViewerMetrics,
}

impl ViewerSnapshot {
    pub fn frozen(&self) -> Option<&FrozenFrame> {
        match &self.display {
            Display::Frozen(frame) => Some(frame),
            _ => None,
        }
    }

    pub fn live_token(&self) -> Option<RequestToken> {
        match &self.display {
            Display::Live(frame) => Some(frame.token),
            _ => None,
        }
    }

    pub fn status_line(&self) -> String {
        match &self.display {
            Display::Live(frame) => format!(
                "{} | frame {} ({}x{})",
                self.state.label(),
                frame.token,
                frame.width,
                frame.height
            ),
            Display::Frozen(frame) => format!(
                "Paused | frozen {:?} ({}x{})",
                frame.origin, frame.image.width, frame.image.height
            ),
            Display::Loading => "Loading...".into(),
            Display::Error { message } => format!("Error | {message} [r to retry]"),
        }
    }
}
