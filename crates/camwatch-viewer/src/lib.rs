//! Live camera viewer: polls still frames, double-buffers them, and freezes
//! the current frame on pause.
//!
//! [`StreamSession`] holds the state machine and is fully synchronous.
//! [`StreamViewer`] wraps it in a task that owns the polling timer and the
//! in-flight loads, and [`ViewerHandle`] is how callers drive it.

use camwatch_types::CamwatchError;

mod buffer;
mod hooks;
mod render;
mod request;
mod session;
mod viewer;

pub use buffer::{BufferRole, FrameBuffer};
pub use hooks::ViewerHooks;
pub use render::{Display, ViewerSnapshot};
pub use request::{cache_busted, FrameRequest, RequestTarget};
pub use session::{LoadOutcome, StreamSession};
pub use viewer::{StreamViewer, ViewerHandle};

pub fn viewer_error(message: impl Into<String>) -> CamwatchError {
    CamwatchError::Viewer(message.into())
}
