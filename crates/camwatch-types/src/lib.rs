//! Shared domain types for the camwatch project.

pub mod camera;
pub mod config;
pub mod events;
pub mod frame;
pub mod playback;
pub mod telemetry;

mod errors;

pub use errors::{CamwatchError, Result};
