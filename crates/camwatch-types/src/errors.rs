use thiserror::Error;

pub type Result<T, E = CamwatchError> = std::result::Result<T, E>;

/// Unified error type covering common failure scenarios across subsystems.
#[derive(Debug, Error)]
pub enum CamwatchError {
    #[error("configuration error: {0}")]
    Configuration(String),
    #[error("frame source error: {0}")]
    Source(String),
    #[error("capture error: {0}")]
    Capture(String),
    #[error("viewer error: {0}")]
    Viewer(String),
    #[error("network error: {0}")]
    Network(String),
    #[error("operational error: {0}")]
    Ops(String),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}
