use serde::{Deserialize, Serialize};
use url::Url;

use crate::playback::ViewerFault;

const ACTIVE_STATUS: &str = "active";

/// Camera entry as listed by the device registry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CameraDescriptor {
    pub camera_id: String,
    pub device_name: String,
    #[serde(default)]
    pub location: String,
    #[serde(default = "default_status")]
    pub status: String,
    #[serde(default)]
    pub stream_url: String,
    #[serde(default)]
    pub last_active: Option<String>,
}

fn default_status() -> String {
    ACTIVE_STATUS.into()
}

impl CameraDescriptor {
    pub fn is_active(&self) -> bool {
        is_active_status(&self.status)
    }

    pub fn source(&self) -> StreamSource {
        StreamSource::new(self.stream_url.clone(), self.status.clone())
    }

    pub fn title(&self) -> String {
        if self.location.is_empty() {
            self.device_name.clone()
        } else {
            format!("{} ({})", self.device_name, self.location)
        }
    }
}

pub fn is_active_status(status: &str) -> bool {
    status.trim().eq_ignore_ascii_case(ACTIVE_STATUS)
}

/// Inputs that decide whether a viewer may poll at all.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamSource {
    pub url: String,
    pub status: String,
}

impl StreamSource {
    pub fn new(url: impl Into<String>, status: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            status: status.into(),
        }
    }

    pub fn active(url: impl Into<String>) -> Self {
        Self::new(url, ACTIVE_STATUS)
    }

    /// Checks the preconditions for polling without touching the network.
    pub fn resolve(&self) -> Result<Url, ViewerFault> {
        if !is_active_status(&self.status) {
            return Err(ViewerFault::CameraInactive);
        }
        let trimmed = self.url.trim();
        if trimmed.is_empty() {
            return Err(ViewerFault::NoStreamConfigured);
        }
        let url = Url::parse(trimmed).map_err(|err| ViewerFault::InvalidSource(err.to_string()))?;
        match url.scheme() {
            "http" | "https" => Ok(url),
            other => Err(ViewerFault::InvalidSource(format!(
                "unsupported scheme '{other}'"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inactive_status_wins_over_missing_url() {
        let source = StreamSource::new("", "maintenance");
        assert_eq!(source.resolve(), Err(ViewerFault::CameraInactive));
    }

    #[test]
    fn empty_url_is_not_configured() {
        let source = StreamSource::active("   ");
        assert_eq!(source.resolve(), Err(ViewerFault::NoStreamConfigured));
    }

    #[test]
    fn status_comparison_ignores_case_and_whitespace() {
        let source = StreamSource::new("http://cam.local/frame", " Active ");
        assert!(source.resolve().is_ok());
    }

    #[test]
    fn rejects_non_http_urls() {
        let source = StreamSource::active("rtsp://cam.local/stream");
        assert!(matches!(
            source.resolve(),
            Err(ViewerFault::InvalidSource(_))
        ));
    }

    #[test]
    fn descriptor_title_includes_location() {
        let camera = CameraDescriptor {
            camera_id: "a32be6e7".into(),
            device_name: "Gate 3".into(),
            location: "Nguyen Van Linh".into(),
            status: "active".into(),
            stream_url: "http://cam.local/frame".into(),
            last_active: None,
        };
        assert_eq!(camera.title(), "Gate 3 (Nguyen Van Linh)");
        assert!(camera.is_active());
    }
}
