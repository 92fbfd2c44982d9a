use std::{fs, path::Path};

use serde::{Deserialize, Serialize};

use crate::{camera::CameraDescriptor, frame::ImageEncoding, CamwatchError, Result};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ViewerConfig {
    pub poll_interval_ms: u64,
    pub error_threshold: u32,
    pub max_in_flight: usize,
    pub capture_timeout_ms: u64,
    pub cache_bust_param: String,
}

impl Default for ViewerConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 50,
            error_threshold: 3,
            max_in_flight: 4,
            capture_timeout_ms: 2_000,
            cache_bust_param: "t".into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceConfig {
    pub request_timeout_ms: u64,
    pub user_agent: Option<String>,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            request_timeout_ms: 5_000,
            user_agent: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    pub format: ImageEncoding,
    pub jpeg_quality: u8,
    pub snapshot_dir: Option<String>,
    pub placeholder_path: Option<String>,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            format: ImageEncoding::Jpeg,
            jpeg_quality: 85,
            snapshot_dir: None,
            placeholder_path: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OpsConfig {
    pub log_level: String,
    pub telemetry_dir: String,
}

impl Default for OpsConfig {
    fn default() -> Self {
        Self {
            log_level: "info".into(),
            telemetry_dir: "telemetry".into(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CamwatchConfig {
    #[serde(default)]
    pub viewer: ViewerConfig,
    #[serde(default)]
    pub source: SourceConfig,
    #[serde(default)]
    pub capture: CaptureConfig,
    #[serde(default)]
    pub ops: OpsConfig,
    #[serde(default)]
    pub cameras: Vec<CameraDescriptor>,
}

impl CamwatchConfig {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path_ref = path.as_ref();
        let contents = fs::read_to_string(path_ref).map_err(|err| {
            CamwatchError::Configuration(format!(
                "unable to read config file {}: {err}",
                path_ref.display()
            ))
        })?;
        toml::from_str(&contents).map_err(|err| {
            CamwatchError::Configuration(format!(
                "failed to parse config file {}: {err}",
                path_ref.display()
            ))
        })
    }

    pub fn validate(&self) -> Result<()> {
        if !(20..=1_000).contains(&self.viewer.poll_interval_ms) {
            return Err(CamwatchError::Configuration(
                "viewer.poll_interval_ms must be between 20 and 1000".into(),
            ));
        }
        if self.viewer.error_threshold == 0 {
            return Err(CamwatchError::Configuration(
                "viewer.error_threshold must be greater than zero".into(),
            ));
        }
        if self.viewer.max_in_flight < 2 {
            return Err(CamwatchError::Configuration(
                "viewer.max_in_flight must allow both buffers to load (>= 2)".into(),
            ));
        }
        if self.viewer.capture_timeout_ms == 0 {
            return Err(CamwatchError::Configuration(
                "viewer.capture_timeout_ms must be greater than zero".into(),
            ));
        }
        if self.viewer.cache_bust_param.trim().is_empty() {
            return Err(CamwatchError::Configuration(
                "viewer.cache_bust_param must not be empty".into(),
            ));
        }
        if self.source.request_timeout_ms == 0 {
            return Err(CamwatchError::Configuration(
                "source.request_timeout_ms must be greater than zero".into(),
            ));
        }
        if !(1..=100).contains(&self.capture.jpeg_quality) {
            return Err(CamwatchError::Configuration(
                "capture.jpeg_quality must be between 1 and 100".into(),
            ));
        }
        let mut seen = std::collections::HashSet::new();
        for camera in &self.cameras {
            if !seen.insert(camera.camera_id.as_str()) {
                return Err(CamwatchError::Configuration(format!(
                    "duplicate camera id '{}'",
                    camera.camera_id
                )));
            }
        }
        Ok(())
    }

    pub fn camera(&self, camera_id: &str) -> Option<&CameraDescriptor> {
        self.cameras.iter().find(|c| c.camera_id == camera_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn sample_camera(id: &str) -> CameraDescriptor {
        CameraDescriptor {
            camera_id: id.into(),
            device_name: "Junction North".into(),
            location: "District 7".into(),
            status: "active".into(),
            stream_url: "http://127.0.0.1:8000/frame".into(),
            last_active: None,
        }
    }

    #[test]
    fn load_camwatch_config_from_file() {
        let temp_path = std::env::temp_dir().join("camwatch-config-test.toml");
        let config = CamwatchConfig {
            viewer: ViewerConfig {
                poll_interval_ms: 80,
                ..ViewerConfig::default()
            },
            capture: CaptureConfig {
                format: ImageEncoding::Png,
                snapshot_dir: Some("snapshots".into()),
                ..CaptureConfig::default()
            },
            cameras: vec![sample_camera("cam-1")],
            ..CamwatchConfig::default()
        };

        let doc = toml::to_string(&config).expect("serialize config");
        fs::write(&temp_path, doc).expect("write temp config");

        let loaded = CamwatchConfig::from_file(&temp_path).expect("load config");
        assert_eq!(loaded.viewer.poll_interval_ms, 80);
        assert_eq!(loaded.capture.format, ImageEncoding::Png);
        assert_eq!(loaded.camera("cam-1"), Some(&sample_camera("cam-1")));
        fs::remove_file(&temp_path).expect("cleanup temp config");
    }

    #[test]
    fn missing_sections_fall_back_to_defaults() {
        let config: CamwatchConfig = toml::from_str(
            r#"
            [[cameras]]
            camera_id = "cam-9"
            device_name = "Bridge"
            stream_url = "http://cam/frame"
            "#,
        )
        .expect("parse minimal config");
        assert_eq!(config.viewer.error_threshold, 3);
        assert_eq!(config.viewer.cache_bust_param, "t");
        assert!(config.cameras[0].is_active());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn validate_configuration_rules() {
        let mut config = CamwatchConfig::default();
        assert!(config.validate().is_ok());

        config.viewer.poll_interval_ms = 5;
        assert!(config.validate().is_err());
        config.viewer.poll_interval_ms = 50;
        config.viewer.error_threshold = 0;
        assert!(config.validate().is_err());
        config.viewer.error_threshold = 3;
        config.viewer.max_in_flight = 1;
        assert!(config.validate().is_err());
        config.viewer.max_in_flight = 4;
        config.capture.jpeg_quality = 0;
        assert!(config.validate().is_err());
        config.capture.jpeg_quality = 90;
        config.cameras = vec![sample_camera("dup"), sample_camera("dup")];
        assert!(config.validate().is_err());
        config.cameras.pop();
        assert!(config.validate().is_ok());
    }
}
