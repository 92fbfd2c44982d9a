use std::{fs, path::PathBuf};

use camwatch_types::{frame::FrozenFrame, Result};

use crate::capture_error;

/// Writes freeze-frames to disk when a snapshot directory is configured.
#[derive(Debug, Clone, Default)]
pub struct SnapshotStore {
    dir: Option<PathBuf>,
}

impl SnapshotStore {
    pub fn new(dir: Option<PathBuf>) -> Self {
        Self { dir }
    }

    pub fn disabled() -> Self {
        Self { dir: None }
    }

    pub fn is_enabled(&self) -> bool {
        self.dir.is_some()
    }

    /// Persists `frame`, returning the written path. Placeholder frames are
    /// skipped since they carry no camera content.
    pub fn persist(&self, camera: &str, frame: &FrozenFrame) -> Result<Option<PathBuf>> {
        let Some(dir) = &self.dir else {
            return Ok(None);
        };
        if frame.origin.is_placeholder() {
            return Ok(None);
        }

        fs::create_dir_all(dir)
            .map_err(|err| capture_error(format!("failed to create snapshot dir {:?}: {err}", dir)))?;
        let timestamp = frame.captured_at.format("%Y%m%d_%H%M%S_%3f");
        let path = dir.join(format!(
            "{}_{}.{}",
            sanitize(camera),
            timestamp,
            frame.image.encoding.extension()
        ));
        fs::write(&path, &frame.image.data[..])
            .map_err(|err| capture_error(format!("failed to write snapshot {:?}: {err}", path)))?;
        Ok(Some(path))
    }
}

fn sanitize(camera: &str) -> String {
    let cleaned: String = camera
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c } else { '_' })
        .collect();
    if cleaned.is_empty() {
        "camera".into()
    } else {
        cleaned
    }
}
