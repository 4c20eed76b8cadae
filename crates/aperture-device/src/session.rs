//! Per-device session persistence (specification §6.4): last filter names,
//! temperature history, park position, and alignment mode, written to JSON
//! with a temp-file-then-rename so a crash mid-write never leaves a
//! truncated file behind.

use aperture_core::{CoreError, CoreResult, TemperatureSample};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use tracing::warn;

/// State worth restoring across process restarts for one device. Anything
/// not covered here (live hardware connection, current frame) is
/// intentionally excluded — it has no meaning once the process exits.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct SessionState {
    pub last_filter_names: Vec<String>,
    pub temperature_history: Vec<TemperatureSample>,
    pub park_position: Option<(i32, i32)>,
    pub alignment_mode: Option<String>,
}

impl SessionState {
    /// Writes `self` to `path` atomically: serialize to a sibling temp
    /// file, then rename over the destination. A partially-written temp
    /// file from a crash never clobbers the last good session file.
    pub fn save(&self, path: &Path) -> CoreResult<()> {
        let json = serde_json::to_vec_pretty(self)
            .map_err(|e| CoreError::SerializationFailed(e.to_string()))?;
        let tmp_path = path.with_extension("json.tmp");
        fs::write(&tmp_path, &json).map_err(|e| CoreError::Fatal(format!("write session temp file: {e}")))?;
        fs::rename(&tmp_path, path).map_err(|e| CoreError::Fatal(format!("rename session file: {e}")))?;
        Ok(())
    }

    /// Loads session state from `path`. A missing file returns defaults; a
    /// corrupt file is logged and ignored (also returning defaults) rather
    /// than propagated, matching specification §6.4 "Corrupt files are
    /// logged and ignored".
    pub fn load(path: &Path) -> Self {
        let bytes = match fs::read(path) {
            Ok(bytes) => bytes,
            Err(_) => return Self::default(),
        };
        match serde_json::from_slice(&bytes) {
            Ok(state) => state,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "corrupt session file, restoring defaults");
                Self::default()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use tempfile::tempdir;

    #[test]
    fn round_trips_through_disk() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("session.json");
        let state = SessionState {
            last_filter_names: vec!["Ha".into(), "OIII".into()],
            temperature_history: vec![TemperatureSample {
                timestamp: Utc::now(),
                celsius: -10.0,
            }],
            park_position: Some((100, 200)),
            alignment_mode: Some("polar".into()),
        };
        state.save(&path).unwrap();
        let loaded = SessionState::load(&path);
        assert_eq!(loaded, state);
    }

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nonexistent.json");
        assert_eq!(SessionState::load(&path), SessionState::default());
    }

    #[test]
    fn corrupt_file_yields_defaults_instead_of_erroring() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("session.json");
        fs::write(&path, b"{ this is not valid json").unwrap();
        assert_eq!(SessionState::load(&path), SessionState::default());
    }

    #[test]
    fn save_does_not_leave_a_temp_file_behind() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("session.json");
        SessionState::default().save(&path).unwrap();
        assert!(path.exists());
        assert!(!path.with_extension("json.tmp").exists());
    }
}
