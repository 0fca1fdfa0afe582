// Persisted CO2 intensity: a small TOML file read at startup, rewritten on change.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::estimation;

#[derive(Debug, Serialize, Deserialize)]
struct StoredSettings {
    co2_intensity: f64,
}

#[derive(Debug, Clone)]
pub struct IntensityStore {
    path: PathBuf,
}

impl IntensityStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// `Ok(None)` when nothing has been stored yet. A stored value outside
    /// [0, 1000] is an error rather than silently ignored.
    pub fn load(&self) -> anyhow::Result<Option<f64>> {
        let s = match std::fs::read_to_string(&self.path) {
            Ok(s) => s,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let stored: StoredSettings = toml::from_str(&s)?;
        anyhow::ensure!(
            estimation::is_valid_intensity(stored.co2_intensity),
            "stored co2_intensity must be in [0, 1000], got {}",
            stored.co2_intensity
        );
        Ok(Some(stored.co2_intensity))
    }

    /// Replace the stored value. Callers serialize writes (one writer task).
    pub fn save(&self, intensity: f64) -> anyhow::Result<()> {
        anyhow::ensure!(
            estimation::is_valid_intensity(intensity),
            "co2_intensity must be in [0, 1000], got {}",
            intensity
        );
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }
        let s = toml::to_string(&StoredSettings {
            co2_intensity: intensity,
        })?;
        // Write-then-rename: readers never see a partial file.
        let tmp = self.path.with_extension("toml.tmp");
        std::fs::write(&tmp, s)?;
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}
