//! Status snapshot for external monitoring.

use std::{
    fmt, fs, io,
    path::{Path, PathBuf},
};

/// Most recent delivered power and power setting, in watts.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StatusSnapshot {
    pub delivered_power: f64,
    pub power_setting: f64,
}

impl fmt::Display for StatusSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "dpm86powerout {:.2}", self.delivered_power)?;
        writeln!(f, "dpm86powersetting {:.2}", self.power_setting)
    }
}

/// Replaces a file with the latest snapshot on every write.
#[derive(Debug, Clone)]
pub struct StatusFile {
    path: PathBuf,
}

impl StatusFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Write the snapshot next to the target and rename it into place, so readers never see a
    /// half written file.
    pub fn write(&self, snapshot: &StatusSnapshot) -> io::Result<()> {
        let staging = self.path.with_extension("tmp");
        fs::write(&staging, snapshot.to_string())?;
        fs::rename(&staging, &self.path)
    }
}
