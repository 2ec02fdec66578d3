//! Calibration record storage.
//!
//! The record lives in a single JSON file:
//!
//! ```text
//! { "checksum": "<crc32c of record, hex>", "record": { ... } }
//! ```
//!
//! Saves go to a sibling temporary file which is synced and renamed over the target, so a
//! reader sees either the old record or the new one.

use crate::error::StorageError;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

/// Number of joints per leg.
pub const JOINTS_PER_LEG: usize = 3;
/// Number of legs.
pub const LEG_COUNT: usize = 4;

/// Servo units per radian for an uncalibrated robot.
pub const DEFAULT_SCALE_FACTOR: f64 = (760.0 - 210.0) / std::f64::consts::PI;

/// Servo calibration.
///
/// `neutral_angles[joint][leg]` holds the offset, in degrees, of each servo's mechanical
/// zero.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Calibration {
    pub scale_factor: f64,
    pub neutral_angles: [[f64; LEG_COUNT]; JOINTS_PER_LEG],
}

impl Default for Calibration {
    fn default() -> Self {
        Self {
            scale_factor: DEFAULT_SCALE_FACTOR,
            neutral_angles: [[0.0; LEG_COUNT]; JOINTS_PER_LEG],
        }
    }
}

impl Calibration {
    /// Returns the neutral angle of one joint, or `None` if out of range.
    pub fn neutral_angle(&self, joint: usize, leg: usize) -> Option<f64> {
        self.neutral_angles.get(joint)?.get(leg).copied()
    }

    /// Sets the neutral angle of one joint. Returns false if out of range.
    pub fn set_neutral_angle(&mut self, joint: usize, leg: usize, degrees: f64) -> bool {
        match self.neutral_angles.get_mut(joint).and_then(|row| row.get_mut(leg)) {
            Some(slot) => {
                *slot = degrees;
                true
            }
            None => false,
        }
    }

    fn validate(&self) -> Result<(), StorageError> {
        if !self.scale_factor.is_finite() || self.scale_factor <= 0.0 {
            return Err(StorageError::Corruption(format!(
                "invalid scale factor {}",
                self.scale_factor
            )));
        }
        if self.neutral_angles.iter().flatten().any(|a| !a.is_finite()) {
            return Err(StorageError::Corruption(
                "non-finite neutral angle".to_string(),
            ));
        }
        Ok(())
    }

    fn checksum(&self) -> Result<String, StorageError> {
        let data = serde_json::to_vec(self)?;
        Ok(format!("{:08x}", crc32c::crc32c(&data)))
    }
}

#[derive(Serialize, Deserialize)]
struct Envelope {
    checksum: String,
    record: Calibration,
}

/// Calibration store backed by one file.
pub struct CalibrationStore {
    path: PathBuf,
    /// Last record loaded or saved.
    cached: RwLock<Option<Calibration>>,
}

impl CalibrationStore {
    /// Opens a store at `path`, creating the parent directory if needed.
    ///
    /// The file itself is not read until [`load`](Self::load).
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }

        Ok(Self {
            path,
            cached: RwLock::new(None),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns whether a record has been written.
    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    /// Returns the last record loaded or saved through this store.
    pub fn cached(&self) -> Option<Calibration> {
        self.cached.read().clone()
    }

    /// Reads and verifies the stored record.
    pub fn load(&self) -> Result<Calibration, StorageError> {
        let data = match fs::read(&self.path) {
            Ok(data) => data,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(StorageError::NotFound(self.path.clone()));
            }
            Err(e) => return Err(e.into()),
        };

        let envelope: Envelope = serde_json::from_slice(&data).map_err(|e| {
            StorageError::Corruption(format!("{}: {}", self.path.display(), e))
        })?;

        let actual = envelope.record.checksum()?;
        if actual != envelope.checksum {
            return Err(StorageError::Corruption(format!(
                "{} checksum mismatch: stored {}, computed {}",
                self.path.display(),
                envelope.checksum,
                actual
            )));
        }
        envelope.record.validate()?;

        *self.cached.write() = Some(envelope.record.clone());
        tracing::debug!(path = %self.path.display(), "loaded calibration");
        Ok(envelope.record)
    }

    /// Loads the stored record, falling back to the default when none exists.
    pub fn load_or_default(&self) -> Result<Calibration, StorageError> {
        match self.load() {
            Err(StorageError::NotFound(_)) => Ok(Calibration::default()),
            other => other,
        }
    }

    /// Atomically replaces the stored record.
    pub fn save(&self, calibration: &Calibration) -> Result<(), StorageError> {
        calibration.validate()?;
        let envelope = Envelope {
            checksum: calibration.checksum()?,
            record: calibration.clone(),
        };
        let data = serde_json::to_vec_pretty(&envelope)?;

        let tmp_path = self.tmp_path();
        let written = write_synced(&tmp_path, &data).and_then(|()| fs::rename(&tmp_path, &self.path));
        if let Err(e) = written {
            if let Err(cleanup) = fs::remove_file(&tmp_path) {
                tracing::debug!(path = %tmp_path.display(), error = %cleanup, "temp file not removed");
            }
            return Err(e.into());
        }

        *self.cached.write() = Some(calibration.clone());
        tracing::info!(path = %self.path.display(), "saved calibration");
        Ok(())
    }

    /// Overwrites the stored record with the default and returns it.
    pub fn reset(&self) -> Result<Calibration, StorageError> {
        let calibration = Calibration::default();
        self.save(&calibration)?;
        Ok(calibration)
    }

    fn tmp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

fn write_synced(path: &Path, data: &[u8]) -> io::Result<()> {
    let mut file = File::create(path)?;
    file.write_all(data)?;
    file.sync_all()
}
