//! # pupperlink-storage
//!
//! Persistent calibration for the quadruped.
//!
//! The store holds a single record, the servo scale factor and the neutral joint angles
//! of each leg, written atomically to one file and verified with a CRC32C on load.

pub mod calibration;
pub mod error;

pub use calibration::{Calibration, CalibrationStore, DEFAULT_SCALE_FACTOR};
pub use error::StorageError;
