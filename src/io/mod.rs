//! Replay input and trajectory output.
//!
//! - [`SensorLog`]: whitespace-separated text log of IMU samples and position
//!   fixes, memory-mapped on load
//! - [`TumWriter`] / [`load_tum_trajectory`]: `t x y z qx qy qz qw` trajectories

use thiserror::Error;

use crate::geodetic::GeodeticError;

pub mod sensor_log;
pub mod tum;

pub use sensor_log::{SensorLog, SensorRecord};
pub use tum::{TumPose, TumWriter, load_tum_trajectory};

/// Errors that can occur while reading or writing files
#[derive(Error, Debug)]
pub enum IoError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error at line {line}: {message}")]
    Parse { line: usize, message: String },

    #[error("Unknown record type at line {line}: {tag}")]
    UnknownRecord { line: usize, tag: String },

    #[error("Invalid number format at line {line}: {value}")]
    InvalidNumber { line: usize, value: String },

    #[error("Missing required fields at line {line}")]
    MissingFields { line: usize },

    #[error("GNSS record at t = {timestamp} needs a geodetic reference")]
    MissingGeodeticReference { timestamp: f64 },

    #[error("Geodetic error: {0}")]
    Geodetic(#[from] GeodeticError),
}

/// Parse field `index` of a split line as `f64`.
pub(crate) fn parse_field(parts: &[&str], index: usize, line: usize) -> Result<f64, IoError> {
    let value = parts.get(index).ok_or(IoError::MissingFields { line })?;
    value.parse::<f64>().map_err(|_| IoError::InvalidNumber {
        line,
        value: value.to_string(),
    })
}
