//! Conversion of geodetic fixes into the estimator's local frame.
//!
//! A receiver reports latitude, longitude and altitude on the WGS-84 ellipsoid.
//! The estimator works in a local planar frame, obtained in three steps:
//!
//! 1. geodetic → ECEF ([`llh_to_ecef`])
//! 2. ECEF → East-North-Up around a fixed reference ([`ecef_to_enu`])
//! 3. ENU → platform frame ([`FrameAlignment`]): rotate by a fixed heading
//!    offset `θ`, then map `(x, y) → (y, −x)` and drop the altitude
//!
//! The reference location and `θ` depend on the dataset and are configuration.

use nalgebra::{Matrix3, Vector3};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::estimator::AbsoluteFix;

/// WGS-84 semi-major axis in metres.
pub const WGS84_A: f64 = 6_378_137.0;
/// WGS-84 flattening.
pub const WGS84_F: f64 = 1.0 / 298.257_223_563;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum GeodeticError {
    #[error("Latitude {0} outside [-90, 90] degrees")]
    InvalidLatitude(f64),

    #[error("Longitude {0} outside [-180, 360] degrees")]
    InvalidLongitude(f64),

    #[error("Non-finite coordinate")]
    NonFinite,
}

pub type GeodeticResult<T> = Result<T, GeodeticError>;

/// Geodetic position in degrees and metres.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Llh {
    pub latitude: f64,
    pub longitude: f64,
    pub altitude: f64,
}

impl Llh {
    pub fn new(latitude: f64, longitude: f64, altitude: f64) -> GeodeticResult<Self> {
        if !(latitude.is_finite() && longitude.is_finite() && altitude.is_finite()) {
            return Err(GeodeticError::NonFinite);
        }
        if !(-90.0..=90.0).contains(&latitude) {
            return Err(GeodeticError::InvalidLatitude(latitude));
        }
        if !(-180.0..=360.0).contains(&longitude) {
            return Err(GeodeticError::InvalidLongitude(longitude));
        }
        Ok(Self {
            latitude,
            longitude,
            altitude,
        })
    }
}

/// WGS-84 geodetic coordinates to Earth-centred Earth-fixed metres.
pub fn llh_to_ecef(llh: &Llh) -> Vector3<f64> {
    let e2 = WGS84_F * (2.0 - WGS84_F);
    let (sin_lat, cos_lat) = llh.latitude.to_radians().sin_cos();
    let (sin_lon, cos_lon) = llh.longitude.to_radians().sin_cos();
    let n = WGS84_A / (1.0 - e2 * sin_lat * sin_lat).sqrt();

    Vector3::new(
        (n + llh.altitude) * cos_lat * cos_lon,
        (n + llh.altitude) * cos_lat * sin_lon,
        (n * (1.0 - e2) + llh.altitude) * sin_lat,
    )
}

/// ECEF point expressed in the East-North-Up frame anchored at `reference`.
pub fn ecef_to_enu(reference: &Llh, ecef: &Vector3<f64>) -> Vector3<f64> {
    let (sin_lat, cos_lat) = reference.latitude.to_radians().sin_cos();
    let (sin_lon, cos_lon) = reference.longitude.to_radians().sin_cos();

    #[rustfmt::skip]
    let rotation = Matrix3::new(
        -sin_lon,           cos_lon,            0.0,
        -sin_lat * cos_lon, -sin_lat * sin_lon, cos_lat,
        cos_lat * cos_lon,  cos_lat * sin_lon,  sin_lat,
    );
    rotation * (ecef - llh_to_ecef(reference))
}

/// Fixed rotation from ENU into the platform's planar frame.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FrameAlignment {
    /// Heading offset in radians
    pub theta: f64,
}

impl FrameAlignment {
    pub fn new(theta: f64) -> Self {
        Self { theta }
    }

    pub fn from_degrees(degrees: f64) -> Self {
        Self::new(degrees.to_radians())
    }

    /// Rotate `(e, n)` by `θ`, map `(x, y) → (y, −x)` and zero the height.
    pub fn apply(&self, enu: &Vector3<f64>) -> Vector3<f64> {
        let (sin_t, cos_t) = self.theta.sin_cos();
        let x = enu.x * cos_t - enu.y * sin_t;
        let y = enu.x * sin_t + enu.y * cos_t;
        Vector3::new(y, -x, 0.0)
    }
}

impl Default for FrameAlignment {
    fn default() -> Self {
        Self::new(0.0)
    }
}

/// Settings for [`FixConverter`], loadable from configuration files.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeodeticConfig {
    pub reference: Llh,
    /// Heading offset in degrees
    #[serde(default)]
    pub alignment_degrees: f64,
}

/// Turns geodetic fixes into [`AbsoluteFix`]es in the platform frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FixConverter {
    reference: Llh,
    alignment: FrameAlignment,
}

impl FixConverter {
    pub fn new(reference: Llh, alignment: FrameAlignment) -> Self {
        Self {
            reference,
            alignment,
        }
    }

    pub fn from_config(config: &GeodeticConfig) -> GeodeticResult<Self> {
        let reference = Llh::new(
            config.reference.latitude,
            config.reference.longitude,
            config.reference.altitude,
        )?;
        Ok(Self::new(
            reference,
            FrameAlignment::from_degrees(config.alignment_degrees),
        ))
    }

    pub fn to_local(&self, llh: &Llh) -> Vector3<f64> {
        let enu = ecef_to_enu(&self.reference, &llh_to_ecef(llh));
        self.alignment.apply(&enu)
    }

    pub fn convert(&self, timestamp: f64, llh: &Llh) -> GeodeticResult<AbsoluteFix> {
        let llh = Llh::new(llh.latitude, llh.longitude, llh.altitude)?;
        Ok(AbsoluteFix::new(timestamp, self.to_local(&llh)))
    }

    pub fn reference(&self) -> &Llh {
        &self.reference
    }

    pub fn alignment(&self) -> &FrameAlignment {
        &self.alignment
    }
}
