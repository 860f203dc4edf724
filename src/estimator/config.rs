//! Estimator configuration.
//!
//! All constants are fixed at construction. Defaults reproduce the reference
//! sensor setup: a consumer-grade IMU sampled at 200 Hz with gravity already
//! removed, and absolute fixes trusted to about one metre.

use nalgebra::Vector3;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::core::NoiseModels;
use crate::error::{FusionError, FusionResult};
use crate::imu::{ImuBias, InertialFactorKind, PreintegrationParams};
use crate::manifold::{ManifoldResult, Pose3, SO3};
use crate::optimizer::LevenbergMarquardtConfig;

/// Noise sigmas for priors, sensors and corrections.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NoiseConfig {
    /// `[roll, pitch, yaw]` in rad followed by `[x, y, z]` in m
    pub prior_pose_sigmas: [f64; 6],
    /// m/s
    pub prior_velocity_sigma: f64,
    pub prior_bias_sigma: f64,
    /// Absolute fix, m
    pub correction_sigma: f64,
    /// Bias continuity between consecutive epochs
    pub bias_between_sigma: f64,
    /// Continuous-time accelerometer white noise
    pub accelerometer_sigma: f64,
    /// Continuous-time gyroscope white noise
    pub gyroscope_sigma: f64,
    pub accelerometer_bias_random_walk: f64,
    pub gyroscope_bias_random_walk: f64,
    /// Variance added to the position block to absorb integration error
    pub integration_variance: f64,
    /// Bias uncertainty at the start of each combined interval
    pub bias_acc_omega_int: f64,
}

impl Default for NoiseConfig {
    fn default() -> Self {
        Self {
            prior_pose_sigmas: [0.01, 0.01, 0.01, 0.5, 0.5, 0.5],
            prior_velocity_sigma: 0.1,
            prior_bias_sigma: 1e-3,
            correction_sigma: 1.0,
            bias_between_sigma: 1e-3,
            accelerometer_sigma: 0.0003924,
            gyroscope_sigma: 0.000205689024915,
            accelerometer_bias_random_walk: 0.004905,
            gyroscope_bias_random_walk: 0.000001454441043,
            integration_variance: 1e-8,
            bias_acc_omega_int: 1e-5,
        }
    }
}

impl NoiseConfig {
    pub fn with_correction_sigma(mut self, sigma: f64) -> Self {
        self.correction_sigma = sigma;
        self
    }

    pub fn with_bias_between_sigma(mut self, sigma: f64) -> Self {
        self.bias_between_sigma = sigma;
        self
    }

    pub fn with_prior_pose_sigmas(mut self, sigmas: [f64; 6]) -> Self {
        self.prior_pose_sigmas = sigmas;
        self
    }

    pub fn with_prior_velocity_sigma(mut self, sigma: f64) -> Self {
        self.prior_velocity_sigma = sigma;
        self
    }

    /// Whitening models for every non-inertial factor.
    pub fn noise_models(&self) -> FusionResult<NoiseModels> {
        Ok(NoiseModels::new(
            &self.prior_pose_sigmas,
            self.prior_velocity_sigma,
            self.prior_bias_sigma,
            self.correction_sigma,
            self.bias_between_sigma,
        )?)
    }

    pub fn preintegration_params(&self, gravity: Vector3<f64>) -> PreintegrationParams {
        PreintegrationParams::default()
            .with_gravity(gravity)
            .with_accelerometer_sigma(self.accelerometer_sigma)
            .with_gyroscope_sigma(self.gyroscope_sigma)
            .with_bias_random_walk(
                self.accelerometer_bias_random_walk,
                self.gyroscope_bias_random_walk,
            )
            .with_integration_variance(self.integration_variance)
            .with_bias_acc_omega_int(self.bias_acc_omega_int)
    }

    fn validate(&self) -> FusionResult<()> {
        let sensor = [
            ("accelerometer_sigma", self.accelerometer_sigma),
            ("gyroscope_sigma", self.gyroscope_sigma),
            ("accelerometer_bias_random_walk", self.accelerometer_bias_random_walk),
            ("gyroscope_bias_random_walk", self.gyroscope_bias_random_walk),
            ("integration_variance", self.integration_variance),
            ("bias_acc_omega_int", self.bias_acc_omega_int),
        ];
        for (name, value) in sensor {
            if !value.is_finite() || value <= 0.0 {
                return Err(FusionError::InvalidConfig(format!(
                    "{name} must be positive and finite, got {value}"
                )));
            }
        }
        self.noise_models().map(|_| ())
    }
}

/// State of epoch 0, which the priors are anchored to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InitialStateConfig {
    pub position: [f64; 3],
    /// `[x, y, z, w]`
    pub orientation: [f64; 4],
    pub velocity: [f64; 3],
    pub accelerometer_bias: [f64; 3],
    pub gyroscope_bias: [f64; 3],
}

impl Default for InitialStateConfig {
    fn default() -> Self {
        Self {
            position: [0.0; 3],
            orientation: [0.0, 0.0, 0.0, 1.0],
            velocity: [0.0; 3],
            accelerometer_bias: [0.0; 3],
            gyroscope_bias: [0.0; 3],
        }
    }
}

impl InitialStateConfig {
    pub fn pose(&self) -> ManifoldResult<Pose3> {
        let [x, y, z, w] = self.orientation;
        Ok(Pose3::new(
            SO3::from_quaternion_coeffs(x, y, z, w)?,
            Vector3::from(self.position),
        ))
    }

    pub fn velocity(&self) -> Vector3<f64> {
        Vector3::from(self.velocity)
    }

    pub fn bias(&self) -> ImuBias {
        ImuBias::new(
            Vector3::from(self.accelerometer_bias),
            Vector3::from(self.gyroscope_bias),
        )
    }
}

/// Complete estimator configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FusionConfig {
    pub noise: NoiseConfig,
    /// Fixed IMU sample interval in seconds
    pub imu_dt: f64,
    /// Navigation-frame gravity; zero for gravity-compensated samples
    pub gravity: [f64; 3],
    pub inertial_factor: InertialFactorKind,
    pub initial_state: InitialStateConfig,
    pub optimizer: LevenbergMarquardtConfig,
}

impl Default for FusionConfig {
    fn default() -> Self {
        Self {
            noise: NoiseConfig::default(),
            imu_dt: 0.005,
            gravity: [0.0; 3],
            inertial_factor: InertialFactorKind::default(),
            initial_state: InitialStateConfig::default(),
            optimizer: LevenbergMarquardtConfig::default(),
        }
    }
}

impl FusionConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_noise(mut self, noise: NoiseConfig) -> Self {
        self.noise = noise;
        self
    }

    pub fn with_imu_dt(mut self, imu_dt: f64) -> Self {
        self.imu_dt = imu_dt;
        self
    }

    pub fn with_gravity(mut self, gravity: [f64; 3]) -> Self {
        self.gravity = gravity;
        self
    }

    pub fn with_inertial_factor(mut self, kind: InertialFactorKind) -> Self {
        self.inertial_factor = kind;
        self
    }

    pub fn with_initial_state(mut self, initial_state: InitialStateConfig) -> Self {
        self.initial_state = initial_state;
        self
    }

    pub fn with_optimizer(mut self, optimizer: LevenbergMarquardtConfig) -> Self {
        self.optimizer = optimizer;
        self
    }

    /// Parse a TOML document; missing keys keep their defaults.
    pub fn from_toml_str(content: &str) -> FusionResult<Self> {
        let config: FusionConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load<P: AsRef<Path>>(path: P) -> FusionResult<Self> {
        let content = fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    pub fn validate(&self) -> FusionResult<()> {
        if !self.imu_dt.is_finite() || self.imu_dt <= 0.0 {
            return Err(FusionError::InvalidConfig(format!(
                "imu_dt must be positive and finite, got {}",
                self.imu_dt
            )));
        }
        if self.gravity.iter().any(|g| !g.is_finite()) {
            return Err(FusionError::InvalidConfig("gravity must be finite".to_string()));
        }
        self.initial_state.pose()?;
        if self.optimizer.max_iterations == 0 {
            return Err(FusionError::InvalidConfig(
                "optimizer.max_iterations must be at least 1".to_string(),
            ));
        }
        self.noise.validate()
    }

    pub fn gravity_vector(&self) -> Vector3<f64> {
        Vector3::from(self.gravity)
    }

    pub fn preintegration_params(&self) -> PreintegrationParams {
        self.noise.preintegration_params(self.gravity_vector())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_reference_setup() {
        let config = FusionConfig::default();
        assert_eq!(config.imu_dt, 0.005);
        assert_eq!(config.inertial_factor, InertialFactorKind::Standard);
        assert_eq!(config.noise.prior_pose_sigmas, [0.01, 0.01, 0.01, 0.5, 0.5, 0.5]);
        assert_eq!(config.noise.correction_sigma, 1.0);
        assert!(config.validate().is_ok());

        let params = config.preintegration_params();
        assert_eq!(params.gravity, Vector3::zeros());
        assert!((params.accelerometer_covariance[(0, 0)] - 0.0003924_f64.powi(2)).abs() < 1e-20);
        assert!((params.integration_covariance[(2, 2)] - 1e-8).abs() < 1e-20);
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = FusionConfig::from_toml_str(
            r#"
            imu_dt = 0.01
            inertial_factor = "combined"

            [noise]
            correction_sigma = 2.5

            [initial_state]
            position = [1.0, 2.0, 3.0]

            [optimizer]
            max_iterations = 20
            linear_solver = "dense_cholesky"
            "#,
        )
        .unwrap();

        assert_eq!(config.imu_dt, 0.01);
        assert_eq!(config.inertial_factor, InertialFactorKind::Combined);
        assert_eq!(config.noise.correction_sigma, 2.5);
        assert_eq!(config.noise.prior_velocity_sigma, 0.1);
        assert_eq!(config.optimizer.max_iterations, 20);
        assert_eq!(
            config.initial_state.pose().unwrap().translation(),
            Vector3::new(1.0, 2.0, 3.0)
        );
        assert_eq!(config.initial_state.orientation, [0.0, 0.0, 0.0, 1.0]);
    }

    #[test]
    fn test_invalid_values_rejected() {
        assert!(FusionConfig::default().with_imu_dt(0.0).validate().is_err());
        assert!(FusionConfig::from_toml_str("imu_dt = -0.1").is_err());
        assert!(FusionConfig::from_toml_str("[noise]\ncorrection_sigma = 0.0").is_err());
        assert!(FusionConfig::from_toml_str("[noise]\ngyroscope_sigma = -1.0").is_err());
        assert!(matches!(
            FusionConfig::from_toml_str("[initial_state]\norientation = [0.0, 0.0, 0.0, 0.0]"),
            Err(FusionError::Manifold(_))
        ));
        assert!(matches!(
            FusionConfig::from_toml_str("imu_dt = \"fast\""),
            Err(FusionError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fusion.toml");
        fs::write(&path, "gravity = [0.0, 0.0, -9.81]\n").unwrap();

        let config = FusionConfig::load(&path).unwrap();
        assert_eq!(config.gravity_vector(), Vector3::new(0.0, 0.0, -9.81));
        assert!(FusionConfig::load(dir.path().join("missing.toml")).is_err());
    }
}
