//! On-manifold IMU preintegration.
//!
//! Raw samples between two correction epochs are summarized into a single
//! relative-motion measurement `(ΔR, Δv, Δp, Δt)` expressed in the body frame of
//! the earlier epoch, together with:
//!
//! - the covariance of the error state `[δθ, δv, δp]` (9×9), or of
//!   `[δθ, δv, δp, δb_a, δb_g]` (15×15) when the bias is estimated jointly,
//! - the Jacobians of the deltas with respect to the linearization bias, used
//!   for the first-order bias correction inside the inertial factors.
//!
//! Integration is first-order Euler on the manifold with one fixed `dt` per call.
//! Missing samples are not detected; the accumulated duration then simply covers
//! less than the wall-clock interval.
//!
//! # References
//! C. Forster, L. Carlone, F. Dellaert, D. Scaramuzza,
//! "On-Manifold Preintegration for Real-Time Visual-Inertial Odometry", T-RO 2017.

use crate::imu::{ImuBias, ImuError, ImuSample, InertialFactorKind, NavState};
use crate::manifold::{LieGroup, Pose3, SO3, SO3Tangent, Tangent, skew};
use nalgebra::{Matrix3, Matrix6, SMatrix, Vector3};
use tracing::trace;

pub type Matrix9 = SMatrix<f64, 9, 9>;
pub type Matrix15 = SMatrix<f64, 15, 15>;
type Matrix9x3 = SMatrix<f64, 9, 3>;

/// Sensor noise description and gravity used during preintegration.
///
/// Sensor covariances are continuous-time densities; they are discretized with
/// the integration step inside [`PreintegratedImuMeasurements::integrate`].
#[derive(Debug, Clone, PartialEq)]
pub struct PreintegrationParams {
    /// Gravity in the navigation frame. Zero for gravity-compensated samples.
    pub gravity: Vector3<f64>,
    pub accelerometer_covariance: Matrix3<f64>,
    pub gyroscope_covariance: Matrix3<f64>,
    /// Error added to the position block to absorb integration errors.
    pub integration_covariance: Matrix3<f64>,
    pub bias_acc_covariance: Matrix3<f64>,
    pub bias_omega_covariance: Matrix3<f64>,
    /// Bias uncertainty at the start of each combined preintegration interval.
    pub bias_acc_omega_int: Matrix6<f64>,
}

impl Default for PreintegrationParams {
    fn default() -> Self {
        Self {
            gravity: Vector3::zeros(),
            accelerometer_covariance: Matrix3::identity() * 0.0003924_f64.powi(2),
            gyroscope_covariance: Matrix3::identity() * 0.000205689024915_f64.powi(2),
            integration_covariance: Matrix3::identity() * 1e-8,
            bias_acc_covariance: Matrix3::identity() * 0.004905_f64.powi(2),
            bias_omega_covariance: Matrix3::identity() * 0.000001454441043_f64.powi(2),
            bias_acc_omega_int: Matrix6::identity() * 1e-5,
        }
    }
}

impl PreintegrationParams {
    pub fn with_gravity(mut self, gravity: Vector3<f64>) -> Self {
        self.gravity = gravity;
        self
    }

    pub fn with_accelerometer_sigma(mut self, sigma: f64) -> Self {
        self.accelerometer_covariance = Matrix3::identity() * sigma * sigma;
        self
    }

    pub fn with_gyroscope_sigma(mut self, sigma: f64) -> Self {
        self.gyroscope_covariance = Matrix3::identity() * sigma * sigma;
        self
    }

    pub fn with_bias_random_walk(mut self, acc_sigma: f64, gyro_sigma: f64) -> Self {
        self.bias_acc_covariance = Matrix3::identity() * acc_sigma * acc_sigma;
        self.bias_omega_covariance = Matrix3::identity() * gyro_sigma * gyro_sigma;
        self
    }

    pub fn with_integration_variance(mut self, variance: f64) -> Self {
        self.integration_covariance = Matrix3::identity() * variance;
        self
    }

    pub fn with_bias_acc_omega_int(mut self, variance: f64) -> Self {
        self.bias_acc_omega_int = Matrix6::identity() * variance;
        self
    }
}

/// Preintegrated deltas after first-order bias correction.
#[derive(Debug, Clone, PartialEq)]
pub struct PreintegratedDelta {
    pub rotation: SO3,
    pub velocity: Vector3<f64>,
    pub position: Vector3<f64>,
}

/// Accumulator for IMU samples between two epochs.
#[derive(Debug, Clone)]
pub struct PreintegratedImuMeasurements {
    params: PreintegrationParams,
    kind: InertialFactorKind,
    bias_hat: ImuBias,

    delta_rotation: SO3,
    delta_velocity: Vector3<f64>,
    delta_position: Vector3<f64>,
    delta_time: f64,
    sample_count: usize,

    covariance: Matrix9,
    combined_covariance: Option<Matrix15>,

    d_rot_d_bg: Matrix3<f64>,
    d_vel_d_ba: Matrix3<f64>,
    d_vel_d_bg: Matrix3<f64>,
    d_pos_d_ba: Matrix3<f64>,
    d_pos_d_bg: Matrix3<f64>,
}

impl PreintegratedImuMeasurements {
    /// Create an empty accumulator linearized at `bias_hat`.
    pub fn new(params: PreintegrationParams, kind: InertialFactorKind, bias_hat: ImuBias) -> Self {
        let mut pim = Self {
            params,
            kind,
            bias_hat,
            delta_rotation: SO3::identity(),
            delta_velocity: Vector3::zeros(),
            delta_position: Vector3::zeros(),
            delta_time: 0.0,
            sample_count: 0,
            covariance: Matrix9::zeros(),
            combined_covariance: None,
            d_rot_d_bg: Matrix3::zeros(),
            d_vel_d_ba: Matrix3::zeros(),
            d_vel_d_bg: Matrix3::zeros(),
            d_pos_d_ba: Matrix3::zeros(),
            d_pos_d_bg: Matrix3::zeros(),
        };
        pim.reset(bias_hat);
        pim
    }

    /// Discard everything accumulated and start over at `bias_hat`.
    pub fn reset(&mut self, bias_hat: ImuBias) {
        self.bias_hat = bias_hat;
        self.delta_rotation = SO3::identity();
        self.delta_velocity = Vector3::zeros();
        self.delta_position = Vector3::zeros();
        self.delta_time = 0.0;
        self.sample_count = 0;
        self.covariance = Matrix9::zeros();
        self.combined_covariance = match self.kind {
            InertialFactorKind::Standard => None,
            InertialFactorKind::Combined => {
                let mut cov = Matrix15::zeros();
                cov.fixed_view_mut::<6, 6>(9, 9)
                    .copy_from(&self.params.bias_acc_omega_int);
                Some(cov)
            }
        };
        self.d_rot_d_bg = Matrix3::zeros();
        self.d_vel_d_ba = Matrix3::zeros();
        self.d_vel_d_bg = Matrix3::zeros();
        self.d_pos_d_ba = Matrix3::zeros();
        self.d_pos_d_bg = Matrix3::zeros();
    }

    /// Integrate one sample held constant over `dt` seconds.
    ///
    /// Rejects a non-positive or non-finite `dt` and non-finite readings without
    /// modifying the accumulator.
    pub fn integrate(
        &mut self,
        linear_acceleration: &Vector3<f64>,
        angular_velocity: &Vector3<f64>,
        dt: f64,
    ) -> Result<(), ImuError> {
        if !dt.is_finite() || dt <= 0.0 {
            return Err(ImuError::InvalidTimeStep(dt));
        }
        if !linear_acceleration.iter().all(|v| v.is_finite())
            || !angular_velocity.iter().all(|v| v.is_finite())
        {
            return Err(ImuError::NonFiniteMeasurement);
        }

        let (acc, omega) = self.bias_hat.correct(linear_acceleration, angular_velocity);
        let dt2 = dt * dt;

        let delta_r = self.delta_rotation.rotation_matrix();
        let theta = SO3Tangent::new(omega * dt);
        let increment = theta.exp(None);
        let increment_r = increment.rotation_matrix();
        let jr = theta.right_jacobian();
        let acc_skew = skew(&acc);

        // Bias Jacobians, from the values before this step.
        self.d_pos_d_ba += self.d_vel_d_ba * dt - 0.5 * delta_r * dt2;
        self.d_pos_d_bg += self.d_vel_d_bg * dt - 0.5 * delta_r * acc_skew * self.d_rot_d_bg * dt2;
        self.d_vel_d_ba -= delta_r * dt;
        self.d_vel_d_bg -= delta_r * acc_skew * self.d_rot_d_bg * dt;
        self.d_rot_d_bg = increment_r.transpose() * self.d_rot_d_bg - jr * dt;

        // Error-state transition over [δθ, δv, δp].
        let mut a = Matrix9::identity();
        a.fixed_view_mut::<3, 3>(0, 0)
            .copy_from(&increment_r.transpose());
        a.fixed_view_mut::<3, 3>(3, 0)
            .copy_from(&(-delta_r * acc_skew * dt));
        a.fixed_view_mut::<3, 3>(6, 0)
            .copy_from(&(-0.5 * delta_r * acc_skew * dt2));
        a.fixed_view_mut::<3, 3>(6, 3)
            .copy_from(&(Matrix3::identity() * dt));

        let mut b = Matrix9x3::zeros();
        b.fixed_view_mut::<3, 3>(3, 0).copy_from(&(delta_r * dt));
        b.fixed_view_mut::<3, 3>(6, 0)
            .copy_from(&(0.5 * delta_r * dt2));

        let mut c = Matrix9x3::zeros();
        c.fixed_view_mut::<3, 3>(0, 0).copy_from(&(jr * dt));

        let acc_discrete = self.params.accelerometer_covariance / dt;
        let gyro_discrete = self.params.gyroscope_covariance / dt;

        let mut noise = b * acc_discrete * b.transpose() + c * gyro_discrete * c.transpose();
        let mut position_block = noise.fixed_view_mut::<3, 3>(6, 6);
        position_block += self.params.integration_covariance * dt;

        self.covariance = a * self.covariance * a.transpose() + noise;

        let bias_acc_walk = self.params.bias_acc_covariance * dt;
        let bias_omega_walk = self.params.bias_omega_covariance * dt;
        if let Some(cov) = self.combined_covariance.as_mut() {
            let mut f = Matrix15::identity();
            f.fixed_view_mut::<9, 9>(0, 0).copy_from(&a);
            f.fixed_view_mut::<3, 3>(0, 12).copy_from(&(-jr * dt));
            f.fixed_view_mut::<3, 3>(3, 9).copy_from(&(-delta_r * dt));
            f.fixed_view_mut::<3, 3>(6, 9)
                .copy_from(&(-0.5 * delta_r * dt2));

            let mut q = Matrix15::zeros();
            q.fixed_view_mut::<9, 9>(0, 0).copy_from(&noise);
            q.fixed_view_mut::<3, 3>(9, 9).copy_from(&bias_acc_walk);
            q.fixed_view_mut::<3, 3>(12, 12).copy_from(&bias_omega_walk);

            *cov = f * *cov * f.transpose() + q;
        }

        self.delta_position += self.delta_velocity * dt + 0.5 * delta_r * acc * dt2;
        self.delta_velocity += delta_r * acc * dt;
        self.delta_rotation = self.delta_rotation.compose(&increment, None, None);
        self.delta_rotation.normalize();
        self.delta_time += dt;
        self.sample_count += 1;

        trace!(
            samples = self.sample_count,
            delta_time = self.delta_time,
            "integrated IMU sample"
        );
        Ok(())
    }

    /// Integrate an [`ImuSample`] over the fixed interval `dt`.
    pub fn integrate_sample(&mut self, sample: &ImuSample, dt: f64) -> Result<(), ImuError> {
        self.integrate(&sample.linear_acceleration, &sample.angular_velocity, dt)
    }

    /// Deltas corrected to first order for a bias different from the linearization bias.
    pub fn bias_corrected_delta(&self, bias: &ImuBias) -> PreintegratedDelta {
        let delta_ba = bias.accelerometer - self.bias_hat.accelerometer;
        let delta_bg = bias.gyroscope - self.bias_hat.gyroscope;

        let correction = SO3Tangent::new(self.d_rot_d_bg * delta_bg).exp(None);
        PreintegratedDelta {
            rotation: self.delta_rotation.compose(&correction, None, None),
            velocity: self.delta_velocity + self.d_vel_d_ba * delta_ba + self.d_vel_d_bg * delta_bg,
            position: self.delta_position + self.d_pos_d_ba * delta_ba + self.d_pos_d_bg * delta_bg,
        }
    }

    /// Propagate `state` through the accumulated motion.
    ///
    /// The result is only an initial guess for the optimizer.
    pub fn predict(&self, state: &NavState, bias: &ImuBias) -> NavState {
        let delta = self.bias_corrected_delta(bias);
        let dt = self.delta_time;
        let g = self.params.gravity;
        let rotation_i = state.pose.rotation();
        let r_i = rotation_i.rotation_matrix();
        let p_i = state.pose.translation();
        let v_i = state.velocity;

        let rotation_j = rotation_i.compose(&delta.rotation, None, None);
        let velocity_j = v_i + g * dt + r_i * delta.velocity;
        let position_j = p_i + v_i * dt + 0.5 * g * dt * dt + r_i * delta.position;

        NavState::new(Pose3::new(rotation_j, position_j), velocity_j)
    }

    pub fn params(&self) -> &PreintegrationParams {
        &self.params
    }

    pub fn kind(&self) -> InertialFactorKind {
        self.kind
    }

    pub fn bias_hat(&self) -> &ImuBias {
        &self.bias_hat
    }

    pub fn delta_rotation(&self) -> &SO3 {
        &self.delta_rotation
    }

    pub fn delta_velocity(&self) -> Vector3<f64> {
        self.delta_velocity
    }

    pub fn delta_position(&self) -> Vector3<f64> {
        self.delta_position
    }

    pub fn delta_time(&self) -> f64 {
        self.delta_time
    }

    pub fn sample_count(&self) -> usize {
        self.sample_count
    }

    pub fn is_empty(&self) -> bool {
        self.sample_count == 0
    }

    /// Covariance of `[δθ, δv, δp]`.
    pub fn covariance(&self) -> &Matrix9 {
        &self.covariance
    }

    /// Covariance of `[δθ, δv, δp, δb_a, δb_g]`, only tracked for
    /// [`InertialFactorKind::Combined`].
    pub fn combined_covariance(&self) -> Option<&Matrix15> {
        self.combined_covariance.as_ref()
    }

    pub fn d_rot_d_bias_gyro(&self) -> &Matrix3<f64> {
        &self.d_rot_d_bg
    }

    pub fn d_vel_d_bias_acc(&self) -> &Matrix3<f64> {
        &self.d_vel_d_ba
    }

    pub fn d_vel_d_bias_gyro(&self) -> &Matrix3<f64> {
        &self.d_vel_d_bg
    }

    pub fn d_pos_d_bias_acc(&self) -> &Matrix3<f64> {
        &self.d_pos_d_ba
    }

    pub fn d_pos_d_bias_gyro(&self) -> &Matrix3<f64> {
        &self.d_pos_d_bg
    }
}
