//! Inertial relative-motion factors built from preintegrated measurements.
//!
//! # Mathematical Formulation
//! With the bias-corrected deltas `(ΔR̃, Δṽ, Δp̃)` over `Δt` and gravity `g`:
//! ```text
//! r_R = Log(ΔR̃ᵀ R_iᵀ R_j)
//! r_v = R_iᵀ (v_j − v_i − g Δt) − Δṽ
//! r_p = R_iᵀ (p_j − p_i − v_i Δt − ½ g Δt²) − Δp̃
//! ```
//! The combined variant appends `r_b = b_j − b_i` and is weighted with the
//! jointly propagated 15×15 covariance.
//!
//! Jacobian columns follow the key order
//! `[pose_i(6), vel_i(3), pose_j(6), vel_j(3), bias_i(6)(, bias_j(6))]`.

use nalgebra::{DMatrix, DVector, Matrix3, Vector3};

use crate::core::{CoreResult, StateStore, VariableId};
use crate::factors::{Factor, FactorKind};
use crate::imu::{ImuBias, PreintegratedImuMeasurements};
use crate::manifold::{LieGroup, Pose3, SO3Tangent, Tangent, skew};

const COL_THETA_I: usize = 0;
const COL_POS_I: usize = 3;
const COL_VEL_I: usize = 6;
const COL_THETA_J: usize = 9;
const COL_POS_J: usize = 12;
const COL_VEL_J: usize = 15;
const COL_BA_I: usize = 18;
const COL_BG_I: usize = 21;
const COL_BIAS_J: usize = 24;

const ROW_ROT: usize = 0;
const ROW_VEL: usize = 3;
const ROW_POS: usize = 6;
const ROW_BIAS: usize = 9;

/// Pose, velocity and bias references for one inertial residual evaluation.
struct InertialInputs<'a> {
    pose_i: &'a Pose3,
    vel_i: &'a Vector3<f64>,
    pose_j: &'a Pose3,
    vel_j: &'a Vector3<f64>,
    bias_i: &'a ImuBias,
}

/// Evaluate the 9-dimensional inertial residual into the first rows of
/// `residual` and, when given, the first 24 columns of `jacobian`.
fn evaluate_inertial(
    pim: &PreintegratedImuMeasurements,
    inputs: &InertialInputs<'_>,
    residual: &mut DVector<f64>,
    jacobian: Option<&mut DMatrix<f64>>,
) {
    let dt = pim.delta_time();
    let g = pim.params().gravity;

    let delta_bg = inputs.bias_i.gyroscope - pim.bias_hat().gyroscope;
    let delta = pim.bias_corrected_delta(inputs.bias_i);

    let rot_i = inputs.pose_i.rotation();
    let rot_j = inputs.pose_j.rotation();
    let r_i = rot_i.rotation_matrix();
    let r_j = rot_j.rotation_matrix();
    let r_i_t = r_i.transpose();

    let velocity_term = inputs.vel_j - inputs.vel_i - g * dt;
    let position_term = inputs.pose_j.translation()
        - inputs.pose_i.translation()
        - inputs.vel_i * dt
        - 0.5 * g * dt * dt;

    let rotation_error = delta
        .rotation
        .inverse(None)
        .compose(&rot_i.inverse(None), None, None)
        .compose(rot_j, None, None);
    let r_rot = rotation_error.log(None);
    let r_vel = r_i_t * velocity_term - delta.velocity;
    let r_pos = r_i_t * position_term - delta.position;

    residual
        .fixed_rows_mut::<3>(ROW_ROT)
        .copy_from(&r_rot.axis_angle());
    residual.fixed_rows_mut::<3>(ROW_VEL).copy_from(&r_vel);
    residual.fixed_rows_mut::<3>(ROW_POS).copy_from(&r_pos);

    let Some(jac) = jacobian else {
        return;
    };

    let jr_inv = r_rot.right_jacobian_inv();
    let correction = SO3Tangent::new(pim.d_rot_d_bias_gyro() * delta_bg);
    let identity = Matrix3::identity();

    let mut set = |row: usize, col: usize, block: Matrix3<f64>| {
        jac.fixed_view_mut::<3, 3>(row, col).copy_from(&block);
    };

    // Rotation residual
    set(ROW_ROT, COL_THETA_I, -jr_inv * r_j.transpose() * r_i);
    set(ROW_ROT, COL_THETA_J, jr_inv);
    set(
        ROW_ROT,
        COL_BG_I,
        -jr_inv
            * rotation_error.rotation_matrix().transpose()
            * correction.right_jacobian()
            * pim.d_rot_d_bias_gyro(),
    );

    // Velocity residual
    set(ROW_VEL, COL_THETA_I, skew(&(r_i_t * velocity_term)));
    set(ROW_VEL, COL_VEL_I, -r_i_t);
    set(ROW_VEL, COL_VEL_J, r_i_t);
    set(ROW_VEL, COL_BA_I, -pim.d_vel_d_bias_acc());
    set(ROW_VEL, COL_BG_I, -pim.d_vel_d_bias_gyro());

    // Position residual
    set(ROW_POS, COL_THETA_I, skew(&(r_i_t * position_term)));
    set(ROW_POS, COL_POS_I, -identity);
    set(ROW_POS, COL_VEL_I, -r_i_t * dt);
    set(ROW_POS, COL_POS_J, r_i_t * r_j);
    set(ROW_POS, COL_BA_I, -pim.d_pos_d_bias_acc());
    set(ROW_POS, COL_BG_I, -pim.d_pos_d_bias_gyro());
}

fn inertial_keys(epoch_i: usize, epoch_j: usize) -> [VariableId; 5] {
    [
        VariableId::pose(epoch_i),
        VariableId::velocity(epoch_i),
        VariableId::pose(epoch_j),
        VariableId::velocity(epoch_j),
        VariableId::bias(epoch_i),
    ]
}

fn lookup_inputs<'a>(
    values: &'a StateStore,
    keys: &[VariableId],
) -> CoreResult<InertialInputs<'a>> {
    Ok(InertialInputs {
        pose_i: values.pose(keys[0].epoch)?,
        vel_i: values.velocity(keys[1].epoch)?,
        pose_j: values.pose(keys[2].epoch)?,
        vel_j: values.velocity(keys[3].epoch)?,
        bias_i: values.bias(keys[4].epoch)?,
    })
}

/// Preintegrated IMU constraint between two consecutive pose/velocity pairs.
///
/// The bias at the earlier epoch enters through the first-order correction of
/// the preintegrated deltas; its drift is modelled by a separate
/// [`BiasBetweenFactor`](crate::factors::BiasBetweenFactor).
#[derive(Debug, Clone)]
pub struct ImuFactor {
    keys: [VariableId; 5],
    measurement: PreintegratedImuMeasurements,
}

impl ImuFactor {
    pub fn new(epoch_i: usize, epoch_j: usize, measurement: PreintegratedImuMeasurements) -> Self {
        Self {
            keys: inertial_keys(epoch_i, epoch_j),
            measurement,
        }
    }

    pub fn measurement(&self) -> &PreintegratedImuMeasurements {
        &self.measurement
    }
}

impl Factor for ImuFactor {
    fn kind(&self) -> FactorKind {
        FactorKind::Imu
    }

    fn keys(&self) -> &[VariableId] {
        &self.keys
    }

    fn dimension(&self) -> usize {
        9
    }

    fn linearize(
        &self,
        values: &StateStore,
        compute_jacobian: bool,
    ) -> CoreResult<(DVector<f64>, Option<DMatrix<f64>>)> {
        let inputs = lookup_inputs(values, &self.keys)?;
        let mut residual = DVector::zeros(9);
        let mut jacobian = compute_jacobian.then(|| DMatrix::zeros(9, 24));
        evaluate_inertial(&self.measurement, &inputs, &mut residual, jacobian.as_mut());
        Ok((residual, jacobian))
    }
}

/// Preintegrated IMU constraint that also ties the two epochs' biases.
#[derive(Debug, Clone)]
pub struct CombinedImuFactor {
    keys: [VariableId; 6],
    measurement: PreintegratedImuMeasurements,
}

impl CombinedImuFactor {
    pub fn new(epoch_i: usize, epoch_j: usize, measurement: PreintegratedImuMeasurements) -> Self {
        let [p_i, v_i, p_j, v_j, b_i] = inertial_keys(epoch_i, epoch_j);
        Self {
            keys: [p_i, v_i, p_j, v_j, b_i, VariableId::bias(epoch_j)],
            measurement,
        }
    }

    pub fn measurement(&self) -> &PreintegratedImuMeasurements {
        &self.measurement
    }
}

impl Factor for CombinedImuFactor {
    fn kind(&self) -> FactorKind {
        FactorKind::CombinedImu
    }

    fn keys(&self) -> &[VariableId] {
        &self.keys
    }

    fn dimension(&self) -> usize {
        15
    }

    fn linearize(
        &self,
        values: &StateStore,
        compute_jacobian: bool,
    ) -> CoreResult<(DVector<f64>, Option<DMatrix<f64>>)> {
        let inputs = lookup_inputs(values, &self.keys)?;
        let bias_j = values.bias(self.keys[5].epoch)?;

        let mut residual = DVector::zeros(15);
        let mut jacobian = compute_jacobian.then(|| DMatrix::zeros(15, 30));
        evaluate_inertial(&self.measurement, &inputs, &mut residual, jacobian.as_mut());

        let bias_delta = bias_j.to_vector() - inputs.bias_i.to_vector();
        residual.fixed_rows_mut::<6>(ROW_BIAS).copy_from(&bias_delta);

        if let Some(jac) = jacobian.as_mut() {
            jac.view_mut((ROW_BIAS, COL_BA_I), (6, 6))
                .fill_with_identity();
            jac.view_mut((ROW_BIAS, COL_BA_I), (6, 6)).neg_mut();
            jac.view_mut((ROW_BIAS, COL_BIAS_J), (6, 6))
                .fill_with_identity();
        }
        Ok((residual, jacobian))
    }
}
