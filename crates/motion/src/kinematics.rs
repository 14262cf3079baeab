//! Builds the `step-engine` kinematics transform from process-wide
//! configuration. The transform itself (identity axis-to-motor mapping)
//! lives in `step_engine::kinematics`; this module only adapts
//! [`MachineConfig`]'s axis/motor tables into the shape that trait wants.

use crate::config::{MachineConfig, MAX_MOTORS};
use step_engine::IdentityKinematics;

/// Builds the identity axis-to-motor kinematics for the configured
/// machine. Pure Cartesian: every motor drives exactly the axis named by
/// its `MotorConfig::axis`, scaled by that axis's `steps_per_mm` and
/// flipped by the motor's `invert_direction` polarity bit.
pub fn build_kinematics(cfg: &MachineConfig) -> IdentityKinematics<MAX_MOTORS> {
    let mut steps_per_mm = [0.0; MAX_MOTORS];
    let mut motor_axis = [0usize; MAX_MOTORS];
    let mut invert = [false; MAX_MOTORS];
    for (m, motor) in cfg.motors.iter().enumerate() {
        motor_axis[m] = motor.axis;
        steps_per_mm[m] = cfg.axes[motor.axis].steps_per_mm;
        invert[m] = motor.invert_direction;
    }
    IdentityKinematics {
        steps_per_mm,
        motor_axis,
        invert,
    }
}
