//! Process-wide, read-only-after-startup configuration. Loaded once at
//! startup; every downstream component borrows it for the process
//! lifetime.

/// Logical axes and physical motors share this bound. The core assumes a
/// single Cartesian coordinate system with up to six addressable axes
/// (X, Y, Z, A, B, C) and a matching count of physical motors, each bound
/// to exactly one axis through [`MotorConfig::axis`].
pub const MAX_AXES: usize = 6;

/// Re-exported so callers never have to depend on `step-engine` just to
/// size a config array consistently with the pulse engine.
pub const MAX_MOTORS: usize = MAX_AXES;

/// Path control mode, selecting the junction-velocity policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize)]
pub enum PathControlMode {
    /// Force zero junction velocity at every move boundary.
    ExactStop,
    /// Force a low junction velocity (bounded deviation), the default.
    #[default]
    ExactPath,
    /// Permit the maximum junction velocity the geometry allows.
    Continuous,
}

/// Per-axis configuration.
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct AxisConfig {
    pub steps_per_mm: f64,
    pub max_velocity: f64,
    pub max_jerk: f64,
    /// Per-axis delta in the junction-deviation formula; axes with tighter
    /// dynamics (a slow Z) pull the effective corner radius tighter.
    pub corner_offset: f64,
}

impl Default for AxisConfig {
    fn default() -> Self {
        Self {
            steps_per_mm: 80.0,
            max_velocity: 200.0,
            max_jerk: 5.0e7,
            corner_offset: 0.01,
        }
    }
}

/// Per-motor configuration: binding to an axis, direction polarity, and
/// idle power-down policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct MotorConfig {
    /// Index into `MachineConfig::axes` this motor drives.
    pub axis: usize,
    /// XOR applied to the direction bit before it reaches the driver.
    pub invert_direction: bool,
    /// Microstep divisor; scales the DDA's notion of "one step".
    pub microsteps: u16,
    /// Power the driver down once a motion segment using this motor
    /// completes and the engine goes idle.
    pub power_down_on_idle: bool,
}

impl Default for MotorConfig {
    fn default() -> Self {
        Self {
            axis: 0,
            invert_direction: false,
            microsteps: 16,
            power_down_on_idle: false,
        }
    }
}

/// Process-wide machine configuration: axis/motor tables plus the
/// numeric tolerances the planner and segment generator are tuned by.
/// Read-only after startup; safe to share from any context.
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct MachineConfig {
    pub axes: [AxisConfig; MAX_AXES],
    pub motors: [MotorConfig; MAX_MOTORS],

    /// Global centripetal acceleration bound used in the junction-velocity
    /// formula (`A_corner`).
    pub corner_acceleration: f64,

    /// Arc/segment granularity target for arc tessellation.
    pub min_segment_length_mm: f64,
    /// Target segment duration for the S-curve sampler.
    pub min_segment_time_us: f64,

    /// Below this cartesian length a line is rejected as zero-length.
    pub min_line_length: f64,
    /// Epsilon for float equality throughout planning math.
    pub epsilon: f64,
    /// Convergence threshold (relative) for the 2-segment iterative solve.
    pub convergence_pct: f64,
    /// Iteration cap for the 2-segment iterative solve.
    pub max_iterations: u32,

    pub path_control_mode: PathControlMode,

    /// Largest integer DDA overclock factor considered.
    pub dda_overclock_max: u32,
    pub f_dda_max: f64,
    pub f_dda_min: f64,
    /// Bresenham fixed-point scale factor (`substeps`); halved on overflow.
    pub dda_substeps: u32,
    /// `timer_ticks * RESET_FACTOR < previous_timer_ticks` triggers
    /// `counter_reset_flag`.
    pub reset_factor: f64,
}

impl Default for MachineConfig {
    fn default() -> Self {
        Self {
            axes: [AxisConfig::default(); MAX_AXES],
            motors: core::array::from_fn(|i| MotorConfig {
                axis: i,
                ..MotorConfig::default()
            }),
            corner_acceleration: 1.0e5,
            min_segment_length_mm: 0.1,
            min_segment_time_us: 5_000.0,
            min_line_length: 0.01,
            epsilon: 1e-5,
            convergence_pct: 0.01,
            max_iterations: 20,
            path_control_mode: PathControlMode::ExactPath,
            dda_overclock_max: 8,
            f_dda_max: 300_000.0,
            f_dda_min: 1_000.0,
            dda_substeps: 16,
            reset_factor: 2.0,
        }
    }
}

impl MachineConfig {
    /// Minimum jerk across every axis touched by a move's unit vector,
    /// used as the move's planning jerk.
    pub fn move_jerk(&self, unit: &[f64; MAX_AXES]) -> f64 {
        let mut jerk = f64::INFINITY;
        for i in 0..MAX_AXES {
            if unit[i].abs() > self.epsilon {
                jerk = jerk.min(self.axes[i].max_jerk);
            }
        }
        if jerk.is_finite() {
            jerk
        } else {
            self.axes[0].max_jerk
        }
    }

    /// Maximum velocity across every axis touched by a move's unit vector,
    /// projected through each axis's own cap.
    pub fn move_velocity_cap(&self, unit: &[f64; MAX_AXES]) -> f64 {
        let mut cap = f64::INFINITY;
        for i in 0..MAX_AXES {
            if unit[i].abs() > self.epsilon {
                let axis_cap = self.axes[i].max_velocity / unit[i].abs();
                cap = cap.min(axis_cap);
            }
        }
        if cap.is_finite() {
            cap
        } else {
            0.0
        }
    }
}

#[cfg(feature = "std")]
mod loader {
    use super::MachineConfig;

    /// Errors loading a [`MachineConfig`] from TOML. Persisting config to
    /// non-volatile storage is an external concern; this loader only turns
    /// a TOML document into the in-memory struct.
    #[derive(Debug, thiserror::Error)]
    pub enum ConfigError {
        #[error("failed to parse configuration: {0}")]
        Parse(#[from] toml::de::Error),
    }

    impl MachineConfig {
        pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
            let cfg: MachineConfig = toml::from_str(text)?;
            Ok(cfg)
        }
    }
}

#[cfg(feature = "std")]
pub use loader::ConfigError;
