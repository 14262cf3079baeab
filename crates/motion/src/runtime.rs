//! The runtime cursor: the single mutable structure holding the
//! currently-executing planner buffer's progress. Exclusively owned by
//! the segment generator in the foreground context; the ISR side only
//! ever reads the segment it has already been handed, never this
//! cursor.

use crate::config::MAX_AXES;

/// Sub-state of the buffer currently being sampled by the segment
/// generator's state machine, plus the arc/end markers of the runtime
/// cursor enumeration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RunSubState {
    #[default]
    New,
    Accel0,
    Accel1,
    Accel2,
    Cruise,
    Decel0,
    Decel1,
    Decel2,
    RunningArc,
    End,
}

/// Segment-sampling scratch carried between successive SG continuation
/// calls while working through one half (accel or decel) of a buffer's
/// profile (the `ACCEL_0`/`ACCEL_1`/`ACCEL_2` derivation).
#[derive(Debug, Clone, Copy, Default)]
pub struct HalfScratch {
    /// Elapsed time from the start of the current half (ACCEL_1/DECEL_1)
    /// or from the midpoint (ACCEL_2/DECEL_2).
    pub elapsed: f64,
    /// Segments emitted so far within the current half.
    pub segment_counter: u32,
    /// Total segments the current half was split into.
    pub segment_count: u32,
    /// Duration of a single segment within the current half.
    pub segment_time: f64,
    pub midpoint_velocity: f64,
    pub midpoint_acceleration: f64,
    /// Jerk with the sign of this half's velocity change baked in, so
    /// the concave/convex sampling formulas read the same for an
    /// accelerating head and a decelerating tail.
    pub jerk_signed: f64,
    /// Target length of the half being sampled (`head_length` or
    /// `tail_length`), used by the finalization segment to absorb
    /// accumulated rounding: the last segment of a half triggers a
    /// finalization segment.
    pub half_length: f64,
    /// Distance already emitted within the current half, accumulated
    /// segment by segment.
    pub distance_accum: f64,
    /// The half's target exit velocity, used by the finalization segment.
    pub v_out: f64,
}

/// Holds the currently-executing planner buffer's progress.
#[derive(Debug, Clone, Copy)]
pub struct RuntimeCursor {
    pub state: RunSubState,
    pub scratch: HalfScratch,
    /// Current tool position, floating-point mm, updated per emitted
    /// segment (distinct from the planner's non-cumulative planning
    /// position).
    pub position: [f64; MAX_AXES],
    /// Index of the planner buffer currently bound to this cursor.
    pub buffer_index: Option<usize>,
    /// Arc tessellation scratch: remaining sub-segments and angular/
    /// linear increments.
    pub arc_segments_remaining: u32,
    pub arc_angle: f64,
    pub arc_angle_increment: f64,
    pub arc_linear_increment: f64,
    pub arc_center: [f64; 2],
    /// `timer_ticks` of the most recently emitted motor segment, used by
    /// the next segment's `counter_reset_flag` derivation:
    /// `timer_ticks * RESET_FACTOR < previous_timer_ticks`.
    pub last_timer_ticks: u32,
}

impl Default for RuntimeCursor {
    fn default() -> Self {
        Self {
            state: RunSubState::New,
            scratch: HalfScratch::default(),
            position: [0.0; MAX_AXES],
            buffer_index: None,
            arc_segments_remaining: 0,
            arc_angle: 0.0,
            arc_angle_increment: 0.0,
            arc_linear_increment: 0.0,
            arc_center: [0.0; 2],
            last_timer_ticks: 0,
        }
    }
}

impl RuntimeCursor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Binds the cursor to a freshly RUNNING planner buffer, resetting
    /// all sampling scratch.
    pub fn start_buffer(&mut self, buffer_index: usize, position: [f64; MAX_AXES]) {
        self.buffer_index = Some(buffer_index);
        self.state = RunSubState::New;
        self.scratch = HalfScratch::default();
        self.position = position;
    }

    /// Resets the cursor to idle (no bound buffer). Called by `kill()`
    /// and after a buffer's final segment is emitted.
    pub fn clear(&mut self) {
        *self = Self::default();
    }
}
