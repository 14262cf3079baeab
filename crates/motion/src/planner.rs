//! The trajectory planner: turns canonical motion requests into QUEUED
//! planner buffers with computed head/body/tail breakdowns and
//! velocities, then back-plans across the queue so chained moves hit
//! maximum attainable velocities while remaining able to brake to zero
//! if the queue drains. Junction-deviation back-propagation over a
//! ring-indexed queue, feeding the head/body/tail/back-planning
//! algorithm in `segment_math`.

#[cfg(not(feature = "std"))]
use libm::{pow, sqrt};
#[cfg(feature = "std")]
fn sqrt(x: f64) -> f64 {
    x.sqrt()
}
#[cfg(feature = "std")]
fn pow(x: f64, y: f64) -> f64 {
    x.powf(y)
}

use crate::config::{MachineConfig, PathControlMode, MAX_AXES};
use crate::error::Status;
use crate::queue::{ArcRecord, MoveType, PlannerQueue};
use crate::segment_math::{compute_segments, SegmentTolerances};

/// Drives the planner queue for a machine with a fixed N-slot ring
/// (design target 8-32 slots).
pub struct TrajectoryPlanner<const N: usize> {
    queue: PlannerQueue<N>,
    config: MachineConfig,
    /// Planning position: the position implied by the tail of the
    /// queue, updated non-cumulatively on every enqueue (not the
    /// runtime/executing position, which SG/MPE own).
    position: [f64; MAX_AXES],
}

impl<const N: usize> TrajectoryPlanner<N> {
    pub fn new(config: MachineConfig) -> Self {
        Self {
            queue: PlannerQueue::new(),
            config,
            position: [0.0; MAX_AXES],
        }
    }

    pub fn config(&self) -> &MachineConfig {
        &self.config
    }

    pub fn queue(&self) -> &PlannerQueue<N> {
        &self.queue
    }

    pub fn queue_mut(&mut self) -> &mut PlannerQueue<N> {
        &mut self.queue
    }

    pub fn position(&self) -> [f64; MAX_AXES] {
        self.position
    }

    fn tolerances(&self) -> SegmentTolerances {
        SegmentTolerances {
            min_line_length: self.config.min_line_length,
            epsilon: self.config.epsilon,
            convergence_pct: self.config.convergence_pct,
            max_iterations: self.config.max_iterations,
        }
    }

    /// TRUE if MPE is still stepping OR any planner buffer is not
    /// EMPTY. The MPE side is reported by the caller via `mpe_busy`
    /// since the planner has no visibility into the pulse engine.
    pub fn busy(&self, mpe_busy: bool) -> bool {
        mpe_busy || self.queue.busy()
    }

    /// Establishes a new planner/runtime position without generating
    /// motion. Callers are responsible for applying the same position
    /// to the runtime cursor.
    pub fn set_position(&mut self, position: [f64; MAX_AXES]) {
        self.position = position;
    }

    /// Enqueues a straight-line move to `target`, returning
    /// `OK | ZERO_LENGTH | BUFFER_FULL`.
    pub fn enqueue_line(&mut self, target: [f64; MAX_AXES], duration_minutes: f64) -> Status {
        let (unit, length) = self.travel(target);
        if length < self.config.min_line_length {
            return Status::ZeroLength;
        }
        let idx = match self.queue.alloc() {
            Some(i) => i,
            None => return Status::BufferFullNonFatal,
        };

        let jerk = self.config.move_jerk(&unit);
        let cruise_cap = self.config.move_velocity_cap(&unit);
        let cruise_velocity_set = if duration_minutes > self.config.epsilon {
            (length / (duration_minutes * 60.0)).min(cruise_cap)
        } else {
            cruise_cap
        };

        {
            let buf = self.queue.get_mut(idx);
            buf.move_type = MoveType::Line;
            buf.target = target;
            buf.unit = unit;
            buf.length = length;
            buf.time = duration_minutes;
            buf.cruise_velocity_set = cruise_velocity_set;
            buf.cruise_velocity = cruise_velocity_set;
            buf.replannable = true;
            buf.arc = None;
        }
        self.position = target;

        self.set_join_velocity_limit(idx, jerk);
        self.backplan(idx, jerk);
        self.queue.commit(idx);
        Status::Ok
    }

    /// Records the arc sub-record; tessellation into line sub-moves
    /// happens at dispatch time, not here.
    #[allow(clippy::too_many_arguments)]
    pub fn enqueue_arc(
        &mut self,
        target: [f64; MAX_AXES],
        center_offset: [f64; 2],
        theta: f64,
        radius: f64,
        angular_travel: f64,
        linear_travel: f64,
        axis_1: usize,
        axis_2: usize,
        axis_linear: usize,
        duration_minutes: f64,
    ) -> Status {
        let (unit, length) = self.travel(target);
        if length < self.config.min_line_length {
            return Status::ZeroLength;
        }
        let idx = match self.queue.alloc() {
            Some(i) => i,
            None => return Status::BufferFullNonFatal,
        };

        let jerk = self.config.move_jerk(&unit);
        let cruise_cap = self.config.move_velocity_cap(&unit);
        let cruise_velocity_set = if duration_minutes > self.config.epsilon {
            (length / (duration_minutes * 60.0)).min(cruise_cap)
        } else {
            cruise_cap
        };

        {
            let buf = self.queue.get_mut(idx);
            buf.move_type = MoveType::Arc;
            buf.target = target;
            buf.unit = unit;
            buf.length = length;
            buf.time = duration_minutes;
            buf.cruise_velocity_set = cruise_velocity_set;
            buf.cruise_velocity = cruise_velocity_set;
            buf.replannable = true;
            buf.arc = Some(ArcRecord {
                theta,
                radius,
                angular_travel,
                linear_travel,
                axis_1,
                axis_2,
                axis_linear,
                center_offset,
            });
        }
        self.position = target;

        self.set_join_velocity_limit(idx, jerk);
        self.backplan(idx, jerk);
        self.queue.commit(idx);
        Status::Ok
    }

    fn enqueue_marker(&mut self, move_type: MoveType, time: f64) -> Status {
        let idx = match self.queue.alloc() {
            Some(i) => i,
            None => return Status::BufferFullNonFatal,
        };
        {
            let buf = self.queue.get_mut(idx);
            buf.move_type = move_type;
            buf.target = self.position;
            buf.unit = [0.0; MAX_AXES];
            buf.length = 0.0;
            buf.time = time;
            buf.cruise_velocity_set = 0.0;
            buf.cruise_velocity = 0.0;
            buf.entry_velocity = 0.0;
            buf.exit_velocity = 0.0;
            buf.join_velocity_limit = 0.0;
            buf.replannable = false;
            buf.arc = None;
        }
        self.queue.commit(idx);
        Status::Ok
    }

    /// Enqueues a dwell marker that holds the queue for `seconds`.
    pub fn enqueue_dwell(&mut self, seconds: f64) -> Status {
        self.enqueue_marker(MoveType::Dwell, seconds)
    }

    /// Enqueues a start marker.
    pub fn enqueue_start(&mut self) -> Status {
        self.enqueue_marker(MoveType::Start, 0.0)
    }

    /// Enqueues a stop marker.
    pub fn enqueue_stop(&mut self) -> Status {
        self.enqueue_marker(MoveType::Stop, 0.0)
    }

    /// Enqueues an end marker.
    pub fn enqueue_end(&mut self) -> Status {
        self.enqueue_marker(MoveType::End, 0.0)
    }

    fn travel(&self, target: [f64; MAX_AXES]) -> ([f64; MAX_AXES], f64) {
        let mut diff = [0.0; MAX_AXES];
        let mut len_sq = 0.0;
        for i in 0..MAX_AXES {
            diff[i] = target[i] - self.position[i];
            len_sq += diff[i] * diff[i];
        }
        let length = sqrt(len_sq);
        let mut unit = [0.0; MAX_AXES];
        if length > self.config.epsilon {
            for i in 0..MAX_AXES {
                unit[i] = diff[i] / length;
            }
        }
        (unit, length)
    }

    /// Junction velocity / corner speed between the previous committed
    /// move's unit vector and `idx`'s unit vector. Sets
    /// `join_velocity_limit` on the buffer at `idx`.
    fn set_join_velocity_limit(&mut self, idx: usize, _jerk: f64) {
        let limit = match self.queue.committed_prev(idx) {
            None => 0.0, // starting from rest: no established corner yet.
            Some(prev_idx) => {
                let a = self.queue.get(prev_idx).unit;
                let b = self.queue.get(idx).unit;
                self.corner_velocity(&a, &b)
            }
        };
        self.queue.get_mut(idx).join_velocity_limit = limit;
    }

    fn corner_velocity(&self, a: &[f64; MAX_AXES], b: &[f64; MAX_AXES]) -> f64 {
        match self.config.path_control_mode {
            PathControlMode::ExactStop => return 0.0,
            PathControlMode::Continuous => return f64::INFINITY,
            PathControlMode::ExactPath => {}
        }

        let mut dot = 0.0;
        let mut weight_sum = 0.0;
        let mut delta = 0.0;
        for i in 0..MAX_AXES {
            dot += a[i] * b[i];
            let w = a[i].abs() + b[i].abs();
            weight_sum += w;
            delta += self.config.axes[i].corner_offset * w;
        }
        let delta = if weight_sum > self.config.epsilon {
            delta / weight_sum
        } else {
            0.0
        };
        let c = -dot;

        if (c + 1.0).abs() < self.config.epsilon {
            return f64::INFINITY; // colinear, theta ~= 0.
        }
        if (c - 1.0).abs() < self.config.epsilon {
            return 0.0; // 180-degree reversal.
        }

        let sin_half = sqrt(((1.0 - c) / 2.0).max(0.0));
        if (1.0 - sin_half).abs() < self.config.epsilon {
            return 0.0;
        }
        let radius = delta * sin_half / (1.0 - sin_half);
        sqrt((self.config.corner_acceleration * radius).max(0.0))
    }

    /// The maximum Δv this move could shed (or gain) to/from zero over
    /// its own `length` under max jerk `jerk` — the inverse of
    /// [`head_tail_length`] with one endpoint pinned at zero: solves
    /// `length = V^1.5 / sqrt(jerk)` for `V`. Backs the `difference_velocity`
    /// / `difference_to_set_v` back-planning scratch fields.
    fn max_velocity_delta(length: f64, jerk: f64) -> f64 {
        if jerk <= 0.0 || length <= 0.0 {
            return 0.0;
        }
        pow(length * sqrt(jerk), 2.0 / 3.0)
    }

    /// Back-planning: backward pass accumulating `difference_to_stop`
    /// through the replannable tail, forward pass recomputing
    /// entry/exit/cruise bounded by join limits, then finalize the
    /// newly enqueued move with exit = 0.
    fn backplan(&mut self, new_idx: usize, jerk: f64) {
        let tol = self.tolerances();

        // Backward pass.
        let mut cur = Some(new_idx);
        let mut next_diff_to_stop = 0.0;
        let mut forward_start = new_idx;
        while let Some(idx) = cur {
            if !self.queue.get(idx).replannable {
                break;
            }
            let diff_velocity = Self::max_velocity_delta(self.queue.get(idx).length, jerk);
            let buf = self.queue.get_mut(idx);
            buf.difference_velocity = diff_velocity;
            buf.difference_to_stop = diff_velocity + next_diff_to_stop;
            forward_start = idx;
            next_diff_to_stop = buf.difference_to_stop;
            cur = self.queue.committed_prev(idx);
        }

        // Forward pass.
        let mut entry_velocity = match self.queue.committed_prev(forward_start) {
            Some(prev_idx) => self.queue.get(prev_idx).exit_velocity,
            None => 0.0,
        };
        let mut idx = forward_start;
        loop {
            let is_new = idx == new_idx;
            let length = self.queue.get(idx).length;
            let cruise_set = self.queue.get(idx).cruise_velocity_set;
            let join_limit = self.queue.get(idx).join_velocity_limit;
            let diff_velocity = self.queue.get(idx).difference_velocity;

            let entry = entry_velocity.min(join_limit);
            let difference_to_set_v = entry + diff_velocity;

            let exit_bound = if is_new {
                0.0 // finalize: worst-case braking assumption.
            } else {
                let next_idx = self.queue.next_index(idx);
                let next = self.queue.get(next_idx);
                difference_to_set_v
                    .min(next.join_velocity_limit)
                    .min(next.cruise_velocity_set)
                    .min(next.difference_to_stop)
            };

            let segments = compute_segments(entry, cruise_set, exit_bound, length, jerk, tol);

            let buf = self.queue.get_mut(idx);
            buf.entry_velocity = entry;
            buf.difference_to_set_v = difference_to_set_v;
            buf.cruise_velocity = segments.achieved_cruise_velocity;
            buf.exit_velocity = exit_bound.min(segments.achieved_cruise_velocity);
            buf.head_length = segments.head_length;
            buf.body_length = segments.body_length;
            buf.tail_length = segments.tail_length;

            let hit_entry_bound = (buf.entry_velocity - join_limit).abs() < tol.epsilon;
            let hit_cruise_bound = (buf.cruise_velocity - cruise_set).abs() < tol.epsilon;
            let hit_exit_bound = (buf.exit_velocity - exit_bound).abs() < tol.epsilon;
            if hit_entry_bound && hit_cruise_bound && hit_exit_bound {
                buf.replannable = false;
            }

            entry_velocity = buf.exit_velocity;
            if is_new {
                break;
            }
            idx = self.queue.next_index(idx);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg() -> MachineConfig {
        MachineConfig::default()
    }

    fn target(x: f64, y: f64, z: f64) -> [f64; MAX_AXES] {
        let mut t = [0.0; MAX_AXES];
        t[0] = x;
        t[1] = y;
        t[2] = z;
        t
    }

    #[test]
    fn single_straight_line_head_tail_equals_length_with_zero_body() {
        // Scenario 1: steps_per_mm=80, max_jerk=5e7, corner_acc=1e5 are
        // all config defaults; line (0,0,0)->(10,0,0) in 0.5 min.
        let mut tp: TrajectoryPlanner<8> = TrajectoryPlanner::new(cfg());
        let status = tp.enqueue_line(target(10.0, 0.0, 0.0), 0.5);
        assert_eq!(status, Status::Ok);
        let buf = tp.queue().get(0);
        assert_eq!(buf.exit_velocity, 0.0);
        assert!((buf.head_length + buf.body_length + buf.tail_length - buf.length).abs() < 1e-6);
    }

    #[test]
    fn two_collinear_lines_match_exit_and_entry_velocity() {
        // 10mm at 20mm/s needs 10/20=0.5s = 0.5/60 min.
        let mut tp2: TrajectoryPlanner<8> = TrajectoryPlanner::new(cfg());
        let dur = (10.0 / 20.0) / 60.0;
        tp2.enqueue_line(target(10.0, 0.0, 0.0), dur);
        tp2.enqueue_line(target(20.0, 0.0, 0.0), dur);
        let first = tp2.queue().get(0);
        let second = tp2.queue().get(1);
        assert!((first.exit_velocity - second.entry_velocity).abs() < 1e-6);
        assert!(first.body_length > 0.0);
    }

    #[test]
    fn ninety_degree_corner_bounds_join_velocity_below_cruise() {
        let mut tp: TrajectoryPlanner<8> = TrajectoryPlanner::new(cfg());
        let dur = (10.0 / 200.0) / 60.0;
        tp.enqueue_line(target(10.0, 0.0, 0.0), dur);
        tp.enqueue_line(target(10.0, 10.0, 0.0), dur);
        let second = tp.queue().get(1);
        assert!(second.join_velocity_limit > 0.0);
        assert!(second.join_velocity_limit < 200.0);
    }

    #[test]
    fn dwell_buffer_forces_neighbor_velocities_to_zero() {
        let mut tp: TrajectoryPlanner<8> = TrajectoryPlanner::new(cfg());
        let dur = (10.0 / 50.0) / 60.0;
        tp.enqueue_line(target(10.0, 0.0, 0.0), dur);
        tp.enqueue_dwell(1.0);
        tp.enqueue_line(target(20.0, 0.0, 0.0), dur);
        let dwell = tp.queue().get(1);
        assert_eq!(dwell.move_type, MoveType::Dwell);
        assert_eq!(dwell.length, 0.0);
        let line_before = tp.queue().get(0);
        assert_eq!(line_before.exit_velocity, 0.0);
    }

    #[test]
    fn queue_full_returns_backpressure_then_succeeds_after_drain() {
        let mut tp: TrajectoryPlanner<8> = TrajectoryPlanner::new(cfg());
        let mut target_x = 0.0;
        for _ in 0..8 {
            target_x += 0.1;
            assert_eq!(
                tp.enqueue_line(target(target_x, 0.0, 0.0), 1.0),
                Status::Ok
            );
        }
        target_x += 0.1;
        assert_eq!(
            tp.enqueue_line(target(target_x, 0.0, 0.0), 1.0),
            Status::BufferFullNonFatal
        );
        // Drain two by completing them as the dispatcher would.
        assert!(tp.queue_mut().start_running().is_some());
        tp.queue_mut().finish_running();
        assert!(tp.queue_mut().start_running().is_some());
        tp.queue_mut().finish_running();
        assert_eq!(
            tp.enqueue_line(target(target_x, 0.0, 0.0), 1.0),
            Status::Ok
        );
    }

    #[test]
    fn zero_length_move_is_rejected() {
        let mut tp: TrajectoryPlanner<8> = TrajectoryPlanner::new(cfg());
        assert_eq!(
            tp.enqueue_line(target(0.0, 0.0, 0.0), 1.0),
            Status::ZeroLength
        );
    }

    #[test]
    fn min_line_length_boundary() {
        let mut tp: TrajectoryPlanner<8> = TrajectoryPlanner::new(cfg());
        let eps_below = cfg().min_line_length * 0.999;
        assert_eq!(
            tp.enqueue_line(target(eps_below, 0.0, 0.0), 1.0),
            Status::ZeroLength
        );
        let mut tp2: TrajectoryPlanner<8> = TrajectoryPlanner::new(cfg());
        let at_min = cfg().min_line_length * 1.001;
        assert_eq!(
            tp2.enqueue_line(target(at_min, 0.0, 0.0), 1.0),
            Status::Ok
        );
    }
}
