//! The planner queue: a fixed-capacity ring of [`PlannerBuffer`]s.
//!
//! `next`/`prev` are not physical pointers stored in each buffer but
//! computed as `(i ± 1) mod N` from a plain array index, since the
//! head/body/tail/back-plan algorithm needs direct indexed access
//! rather than push/pop-only access.

use crate::config::MAX_AXES;

/// Buffer lifecycle. EMPTY is the only free state; transitions are
/// monotonic through the cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BufferState {
    #[default]
    Empty,
    Loading,
    Queued,
    Pending,
    Running,
}

/// Discriminator for the buffer's run handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MoveType {
    #[default]
    Line,
    JerkLine,
    Arc,
    Dwell,
    Start,
    Stop,
    End,
}

/// Arc-specific fields, populated only when `move_type == Arc`.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ArcRecord {
    pub theta: f64,
    pub radius: f64,
    /// Signed radians; sign gives rotation sense.
    pub angular_travel: f64,
    /// Helical travel along the plane's normal axis.
    pub linear_travel: f64,
    pub axis_1: usize,
    pub axis_2: usize,
    pub axis_linear: usize,
    /// Center offset from the arc's start point, in `(axis_1, axis_2)`
    /// order; the third, plane-normal component is always zero for the
    /// planar arcs this core supports and so is not carried separately.
    pub center_offset: [f64; 2],
}

/// One slot of the planner queue.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PlannerBuffer {
    pub state: BufferState,
    pub move_type: MoveType,
    pub target: [f64; MAX_AXES],
    pub unit: [f64; MAX_AXES],
    pub length: f64,
    /// Requested duration, minutes.
    pub time: f64,
    pub cruise_velocity_set: f64,
    pub entry_velocity: f64,
    pub cruise_velocity: f64,
    pub exit_velocity: f64,
    pub head_length: f64,
    pub body_length: f64,
    pub tail_length: f64,
    pub join_velocity_limit: f64,
    pub difference_velocity: f64,
    pub difference_to_stop: f64,
    pub difference_to_set_v: f64,
    /// FALSE once the move is an exact-stop, has reached optimality, or
    /// is already executing past its head.
    pub replannable: bool,
    pub arc: Option<ArcRecord>,
}

impl Default for PlannerBuffer {
    fn default() -> Self {
        Self {
            state: BufferState::Empty,
            move_type: MoveType::Line,
            target: [0.0; MAX_AXES],
            unit: [0.0; MAX_AXES],
            length: 0.0,
            time: 0.0,
            cruise_velocity_set: 0.0,
            entry_velocity: 0.0,
            cruise_velocity: 0.0,
            exit_velocity: 0.0,
            head_length: 0.0,
            body_length: 0.0,
            tail_length: 0.0,
            join_velocity_limit: 0.0,
            difference_velocity: 0.0,
            difference_to_stop: 0.0,
            difference_to_set_v: 0.0,
            replannable: true,
            arc: None,
        }
    }
}

/// Fixed-capacity index-based ring of `N` planner buffers (design target
/// 8-32 slots). `write` is the next slot to hand out, `queue` the next
/// slot to mark QUEUED, `read` the current or next running slot. This
/// implementation is single-producer/single-consumer on the foreground
/// only (no concurrent loaders), so `write` and `queue` always advance
/// together; both fields are kept to preserve the three-cursor
/// structure rather than collapsing them into one.
pub struct PlannerQueue<const N: usize> {
    buffers: [PlannerBuffer; N],
    write: usize,
    queue: usize,
    read: usize,
}

impl<const N: usize> PlannerQueue<N> {
    pub fn new() -> Self {
        Self {
            buffers: [PlannerBuffer::default(); N],
            write: 0,
            queue: 0,
            read: 0,
        }
    }

    pub fn next_index(&self, i: usize) -> usize {
        (i + 1) % N
    }

    pub fn prev_index(&self, i: usize) -> usize {
        (i + N - 1) % N
    }

    pub fn get(&self, i: usize) -> &PlannerBuffer {
        &self.buffers[i]
    }

    pub fn get_mut(&mut self, i: usize) -> &mut PlannerBuffer {
        &mut self.buffers[i]
    }

    /// Index of the buffer that will receive the next enqueue, if any is
    /// EMPTY.
    pub fn alloc(&mut self) -> Option<usize> {
        let idx = self.write;
        if self.buffers[idx].state == BufferState::Empty {
            self.buffers[idx] = PlannerBuffer::default();
            self.buffers[idx].state = BufferState::Loading;
            Some(idx)
        } else {
            None
        }
    }

    /// Commits a LOADING buffer to QUEUED and advances the write/queue
    /// cursors. Foreground writes to a planner buffer strictly precede
    /// this call; once committed the buffer is read-only to the
    /// producer until it cycles back to EMPTY.
    pub fn commit(&mut self, idx: usize) {
        debug_assert_eq!(idx, self.write);
        self.buffers[idx].state = BufferState::Queued;
        self.write = self.next_index(self.write);
        self.queue = self.write;
    }

    /// Index of the buffer immediately behind `idx` in enqueue order, if
    /// that slot holds a real (non-EMPTY) predecessor.
    pub fn committed_prev(&self, idx: usize) -> Option<usize> {
        let p = self.prev_index(idx);
        if self.buffers[p].state != BufferState::Empty {
            Some(p)
        } else {
            None
        }
    }

    /// Returns the index of the RUNNING buffer, promoting the next
    /// QUEUED/PENDING buffer at `read` if none is currently RUNNING.
    pub fn current_running(&self) -> Option<usize> {
        if self.buffers[self.read].state == BufferState::Running {
            Some(self.read)
        } else {
            None
        }
    }

    pub fn read_index(&self) -> usize {
        self.read
    }

    /// Promotes the buffer at `read` from QUEUED/PENDING to RUNNING.
    /// Returns `None` if `read` is not in a runnable state.
    pub fn start_running(&mut self) -> Option<usize> {
        let idx = self.read;
        match self.buffers[idx].state {
            BufferState::Queued | BufferState::Pending => {
                self.buffers[idx].state = BufferState::Running;
                Some(idx)
            }
            _ => None,
        }
    }

    /// Frees the buffer at `read` (must be RUNNING) and advances `read`.
    pub fn finish_running(&mut self) {
        let idx = self.read;
        self.buffers[idx] = PlannerBuffer::default();
        self.read = self.next_index(self.read);
    }

    /// TRUE if any buffer is not EMPTY.
    pub fn busy(&self) -> bool {
        self.buffers.iter().any(|b| b.state != BufferState::Empty)
    }

    /// Frees every buffer unconditionally.
    pub fn reset(&mut self) {
        self.buffers = [PlannerBuffer::default(); N];
        self.write = 0;
        self.queue = 0;
        self.read = 0;
    }

    pub fn capacity(&self) -> usize {
        N
    }

    /// Count of EMPTY slots, used by the dispatcher's parser-throttle
    /// check against its configured free-slot requirement.
    pub fn free_count(&self) -> usize {
        self.buffers
            .iter()
            .filter(|b| b.state == BufferState::Empty)
            .count()
    }
}

impl<const N: usize> Default for PlannerQueue<N> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alloc_commit_cycles_through_states() {
        let mut q: PlannerQueue<4> = PlannerQueue::new();
        let idx = q.alloc().expect("fresh queue has free slots");
        assert_eq!(q.get(idx).state, BufferState::Loading);
        q.commit(idx);
        assert_eq!(q.get(idx).state, BufferState::Queued);
        assert!(q.busy());
    }

    #[test]
    fn queue_full_when_all_slots_occupied() {
        let mut q: PlannerQueue<2> = PlannerQueue::new();
        let a = q.alloc().unwrap();
        q.commit(a);
        let b = q.alloc().unwrap();
        q.commit(b);
        assert!(q.alloc().is_none());
        assert_eq!(q.free_count(), 0);
    }

    #[test]
    fn finish_running_frees_slot_and_advances_read() {
        let mut q: PlannerQueue<4> = PlannerQueue::new();
        let idx = q.alloc().unwrap();
        q.commit(idx);
        assert_eq!(q.start_running(), Some(idx));
        assert!(q.current_running().is_some());
        q.finish_running();
        assert!(!q.busy());
        assert_eq!(q.read_index(), q.next_index(idx));
    }

    #[test]
    fn committed_prev_sees_the_immediately_prior_enqueue() {
        let mut q: PlannerQueue<8> = PlannerQueue::new();
        let a = q.alloc().unwrap();
        q.commit(a);
        let b = q.alloc().unwrap();
        assert_eq!(q.committed_prev(b), Some(a));
    }

    #[test]
    fn reset_empties_every_slot() {
        let mut q: PlannerQueue<4> = PlannerQueue::new();
        let a = q.alloc().unwrap();
        q.commit(a);
        q.reset();
        assert!(!q.busy());
        assert_eq!(q.free_count(), 4);
    }
}
