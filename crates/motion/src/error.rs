//! Error and status types for the motion planning crate. Plain `Copy`
//! enums throughout rather than reaching for `thiserror`, which is
//! reserved for the `std`-only crates.

/// Status returned by every entry point a parser or host front end
/// calls into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Ok,
    /// Recoverable input error: the requested move's length is below
    /// `min_line_length`. Caller silently skips.
    ZeroLength,
    /// Backpressure: no EMPTY planner buffer available. Caller retries.
    BufferFullNonFatal,
    /// A buffer was required where the caller had guaranteed availability
    /// (e.g. inside a continuation that pre-checked) and none existed.
    /// This is the one planner-side fatal condition.
    BufferFullFatal,
    /// The dispatcher should retry this operation on the next tick without
    /// treating it as an error.
    EAgain,
}

/// Errors raised by the segment generator (SG).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SegmentError {
    /// The MPE ring has no free slot; retry next tick.
    RingFull,
    /// A planner buffer was popped with no replannable geometry left to
    /// sample (should be unreachable; indicates a planner invariant was
    /// violated upstream).
    InvalidBuffer,
}
