//! # Step Engine
//!
//! The hard real-time leaf of the motion pipeline: an interrupt-driven,
//! multi-axis DDA step pulse engine. Consumes
//! pre-computed [`MotorSegment`]s from a small lock-free ring and emits
//! step/direction pulses on a hardware timer tick.
//!
//! `no_std` by default; the `std` feature only unlocks host-side test
//! helpers, never anything reachable from the ISR call sites.

#![cfg_attr(not(feature = "std"), no_std)]

pub mod dda;
pub mod kinematics;

pub use dda::{
    DdaTimer, DirectionPort, MotorEnable, MotorPulseEngine, MotorSegment, SegmentConsumer,
    SegmentKind, SegmentProducer, SegmentQueue, StepPort, TickOutcome, MAX_MOTORS,
    SEGMENT_QUEUE_CAPACITY,
};
pub use kinematics::{IdentityKinematics, Kinematics};
