//! # In-process motion simulation harness
//!
//! Drives a real [`motion::MotionCore`] and [`step_engine::MotorPulseEngine`]
//! pair tick-by-tick in a single process, so scripted multi-move scenarios
//! can be exercised end to end without a microcontroller. An in-process
//! harness over the SG -> MPE ring the real core already owns: the core has
//! no network surface, so there is nothing to proxy over a socket.

pub mod harness;

pub use harness::{MotorPorts, SimHarness, TraceEvent};
