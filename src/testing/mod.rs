//! Testing utilities
//!
//! An in-process broker stub so sessions can be exercised end to end without
//! a real MQTT broker.

pub mod mocks;

pub use mocks::*;
