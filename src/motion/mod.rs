//! Motion evidence engine.
//!
//! Raw sensor samples are classified against a magnitude threshold and
//! debounced into discrete detection events; only sustained movement counts
//! as evidence that the user is up.

pub mod detector;
pub mod engine;

pub use detector::{Detection, MotionDetector};
pub use engine::{MotionEngine, MotionStream};
