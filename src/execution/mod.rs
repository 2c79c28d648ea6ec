//! # Execution tracking for handler invocations and job runs.
//!
//! - [`CommandExecutor`]: wraps one unit of work with timing, classification and
//!   record emission; swallows errors, re-propagates cancellation
//! - [`ExecutionResult`], [`ErrorClass`]: the tagged outcome the boundary decision reads

mod outcome;
mod tracker;

pub use outcome::{ErrorClass, ExecutionResult};
pub use tracker::CommandExecutor;
