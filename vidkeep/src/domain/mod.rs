//! Domain layer for vidkeep.
//!
//! This module contains the job state machine, its entities, and value objects.

pub mod job;
pub mod value_objects;

pub use job::{Asset, FailureCode, Job, JobError, JobState};
pub use value_objects::*;
