//! Job domain module.

mod entity;
mod state;

pub use entity::{Asset, FailureCode, Job, JobError};
pub use state::JobState;
