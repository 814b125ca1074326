//! Domain value objects.
//!
//! Value objects are immutable objects that represent concepts in the domain
//! and are defined by their attributes rather than identity.

mod job_id;
mod media_reference;

pub use job_id::JobId;
pub use media_reference::MediaReference;
