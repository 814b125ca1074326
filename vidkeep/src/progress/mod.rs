//! Progress bus.
//!
//! Fans job progress and status events out to per-job subscribers and to a
//! global feed consumed by the realtime gateway. Publishing never blocks:
//! a subscriber that cannot keep up loses events instead of stalling the
//! worker that produced them.

mod bus;
mod event;

pub use bus::{DEFAULT_SUBSCRIBER_CAPACITY, ProgressBus, Subscription};
pub use event::ProgressEvent;
