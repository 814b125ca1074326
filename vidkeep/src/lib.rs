//! vidkeep library crate.
//!
//! Media ingestion and delivery: jobs are admitted through the HTTP API,
//! fetched by a bounded worker pool, reported live over a websocket and
//! served back with byte-range support once complete.

pub mod api;
pub mod config;
pub mod database;
pub mod delivery;
pub mod domain;
pub mod downloader;
pub mod error;
pub mod logging;
pub mod progress;
pub mod realtime;
pub mod scheduler;
pub mod services;
pub mod store;
pub mod utils;

pub use error::{Error, Result};
