//! HTTP API.
//!
//! Job admission, range streaming, thumbnails, the websocket progress feed,
//! health probes and runtime log filter control.

pub mod error;
pub mod models;
pub mod routes;
pub mod server;

pub use server::{ApiServer, ApiServerConfig, AppState};
