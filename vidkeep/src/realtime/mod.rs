//! Realtime gateway.
//!
//! Keeps a registry of connected websocket clients and relays every event
//! from the progress bus to all of them. Each connection has its own bounded
//! queue; when a client falls behind, the newest events are dropped for that
//! client only.

mod gateway;

pub use gateway::{
    BroadcastStats, ConnectionHandle, ConnectionId, GatewayConfig, RealtimeGateway,
};
