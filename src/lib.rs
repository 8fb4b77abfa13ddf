//! LiveClass server.
//!
//! Capacity-bounded class rooms with a waitlist, a per-room WebSocket relay
//! for whiteboard and chat events, and timestamp-ordered replay of both
//! event logs.
//!
//! ```text
//! routes/classes.rs -> admission.rs -> store.rs (SQLite)
//! routes/ws.rs      -> relay.rs     -> store.rs
//! routes/classes.rs -> replay.rs    -> store.rs
//! ```

pub mod admission;
pub mod config;
pub mod error;
pub mod models;
pub mod relay;
pub mod replay;
pub mod routes;
pub mod state;
pub mod store;
pub mod utils {
    pub mod jwt;
}
