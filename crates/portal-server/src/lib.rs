//! Portal HTTP server.
//!
//! Wires the document store and access gate from `portal-core` to a storage
//! backend and serves them as a JSON API under `/v1/*`.

pub mod config;
pub mod error;
pub mod middleware;
pub mod routes;
pub mod state;
