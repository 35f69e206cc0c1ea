//! Library crate for codections-back, exposing modules for binaries and integration tests.

pub mod config;
/// Storage models, the store trait and its backends.
pub mod dao;
/// Request, response and event payloads exchanged with clients.
pub mod dto;
/// Service and HTTP error types.
pub mod error;
/// Axum route trees.
pub mod routes;
/// Business logic, background tasks and client actors.
pub mod services;
pub mod state;
