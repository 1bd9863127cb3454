//! slotwise HTTP server.
//!
//! This crate wires the session, AI and calendar crates into the Request
//! Coordinator and exposes it over an axum router.

pub mod config;
pub mod coordinator;
pub mod error;
pub mod middleware;
pub mod routes;
pub mod state;

#[cfg(test)]
mod test_support;
