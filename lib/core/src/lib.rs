//! Core domain types and utilities for slotwise.
//!
//! This crate provides the identifiers and error handling shared by the
//! session, conversation, AI and integration crates.

pub mod error;
pub mod id;

pub use error::Result;
pub use id::{MessageId, ParseIdError, PassId, SessionId};
