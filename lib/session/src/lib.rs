//! Session lifecycle management for slotwise.
//!
//! A session binds an opaque id handed to the client to the OAuth credential
//! bundle used for calendar calls. This crate provides:
//!
//! - [`SessionManager`]: create, validate, refresh, sweep and logout
//! - [`SessionPersistence`]: durable storage, with [`JsonFileStore`] and
//!   [`MemoryStore`] implementations
//! - [`TokenEndpoint`]: the identity provider seam, implemented by
//!   [`OAuthClient`]

pub mod error;
pub mod manager;
pub mod oauth;
pub mod persist;
pub mod session;

pub use error::{RefreshError, SessionError, StoreError};
pub use manager::{SessionManager, SessionManagerConfig, ValidSession};
pub use oauth::{GOOGLE_TOKEN_URL, OAuthClient, TokenEndpoint, TokenGrant};
pub use persist::{JsonFileStore, LoadReport, MemoryStore, SessionPersistence, StoredSession};
pub use session::{Credentials, Session};
