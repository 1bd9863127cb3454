//! Calendar integration for slotwise.
//!
//! This crate provides:
//!
//! - **Transport**: the [`CalendarTransport`] trait and a Google Calendar v3
//!   client
//! - **Rate limiting**: a per-session, per-category spacing ledger
//! - **Retry**: exponential backoff with jitter for calendar calls
//! - **Dispatch**: tool validation, confirmation gating and execution

pub mod calendar;
pub mod dispatch;
pub mod error;
pub mod google;
pub mod rate_limit;
pub mod retry;

pub use calendar::{CalendarEvent, CalendarTransport, EventDraft, EventPatch, EventQuery};
pub use dispatch::DispatchEngine;
pub use error::{CalendarError, ParameterError};
pub use google::{GOOGLE_CALENDAR_URL, GoogleCalendarClient};
pub use rate_limit::{RateLimitConfig, RateLimitLedger};
pub use retry::{RetryPolicy, backoff_delay_ms};
