//! Identity layer: accounts, sessions, rate limiting and authorization.
//!
//! - [`accounts`] — persisted password hashes and data-key salts.
//! - [`session`] — session tokens, credential checks, the re-authentication gate.
//! - [`rate_limit`] — sliding-window failed-attempt counters.

pub mod accounts;
pub mod rate_limit;
pub mod session;

pub use accounts::{AccountRecord, AccountStore};
pub use rate_limit::FailedAttemptLog;
pub use session::{is_authorized, AuthReason, AuthResult, Session, SessionRegistry};
