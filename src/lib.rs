//! # OmnisecAI Credential Core
//!
//! Credential lifecycle and multi-factor authentication engine for the
//! OmnisecAI platform: short-lived single-use security tokens (password
//! reset, email verification, MFA setup, invitations) and TOTP/backup-code
//! verification with attempt throttling.
//!
//! ## Storage model
//!
//! All transient state lives in a shared TTL key-value store reached through
//! the [`store::TtlStore`] trait. A token record exists in the store iff it
//! has not expired and has not been consumed; consumption and expiry are
//! both deletions, so there is no "used" flag to forget to check. Durable
//! account state (whether MFA is enabled, the committed secret, the
//! backup-code list) lives behind [`users::UserStore`].
//!
//! ## Security boundaries
//!
//! - Tokens carry ≥256 bits of entropy and are stored under a SHA-256 hash;
//!   the raw value exists only in the issuing response. Diagnostics log a
//!   masked prefix at most.
//! - Token consumption is exactly-once, built on the store's atomic
//!   get-and-delete. A second submission of the same token is
//!   indistinguishable from a token that never existed.
//! - TOTP and backup-code verification are throttled per subject and source
//!   address; the window is anchored to the first failure.
//! - Time is injected via [`clock::Clock`], so expiry and TOTP-window
//!   behavior are deterministic under test.
//!
//! The HTTP layer, durable user storage, and outbound email are external
//! collaborators; this crate is invoked programmatically and surfaces every
//! failure as a named [`error::Error`] kind for 1:1 status-code mapping.

pub mod audit;
pub mod clock;
pub mod config;
pub mod error;
pub mod guard;
pub mod mfa;
mod random;
pub mod store;
pub mod token;
pub mod users;

pub use audit::{AuditEvent, AuditOutcome, AuditSink, TracingAuditSink};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::CoreConfig;
pub use error::{Error, Result};
pub use guard::{AttemptGuard, AttemptPurpose};
pub use mfa::{BackupCodeCheck, MfaService, SetupBundle};
pub use store::{MemoryTtlStore, TtlStore};
pub use token::{TokenKind, TokenPayload, TokenService};
pub use users::{MemoryUserStore, MfaProfile, UserStore};
