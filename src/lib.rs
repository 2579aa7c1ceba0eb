//! # Gardi (authentication chain & master-password protection)
//!
//! `gardi` authenticates users against an ordered list of pluggable
//! identity sources and protects a per-installation cache of saved
//! database-server passwords behind a single derived encryption key that
//! is never persisted in cleartext.
//!
//! ## Authentication
//!
//! One login attempt flows through [`auth::chain::AuthChain`]: the attempt's
//! source list is derived from configuration and the invoked affordance
//! (the password form is mutually exclusive with the redirect-driven
//! external sources), then validate → authenticate → login run in priority
//! order. Consecutive Internal-source failures feed
//! [`auth::lockout::LoginAttemptLimiter`]; a locked account is rejected
//! before any credential is examined.
//!
//! ## Master key
//!
//! [`masterkey::MasterKeyManager`] resolves the key from, in order: the
//! already-resolved state, the OS keyring (desktop mode), a freshly
//! generated keyring entry, the configured hook command, or an explicitly
//! submitted password. Candidates are proven against a sentinel check text
//! before they are trusted, and key rotation re-encrypts the whole saved
//! password cache before success is reported.
//!
//! - **Key scope:** the key lives in a per-session scope in server mode and
//!   never in a process-wide one, so one user's key cannot leak into
//!   another's session.
//! - **Key material** stays in volatile memory, is zeroed on drop, and is
//!   redacted from every `Debug` rendering and log line.
//!
//! ## Storage
//!
//! Accounts and encrypted secrets live behind the [`users::UserStore`] and
//! [`secret::SecretStore`] seams, with in-memory implementations for
//! desktop mode and tests and Postgres implementations for server
//! deployments (`db/sql/01_gardi.sql`).

pub mod api;
pub mod auth;
pub mod config;
pub mod error;
pub mod masterkey;
pub mod secret;
pub mod storage;
pub mod users;

pub use config::Config;
pub use error::{Error, Field};
