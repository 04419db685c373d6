//! cinder_store: durable state for the message lifecycle engine
//!
//! # What lives here
//! - `messages`: ciphertext, wrapped key, destruction deadline and the
//!   `is_read` / `is_deleted` flags. The deadline column is the system of
//!   record for every pending destruction; in-memory schedules elsewhere are
//!   caches over it.
//! - `session_keys`: wrapped key material with an optional expiry.
//! - `system_logs`: destruction audit trail and general events.
//! - `incidents`: threat-scoring results, purged once resolved and old.
//!
//! Every state flip that must happen at most once (`mark_deleted`,
//! `destroy_session_key`) is a single conditional update, so concurrent
//! callers race safely: exactly one of them observes `true`.
//!
//! # Backends
//! - [`MemoryStore`]: process-local, with a switch to simulate outages.
//! - [`SqliteStore`]: sqlx over SQLite in WAL mode. Migrations in
//!   `migrations/` run on open.

pub mod error;
pub mod memory;
pub mod models;
pub mod sqlite;
pub mod store;

pub use error::StoreError;
pub use memory::MemoryStore;
pub use models::{
    IncidentRecord, LogSeverity, MessageRecord, SessionKeyRecord, SystemLogEntry,
};
pub use sqlite::SqliteStore;
pub use store::Store;
