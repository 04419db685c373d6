//! cinder-engine: self-destructing message lifecycle
//!
//! - `messenger`: create and open hybrid-encrypted messages, delete them,
//!   ephemeral-session mode.
//! - `scheduler`: the destroy routine and the sweeps that feed it.
//! - `tasks`: supervised background loops driving the sweeps.
//! - `audit`: system-log entries written per destruction.
//! - `config`, `paths`: on-disk configuration and default locations.

pub mod audit;
pub mod config;
pub mod error;
pub mod messenger;
pub mod paths;
pub mod scheduler;
pub mod tasks;

pub use audit::DestructionReason;
pub use config::{EngineConfig, SweepConfig};
pub use error::EngineError;
pub use messenger::{CreatedMessage, NewMessage, SecureMessenger};
pub use scheduler::{
    CleanupStats, DestroyOutcome, DestructionScheduler, MaintenanceReport, QueueEntry, SweepReport,
};
pub use tasks::{spawn_sweepers, Sweepers};
