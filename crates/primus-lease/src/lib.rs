//! Lease-based mutual exclusion for hot/cold failover
//!
//! A set of independent process instances elects a single master through a
//! shared resource. Three strategies implement the same `Lease` contract:
//!
//! - [`DistributedLease`]: a shared relational database, for instances on
//!   different hosts
//! - [`FileLease`]: an exclusive advisory file lock, for instances on one
//!   host
//! - [`NullLease`]: always master, for unclustered deployments
//!
//! [`LeaseMonitor`] drives any of them on a fixed tick and reports role
//! transitions to a [`LeaseListener`].

use async_trait::async_trait;

pub mod config;
pub mod db;
pub mod file;
pub mod monitor;
pub mod null;
pub mod provider;
pub mod statements;

pub use config::{DbLeaseConfig, DialectKind, FileLeaseConfig};
pub use db::DistributedLease;
pub use file::FileLease;
pub use monitor::{DEFAULT_POLL_INTERVAL, LeaseListener, LeaseMonitor};
pub use null::NullLease;

/// The lease contract shared by every strategy.
///
/// Contention is not an error: `acquire` and `is_alive` answer `Ok(false)`
/// when another instance holds the lease, and reserve `Err` for problems the
/// caller cannot fix by retrying the same call. For the database strategy,
/// `is_alive` is itself a renewal attempt; a master that cannot renew has
/// lost the lease.
#[async_trait]
pub trait Lease: Send {
    /// Try to take or renew the lease. Never blocks waiting for it.
    async fn acquire(&mut self) -> anyhow::Result<bool>;

    /// Whether this instance still holds the lease.
    async fn is_alive(&mut self) -> anyhow::Result<bool>;

    /// Give the lease up. Best-effort and idempotent; releasing a lease that
    /// is not held does nothing.
    async fn release(&mut self);
}
