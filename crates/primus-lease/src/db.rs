//! Database-backed lease
//!
//! Master election for a set of independent process instances that share
//! nothing but a relational database. The protocol rests entirely on the
//! atomicity of single conditional UPDATE statements:
//!
//! - every node allocates a cluster-unique id by a compare-and-swap bump of
//!   the counter row,
//! - the lease row is claimed or renewed with
//!   `UPDATE ... WHERE ID = 0 OR ID = self`, so exactly one node can ever
//!   satisfy the predicate,
//! - a holder that stops bumping its epoch for longer than twice its own
//!   declared interval is presumed dead, and any other node may steal the
//!   row. The steal is conditioned on both the holder id and the epoch it
//!   just read, so a renewal racing the steal makes exactly one of them win.
//!
//! Every SQL failure during steady-state operation is logged and converted
//! to "not held"; the monitor simply retries on its next tick.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use sqlx::{Connection, Row};

use primus_common::{CoordinationError, LeaseObservation};

use crate::Lease;
use crate::config::DbLeaseConfig;
use crate::provider::ConnectionProvider;
use crate::statements::{Dialect, dialect_for};

/// One node's handle on the shared lease row.
///
/// Owned by a single monitor task; all mutable state is plain fields, never
/// shared. The only concurrency in the protocol happens inside the database.
pub struct DistributedLease {
    cfg: DbLeaseConfig,
    dialect: Box<dyn Dialect>,
    provider: ConnectionProvider,
    /// Cluster-unique id of this node; 0 until initialization succeeds
    self_id: i64,
    /// Local epoch, incremented on every renewal attempt
    self_epoch: i64,
    /// Last-seen snapshot of the lease row
    observed: LeaseObservation,
    /// When the snapshot was taken, monotonic
    observed_at: Instant,
}

impl DistributedLease {
    /// Build the lease and make a best-effort initialization pass.
    ///
    /// A node that cannot reach the database yet still comes up; it retries
    /// initialization on each `acquire` call until the schema exists and an
    /// id is allocated, and holds no lease in the meantime.
    pub async fn connect(cfg: DbLeaseConfig) -> Self {
        let dialect = dialect_for(&cfg);
        let provider = ConnectionProvider::new(&cfg);
        let mut lease = Self {
            cfg,
            dialect,
            provider,
            self_id: 0,
            self_epoch: 0,
            observed: LeaseObservation::default(),
            observed_at: Instant::now(),
        };
        if let Err(e) = lease.init().await {
            tracing::warn!("lease initialization failed, will retry: {:#}", e);
        }
        lease
    }

    /// Cluster-unique id of this node, 0 while unassigned.
    pub fn node_id(&self) -> i64 {
        self.self_id
    }

    async fn init(&mut self) -> anyhow::Result<()> {
        self.ensure_schema().await?;
        self.self_id = self.allocate_node_id().await?;
        tracing::info!(node_id = self.self_id, "allocated cluster node id");
        Ok(())
    }

    /// Check for both tables and create them when absent.
    ///
    /// Two nodes can race the creation; the loser detects the benign race by
    /// re-probing existence after its failed transaction.
    async fn ensure_schema(&self) -> anyhow::Result<()> {
        let mut conn = self.provider.acquire().await?;
        if self.schema_exists(&mut conn).await {
            return Ok(());
        }

        let mut tx = conn.begin().await?;
        let mut failure = None;
        for stmt in self.dialect.create_schema_statements() {
            tracing::debug!("executing schema statement: {}", stmt);
            if let Err(e) = sqlx::query(&stmt).execute(&mut *tx).await {
                failure = Some(e);
                break;
            }
        }

        match failure {
            None => {
                tx.commit().await?;
                tracing::info!("created lease schema");
                Ok(())
            }
            Some(e) => {
                if let Err(re) = tx.rollback().await {
                    tracing::debug!("rollback after failed schema creation: {}", re);
                }
                if self.schema_exists(&mut conn).await {
                    tracing::debug!("lease schema created concurrently by another node");
                    Ok(())
                } else {
                    Err(CoordinationError::Database(e.to_string()).into())
                }
            }
        }
    }

    /// A failing probe means "table absent"; there is no portable catalog
    /// query across the supported backends.
    async fn schema_exists(&self, conn: &mut sqlx::AnyConnection) -> bool {
        for probe in [
            self.dialect.lease_exists_probe(),
            self.dialect.counter_exists_probe(),
        ] {
            if sqlx::query(&probe).execute(&mut *conn).await.is_err() {
                return false;
            }
        }
        true
    }

    /// Claim the next node id with an optimistic read-then-CAS loop.
    ///
    /// Under contention exactly one claimant succeeds per round, so the loop
    /// terminates in O(1) retries absent starvation.
    async fn allocate_node_id(&self) -> anyhow::Result<i64> {
        let mut conn = self.provider.acquire().await?;
        loop {
            let row = sqlx::query(&self.dialect.select_counter())
                .fetch_optional(&mut *conn)
                .await?;
            let Some(row) = row else {
                anyhow::bail!("node id counter table has no row");
            };
            let current: i64 = row.try_get(0)?;

            let result = sqlx::query(&self.dialect.bump_counter(current + 1, current))
                .execute(&mut *conn)
                .await?;
            if result.rows_affected() > 0 {
                if result.rows_affected() > 1 {
                    tracing::error!("node id counter table holds more than one row");
                }
                return Ok(current + 1);
            }
            // Lost this CAS round to a concurrent claimant; re-read and retry.
        }
    }

    /// One claim/renew attempt. This is the whole protocol step: a master
    /// that cannot renew its own row is, by definition, no longer master.
    pub async fn acquire_or_renew(&mut self) -> bool {
        if self.self_id == 0 {
            if let Err(e) = self.init().await {
                tracing::warn!("lease initialization retry failed: {:#}", e);
                return false;
            }
        }

        self.self_epoch += 1;
        let claim =
            self.dialect
                .claim_lease(self.self_id, self.self_epoch, self.cfg.lock_delay_ms);
        let mut held = self.execute_claim(&claim).await;

        if !held {
            held = self.observe_and_maybe_steal().await;
        }
        held
    }

    /// Run a claim or steal UPDATE; success is rows-affected > 0, optionally
    /// confirmed by a read-back for dialects that require it.
    async fn execute_claim(&self, sql: &str) -> bool {
        let updated = match self.try_update(sql).await {
            Ok(n) => n > 0,
            Err(e) => {
                tracing::warn!("failed to update lease row: {:#}", e);
                false
            }
        };
        if updated && self.dialect.verify_after_claim() {
            return match self.read_lease().await {
                Ok(Some(row)) => row.holder_id == self.self_id,
                Ok(None) => false,
                Err(e) => {
                    tracing::warn!("claim verification read failed: {:#}", e);
                    false
                }
            };
        }
        updated
    }

    /// The claim failed: observe the current holder and decide whether it is
    /// presumed dead.
    async fn observe_and_maybe_steal(&mut self) -> bool {
        let row = match self.read_lease().await {
            Ok(Some(row)) => row,
            Ok(None) => {
                tracing::warn!("lease table has no row");
                return false;
            }
            Err(e) => {
                tracing::warn!("unable to read the lease row: {:#}", e);
                return false;
            }
        };

        if row.holder_id != self.observed.holder_id {
            // New holder: start a fresh staleness baseline, including its
            // declared renewal interval.
            self.observed = row;
            self.observed_at = Instant::now();
            return false;
        }

        if row.epoch != self.observed.epoch {
            // The holder renewed since our last look; it is alive.
            self.observed.epoch = row.epoch;
            self.observed_at = Instant::now();
            return false;
        }

        // Same holder, same epoch. Twice the holder's own declared interval
        // without a renewal tolerates one missed tick of scheduling jitter
        // but not a crashed process.
        let stale_after = Duration::from_millis(self.observed.lease_millis.max(0) as u64 * 2);
        if self.observed_at.elapsed() <= stale_after {
            return false;
        }

        let steal = self.dialect.steal_lease(
            self.self_id,
            self.self_epoch,
            self.cfg.lock_delay_ms,
            row.holder_id,
            row.epoch,
        );
        let stolen = self.execute_claim(&steal).await;
        if stolen {
            tracing::info!(
                previous_holder = row.holder_id,
                node_id = self.self_id,
                "stole lease from presumed-dead holder"
            );
        }
        stolen
    }

    async fn read_lease(&self) -> anyhow::Result<Option<LeaseObservation>> {
        let mut conn = self.provider.acquire().await?;
        let row = sqlx::query(&self.dialect.select_lease())
            .fetch_optional(&mut *conn)
            .await?;
        match row {
            Some(row) => Ok(Some(LeaseObservation {
                holder_id: row.try_get(0)?,
                epoch: row.try_get(1)?,
                lease_millis: row.try_get(2)?,
            })),
            None => Ok(None),
        }
    }

    async fn try_update(&self, sql: &str) -> anyhow::Result<u64> {
        let mut conn = self.provider.acquire().await?;
        let result = sqlx::query(sql).execute(&mut *conn).await?;
        Ok(result.rows_affected())
    }

    /// Best-effort relinquish: a node that fails to release on its way down
    /// has already lost the ability to affect correctness.
    pub async fn relinquish(&mut self) {
        if self.self_id == 0 {
            return;
        }
        let sql = self.dialect.release_lease(self.self_id);
        match self.try_update(&sql).await {
            Ok(n) if n > 0 => tracing::info!(node_id = self.self_id, "released lease"),
            Ok(_) => tracing::debug!("release matched no row; lease was not held"),
            Err(e) => tracing::warn!("failed to release lease: {:#}", e),
        }
        self.provider.clear();
    }
}

#[async_trait]
impl Lease for DistributedLease {
    async fn acquire(&mut self) -> anyhow::Result<bool> {
        Ok(self.acquire_or_renew().await)
    }

    async fn is_alive(&mut self) -> anyhow::Result<bool> {
        Ok(self.acquire_or_renew().await)
    }

    async fn release(&mut self) {
        self.relinquish().await;
    }
}
