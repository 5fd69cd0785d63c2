//! SQL statement rendering for the lease protocol
//!
//! Pure templating: no I/O lives here. Every statement embeds its values
//! (integers only) so the result is a complete SQL string, comparable in
//! unit tests. Dialect differences are a strategy object selected once from
//! configuration; a dialect overrides individual statements, or requests a
//! read-only verification SELECT after a successful claim, without touching
//! any caller.

use crate::config::{DbLeaseConfig, DialectKind};

/// Resolved table names, cluster suffix already applied.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TableNames {
    pub lease: String,
    pub counter: String,
}

impl TableNames {
    /// A non-empty cluster name suffixes both tables so independent clusters
    /// can share one database.
    pub fn resolve(lease_table: &str, counter_table: &str, cluster_name: &str) -> Self {
        if cluster_name.is_empty() {
            Self {
                lease: lease_table.to_string(),
                counter: counter_table.to_string(),
            }
        } else {
            Self {
                lease: format!("{}_{}", lease_table, cluster_name),
                counter: format!("{}_{}", counter_table, cluster_name),
            }
        }
    }
}

/// Per-database statement strategy.
///
/// The default methods render portable SQL; a dialect overrides the ones its
/// database needs rendered differently.
pub trait Dialect: Send + Sync {
    fn tables(&self) -> &TableNames;

    /// Schema creation plus seed rows, executed as one transaction.
    /// Both single-row tables are seeded with 0: an unheld lease and an
    /// unallocated counter.
    fn create_schema_statements(&self) -> Vec<String> {
        let t = self.tables();
        vec![
            format!(
                "CREATE TABLE {} (ID INTEGER DEFAULT 0, STATE INTEGER DEFAULT 0, LOCK_DELAY INTEGER DEFAULT 0)",
                t.lease
            ),
            format!("INSERT INTO {} (ID, STATE, LOCK_DELAY) VALUES (0, 0, 0)", t.lease),
            format!("CREATE TABLE {} (ID INTEGER DEFAULT 0)", t.counter),
            format!("INSERT INTO {} (ID) VALUES (0)", t.counter),
        ]
    }

    /// Cheap probe whose failure means "table absent".
    fn lease_exists_probe(&self) -> String {
        format!("SELECT COUNT(*) FROM {}", self.tables().lease)
    }

    fn counter_exists_probe(&self) -> String {
        format!("SELECT COUNT(*) FROM {}", self.tables().counter)
    }

    fn select_lease(&self) -> String {
        format!("SELECT ID, STATE, LOCK_DELAY FROM {}", self.tables().lease)
    }

    fn select_counter(&self) -> String {
        format!("SELECT ID FROM {}", self.tables().counter)
    }

    /// CAS bump of the node-id counter: succeeds for exactly one claimant
    /// per round.
    fn bump_counter(&self, next: i64, current: i64) -> String {
        format!(
            "UPDATE {} SET ID = {} WHERE ID = {}",
            self.tables().counter,
            next,
            current
        )
    }

    /// Claim or renew: only the current holder, or anyone when the row is
    /// unheld, can satisfy the WHERE clause.
    fn claim_lease(&self, self_id: i64, epoch: i64, lease_millis: i64) -> String {
        format!(
            "UPDATE {} SET ID = {}, STATE = {}, LOCK_DELAY = {} WHERE ID = 0 OR ID = {}",
            self.tables().lease,
            self_id,
            epoch,
            lease_millis,
            self_id
        )
    }

    /// Steal from a presumed-dead holder. The extra STATE predicate refuses
    /// the steal when the holder renewed between our read and this write.
    fn steal_lease(
        &self,
        self_id: i64,
        epoch: i64,
        lease_millis: i64,
        observed_holder: i64,
        observed_epoch: i64,
    ) -> String {
        format!(
            "UPDATE {} SET ID = {}, STATE = {}, LOCK_DELAY = {} WHERE (ID = 0 OR ID = {}) AND STATE = {}",
            self.tables().lease,
            self_id,
            epoch,
            lease_millis,
            observed_holder,
            observed_epoch
        )
    }

    /// Best-effort relinquish; a non-holder matches no row.
    fn release_lease(&self, self_id: i64) -> String {
        format!(
            "UPDATE {} SET ID = 0 WHERE ID = {}",
            self.tables().lease,
            self_id
        )
    }

    /// Whether a successful claim must be confirmed by reading the row back.
    fn verify_after_claim(&self) -> bool {
        false
    }
}

/// Portable statements, trusted rows-affected.
pub struct GenericDialect {
    tables: TableNames,
}

impl Dialect for GenericDialect {
    fn tables(&self) -> &TableNames {
        &self.tables
    }
}

/// Oracle needs a read-only verification SELECT after claiming; the update
/// count alone is not trusted there.
pub struct OracleDialect {
    tables: TableNames,
}

impl Dialect for OracleDialect {
    fn tables(&self) -> &TableNames {
        &self.tables
    }

    fn verify_after_claim(&self) -> bool {
        true
    }
}

/// Build the dialect selected by configuration.
pub fn dialect_for(cfg: &DbLeaseConfig) -> Box<dyn Dialect> {
    let tables = TableNames::resolve(&cfg.lease_table, &cfg.counter_table, &cfg.cluster_name);
    match cfg.dialect {
        DialectKind::Generic => Box::new(GenericDialect { tables }),
        DialectKind::Oracle => Box::new(OracleDialect { tables }),
    }
}
