//! Configuration surface for the lease strategies
//!
//! Plain serde-deserializable structs with documented defaults. Parsing the
//! surrounding application's configuration files is the caller's business;
//! these structs are the recognized option set.

use serde::{Deserialize, Serialize};

/// Which SQL dialect renders the lease statements.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DialectKind {
    /// Portable SQL, judged purely by rows-affected
    #[default]
    Generic,
    /// Adds a read-only verification SELECT after a successful claim
    Oracle,
}

/// Configuration for the database-backed lease.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DbLeaseConfig {
    /// Connection URL; the scheme selects the backend (postgres:, mysql:, sqlite:)
    pub url: String,
    /// Username merged into the URL before connecting
    #[serde(default)]
    pub user: String,
    /// Password merged into the URL before connecting
    #[serde(default)]
    pub password: String,
    /// Lease table name
    #[serde(default = "default_lease_table")]
    pub lease_table: String,
    /// Node-id counter table name
    #[serde(default = "default_counter_table")]
    pub counter_table: String,
    /// Cluster name; when non-empty it suffixes both table names so that
    /// several independent clusters can share one database
    #[serde(default)]
    pub cluster_name: String,
    /// SQL dialect
    #[serde(default)]
    pub dialect: DialectKind,
    /// Keep validated connections for reuse instead of reconnecting per call
    #[serde(default = "default_true")]
    pub cache_connections: bool,
    /// Upper bound on the ping used to revalidate a cached connection
    #[serde(default = "default_validity_timeout_ms")]
    pub validity_timeout_ms: u64,
    /// Renewal interval this node declares in the lease row, in milliseconds.
    /// Peers presume this node dead after missing two of these intervals.
    #[serde(default = "default_lock_delay_ms")]
    pub lock_delay_ms: i64,
}

fn default_lease_table() -> String {
    "KARAF_LOCK".to_string()
}

fn default_counter_table() -> String {
    "KARAF_NODE_ID".to_string()
}

fn default_true() -> bool {
    true
}

fn default_validity_timeout_ms() -> u64 {
    5000
}

fn default_lock_delay_ms() -> i64 {
    1000
}

impl DbLeaseConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            user: String::new(),
            password: String::new(),
            lease_table: default_lease_table(),
            counter_table: default_counter_table(),
            cluster_name: String::new(),
            dialect: DialectKind::default(),
            cache_connections: true,
            validity_timeout_ms: default_validity_timeout_ms(),
            lock_delay_ms: default_lock_delay_ms(),
        }
    }
}

/// Configuration for the single-host file lease.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FileLeaseConfig {
    /// Path of the lock file; created when absent
    #[serde(default = "default_lock_path")]
    pub path: std::path::PathBuf,
}

impl Default for FileLeaseConfig {
    fn default() -> Self {
        Self {
            path: default_lock_path(),
        }
    }
}

fn default_lock_path() -> std::path::PathBuf {
    // Relative to the working directory of the process.
    std::path::PathBuf::from("lock")
}
