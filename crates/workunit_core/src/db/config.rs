use std::time::Duration;

/// Connection settings applied when a store opens its database.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreConfig {
    /// How long SQLite waits on a locked database before failing.
    pub busy_timeout: Duration,
    /// Enforce `REFERENCES` constraints.
    pub foreign_keys: bool,
    /// VM instructions between cancellation checks of a running statement.
    pub progress_interval_ops: u32,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            busy_timeout: Duration::from_secs(5),
            foreign_keys: true,
            progress_interval_ops: 1_000,
        }
    }
}
