use snowflake::SnowflakeIdBucket;
use std::sync::Mutex;

/// Snowflake ID generator for alert and anomaly records.
///
/// Owned by whichever component mints IDs; there is no process-wide instance.
pub struct IdGenerator {
    bucket: Mutex<SnowflakeIdBucket>,
}

impl IdGenerator {
    /// `machine_id`: machine identifier (0-31)
    /// `node_id`: node identifier (0-31)
    pub fn new(machine_id: i32, node_id: i32) -> Self {
        Self {
            bucket: Mutex::new(SnowflakeIdBucket::new(machine_id, node_id)),
        }
    }

    /// Generates a Snowflake ID in string form.
    pub fn next_id(&self) -> String {
        let mut bucket = self
            .bucket
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        bucket.get_id().to_string()
    }
}

impl Default for IdGenerator {
    fn default() -> Self {
        Self::new(1, 1)
    }
}

impl std::fmt::Debug for IdGenerator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IdGenerator").finish_non_exhaustive()
    }
}
