use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Network endpoint the HTTP surface binds to.
#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind_address: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: String::from("127.0.0.1"),
            port: 5555,
        }
    }
}

#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Upper bound of concurrently open sessions.
    pub max_sessions: usize,
    /// Idle time after which a session is terminated. `0` disables expiration.
    pub session_timeout_secs: u64,
    /// Period of the background sweep.
    pub sweep_interval_secs: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_sessions: 1024,
            session_timeout_secs: 3600,
            sweep_interval_secs: 10,
        }
    }
}

#[derive(Debug, PartialEq, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TransactionConfig {
    /// Longest time a transaction may stay open before the sweep rolls it back. `0` = no limit.
    pub transaction_timeout_secs: u64,
}

#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChangeCaptureConfig {
    /// Capacity of every subscription's delivery queue.
    pub queue_capacity: usize,
    /// How long a commit waits for queue space before evicting the subscriber.
    pub slow_consumer_timeout_ms: u64,
}

impl Default for ChangeCaptureConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 256,
            slow_consumer_timeout_ms: 5000,
        }
    }
}

#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TaskConfig {
    /// Finished, failed and cancelled tasks kept for status queries. Oldest go first.
    pub max_finished_tasks: usize,
}

impl Default for TaskConfig {
    fn default() -> Self {
        Self {
            max_finished_tasks: 1000,
        }
    }
}

#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TrafficRecordingConfig {
    pub max_records: usize,
    /// Age after which records are evicted. `0` keeps records until `max_records` is hit.
    pub retention_secs: u64,
    /// Directory receiving exported recordings (served back through the file endpoints).
    pub export_directory: PathBuf,
}

impl Default for TrafficRecordingConfig {
    fn default() -> Self {
        Self {
            max_records: 100_000,
            retention_secs: 0,
            export_directory: PathBuf::from("./exports"),
        }
    }
}
