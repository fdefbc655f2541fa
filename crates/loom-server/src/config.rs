//! Router configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Configuration for a [`Loom`](crate::router::Loom) router.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoomConfig {
    /// HTTP path of the `WebSocket` upgrade route (default `"/ws"`).
    pub path: String,
    /// Capacity of each client's outbound queue.
    pub queue_depth: usize,
    /// Seconds between keepalive probes.
    pub keepalive_interval_secs: u64,
    /// Longest accepted inbound line, in bytes.
    pub max_line_bytes: usize,
}

impl LoomConfig {
    /// Keepalive interval as a `Duration`.
    pub fn keepalive_interval(&self) -> Duration {
        Duration::from_secs(self.keepalive_interval_secs.max(1))
    }
}

impl Default for LoomConfig {
    fn default() -> Self {
        Self {
            path: "/ws".into(),
            queue_depth: 128,
            keepalive_interval_secs: 60,
            max_line_bytes: 1024 * 1024, // 1 MiB
        }
    }
}
