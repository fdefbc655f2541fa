//! `/health` endpoint body.

use std::time::Instant;

use serde::Serialize;

/// Health check response body.
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    /// `"ok"` while serving, `"shutting_down"` once shutdown began.
    pub status: String,
    /// Seconds since the router was created.
    pub uptime_secs: u64,
    /// Currently registered connections.
    pub connections: usize,
}

/// Build a health response from live counters.
pub fn health_check(start_time: Instant, connections: usize, shutting_down: bool) -> HealthResponse {
    HealthResponse {
        status: if shutting_down { "shutting_down" } else { "ok" }.into(),
        uptime_secs: start_time.elapsed().as_secs(),
        connections,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_is_ok() {
        let resp = health_check(Instant::now(), 0, false);
        assert_eq!(resp.status, "ok");
        assert!(resp.uptime_secs < 2);
    }

    #[test]
    fn status_reflects_shutdown() {
        let resp = health_check(Instant::now(), 3, true);
        assert_eq!(resp.status, "shutting_down");
        assert_eq!(resp.connections, 3);
    }

    #[test]
    fn uptime_increases() {
        let start = Instant::now()
            .checked_sub(std::time::Duration::from_secs(60))
            .unwrap();
        let resp = health_check(start, 0, false);
        assert!(resp.uptime_secs >= 59);
    }

    #[test]
    fn serializes_expected_fields() {
        let json = serde_json::to_value(health_check(Instant::now(), 5, false)).unwrap();
        assert_eq!(json["status"], "ok");
        assert_eq!(json["connections"], 5);
        assert!(json["uptime_secs"].is_number());
    }
}
