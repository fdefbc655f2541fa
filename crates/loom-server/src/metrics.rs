//! Metric names recorded through the `metrics` facade.
//!
//! Nothing is exported unless the embedding application installs a recorder.

/// Connections accepted (counter).
pub const CONNECTIONS_TOTAL: &str = "loom_connections_total";
/// Connections closed (counter).
pub const DISCONNECTIONS_TOTAL: &str = "loom_disconnections_total";
/// Currently registered connections (gauge).
pub const CONNECTIONS_ACTIVE: &str = "loom_connections_active";
/// Connection lifetime in seconds (histogram).
pub const CONNECTION_DURATION_SECONDS: &str = "loom_connection_duration_seconds";
/// Requests dispatched to a handler (counter, labels: method).
pub const REQUESTS_TOTAL: &str = "loom_requests_total";
/// Replies carrying an error (counter, labels: method).
pub const REQUEST_ERRORS_TOTAL: &str = "loom_request_errors_total";
/// Handler run time in seconds (histogram, labels: method).
pub const REQUEST_DURATION_SECONDS: &str = "loom_request_duration_seconds";
/// Inbound lines rejected before dispatch (counter, labels: reason).
pub const PROTOCOL_ERRORS_TOTAL: &str = "loom_protocol_errors_total";
/// Outbound messages dropped on a full queue (counter).
pub const MESSAGES_DROPPED_TOTAL: &str = "loom_messages_dropped_total";
/// Broadcast messages delivered to a queue (counter).
pub const BROADCAST_DELIVERIES_TOTAL: &str = "loom_broadcast_deliveries_total";
