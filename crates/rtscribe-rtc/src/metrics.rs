//! Metric names recorded by the engine.

// Metric name constants to avoid typos across crates.

/// Connections registered total (counter).
pub const RTC_CONNECTIONS_TOTAL: &str = "rtc_connections_total";
/// Registered connections (gauge).
pub const RTC_CONNECTIONS_ACTIVE: &str = "rtc_connections_active";
/// Failed negotiations total (counter, labels: reason).
pub const RTC_NEGOTIATION_FAILURES_TOTAL: &str = "rtc_negotiation_failures_total";
/// Segments delivered total (counter).
pub const RTC_SEGMENTS_SENT_TOTAL: &str = "rtc_segments_sent_total";
/// Sessions reaching a terminal state (counter, labels: outcome).
pub const RTC_SESSIONS_TOTAL: &str = "rtc_sessions_total";
/// Send+flush duration seconds (histogram).
pub const RTC_SEND_DURATION_SECONDS: &str = "rtc_send_duration_seconds";
