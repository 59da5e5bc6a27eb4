//! Prometheus metrics recorder and `/metrics` rendering.

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};
use tracing::info;

/// Install the Prometheus metrics recorder (global).
///
/// Returns the handle used to render `/metrics`. Call once at startup
/// before any metric is recorded; a second call fails.
pub fn install_recorder() -> Result<PrometheusHandle, BuildError> {
    let handle = PrometheusBuilder::new().install_recorder()?;
    info!("prometheus metrics recorder installed");
    Ok(handle)
}

/// Render Prometheus text format from the installed recorder.
pub fn render(handle: &PrometheusHandle) -> String {
    handle.render()
}

/// `/infer` requests (counter, labels: outcome).
pub const HTTP_INFER_REQUESTS_TOTAL: &str = "http_infer_requests_total";
/// Bytes accepted by `/upload` (counter).
pub const HTTP_UPLOAD_BYTES_TOTAL: &str = "http_upload_bytes_total";
/// Connections closed by the reaper (counter).
pub const RTC_CONNECTIONS_REAPED_TOTAL: &str = "rtc_connections_reaped_total";
