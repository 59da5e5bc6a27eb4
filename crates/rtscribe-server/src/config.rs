//! Server configuration.

use std::path::PathBuf;
use std::time::Duration;

use rtscribe_settings::RtScribeSettings;

/// Runtime configuration for [`RtScribeServer`](crate::server::RtScribeServer).
#[derive(Clone, Debug)]
pub struct ServerConfig {
    /// Host to bind (default `"127.0.0.1"`).
    pub host: String,
    /// Port to bind (default `0` for auto-assign).
    pub port: u16,
    /// Directory uploads are written to and `/infer` reads from.
    pub data_dir: PathBuf,
    /// Allowed CORS origins; `"*"` allows any.
    pub cors_allowed_origins: Vec<String>,
    /// Maximum request body size for `/upload`.
    pub max_upload_bytes: usize,
    /// Upper bound on one offer/answer exchange.
    pub negotiation_timeout: Duration,
    /// Upper bound on one send+flush.
    pub send_timeout: Duration,
    /// How long `/infer` waits for the channel to open.
    pub channel_ready_timeout: Duration,
    /// Connections still connecting after this long are reaped.
    pub connect_timeout: Duration,
    /// Reaper sweep interval.
    pub reap_interval: Duration,
    /// How long the transcription backend may take to accept a job.
    pub start_timeout: Duration,
    /// Send a terminal status message after the last segment.
    pub emit_status_events: bool,
    /// Model selected at startup.
    pub default_model: String,
    /// Language used when neither the model nor the caller pins one.
    pub preferred_language: String,
    /// Grace period for in-flight work on shutdown.
    pub shutdown_timeout: Duration,
}

impl ServerConfig {
    /// Derive the server configuration from loaded settings.
    pub fn from_settings(settings: &RtScribeSettings) -> Self {
        let rtc = &settings.rtc;
        Self {
            host: settings.server.host.clone(),
            port: settings.server.port,
            data_dir: PathBuf::from(&settings.server.data_dir),
            cors_allowed_origins: settings.server.cors_allowed_origins.clone(),
            max_upload_bytes: settings.server.max_upload_bytes,
            negotiation_timeout: rtc.negotiation_timeout(),
            send_timeout: rtc.send_timeout(),
            channel_ready_timeout: rtc.channel_ready_timeout(),
            connect_timeout: rtc.connect_timeout(),
            reap_interval: rtc.reap_interval(),
            emit_status_events: rtc.emit_status_events,
            start_timeout: settings.transcription.start_timeout(),
            default_model: settings.transcription.default_model.clone(),
            preferred_language: settings.transcription.preferred_language.clone(),
            ..Self::default()
        }
    }

    /// `host:port` bind address.
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 0,
            data_dir: PathBuf::from("data"),
            cors_allowed_origins: vec!["*".into()],
            max_upload_bytes: 100 * 1024 * 1024, // 100 MB
            negotiation_timeout: Duration::from_secs(30),
            send_timeout: Duration::from_secs(10),
            channel_ready_timeout: Duration::from_secs(10),
            connect_timeout: Duration::from_secs(60),
            reap_interval: Duration::from_secs(5),
            start_timeout: Duration::from_secs(30),
            emit_status_events: false,
            default_model: "tiny".into(),
            preferred_language: "en".into(),
            shutdown_timeout: Duration::from_secs(10),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_binds_loopback_on_any_port() {
        let cfg = ServerConfig::default();
        assert_eq!(cfg.bind_addr(), "127.0.0.1:0");
    }

    #[test]
    fn from_default_settings() {
        let cfg = ServerConfig::from_settings(&RtScribeSettings::default());
        assert_eq!(cfg.port, 5000);
        assert_eq!(cfg.host, "0.0.0.0");
        assert_eq!(cfg.data_dir, PathBuf::from("data"));
        assert_eq!(cfg.negotiation_timeout, Duration::from_secs(30));
        assert_eq!(cfg.default_model, "tiny");
        assert!(!cfg.emit_status_events);
    }

    #[test]
    fn settings_values_flow_through() {
        let mut settings = RtScribeSettings::default();
        settings.server.port = 8123;
        settings.rtc.send_timeout_ms = 250;
        settings.rtc.emit_status_events = true;
        settings.transcription.start_timeout_ms = 1500;
        settings.transcription.default_model = "base.en".into();
        let cfg = ServerConfig::from_settings(&settings);
        assert_eq!(cfg.port, 8123);
        assert_eq!(cfg.send_timeout, Duration::from_millis(250));
        assert!(cfg.emit_status_events);
        assert_eq!(cfg.start_timeout, Duration::from_millis(1500));
        assert_eq!(cfg.default_model, "base.en");
    }
}
