//! # rtscribe
//!
//! Server binary: loads settings, installs logging and metrics, wires the
//! WebRTC transport and the sidecar transcriber into the control plane and
//! serves until ctrl-c.

#![deny(unsafe_code)]

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use rtscribe_core::logging::{LogFormat, init_subscriber};
use rtscribe_rtc::{WebRtcConfig, WebRtcTransport};
use rtscribe_server::{RtScribeServer, ServerConfig};
use rtscribe_settings::{RtScribeSettings, RtcSettings};
use rtscribe_transcription::SidecarTranscriber;
use webrtc::ice_transport::ice_server::RTCIceServer;

/// Real-time transcription server.
#[derive(Parser, Debug)]
#[command(name = "rtscribe", about = "WebRTC streaming transcription server")]
struct Cli {
    /// Host to bind (overrides settings).
    #[arg(long)]
    host: Option<String>,

    /// Port to bind, 0 for auto-assign (overrides settings).
    #[arg(long)]
    port: Option<u16>,

    /// Path to the settings file (default `~/.rtscribe/settings.json`).
    #[arg(long)]
    settings: Option<PathBuf>,

    /// Directory for uploaded audio (overrides settings).
    #[arg(long)]
    data_dir: Option<PathBuf>,
}

fn load(args: &Cli) -> Result<RtScribeSettings> {
    let path = args
        .settings
        .clone()
        .unwrap_or_else(rtscribe_settings::settings_path);
    rtscribe_settings::load_settings_from_path(&path)
        .with_context(|| format!("Failed to load settings from {}", path.display()))
}

fn server_config(args: &Cli, settings: &RtScribeSettings) -> ServerConfig {
    let mut config = ServerConfig::from_settings(settings);
    if let Some(host) = &args.host {
        config.host.clone_from(host);
    }
    if let Some(port) = args.port {
        config.port = port;
    }
    if let Some(dir) = &args.data_dir {
        config.data_dir.clone_from(dir);
    }
    config
}

fn webrtc_config(rtc: &RtcSettings) -> WebRtcConfig {
    WebRtcConfig {
        ice_servers: rtc
            .ice_servers
            .iter()
            .filter(|s| !s.urls.is_empty())
            .map(|s| RTCIceServer {
                urls: s.urls.clone(),
                username: s.username.clone(),
                credential: s.credential.clone(),
                ..Default::default()
            })
            .collect(),
        ..WebRtcConfig::default()
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Cli::parse();
    let settings = load(&args)?;

    let format = LogFormat::parse(&settings.logging.format).unwrap_or_default();
    init_subscriber(&settings.logging.level, format);

    let metrics = rtscribe_server::metrics::install_recorder()
        .context("Failed to install metrics recorder")?;

    let transport = WebRtcTransport::new(webrtc_config(&settings.rtc))
        .context("Failed to initialize WebRTC")?;
    let transcription = &settings.transcription;
    let transcriber = SidecarTranscriber::new(
        transcription.base_url.clone(),
        transcription.connect_timeout(),
        transcription.segment_timeout(),
    )
    .context("Failed to build transcription client")?;
    tracing::info!(sidecar = transcriber.base_url(), model = %transcription.default_model, "transcriber configured");

    let server = RtScribeServer::new(
        server_config(&args, &settings),
        Arc::new(transport),
        Arc::new(transcriber),
    )
    .with_metrics(metrics);

    let handle = server.start().await.context("Failed to bind server")?;
    tracing::info!("rtscribe listening on {}", handle.url());

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for ctrl-c")?;

    tracing::info!("Shutting down...");
    handle.shutdown().await;
    tracing::info!("Shutdown complete");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rtscribe_settings::IceServerSettings;

    #[test]
    fn cli_defaults_defer_to_settings() {
        let cli = Cli::parse_from(["rtscribe"]);
        assert!(cli.host.is_none());
        assert!(cli.port.is_none());
        let config = server_config(&cli, &RtScribeSettings::default());
        assert_eq!(config.port, 5000);
        assert_eq!(config.host, "0.0.0.0");
    }

    #[test]
    fn cli_flags_override_settings() {
        let cli = Cli::parse_from([
            "rtscribe",
            "--host",
            "127.0.0.1",
            "--port",
            "0",
            "--data-dir",
            "/tmp/audio",
        ]);
        let config = server_config(&cli, &RtScribeSettings::default());
        assert_eq!(config.bind_addr(), "127.0.0.1:0");
        assert_eq!(config.data_dir, PathBuf::from("/tmp/audio"));
    }

    #[test]
    fn settings_file_is_loaded() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, r#"{"rtc":{"sendTimeoutMs":1234}}"#).unwrap();
        let cli = Cli::parse_from(["rtscribe", "--settings", path.to_str().unwrap()]);
        let settings = load(&cli).unwrap();
        assert_eq!(settings.rtc.send_timeout_ms, 1234);
    }

    #[test]
    fn ice_servers_map_with_credentials() {
        let rtc = RtcSettings {
            ice_servers: vec![
                IceServerSettings {
                    urls: vec!["turn:turn.example.com:3478".into()],
                    username: "user".into(),
                    credential: "secret".into(),
                },
                IceServerSettings::default(),
            ],
            ..RtcSettings::default()
        };
        let config = webrtc_config(&rtc);
        assert_eq!(config.ice_servers.len(), 1);
        assert_eq!(config.ice_servers[0].username, "user");
        assert_eq!(config.ice_servers[0].credential, "secret");
    }

    #[tokio::test]
    async fn server_boots_with_real_transport() {
        let transport = WebRtcTransport::new(WebRtcConfig {
            ice_servers: Vec::new(),
            ..WebRtcConfig::default()
        })
        .unwrap();
        let transcriber = SidecarTranscriber::new(
            "http://127.0.0.1:9",
            std::time::Duration::from_millis(100),
            std::time::Duration::from_millis(100),
        )
        .unwrap();
        let server = RtScribeServer::new(
            ServerConfig::default(),
            Arc::new(transport),
            Arc::new(transcriber),
        );
        let handle = server.start().await.unwrap();

        let resp = reqwest::get(format!("{}/health", handle.url())).await.unwrap();
        assert!(resp.status().is_success());
        let body: serde_json::Value = resp.json().await.unwrap();
        assert_eq!(body["status"], "ok");

        handle.shutdown().await;
    }
}
