//! `RtScribeServer`: Axum control plane around the rtc engine.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::Router;
use axum::extract::DefaultBodyLimit;
use axum::http::HeaderValue;
use axum::routing::{get, post};
use metrics_exporter_prometheus::PrometheusHandle;
use rtscribe_rtc::{
    ChannelManager, ConnectionRegistry, PeerTransport, SessionContext, SignalingNegotiator,
};
use rtscribe_transcription::Transcriber;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use crate::config::ServerConfig;
use crate::handlers;
use crate::reaper;
use crate::shutdown::ShutdownCoordinator;
use crate::state::ServiceState;

/// Shared state accessible from Axum handlers.
#[derive(Clone)]
pub struct AppState {
    /// Offer handling.
    pub negotiator: SignalingNegotiator,
    /// Channel lifecycle; also exposes the registry.
    pub channels: ChannelManager,
    /// Everything a session needs to start.
    pub sessions: SessionContext,
    /// Selected model and language.
    pub service: Arc<ServiceState>,
    /// Server configuration.
    pub config: Arc<ServerConfig>,
    /// Shutdown coordinator.
    pub shutdown: Arc<ShutdownCoordinator>,
    /// When the server started.
    pub start_time: Instant,
    /// Prometheus handle, if a recorder was installed.
    pub metrics: Option<PrometheusHandle>,
}

/// The rtscribe server.
pub struct RtScribeServer {
    state: AppState,
}

impl RtScribeServer {
    /// Wire the engine from a transport and a transcriber.
    pub fn new(
        config: ServerConfig,
        transport: Arc<dyn PeerTransport>,
        transcriber: Arc<dyn Transcriber>,
    ) -> Self {
        let registry = Arc::new(ConnectionRegistry::new());
        let channels = ChannelManager::new(registry, config.send_timeout);
        let negotiator =
            SignalingNegotiator::new(transport, channels.clone(), config.negotiation_timeout);
        let sessions = SessionContext {
            channels: channels.clone(),
            transcriber,
            emit_status_events: config.emit_status_events,
            start_timeout: config.start_timeout,
        };
        let service = Arc::new(ServiceState::new(
            config.default_model.clone(),
            config.preferred_language.clone(),
        ));
        Self {
            state: AppState {
                negotiator,
                channels,
                sessions,
                service,
                config: Arc::new(config),
                shutdown: Arc::new(ShutdownCoordinator::new()),
                start_time: Instant::now(),
                metrics: None,
            },
        }
    }

    /// Serve `/metrics` from this handle.
    #[must_use]
    pub fn with_metrics(mut self, handle: PrometheusHandle) -> Self {
        self.state.metrics = Some(handle);
        self
    }

    /// Build the Axum router with all routes.
    pub fn router(&self) -> Router {
        let config = &self.state.config;
        Router::new()
            .route("/ping", get(handlers::ping))
            .route("/health", get(handlers::health))
            .route("/metrics", get(handlers::metrics))
            .route("/connections", get(handlers::connections))
            .route("/offer", post(handlers::offer))
            .route("/infer", post(handlers::infer))
            .route("/cancel", post(handlers::cancel))
            .route("/initmodel", post(handlers::init_model))
            .route("/upload", post(handlers::upload))
            .layer(DefaultBodyLimit::max(config.max_upload_bytes))
            .layer(TraceLayer::new_for_http())
            .layer(cors_layer(&config.cors_allowed_origins))
            .with_state(self.state.clone())
    }

    /// Connection registry.
    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        self.state.channels.registry()
    }

    /// Channel manager.
    pub fn channels(&self) -> &ChannelManager {
        &self.state.channels
    }

    /// Model selection state.
    pub fn service(&self) -> &Arc<ServiceState> {
        &self.state.service
    }

    /// Shutdown coordinator.
    pub fn shutdown(&self) -> &Arc<ShutdownCoordinator> {
        &self.state.shutdown
    }

    /// Server configuration.
    pub fn config(&self) -> &ServerConfig {
        &self.state.config
    }

    /// Bind, start the reaper and serve until shutdown.
    pub async fn start(self) -> std::io::Result<ServerHandle> {
        let listener = TcpListener::bind(self.state.config.bind_addr()).await?;
        let addr = listener.local_addr()?;
        let token = self.state.shutdown.token();
        let config = Arc::clone(&self.state.config);

        let reaper = reaper::start_reaper(
            self.state.channels.clone(),
            config.connect_timeout,
            config.reap_interval,
            token.clone(),
        );

        let router = self.router();
        let server = tokio::spawn(async move {
            let serve = axum::serve(listener, router)
                .with_graceful_shutdown(async move { token.cancelled().await });
            if let Err(e) = serve.await {
                error!(error = %e, "server stopped with error");
            }
        });

        info!(%addr, "rtscribe server listening");
        Ok(ServerHandle {
            addr,
            coordinator: Arc::clone(&self.state.shutdown),
            channels: self.state.channels,
            shutdown_timeout: config.shutdown_timeout,
            tasks: vec![server, reaper],
        })
    }
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    if origins.is_empty() || origins.iter().any(|o| o == "*") {
        return CorsLayer::permissive();
    }
    let origins: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|o| HeaderValue::from_str(o).ok())
        .collect();
    CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods(Any)
        .allow_headers(Any)
}

/// Running server. Dropping it leaves the server running; call
/// [`ServerHandle::shutdown`] to stop.
pub struct ServerHandle {
    addr: SocketAddr,
    coordinator: Arc<ShutdownCoordinator>,
    channels: ChannelManager,
    shutdown_timeout: Duration,
    tasks: Vec<JoinHandle<()>>,
}

impl ServerHandle {
    /// Bound address.
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// `http://` base URL of the bound address.
    pub fn url(&self) -> String {
        format!("http://{}", self.addr)
    }

    /// Stop accepting requests, cancel every session, close every
    /// connection and wait for background tasks.
    pub async fn shutdown(self) {
        info!("shutting down");
        self.coordinator.shutdown();
        let _ = self.coordinator.drain_connections(&self.channels).await;
        self.coordinator
            .graceful_shutdown(self.tasks, Some(self.shutdown_timeout))
            .await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use rtscribe_rtc::{LoopbackTransport, SessionDescription};
    use rtscribe_transcription::{
        ScriptedTranscriber, SegmentStream, TranscriptionError, TranscriptionRequest,
    };
    use serde_json::{Value, json};
    use tower::ServiceExt;

    fn make_server() -> RtScribeServer {
        RtScribeServer::new(
            ServerConfig::default(),
            Arc::new(LoopbackTransport::new()),
            Arc::new(ScriptedTranscriber::numbered(2)),
        )
    }

    async fn call(app: Router, req: Request<Body>) -> (StatusCode, Value) {
        let resp = app.oneshot(req).await.unwrap();
        let status = resp.status();
        let body = axum::body::to_bytes(resp.into_body(), 100_000).await.unwrap();
        let value = serde_json::from_slice(&body).unwrap_or(Value::Null);
        (status, value)
    }

    fn post_json(uri: &str, body: &Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    fn get_req(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    #[tokio::test]
    async fn ping_pongs() {
        let (status, body) = call(make_server().router(), get_req("/ping")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({ "ping": "pong" }));
    }

    #[tokio::test]
    async fn health_has_expected_fields() {
        let (status, body) = call(make_server().router(), get_req("/health")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
        assert_eq!(body["connections"], 0);
        assert_eq!(body["active_sessions"], 0);
    }

    #[tokio::test]
    async fn metrics_without_recorder_is_404() {
        let resp = make_server().router().oneshot(get_req("/metrics")).await.unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn offer_registers_connection() {
        let server = make_server();
        let (status, body) = call(
            server.router(),
            post_json("/offer", &json!({ "sdp": "v=0\r\n", "type": "offer" })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["type"], "answer");
        let id = body["connectionId"].as_str().unwrap();
        assert!(id.starts_with("conn_"));
        assert_eq!(server.registry().len(), 1);

        let (_, list) = call(server.router(), get_req("/connections")).await;
        assert_eq!(list[0]["connectionId"], id);
        assert_eq!(list[0]["state"], "connecting");
    }

    #[tokio::test]
    async fn bad_offer_type_is_400() {
        let server = make_server();
        let (status, body) = call(
            server.router(),
            post_json("/offer", &json!({ "sdp": "v=0", "type": "answer" })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"]["code"], "NEGOTIATION_ERROR");
        assert!(server.registry().is_empty());
    }

    #[tokio::test]
    async fn infer_without_connection_is_404() {
        let (status, body) = call(
            make_server().router(),
            post_json("/infer", &json!({ "filename": "a.wav" })),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"]["code"], "CONNECTION_NOT_FOUND");
    }

    #[tokio::test]
    async fn infer_rejects_path_traversal() {
        let (status, _) = call(
            make_server().router(),
            post_json("/infer", &json!({ "filename": "../secrets.wav" })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn infer_on_unopened_channel_times_out() {
        let config = ServerConfig {
            channel_ready_timeout: Duration::from_millis(20),
            ..ServerConfig::default()
        };
        let server = RtScribeServer::new(
            config,
            Arc::new(LoopbackTransport::new()),
            Arc::new(ScriptedTranscriber::numbered(1)),
        );
        let negotiated = server
            .state
            .negotiator
            .negotiate(SessionDescription::offer("v=0"))
            .await
            .unwrap();
        let (status, body) = call(
            server.router(),
            post_json(
                "/infer",
                &json!({ "filename": "a.wav", "connectionId": negotiated.connection_id }),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["error"]["code"], "CHANNEL_NOT_READY");
    }

    #[tokio::test]
    async fn cancel_unknown_connection_is_404() {
        let (status, _) = call(
            make_server().router(),
            post_json("/cancel", &json!({ "connectionId": "conn_missing" })),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn initmodel_updates_selection_and_loads() {
        let transcriber = Arc::new(ScriptedTranscriber::numbered(1));
        let server = RtScribeServer::new(
            ServerConfig::default(),
            Arc::new(LoopbackTransport::new()),
            transcriber.clone(),
        );
        let (status, body) = call(
            server.router(),
            post_json("/initmodel", &json!({ "model": "base.en", "language": "fr" })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({ "model": "base.en", "language": "fr" }));
        assert_eq!(server.service().snapshot().model, "base.en");
        assert_eq!(transcriber.loaded_models(), vec!["base.en".to_string()]);

        // same model again: no reload, language kept when omitted
        let (_, body) = call(server.router(), post_json("/initmodel", &json!({ "model": "base.en" }))).await;
        assert_eq!(body["language"], "fr");
        assert_eq!(transcriber.loaded_models().len(), 1);
    }

    /// Loads models with a per-model delay and records completion order.
    struct SlowLoader {
        loaded: parking_lot::Mutex<Vec<String>>,
    }

    #[async_trait::async_trait]
    impl Transcriber for SlowLoader {
        fn name(&self) -> &str {
            "slow-loader"
        }

        async fn load_model(&self, model: &str) -> Result<(), TranscriptionError> {
            let delay = if model == "small" { 50 } else { 5 };
            tokio::time::sleep(Duration::from_millis(delay)).await;
            self.loaded.lock().push(model.to_string());
            Ok(())
        }

        async fn transcribe(
            &self,
            _request: TranscriptionRequest,
        ) -> Result<SegmentStream, TranscriptionError> {
            Ok(Box::pin(futures::stream::empty()))
        }
    }

    #[tokio::test]
    async fn concurrent_initmodel_keeps_selection_in_step_with_backend() {
        let loader = Arc::new(SlowLoader {
            loaded: parking_lot::Mutex::new(Vec::new()),
        });
        let server = RtScribeServer::new(
            ServerConfig::default(),
            Arc::new(LoopbackTransport::new()),
            loader.clone(),
        );

        let ((a, _), (b, _)) = tokio::join!(
            call(server.router(), post_json("/initmodel", &json!({ "model": "small" }))),
            call(server.router(), post_json("/initmodel", &json!({ "model": "base" }))),
        );
        assert_eq!(a, StatusCode::OK);
        assert_eq!(b, StatusCode::OK);

        let loaded = loader.loaded.lock().clone();
        assert_eq!(loaded.len(), 2);
        assert_eq!(Some(&server.service().snapshot().model), loaded.last());
    }

    #[tokio::test]
    async fn initmodel_rejects_blank_model() {
        let (status, _) = call(
            make_server().router(),
            post_json("/initmodel", &json!({ "model": "  " })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn upload_stores_file() {
        let dir = tempfile::tempdir().unwrap();
        let config = ServerConfig {
            data_dir: dir.path().join("data"),
            ..ServerConfig::default()
        };
        let server = RtScribeServer::new(
            config,
            Arc::new(LoopbackTransport::new()),
            Arc::new(ScriptedTranscriber::numbered(1)),
        );

        let boundary = "XBOUNDARY";
        let body = format!(
            "--{boundary}\r\nContent-Disposition: form-data; name=\"file\"; filename=\"a.wav\"\r\n\
             Content-Type: audio/wav\r\n\r\nRIFFDATA\r\n--{boundary}--\r\n"
        );
        let req = Request::builder()
            .method("POST")
            .uri("/upload")
            .header("content-type", format!("multipart/form-data; boundary={boundary}"))
            .body(Body::from(body))
            .unwrap();
        let (status, json) = call(server.router(), req).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["filename"], "a.wav");
        let stored = std::fs::read(dir.path().join("data").join("a.wav")).unwrap();
        assert_eq!(stored, b"RIFFDATA");
    }

    #[tokio::test]
    async fn upload_rejects_traversal_filename() {
        let dir = tempfile::tempdir().unwrap();
        let config = ServerConfig {
            data_dir: dir.path().to_path_buf(),
            ..ServerConfig::default()
        };
        let server = RtScribeServer::new(
            config,
            Arc::new(LoopbackTransport::new()),
            Arc::new(ScriptedTranscriber::numbered(1)),
        );
        let boundary = "XBOUNDARY";
        let body = format!(
            "--{boundary}\r\nContent-Disposition: form-data; name=\"file\"; filename=\"../evil.wav\"\r\n\r\nx\r\n--{boundary}--\r\n"
        );
        let req = Request::builder()
            .method("POST")
            .uri("/upload")
            .header("content-type", format!("multipart/form-data; boundary={boundary}"))
            .body(Body::from(body))
            .unwrap();
        let (status, _) = call(server.router(), req).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[test]
    fn cors_layer_accepts_lists() {
        let _ = cors_layer(&["*".into()]);
        let _ = cors_layer(&["http://localhost:3000".into()]);
        let _ = cors_layer(&[]);
    }

    #[tokio::test]
    async fn unknown_route_returns_404() {
        let resp = make_server().router().oneshot(get_req("/nonexistent")).await.unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }
}
