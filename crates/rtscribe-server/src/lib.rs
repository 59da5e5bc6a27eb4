//! # rtscribe-server
//!
//! Axum HTTP control plane around the rtc engine.
//!
//! - Signaling (`/offer`) and session control (`/infer`, `/cancel`)
//! - Model selection (`/initmodel`) and audio uploads (`/upload`)
//! - Health, connection listing and Prometheus metrics
//! - Stale-connection reaper and graceful shutdown via `CancellationToken`

#![deny(unsafe_code)]

pub mod config;
pub mod errors;
pub mod handlers;
pub mod health;
pub mod metrics;
pub mod reaper;
pub mod server;
pub mod shutdown;
pub mod state;

pub use config::ServerConfig;
pub use errors::ApiError;
pub use server::{AppState, RtScribeServer, ServerHandle};
pub use shutdown::ShutdownCoordinator;
pub use state::{ModelSelection, ServiceState};
