//! Settings type definitions.
//!
//! All types use `#[serde(rename_all = "camelCase")]` and implement
//! [`Default`] with production values. Every struct is `#[serde(default)]`
//! so partial JSON files deserialize cleanly.

mod rtc;
mod server;
mod transcription;

pub use rtc::*;
pub use server::*;
pub use transcription::*;

use serde::{Deserialize, Serialize};

use crate::errors::{Result, SettingsError};

/// Root settings type.
///
/// ```json
/// {
///   "server": { "port": 5000 },
///   "rtc": { "sendTimeoutMs": 5000 },
///   "transcription": { "defaultModel": "base.en" }
/// }
/// ```
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RtScribeSettings {
    /// HTTP control plane settings.
    pub server: ServerSettings,
    /// Peer connection and streaming settings.
    pub rtc: RtcSettings,
    /// Transcription backend settings.
    pub transcription: TranscriptionSettings,
    /// Logging configuration.
    pub logging: LoggingSettings,
}

impl RtScribeSettings {
    /// Reject values that would make the engine hang or misbehave.
    pub fn validate(&self) -> Result<()> {
        let rtc = &self.rtc;
        for (name, value) in [
            ("rtc.negotiationTimeoutMs", rtc.negotiation_timeout_ms),
            ("rtc.sendTimeoutMs", rtc.send_timeout_ms),
            ("rtc.channelReadyTimeoutMs", rtc.channel_ready_timeout_ms),
            ("rtc.connectTimeoutMs", rtc.connect_timeout_ms),
            ("rtc.reapIntervalMs", rtc.reap_interval_ms),
            ("transcription.startTimeoutMs", self.transcription.start_timeout_ms),
        ] {
            if value == 0 {
                return Err(SettingsError::InvalidValue(format!("{name} must be > 0")));
            }
        }
        if rtc.event_buffer == 0 {
            return Err(SettingsError::InvalidValue(
                "rtc.eventBuffer must be > 0".into(),
            ));
        }
        if self.transcription.default_model.trim().is_empty() {
            return Err(SettingsError::InvalidValue(
                "transcription.defaultModel must not be empty".into(),
            ));
        }
        Ok(())
    }
}
