//! # rtscribe-settings
//!
//! Configuration management with layered sources.
//!
//! Settings are loaded from three layers (in priority order):
//! 1. **Compiled defaults**: [`RtScribeSettings::default()`]
//! 2. **User file**: `~/.rtscribe/settings.json` (deep-merged over defaults)
//! 3. **Environment variables**: `RTSCRIBE_*` overrides (highest priority)

#![deny(unsafe_code)]

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{deep_merge, load_settings, load_settings_from_path, settings_path};
pub use types::*;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn re_exports_work() {
        let _settings = RtScribeSettings::default();
        let _path = settings_path();
    }

    #[test]
    fn default_settings_are_valid() {
        let settings = RtScribeSettings::default();
        assert_eq!(settings.server.port, 5000);
        assert_eq!(settings.server.host, "0.0.0.0");
        assert_eq!(settings.transcription.default_model, "tiny");
        assert_eq!(settings.transcription.preferred_language, "en");
        assert_eq!(settings.rtc.negotiation_timeout_ms, 30_000);
        assert!(!settings.rtc.emit_status_events);
        assert!(settings.validate().is_ok());
    }
}
