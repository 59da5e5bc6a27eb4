//! Language selection policy.
//!
//! Whisper-style model identifiers ending in `.en` (`tiny.en`, `base.en`,
//! ...) are English-only: they ignore any requested language.

/// Language a model is locked to, if any.
pub fn locked_language(model: &str) -> Option<&'static str> {
    model.ends_with(".en").then_some("en")
}

/// Resolve the language for a new session.
///
/// A locked model wins; otherwise the caller's hint, otherwise the
/// preferred language captured when the session starts.
pub fn resolve_language(model: &str, hint: Option<&str>, preferred: &str) -> String {
    if let Some(locked) = locked_language(model) {
        return locked.to_string();
    }
    hint.map(str::trim)
        .filter(|h| !h.is_empty())
        .unwrap_or(preferred)
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn english_only_models_are_locked() {
        assert_eq!(locked_language("tiny.en"), Some("en"));
        assert_eq!(locked_language("medium.en"), Some("en"));
        assert_eq!(locked_language("tiny"), None);
        assert_eq!(locked_language("large-v3"), None);
    }

    #[test]
    fn locked_model_ignores_hint() {
        assert_eq!(resolve_language("base.en", Some("fr"), "de"), "en");
    }

    #[test]
    fn hint_beats_preferred() {
        assert_eq!(resolve_language("base", Some("fr"), "de"), "fr");
    }

    #[test]
    fn blank_hint_falls_back_to_preferred() {
        assert_eq!(resolve_language("base", None, "de"), "de");
        assert_eq!(resolve_language("base", Some("  "), "de"), "de");
    }
}
