//! Mutable service state shared by handlers.

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, MutexGuard};

/// Active model and preferred language.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelSelection {
    /// Model identifier passed to the transcriber.
    pub model: String,
    /// Language used when the model and the caller leave it open.
    pub language: String,
}

/// Model selection behind a lock. Sessions capture a snapshot at start, so
/// `/initmodel` never changes a running session.
///
/// Switching models spans an await on the backend; callers hold
/// [`ServiceState::lock_switch`] from the snapshot through `update` so the
/// recorded selection always names the model loaded last.
#[derive(Debug)]
pub struct ServiceState {
    selection: RwLock<ModelSelection>,
    switch: Mutex<()>,
}

impl ServiceState {
    /// Create with an initial selection.
    pub fn new(model: impl Into<String>, language: impl Into<String>) -> Self {
        Self {
            selection: RwLock::new(ModelSelection {
                model: model.into(),
                language: language.into(),
            }),
            switch: Mutex::new(()),
        }
    }

    /// Serialize model switches.
    pub async fn lock_switch(&self) -> MutexGuard<'_, ()> {
        self.switch.lock().await
    }

    /// Current selection.
    pub fn snapshot(&self) -> ModelSelection {
        self.selection.read().clone()
    }

    /// Replace the selection. Returns the previous one.
    pub fn update(&self, next: ModelSelection) -> ModelSelection {
        std::mem::replace(&mut *self.selection.write(), next)
    }
}
