//! Microphone permission and scoped audio input handles.

use crate::error::PermissionError;
use async_trait::async_trait;
use std::fmt;
use tracing::debug;

/// Requests audio-only input from the host.
///
/// Called at most once per session attempt, and only after registration has
/// produced a credential so that sessions which cannot start never prompt the
/// user. Denial is reported, never retried.
#[async_trait]
pub trait MediaPermissionGate: Send + Sync {
    async fn acquire_microphone(&self) -> Result<AudioInputHandle, PermissionError>;
}

type ReleaseFn = Box<dyn FnOnce() + Send>;

/// An open microphone stream.
///
/// The stream is released exactly once: explicitly through
/// [`AudioInputHandle::release`], or when the handle is dropped.
pub struct AudioInputHandle {
    label: String,
    release: Option<ReleaseFn>,
}

impl AudioInputHandle {
    pub fn new(label: impl Into<String>, release: impl FnOnce() + Send + 'static) -> Self {
        Self {
            label: label.into(),
            release: Some(Box::new(release)),
        }
    }

    /// Device label reported by the host.
    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn release(mut self) {
        self.release_now();
    }

    fn release_now(&mut self) {
        if let Some(release) = self.release.take() {
            debug!(device = %self.label, "releasing audio input");
            release();
        }
    }
}

impl Drop for AudioInputHandle {
    fn drop(&mut self) {
        self.release_now();
    }
}

impl fmt::Debug for AudioInputHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AudioInputHandle")
            .field("label", &self.label)
            .field("released", &self.release.is_none())
            .finish()
    }
}
