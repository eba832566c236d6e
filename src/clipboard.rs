use std::time::{Duration, Instant};

use tracing::debug;

/// How long the copy control shows its confirmation before reverting.
pub(crate) const COPY_FEEDBACK: Duration = Duration::from_secs(2);

#[derive(Debug, thiserror::Error)]
pub(crate) enum ClipboardError {
    #[error("clipboard unavailable: {0}")]
    Unavailable(String),
    #[error("clipboard write failed: {0}")]
    Write(String),
}

pub(crate) trait Clipboard {
    fn set_text(&mut self, text: &str) -> Result<(), ClipboardError>;
}

/// System clipboard, connected on first use so headless sessions never touch it.
#[derive(Default)]
pub(crate) struct SystemClipboard {
    inner: Option<arboard::Clipboard>,
}

impl Clipboard for SystemClipboard {
    fn set_text(&mut self, text: &str) -> Result<(), ClipboardError> {
        if self.inner.is_none() {
            let cb = arboard::Clipboard::new()
                .map_err(|e| ClipboardError::Unavailable(e.to_string()))?;
            self.inner = Some(cb);
        }
        let Some(cb) = self.inner.as_mut() else {
            return Err(ClipboardError::Unavailable("not connected".to_string()));
        };
        cb.set_text(text.to_string())
            .map_err(|e| ClipboardError::Write(e.to_string()))?;
        debug!(chars = text.chars().count(), "copied completion to clipboard");
        Ok(())
    }
}

#[derive(Clone, Debug, Default)]
pub(crate) struct CopyControl {
    copied_at: Option<Instant>,
}

impl CopyControl {
    pub(crate) fn copy(
        &mut self,
        text: &str,
        clipboard: &mut dyn Clipboard,
        now: Instant,
    ) -> Result<(), ClipboardError> {
        clipboard.set_text(text)?;
        self.copied_at = Some(now);
        Ok(())
    }

    pub(crate) fn is_confirming(&self, now: Instant) -> bool {
        self.copied_at
            .is_some_and(|at| now.saturating_duration_since(at) < COPY_FEEDBACK)
    }

    pub(crate) fn label(&self, now: Instant) -> &'static str {
        if self.is_confirming(now) {
            "✓ copied"
        } else {
            "⧉ copy"
        }
    }
}

#[cfg(test)]
#[derive(Clone, Default)]
pub(crate) struct RecordingClipboard {
    pub(crate) writes: std::sync::Arc<std::sync::Mutex<Vec<String>>>,
    pub(crate) fail: bool,
}

#[cfg(test)]
impl RecordingClipboard {
    pub(crate) fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    pub(crate) fn writes(&self) -> Vec<String> {
        self.writes.lock().map(|w| w.clone()).unwrap_or_default()
    }
}

#[cfg(test)]
impl Clipboard for RecordingClipboard {
    fn set_text(&mut self, text: &str) -> Result<(), ClipboardError> {
        if self.fail {
            return Err(ClipboardError::Unavailable("no display".to_string()));
        }
        if let Ok(mut writes) = self.writes.lock() {
            writes.push(text.to_string());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn confirmation_reverts_after_two_seconds() {
        let mut clipboard = RecordingClipboard::default();
        let mut control = CopyControl::default();
        let t0 = Instant::now();
        assert_eq!(control.label(t0), "⧉ copy");

        control.copy("Buy now!", &mut clipboard, t0).expect("copy");
        assert_eq!(clipboard.writes(), vec!["Buy now!".to_string()]);
        assert!(control.is_confirming(t0 + Duration::from_millis(1999)));
        assert_eq!(control.label(t0 + Duration::from_secs(1)), "✓ copied");
        assert_eq!(control.label(t0 + COPY_FEEDBACK), "⧉ copy");
    }

    #[test]
    fn failed_copy_shows_no_confirmation() {
        let mut clipboard = RecordingClipboard::failing();
        let mut control = CopyControl::default();
        let now = Instant::now();
        assert!(control.copy("x", &mut clipboard, now).is_err());
        assert!(!control.is_confirming(now));
    }
}
