//! Cue presentation timer: the single "visible cue" on a follower screen,
//! cleared automatically after the cue's display duration.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::model::Cue;

/// Fallback display duration when a cue carries none (or zero). Callers pick
/// their own policy via [`CueTimer::new`]; this is just the usual one.
pub const DEFAULT_CUE_MS: u64 = 6_000;

#[derive(Clone)]
pub struct CueTimer {
    inner: Arc<Inner>,
}

struct Inner {
    visible: watch::Sender<Option<Cue>>,
    pending: Mutex<Option<JoinHandle<()>>>,
    default_ms: u64,
}

impl CueTimer {
    pub fn new(default_ms: u64) -> Self {
        let (visible, _) = watch::channel(None);
        Self {
            inner: Arc::new(Inner {
                visible,
                pending: Mutex::new(None),
                default_ms,
            }),
        }
    }

    pub fn watch(&self) -> watch::Receiver<Option<Cue>> {
        self.inner.visible.subscribe()
    }

    pub fn current(&self) -> Option<Cue> {
        self.inner.visible.borrow().clone()
    }

    /// Feed an incoming cue. Empty text clears the display immediately;
    /// anything else shows now and schedules the automatic clear. At most
    /// one clear is pending at a time; a newer cue restarts the cycle.
    pub fn on_cue(&self, cue: Cue) {
        self.cancel_pending();
        if cue.text.is_empty() {
            self.inner.visible.send_replace(None);
            return;
        }

        let ms = match cue.duration {
            Some(d) if d > 0 => d,
            _ => self.inner.default_ms,
        };
        let stamp = cue.timestamp;
        self.inner.visible.send_replace(Some(cue));

        let inner = Arc::clone(&self.inner);
        let handle = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(ms)).await;
            // only clear the cue this timer was armed for
            inner.visible.send_if_modified(|v| match v {
                Some(c) if c.timestamp == stamp => {
                    *v = None;
                    true
                }
                _ => false,
            });
        });
        *self.lock_pending() = Some(handle);
    }

    /// Clear the display and drop any pending expiry.
    pub fn clear(&self) {
        self.cancel_pending();
        self.inner.visible.send_replace(None);
    }

    fn cancel_pending(&self) {
        if let Some(handle) = self.lock_pending().take() {
            handle.abort();
        }
    }

    fn lock_pending(&self) -> std::sync::MutexGuard<'_, Option<JoinHandle<()>>> {
        self.inner.pending.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Default for CueTimer {
    fn default() -> Self {
        Self::new(DEFAULT_CUE_MS)
    }
}
