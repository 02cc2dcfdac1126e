use std::collections::HashMap;
use std::future::Future;
use std::sync::Mutex;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::trace;

/// Delayed actions keyed by control surface. Scheduling under a key cancels
/// whatever was still waiting under it. Dropping the debouncer cancels all.
#[derive(Default)]
pub struct Debouncer {
    pending: Mutex<HashMap<String, CancellationToken>>,
}

impl Debouncer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Runs `action` after `delay` unless superseded or cancelled first.
    /// Must be called from within a tokio runtime.
    pub fn schedule<F>(&self, key: &str, delay: Duration, action: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let token = CancellationToken::new();
        {
            let mut pending = self.pending.lock().unwrap_or_else(|e| e.into_inner());
            if let Some(previous) = pending.insert(key.to_string(), token.clone()) {
                trace!(key, "superseding pending action");
                previous.cancel();
            }
        }

        let fired = token.clone();
        tokio::spawn(async move {
            tokio::select! {
                biased;
                () = token.cancelled() => {}
                () = tokio::time::sleep(delay) => {
                    // Once started the action runs to completion.
                    fired.cancel();
                    action.await;
                }
            }
        });
    }

    /// Returns whether an action was still waiting under `key`.
    pub fn cancel(&self, key: &str) -> bool {
        let mut pending = self.pending.lock().unwrap_or_else(|e| e.into_inner());
        match pending.remove(key) {
            Some(token) => {
                let was_waiting = !token.is_cancelled();
                token.cancel();
                was_waiting
            }
            None => false,
        }
    }

    pub fn cancel_all(&self) {
        let mut pending = self.pending.lock().unwrap_or_else(|e| e.into_inner());
        for (_, token) in pending.drain() {
            token.cancel();
        }
    }

    pub fn is_pending(&self, key: &str) -> bool {
        let pending = self.pending.lock().unwrap_or_else(|e| e.into_inner());
        pending.get(key).is_some_and(|t| !t.is_cancelled())
    }
}

impl Drop for Debouncer {
    fn drop(&mut self) {
        self.cancel_all();
    }
}
