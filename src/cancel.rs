use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::prober::transport::Interrupter;

/// Shared stop request for the probe loop.
///
/// The loop only looks at the flag at its checkpoints. A read blocked inside
/// the transport is released by the armed [`Interrupter`], never by polling.
#[derive(Clone, Default)]
pub struct CancelToken {
    inner: Arc<Inner>,
}

#[derive(Default)]
struct Inner {
    cancelled: AtomicBool,
    interrupter: Mutex<Option<Interrupter>>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.inner.cancelled.store(true, Ordering::SeqCst);
        if let Some(interrupter) = self.slot().as_ref() {
            interrupter.interrupt();
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::SeqCst)
    }

    /// Installs the interrupter of the connection now in use. If cancellation
    /// already happened it fires straight away.
    pub fn arm(&self, interrupter: Interrupter) {
        *self.slot() = Some(interrupter);
        if self.is_cancelled() {
            if let Some(interrupter) = self.slot().as_ref() {
                interrupter.interrupt();
            }
        }
    }

    pub fn disarm(&self) {
        self.slot().take();
    }

    fn slot(&self) -> MutexGuard<'_, Option<Interrupter>> {
        self.inner
            .interrupter
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn counting() -> (Interrupter, Arc<AtomicUsize>) {
        let hits = Arc::new(AtomicUsize::new(0));
        let h = hits.clone();
        let interrupter = Interrupter::new(move || {
            h.fetch_add(1, Ordering::SeqCst);
        });
        (interrupter, hits)
    }

    #[test]
    fn cancel_fires_armed_interrupter() {
        let token = CancelToken::new();
        let (interrupter, hits) = counting();
        token.arm(interrupter);
        assert!(!token.is_cancelled());
        assert_eq!(hits.load(Ordering::SeqCst), 0);

        token.clone().cancel();
        assert!(token.is_cancelled());
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn arming_after_cancel_fires_immediately() {
        let token = CancelToken::new();
        token.cancel();
        let (interrupter, hits) = counting();
        token.arm(interrupter);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn disarmed_token_only_sets_flag() {
        let token = CancelToken::new();
        let (interrupter, hits) = counting();
        token.arm(interrupter);
        token.disarm();
        token.cancel();
        assert!(token.is_cancelled());
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }
}
