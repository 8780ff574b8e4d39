// Cancellation tokens and the single in-flight motion slot

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::{oneshot, watch};
use tokio::time::Instant;

use crate::error::OiError;

/// Why a wait ended early
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelReason {
    Cancelled,
    DeadlineExceeded,
}

impl From<CancelReason> for OiError {
    fn from(reason: CancelReason) -> Self {
        match reason {
            CancelReason::Cancelled => OiError::Cancelled,
            CancelReason::DeadlineExceeded => OiError::DeadlineExceeded,
        }
    }
}

/// Cloneable cancellation handle with an optional deadline
///
/// Clones share the cancelled flag; `with_deadline` derives a token that also
/// fires when the deadline passes.
#[derive(Debug, Clone)]
pub struct CancelToken {
    flag: Arc<watch::Sender<bool>>,
    deadline: Option<Instant>,
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

impl CancelToken {
    pub fn new() -> Self {
        let (flag, _) = watch::channel(false);
        Self {
            flag: Arc::new(flag),
            deadline: None,
        }
    }

    /// Same flag, fires no later than `deadline`
    pub fn with_deadline(&self, deadline: Instant) -> Self {
        let deadline = match self.deadline {
            Some(existing) => existing.min(deadline),
            None => deadline,
        };
        Self {
            flag: Arc::clone(&self.flag),
            deadline: Some(deadline),
        }
    }

    pub fn cancel(&self) {
        self.flag.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.flag.borrow()
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Resolve once cancelled or past the deadline
    pub async fn cancelled(&self) -> CancelReason {
        let mut rx = self.flag.subscribe();
        let flagged = async move {
            // The sender lives in self, so this only returns once the flag is set
            let _ = rx.wait_for(|cancelled| *cancelled).await;
        };
        match self.deadline {
            Some(deadline) => tokio::select! {
                _ = flagged => CancelReason::Cancelled,
                _ = tokio::time::sleep_until(deadline) => CancelReason::DeadlineExceeded,
            },
            None => {
                flagged.await;
                CancelReason::Cancelled
            }
        }
    }
}

struct Active {
    id: u64,
    cancel: CancelToken,
    done: oneshot::Receiver<()>,
}

/// Holds at most one motion operation
///
/// Operations form a chain: each new one cancels its predecessor and waits
/// for it to finish (including its final stop) before touching the device.
#[derive(Default)]
pub struct OperationSlot {
    current: Mutex<Option<Active>>,
    next_id: AtomicU64,
}

/// Registration of the running operation; dropping it frees the slot
pub struct OperationGuard<'a> {
    slot: &'a OperationSlot,
    id: u64,
    cancel: CancelToken,
    _done: oneshot::Sender<()>,
}

impl OperationGuard<'_> {
    /// Fires when a newer operation supersedes this one
    pub async fn superseded(&self) {
        self.cancel.cancelled().await;
    }

    /// A newer operation has already claimed the slot
    pub fn is_superseded(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn id(&self) -> u64 {
        self.id
    }
}

impl Drop for OperationGuard<'_> {
    fn drop(&mut self) {
        let mut current = self.slot.lock();
        if current.as_ref().is_some_and(|active| active.id == self.id) {
            *current = None;
        }
    }
}

impl OperationSlot {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Option<Active>> {
        self.current.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn is_active(&self) -> bool {
        self.lock().is_some()
    }

    /// Register a new operation, then cancel the previous one and wait for it
    ///
    /// The slot is claimed before waiting, so a request arriving meanwhile
    /// supersedes this one rather than slipping in ahead of it. Callers should
    /// check `is_superseded` on the returned guard before acting.
    pub async fn begin(&self) -> OperationGuard<'_> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let cancel = CancelToken::new();
        let (done_tx, done_rx) = oneshot::channel();
        let previous = self.lock().replace(Active {
            id,
            cancel: cancel.clone(),
            done: done_rx,
        });
        let guard = OperationGuard {
            slot: self,
            id,
            cancel,
            _done: done_tx,
        };
        if let Some(previous) = previous {
            Self::finish(previous).await;
        }
        guard
    }

    /// Cancel any running operation and wait for it to finish
    pub async fn cancel_current(&self) {
        loop {
            let previous = self.lock().take();
            match previous {
                Some(active) => Self::finish(active).await,
                None => return,
            }
        }
    }

    async fn finish(active: Active) {
        active.cancel.cancel();
        // Err only means the guard is gone, which is what we wait for
        let _ = active.done.await;
    }
}
