//! Per-call context (§4.10): deadline, cancellation, and metadata/user-value
//! bag threaded through a handler invocation.

use crate::metadata::MetadataMap;
use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;

/// Why a [`Context`] was cancelled, distinguishable at call-close time even
/// though waiters observe both the same way at the API level (§4.10).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelReason {
    Deadline,
    Explicit,
    PeerClosed,
}

#[derive(Default)]
struct Slots {
    values: HashMap<TypeId, Arc<dyn Any + Send + Sync>>,
}

struct Inner {
    deadline: Option<Instant>,
    cancel_tx: watch::Sender<Option<CancelReason>>,
    metadata: MetadataMap,
    slots: Slots,
}

/// An immutable snapshot plus a shared cancellation broadcaster.
///
/// Cloning a `Context` is cheap: it shares the same cancellation signal and
/// value slots as its parent. Use [`Context::with_deadline`] to derive a
/// child whose deadline is the minimum of the parent's and the new one.
#[derive(Clone)]
pub struct Context {
    inner: Arc<Inner>,
    cancel_rx: watch::Receiver<Option<CancelReason>>,
}

impl Context {
    /// A fresh, un-cancellable root context with no deadline — used when a
    /// Call begins with no `grpc-timeout` header.
    pub fn root() -> Self {
        let (tx, rx) = watch::channel(None);
        Context {
            inner: Arc::new(Inner {
                deadline: None,
                cancel_tx: tx,
                metadata: MetadataMap::new(),
                slots: Slots::default(),
            }),
            cancel_rx: rx,
        }
    }

    pub fn with_metadata(metadata: MetadataMap) -> Self {
        let mut ctx = Context::root();
        Arc::get_mut(&mut ctx.inner).unwrap().metadata = metadata;
        ctx
    }

    pub fn metadata(&self) -> &MetadataMap {
        &self.inner.metadata
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.inner.deadline
    }

    /// Derives a child context whose deadline is `min(self.deadline, new)`
    /// (§4.10). Cancellation state (and the watch channel) is inherited so
    /// that a parent cancel always propagates.
    pub fn with_deadline(&self, new_deadline: Instant) -> Self {
        let deadline = match self.inner.deadline {
            Some(existing) => Some(existing.min(new_deadline)),
            None => Some(new_deadline),
        };
        Context {
            inner: Arc::new(Inner {
                deadline,
                cancel_tx: self.inner.cancel_tx.clone(),
                metadata: self.inner.metadata.clone(),
                slots: Slots::default(),
            }),
            cancel_rx: self.cancel_rx.clone(),
        }
    }

    /// Derives a child context from a `grpc-timeout` duration relative to now.
    pub fn with_timeout(&self, timeout: Duration) -> Self {
        self.with_deadline(Instant::now() + timeout)
    }

    /// Stores an arbitrary user value, keyed by its type (one slot per type,
    /// matching how most context-bag designs key user values).
    pub fn set_value<T: Send + Sync + 'static>(&mut self, value: T) {
        let inner = Arc::make_mut(&mut self.inner);
        inner
            .slots
            .values
            .insert(TypeId::of::<T>(), Arc::new(value));
    }

    pub fn value<T: Send + Sync + 'static>(&self) -> Option<Arc<T>> {
        self.inner
            .slots
            .values
            .get(&TypeId::of::<T>())
            .and_then(|v| v.clone().downcast::<T>().ok())
    }

    /// True once this context (or any ancestor it was derived from) has been
    /// cancelled or its deadline has passed.
    pub fn is_cancelled(&self) -> bool {
        if self.cancel_rx.borrow().is_some() {
            return true;
        }
        if let Some(deadline) = self.inner.deadline {
            return Instant::now() >= deadline;
        }
        false
    }

    pub fn cancel_reason(&self) -> Option<CancelReason> {
        *self.cancel_rx.borrow()
    }

    /// Cancels this context and every context derived from it (§5:
    /// "Propagated strictly downward... a cancelled parent cancels every
    /// child").
    pub fn cancel(&self, reason: CancelReason) {
        // watch::Sender::send_if_modified keeps the first cancellation
        // reason sticky — "Cancellation fires once" (§4.10).
        let _ = self.inner.cancel_tx.send_if_modified(|current| {
            if current.is_none() {
                *current = Some(reason);
                true
            } else {
                false
            }
        });
    }

    /// Resolves once this context is cancelled, for use in `select!` loops
    /// driving a handler's blocking send/recv against deadline/cancel (§5).
    pub async fn cancelled(&self) -> CancelReason {
        if let Some(reason) = self.cancel_reason() {
            return reason;
        }
        let deadline = self.inner.deadline;
        let mut rx = self.cancel_rx.clone();
        match deadline {
            Some(deadline) => {
                tokio::select! {
                    _ = rx.changed() => rx.borrow().unwrap_or(CancelReason::Explicit),
                    _ = tokio::time::sleep_until(deadline.into()) => {
                        self.cancel(CancelReason::Deadline);
                        CancelReason::Deadline
                    }
                }
            }
            None => {
                let _ = rx.changed().await;
                rx.borrow().unwrap_or(CancelReason::Explicit)
            }
        }
    }
}

impl Slots {
    // allow Arc::make_mut to clone slots when shared
}

impl Clone for Slots {
    fn clone(&self) -> Self {
        Slots {
            values: self.values.clone(),
        }
    }
}

impl Clone for Inner {
    fn clone(&self) -> Self {
        Inner {
            deadline: self.deadline,
            cancel_tx: self.cancel_tx.clone(),
            metadata: self.metadata.clone(),
            slots: self.slots.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derived_deadline_is_the_minimum() {
        let root = Context::root();
        let far = root.with_deadline(Instant::now() + Duration::from_secs(100));
        let near = far.with_deadline(Instant::now() + Duration::from_secs(1));
        assert!(near.deadline().unwrap() <= Instant::now() + Duration::from_secs(2));
    }

    #[tokio::test]
    async fn cancel_propagates_to_derived_context() {
        let root = Context::root();
        let child = root.with_deadline(Instant::now() + Duration::from_secs(100));
        assert!(!child.is_cancelled());
        root.cancel(CancelReason::Explicit);
        assert!(child.is_cancelled());
        assert_eq!(child.cancel_reason(), Some(CancelReason::Explicit));
    }

    #[tokio::test]
    async fn deadline_expiry_is_observed_as_cancelled() {
        let root = Context::root();
        let child = root.with_deadline(Instant::now() + Duration::from_millis(10));
        let reason = child.cancelled().await;
        assert_eq!(reason, CancelReason::Deadline);
    }

    #[test]
    fn cancel_is_sticky_to_first_reason() {
        let root = Context::root();
        root.cancel(CancelReason::Explicit);
        root.cancel(CancelReason::Deadline);
        assert_eq!(root.cancel_reason(), Some(CancelReason::Explicit));
    }
}
