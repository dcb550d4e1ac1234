//! Registry of outstanding bridge requests.
//!
//! Every call gets its own `RequestId` slot, inserted on dispatch and removed
//! on completion, cancellation or supersede. Picks additionally carry a
//! cancellation sender: starting a new pick explicitly cancels the ones still
//! waiting on the user, so no completion is ever orphaned.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;
use tracing::debug;
use wispar_access_core::BridgeMethod;

/// Correlation id handed back to the host when a call is submitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestId(u64);

impl RequestId {
    pub fn get(&self) -> u64 {
        self.0
    }
}

impl From<u64> for RequestId {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

impl std::fmt::Display for RequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug)]
struct PendingRequest {
    method: BridgeMethod,
    started_at: DateTime<Utc>,
    /// Present for picks only; firing it dismisses the chooser.
    cancel: Option<oneshot::Sender<()>>,
}

/// Snapshot of an outstanding request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingInfo {
    pub id: RequestId,
    pub method: BridgeMethod,
    pub started_at: DateTime<Utc>,
}

#[derive(Debug)]
pub struct PendingRequests {
    next_id: AtomicU64,
    slots: DashMap<RequestId, PendingRequest>,
    /// Held across supersede and insert so at most one pick is ever live.
    picks: Mutex<()>,
}

impl Default for PendingRequests {
    fn default() -> Self {
        Self::new()
    }
}

impl PendingRequests {
    pub fn new() -> Self {
        Self {
            // Zero is reserved as the FFI failure value.
            next_id: AtomicU64::new(1),
            slots: DashMap::new(),
            picks: Mutex::new(()),
        }
    }

    /// Register a non-cancellable request.
    pub fn register(&self, method: BridgeMethod) -> RequestId {
        let id = self.allocate();
        self.slots.insert(
            id,
            PendingRequest {
                method,
                started_at: Utc::now(),
                cancel: None,
            },
        );
        id
    }

    /// Register a pick, cancelling every pick still outstanding.
    ///
    /// The receiver resolves when this pick is itself cancelled or superseded.
    pub fn register_pick(&self, method: BridgeMethod) -> (RequestId, oneshot::Receiver<()>) {
        let _serial = self.picks.lock().unwrap_or_else(|e| e.into_inner());
        let superseded: Vec<RequestId> = self
            .slots
            .iter()
            .filter(|slot| slot.cancel.is_some())
            .map(|slot| *slot.key())
            .collect();
        for previous in superseded {
            if self.cancel(previous) {
                debug!("Pick {} superseded by a new pick", previous);
            }
        }

        let id = self.allocate();
        let (tx, rx) = oneshot::channel();
        self.slots.insert(
            id,
            PendingRequest {
                method,
                started_at: Utc::now(),
                cancel: Some(tx),
            },
        );
        (id, rx)
    }

    /// Remove a finished request. False when it was already cancelled or superseded.
    pub fn complete(&self, id: RequestId) -> bool {
        self.slots.remove(&id).is_some()
    }

    /// Cancel a pending pick. False for unknown ids and non-cancellable requests.
    pub fn cancel(&self, id: RequestId) -> bool {
        match self.slots.remove_if(&id, |_, slot| slot.cancel.is_some()) {
            Some((_, slot)) => {
                if let Some(tx) = slot.cancel {
                    let _ = tx.send(());
                }
                true
            }
            None => false,
        }
    }

    /// Cancel every pending pick. Returns how many were cancelled.
    pub fn cancel_all(&self) -> usize {
        let ids: Vec<RequestId> = self.slots.iter().map(|slot| *slot.key()).collect();
        ids.into_iter().filter(|id| self.cancel(*id)).count()
    }

    pub fn outstanding(&self) -> Vec<PendingInfo> {
        let mut pending: Vec<PendingInfo> = self
            .slots
            .iter()
            .map(|slot| PendingInfo {
                id: *slot.key(),
                method: slot.method,
                started_at: slot.started_at,
            })
            .collect();
        pending.sort_by_key(|p| p.id);
        pending
    }

    /// Reserve an id without tracking a request (calls answered immediately).
    pub fn allocate(&self) -> RequestId {
        RequestId(self.next_id.fetch_add(1, Ordering::SeqCst))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ids_start_at_one_and_increase() {
        let pending = PendingRequests::new();
        let a = pending.register(BridgeMethod::StartSecurityScopedAccess);
        let b = pending.register(BridgeMethod::StopSecurityScopedAccess);
        assert_eq!(a.get(), 1);
        assert!(b > a);
        assert_eq!(pending.outstanding().len(), 2);

        assert!(pending.complete(a));
        assert!(!pending.complete(a));
        assert_eq!(pending.outstanding()[0].id, b);
    }

    #[test]
    fn test_non_pick_is_not_cancellable() {
        let pending = PendingRequests::new();
        let id = pending.register(BridgeMethod::ResolveCustomPath);
        assert!(!pending.cancel(id));
        assert!(pending.complete(id));
    }

    #[tokio::test]
    async fn test_new_pick_supersedes_previous() {
        let pending = PendingRequests::new();
        let (first, first_rx) = pending.register_pick(BridgeMethod::GetExportDirectory);
        let (second, mut second_rx) = pending.register_pick(BridgeMethod::SelectCustomDatabasePath);

        // First pick was cancelled explicitly, not orphaned
        assert!(first_rx.await.is_ok());
        assert!(!pending.complete(first));

        assert!(second_rx.try_recv().is_err());
        assert_eq!(pending.outstanding().len(), 1);
        assert!(pending.complete(second));
    }

    #[test]
    fn test_concurrent_picks_leave_one_outstanding() {
        let pending = PendingRequests::new();
        let receivers = std::sync::Mutex::new(Vec::new());

        std::thread::scope(|scope| {
            for _ in 0..8 {
                scope.spawn(|| {
                    for _ in 0..25 {
                        let (id, rx) = pending.register_pick(BridgeMethod::GetExportDirectory);
                        receivers.lock().unwrap().push((id, rx));
                    }
                });
            }
        });

        let outstanding = pending.outstanding();
        assert_eq!(outstanding.len(), 1);
        let survivor = outstanding[0].id;

        // Every other pick was told to stop; the survivor was not.
        for (id, mut rx) in receivers.into_inner().unwrap() {
            assert_eq!(rx.try_recv().is_ok(), id != survivor, "pick {id}");
        }
    }

    #[tokio::test]
    async fn test_cancel_all() {
        let pending = PendingRequests::new();
        let (_, rx) = pending.register_pick(BridgeMethod::GetExportDirectory);
        let other = pending.register(BridgeMethod::StartSecurityScopedAccess);

        assert_eq!(pending.cancel_all(), 1);
        assert!(rx.await.is_ok());
        assert_eq!(pending.outstanding()[0].id, other);
    }
}
