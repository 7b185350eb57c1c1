//! Debounced, coalescing snapshot writer.
//!
//! Requests are folded into a single pending slot: each `schedule` call
//! replaces the pending snapshot (last write wins) and joins the waiters of
//! the write that will eventually carry it. Every waiter learns the outcome
//! of that write.

use crate::error::PersistError;
use crate::snapshot::{write_atomic, PersistedState};
use futures_util::future::BoxFuture;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::oneshot;

/// Default delay between the first scheduled snapshot and the write.
pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(2000);

/// Durable storage for lane snapshots.
///
/// The returned futures complete once the snapshot (or a newer one that
/// superseded it) has been written, or the write has failed.
pub trait Persistence: Send + Sync + 'static {
    fn schedule(&self, snapshot: PersistedState) -> BoxFuture<'static, Result<(), PersistError>>;

    /// Writes any pending snapshot immediately.
    fn flush(&self) -> BoxFuture<'_, Result<(), PersistError>>;
}

type Waiter = oneshot::Sender<Result<(), PersistError>>;

struct Pending {
    generation: u64,
    snapshot: PersistedState,
    waiters: Vec<Waiter>,
}

struct Inner {
    path: PathBuf,
    debounce: Duration,
    slot: Mutex<Option<Pending>>,
    generation: AtomicU64,
    /// Serializes file writes between the debounce task and `flush`.
    write_lock: tokio::sync::Mutex<()>,
}

/// [`Persistence`] backed by a JSON file written atomically.
#[derive(Clone)]
pub struct FilePersistor {
    inner: Arc<Inner>,
}

impl FilePersistor {
    pub fn new(path: PathBuf, debounce: Duration) -> Self {
        Self {
            inner: Arc::new(Inner {
                path,
                debounce,
                slot: Mutex::new(None),
                generation: AtomicU64::new(0),
                write_lock: tokio::sync::Mutex::new(()),
            }),
        }
    }

    pub fn path(&self) -> &std::path::Path {
        &self.inner.path
    }
}

impl Inner {
    /// Adds `snapshot` to the pending slot. Returns the generation of a newly
    /// opened slot, or `None` if it joined one that is already scheduled.
    fn enqueue(&self, snapshot: PersistedState, waiter: Waiter) -> Option<u64> {
        let mut slot = self.slot.lock().unwrap_or_else(|e| e.into_inner());
        match slot.as_mut() {
            Some(pending) => {
                pending.snapshot = snapshot;
                pending.waiters.push(waiter);
                None
            }
            None => {
                let generation = self.generation.fetch_add(1, Ordering::Relaxed) + 1;
                *slot = Some(Pending {
                    generation,
                    snapshot,
                    waiters: vec![waiter],
                });
                Some(generation)
            }
        }
    }

    /// Takes the pending slot, optionally only if it is still `generation`.
    fn take(&self, generation: Option<u64>) -> Option<Pending> {
        let mut slot = self.slot.lock().unwrap_or_else(|e| e.into_inner());
        match (slot.as_ref(), generation) {
            (Some(p), Some(g)) if p.generation != g => None,
            _ => slot.take(),
        }
    }

    /// Writes `pending` and answers its waiters. Callers hold `write_lock`.
    async fn write(&self, pending: Pending) -> Result<(), PersistError> {
        let result = write_atomic(&self.path, &pending.snapshot)
            .await
            .map_err(PersistError::from);
        match &result {
            Ok(()) => tracing::debug!(
                path = %self.path.display(),
                coalesced = pending.waiters.len(),
                "state snapshot written"
            ),
            Err(e) => tracing::error!(path = %self.path.display(), error = %e, "failed to write state snapshot"),
        }
        for waiter in pending.waiters {
            let _ = waiter.send(result.clone());
        }
        result
    }
}

impl Persistence for FilePersistor {
    fn schedule(&self, snapshot: PersistedState) -> BoxFuture<'static, Result<(), PersistError>> {
        let (tx, rx) = oneshot::channel();
        if let Some(generation) = self.inner.enqueue(snapshot, tx) {
            let inner = Arc::clone(&self.inner);
            tokio::spawn(async move {
                tokio::time::sleep(inner.debounce).await;
                let _guard = inner.write_lock.lock().await;
                if let Some(pending) = inner.take(Some(generation)) {
                    let _ = inner.write(pending).await;
                }
            });
        }
        Box::pin(async move {
            rx.await
                .unwrap_or_else(|_| Err(PersistError::new("persistence task dropped")))
        })
    }

    fn flush(&self) -> BoxFuture<'_, Result<(), PersistError>> {
        Box::pin(async move {
            let _guard = self.inner.write_lock.lock().await;
            match self.inner.take(None) {
                Some(pending) => self.inner.write(pending).await,
                None => Ok(()),
            }
        })
    }
}
