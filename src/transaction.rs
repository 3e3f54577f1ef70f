//! Correlation of outbound requests with inbound responses.
//!
//! [`Transactions`] maps a transaction key to exactly one pending response slot. The dispatching side
//! [registers](Transactions::register) a key and awaits the returned [`PendingResponse`]; the reader task resolves
//! the key with [`complete`](Transactions::complete) when the correlated response arrives, or anyone may
//! [`cancel`](Transactions::cancel) it.
//!
//! Each entry is removed exactly once, by whichever of completion, cancellation, or the [`PendingResponse`] being
//! dropped happens first. Later removals are no-ops.

use std::{
    collections::HashMap,
    fmt,
    future::Future,
    pin::Pin,
    sync::{Arc, Mutex, MutexGuard},
    task::{Context, Poll},
};

use tokio::sync::oneshot;
use tracing::trace;

use crate::error::RegistryError;

/// A registry of pending transactions, keyed by transaction key.
///
/// Cloning is cheap; all clones share the same registry.
pub struct Transactions<R> {
    inner: Arc<Mutex<Slots<R>>>,
}

struct Slots<R> {
    pending: HashMap<String, Slot<R>>,
    next_id: u64,
}

struct Slot<R> {
    id: u64,
    tx: oneshot::Sender<Option<R>>,
}

impl<R> Transactions<R> {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Transactions {
            inner: Arc::new(Mutex::new(Slots {
                pending: HashMap::new(),
                next_id: 0,
            })),
        }
    }

    /// Registers a transaction, returning the slot its response will be delivered to.
    ///
    /// Fails with [`RegistryError::DuplicateTransaction`] if a transaction with the same key is still pending.
    pub fn register(&self, key: impl Into<String>) -> Result<PendingResponse<R>, RegistryError> {
        let key = key.into();
        if key.is_empty() {
            return Err(RegistryError::EmptyKey);
        }

        let mut slots = self.lock();
        if slots.pending.contains_key(&key) {
            return Err(RegistryError::DuplicateTransaction(key));
        }

        let id = slots.next_id;
        slots.next_id = slots.next_id.wrapping_add(1);
        let (tx, rx) = oneshot::channel();
        slots.pending.insert(key.clone(), Slot { id, tx });
        trace!(%key, "registered transaction");

        Ok(PendingResponse {
            key,
            id,
            rx,
            transactions: self.clone(),
        })
    }

    /// Resolves a pending transaction with its response.
    ///
    /// Fails with [`RegistryError::UnknownTransaction`] if nothing is pending under `key`, in which case the
    /// response is unsolicited.
    pub fn complete(&self, key: &str, response: R) -> Result<(), RegistryError> {
        let slot = self
            .lock()
            .pending
            .remove(key)
            .ok_or_else(|| RegistryError::UnknownTransaction(key.to_string()))?;
        // The waiter may already be gone, which is indistinguishable from a late response.
        let _ = slot.tx.send(Some(response));
        trace!(%key, "completed transaction");
        Ok(())
    }

    /// Cancels a pending transaction, resolving it without a response.
    ///
    /// Returns `false` if nothing was pending under `key`.
    pub fn cancel(&self, key: &str) -> bool {
        let Some(slot) = self.lock().pending.remove(key) else {
            return false;
        };
        let _ = slot.tx.send(None);
        trace!(%key, "cancelled transaction");
        true
    }

    /// Cancels every pending transaction, returning how many were removed.
    pub fn cancel_all(&self) -> usize {
        let drained: Vec<_> = self.lock().pending.drain().collect();
        let count = drained.len();
        for (_, slot) in drained {
            let _ = slot.tx.send(None);
        }
        count
    }

    /// Returns `true` if a transaction is pending under `key`.
    pub fn contains(&self, key: &str) -> bool {
        self.lock().pending.contains_key(key)
    }

    /// The number of pending transactions.
    pub fn len(&self) -> usize {
        self.lock().pending.len()
    }

    /// Returns `true` if no transactions are pending.
    pub fn is_empty(&self) -> bool {
        self.lock().pending.is_empty()
    }

    /// Removes the entry for `key` only if it still belongs to registration `id`.
    fn release(&self, key: &str, id: u64) {
        let mut slots = self.lock();
        if slots.pending.get(key).is_some_and(|slot| slot.id == id) {
            slots.pending.remove(key);
            trace!(%key, "released transaction");
        }
    }

    fn lock(&self) -> MutexGuard<'_, Slots<R>> {
        // Slots are never left half-updated, so a poisoned lock is still consistent.
        self.inner.lock().unwrap_or_else(|err| err.into_inner())
    }
}

impl<R> Clone for Transactions<R> {
    fn clone(&self) -> Self {
        Transactions {
            inner: self.inner.clone(),
        }
    }
}

impl<R> Default for Transactions<R> {
    fn default() -> Self {
        Self::new()
    }
}

impl<R> fmt::Debug for Transactions<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transactions")
            .field("pending", &self.len())
            .finish()
    }
}

/// The slot a registered transaction's response is delivered to.
///
/// Resolves to `Some(response)` once completed, or `None` if the transaction was cancelled. Dropping a
/// `PendingResponse` removes its registration, if it is still pending.
#[must_use = "the transaction is released as soon as the pending response is dropped"]
pub struct PendingResponse<R> {
    key: String,
    id: u64,
    rx: oneshot::Receiver<Option<R>>,
    transactions: Transactions<R>,
}

impl<R> PendingResponse<R> {
    /// The transaction key this slot was registered under.
    pub fn key(&self) -> &str {
        &self.key
    }
}

impl<R> Future for PendingResponse<R> {
    type Output = Option<R>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        // A dropped sender means the slot was discarded without a response.
        Pin::new(&mut self.rx).poll(cx).map(|res| res.ok().flatten())
    }
}

impl<R> Drop for PendingResponse<R> {
    fn drop(&mut self) {
        self.transactions.release(&self.key, self.id);
    }
}

impl<R> fmt::Debug for PendingResponse<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PendingResponse")
            .field("key", &self.key)
            .finish()
    }
}
