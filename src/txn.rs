//! Optimistic multi-cell software transactions.
//!
//! A [`TxnCell`] is a single atomic slot holding an `Arc`'d value. On its own
//! it behaves like any atomic reference cell: [`TxnCell::peek`] is a lock-free
//! load and never observes a torn value. What the cell adds is the ability to
//! take part in a [`Txn`], a short-lived transaction that reads and writes any
//! number of cells and makes the whole group atomic from the point of view of
//! every other transaction.
//!
//! ## Protocol
//!
//! Each cell carries a version counter next to its value. An even counter
//! means the cell is stable; an odd counter means a commit is installing a
//! new value right now.
//!
//! * [`Txn::load`] snapshots a cell (value plus version) and then re-checks
//!   the version of every cell read earlier. If any of them moved, the
//!   transaction's view is no longer consistent and the load reports
//!   [`Retry`]; the caller drops the transaction and starts over.
//! * [`Txn::store`] only stages the write. Nothing is visible to anyone until
//!   commit, and dropping the transaction discards the staged writes (there
//!   is no separate abort call).
//! * [`Txn::commit`] takes a process-wide commit lock, validates the read set
//!   one last time, and then installs the staged writes in two phases: every
//!   written cell's version is bumped to odd, all values are stored, and the
//!   versions are bumped back to even. A concurrent transactional load spins
//!   while a version is odd, so it can observe all of a commit or none of it,
//!   never half.
//!
//! Only committers ever touch the lock; loads and read-only transactions are
//! lock-free. Validation is by version stamp rather than pointer equality, so
//! a cell that changes away from a value and back again still invalidates the
//! transactions that read it.

use std::hint;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use arc_swap::ArcSwap;

/// The transaction observed a concurrent commit and must be restarted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Retry;

/// A single-slot atomic reference cell that can join transactions.
pub(crate) struct TxnCell<T> {
    value: ArcSwap<T>,
    // even: stable, odd: commit in progress
    version: AtomicU64,
}

impl<T> TxnCell<T> {
    pub(crate) fn new(initial: T) -> Self {
        TxnCell {
            value: ArcSwap::from_pointee(initial),
            version: AtomicU64::new(0),
        }
    }

    /// Lock-free load of the current value, outside any transaction.
    pub(crate) fn peek(&self) -> Arc<T> {
        self.value.load_full()
    }

    /// Loads a (version, value) pair that is internally consistent: the
    /// version did not move while the value was being read.
    fn read_stable(&self) -> (u64, Arc<T>) {
        loop {
            let before = self.version.load(Ordering::Acquire);
            if before & 1 == 0 {
                let value = self.value.load_full();
                if self.version.load(Ordering::Acquire) == before {
                    return (before, value);
                }
            }
            hint::spin_loop();
        }
    }
}

static COMMIT: Mutex<()> = Mutex::new(());

fn commit_lock() -> MutexGuard<'static, ()> {
    // No user code runs while the lock is held, so a poisoned lock only means
    // another committer's thread died mid-cycle; the two-phase install below
    // is the unit of consistency, not the lock itself.
    COMMIT.lock().unwrap_or_else(PoisonError::into_inner)
}

/// A multi-cell transaction over [`TxnCell`]s of one value type.
///
/// Dropping a transaction without committing discards its staged writes.
pub(crate) struct Txn<'a, T> {
    reads: Vec<(&'a TxnCell<T>, u64, Arc<T>)>,
    writes: Vec<(&'a TxnCell<T>, Arc<T>)>,
}

impl<'a, T> Txn<'a, T> {
    pub(crate) fn new() -> Self {
        Txn {
            reads: Vec::new(),
            writes: Vec::new(),
        }
    }

    /// Returns the value of `cell` as seen by this transaction: a staged
    /// write if there is one, the snapshot taken by an earlier load, or a
    /// fresh snapshot. Fails with [`Retry`] when a concurrent commit has
    /// invalidated any cell read so far.
    pub(crate) fn load(&mut self, cell: &'a TxnCell<T>) -> Result<Arc<T>, Retry> {
        if let Some((_, staged)) = self.writes.iter().find(|(c, _)| std::ptr::eq(*c, cell)) {
            return Ok(staged.clone());
        }
        if let Some((_, _, seen)) = self.reads.iter().find(|(c, _, _)| std::ptr::eq(*c, cell)) {
            return Ok(seen.clone());
        }
        let (version, value) = cell.read_stable();
        self.validate()?;
        self.reads.push((cell, version, value.clone()));
        Ok(value)
    }

    /// Stages a write. A second store to the same cell replaces the first.
    pub(crate) fn store(&mut self, cell: &'a TxnCell<T>, value: T) {
        let value = Arc::new(value);
        match self.writes.iter_mut().find(|(c, _)| std::ptr::eq(*c, cell)) {
            Some(entry) => entry.1 = value,
            None => self.writes.push((cell, value)),
        }
    }

    /// Atomically installs every staged write, provided no cell in the read
    /// set has changed since it was loaded.
    pub(crate) fn commit(self) -> Result<(), Retry> {
        if self.writes.is_empty() {
            return self.validate();
        }
        let _guard = commit_lock();
        self.validate()?;
        for (cell, _) in &self.writes {
            cell.version.fetch_add(1, Ordering::AcqRel);
        }
        for (cell, value) in &self.writes {
            cell.value.store(value.clone());
        }
        for (cell, _) in &self.writes {
            cell.version.fetch_add(1, Ordering::AcqRel);
        }
        Ok(())
    }

    fn validate(&self) -> Result<(), Retry> {
        for (cell, version, _) in &self.reads {
            if cell.version.load(Ordering::Acquire) != *version {
                return Err(Retry);
            }
        }
        Ok(())
    }
}
