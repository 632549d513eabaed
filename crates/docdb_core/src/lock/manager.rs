//! The lock table, wait-for graph, and waiter queues.

use super::types::{HeldLock, LockKey, LockMode, Waiter};
use crate::error::LockDenied;
use crate::transaction::IsolationLevel;
use crate::types::TransactionId;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet, VecDeque};
use std::time::{Duration, Instant};

struct LockTable {
    locks: HashMap<LockKey, HeldLock>,
    wait_for_graph: HashMap<TransactionId, HashSet<TransactionId>>,
    waiters: HashMap<LockKey, VecDeque<Waiter>>,
}

impl LockTable {
    fn new() -> Self {
        Self {
            locks: HashMap::new(),
            wait_for_graph: HashMap::new(),
            waiters: HashMap::new(),
        }
    }

    /// DFS over the wait-for graph starting at `start`, looking for a cycle
    /// back to `start` itself.
    fn has_cycle_from(&self, start: TransactionId) -> bool {
        let mut visited = HashSet::new();
        let mut path = HashSet::new();
        self.dfs(start, &mut visited, &mut path)
    }

    fn dfs(&self, node: TransactionId, visited: &mut HashSet<TransactionId>, path: &mut HashSet<TransactionId>) -> bool {
        if path.contains(&node) {
            return true;
        }
        if visited.contains(&node) {
            return false;
        }
        visited.insert(node);
        path.insert(node);
        if let Some(neighbors) = self.wait_for_graph.get(&node) {
            for &neighbor in neighbors {
                if self.dfs(neighbor, visited, path) {
                    return true;
                }
            }
        }
        path.remove(&node);
        false
    }
}

/// Grants and releases shared/exclusive document locks, detecting deadlocks
/// via wait-for-graph cycle detection.
///
/// A single mutex guards the lock table, the wait-for graph, and the waiter
/// queues together (§5 "the lock manager serializes its table via a single
/// mutex") so that the grant-or-enqueue decision for one key is made
/// atomically with respect to every other key.
pub struct LockManager {
    table: Mutex<LockTable>,
    lock_timeout: Duration,
}

impl LockManager {
    /// Creates a lock manager that drops waiters older than `lock_timeout`.
    #[must_use]
    pub fn new(lock_timeout: Duration) -> Self {
        Self {
            table: Mutex::new(LockTable::new()),
            lock_timeout,
        }
    }

    /// Attempts to grant `mode` on `key` to `txn`.
    ///
    /// Returns `Ok(())` if granted (including idempotent same-transaction
    /// re-acquisition), or `Err(LockDenied)` if a different transaction
    /// already holds the key. A would-be-cyclic wait returns
    /// `LockDenied::Deadlock`; otherwise the caller is queued and
    /// `LockDenied::Waiting` is returned.
    pub fn acquire(
        &self,
        key: LockKey,
        mode: LockMode,
        txn: TransactionId,
        isolation: IsolationLevel,
    ) -> Result<(), LockDenied> {
        let mut table = self.table.lock();

        let Some(held) = table.locks.get(&key) else {
            table.locks.insert(
                key,
                HeldLock {
                    mode,
                    txn,
                    acquired_at: Instant::now(),
                    isolation,
                },
            );
            return Ok(());
        };

        if held.txn == txn {
            // Same-transaction upgrade: WRITE always grants; a held WRITE
            // already dominates a requested READ, so no table change is
            // needed either way.
            if mode == LockMode::Write {
                table.locks.insert(
                    key,
                    HeldLock {
                        mode,
                        txn,
                        acquired_at: Instant::now(),
                        isolation,
                    },
                );
            }
            return Ok(());
        }

        let holder = held.txn;
        table.wait_for_graph.entry(txn).or_default().insert(holder);
        if table.has_cycle_from(txn) {
            if let Some(edges) = table.wait_for_graph.get_mut(&txn) {
                edges.remove(&holder);
            }
            return Err(LockDenied::Deadlock);
        }

        table.waiters.entry(key).or_default().push_back(Waiter {
            txn,
            mode,
            enqueued_at: Instant::now(),
        });
        Err(LockDenied::Waiting)
    }

    /// Releases `key` if held by `txn`.
    ///
    /// On release, the head of the waiter queue (if any) is inspected: a
    /// waiter older than `lock_timeout` is dropped without granting; the
    /// lock remains free. Otherwise the head waiter is granted immediately,
    /// with its isolation tag hardcoded to `ReadCommitted` regardless of
    /// what it requested (preserved source behavior, see DESIGN.md).
    ///
    /// Returns `false` (a silent no-op) if `txn` does not hold `key`.
    pub fn release(&self, key: &LockKey, txn: TransactionId) -> bool {
        let mut table = self.table.lock();

        let holds_it = table.locks.get(key).is_some_and(|held| held.txn == txn);
        if !holds_it {
            return false;
        }
        table.locks.remove(key);

        if let Some(waiters) = table.waiters.get_mut(key) {
            if let Some(next) = waiters.front() {
                if next.enqueued_at.elapsed() > self.lock_timeout {
                    waiters.pop_front();
                } else {
                    let next = waiters.pop_front().expect("front checked above");
                    table.locks.insert(
                        key.clone(),
                        HeldLock {
                            mode: next.mode,
                            txn: next.txn,
                            acquired_at: Instant::now(),
                            isolation: IsolationLevel::ReadCommitted,
                        },
                    );
                }
            }
        }

        true
    }

    /// Clears every lock entry held by `txn` and removes `txn` from both
    /// sides of the wait-for graph.
    ///
    /// Unlike [`release`](Self::release), this does not wake waiters — it
    /// mirrors the source's `release_transaction_locks`, which is a pure
    /// table clear.
    pub fn release_all(&self, txn: TransactionId) {
        let mut table = self.table.lock();
        table.locks.retain(|_, held| held.txn != txn);
        table.wait_for_graph.remove(&txn);
        for edges in table.wait_for_graph.values_mut() {
            edges.remove(&txn);
        }
    }

    /// Returns the mode currently held on `key`, if any.
    #[must_use]
    pub fn holder(&self, key: &LockKey) -> Option<TransactionId> {
        self.table.lock().locks.get(key).map(|held| held.txn)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mgr() -> LockManager {
        LockManager::new(Duration::from_secs(30))
    }

    #[test]
    fn first_acquire_grants() {
        let lm = mgr();
        let key = LockKey::new("db", "c", "1");
        let t1 = TransactionId::new();
        assert!(lm.acquire(key, LockMode::Write, t1, IsolationLevel::Serializable).is_ok());
    }

    #[test]
    fn same_txn_write_then_read_is_idempotent() {
        let lm = mgr();
        let key = LockKey::new("db", "c", "1");
        let t1 = TransactionId::new();
        lm.acquire(key.clone(), LockMode::Write, t1, IsolationLevel::Serializable)
            .unwrap();
        assert!(lm
            .acquire(key, LockMode::Read, t1, IsolationLevel::Serializable)
            .is_ok());
    }

    #[test]
    fn different_txn_write_is_denied_and_queued() {
        let lm = mgr();
        let key = LockKey::new("db", "c", "1");
        let t1 = TransactionId::new();
        let t2 = TransactionId::new();
        lm.acquire(key.clone(), LockMode::Write, t1, IsolationLevel::Serializable)
            .unwrap();
        let err = lm
            .acquire(key, LockMode::Write, t2, IsolationLevel::Serializable)
            .unwrap_err();
        assert_eq!(err, LockDenied::Waiting);
    }

    #[test]
    fn cycle_is_refused_as_deadlock() {
        let lm = mgr();
        let k1 = LockKey::new("db", "c", "1");
        let k2 = LockKey::new("db", "c", "2");
        let t1 = TransactionId::new();
        let t2 = TransactionId::new();

        lm.acquire(k1.clone(), LockMode::Write, t1, IsolationLevel::Serializable)
            .unwrap();
        lm.acquire(k2.clone(), LockMode::Write, t2, IsolationLevel::Serializable)
            .unwrap();

        // t2 waits on t1's key 1.
        let err = lm
            .acquire(k1, LockMode::Write, t2, IsolationLevel::Serializable)
            .unwrap_err();
        assert_eq!(err, LockDenied::Waiting);

        // t1 waiting on t2's key 2 would close the cycle t1->t2->t1.
        let err = lm
            .acquire(k2, LockMode::Write, t1, IsolationLevel::Serializable)
            .unwrap_err();
        assert_eq!(err, LockDenied::Deadlock);
    }

    #[test]
    fn release_wakes_head_waiter() {
        let lm = mgr();
        let key = LockKey::new("db", "c", "1");
        let t1 = TransactionId::new();
        let t2 = TransactionId::new();
        lm.acquire(key.clone(), LockMode::Write, t1, IsolationLevel::Serializable)
            .unwrap();
        lm.acquire(key.clone(), LockMode::Write, t2, IsolationLevel::Serializable)
            .unwrap_err();

        assert!(lm.release(&key, t1));
        assert_eq!(lm.holder(&key), Some(t2));
    }

    #[test]
    fn release_by_non_holder_is_noop() {
        let lm = mgr();
        let key = LockKey::new("db", "c", "1");
        let t1 = TransactionId::new();
        let t2 = TransactionId::new();
        lm.acquire(key.clone(), LockMode::Write, t1, IsolationLevel::Serializable)
            .unwrap();
        assert!(!lm.release(&key, t2));
    }

    #[test]
    fn release_all_clears_every_held_key() {
        let lm = mgr();
        let k1 = LockKey::new("db", "c", "1");
        let k2 = LockKey::new("db", "c", "2");
        let t1 = TransactionId::new();
        lm.acquire(k1.clone(), LockMode::Write, t1, IsolationLevel::Serializable)
            .unwrap();
        lm.acquire(k2.clone(), LockMode::Write, t1, IsolationLevel::Serializable)
            .unwrap();
        lm.release_all(t1);
        assert!(lm.holder(&k1).is_none());
        assert!(lm.holder(&k2).is_none());
    }
}
