//! Page-granular shared/exclusive locking with deadlock detection.

use std::collections::{HashMap, HashSet};
use std::sync::{Condvar, Mutex};
use std::time::Duration;

use crate::error::DbError;
use crate::page::{PageId, Permissions};
use crate::transaction::TransactionId;

// How long a denied request sleeps before re-running detection and retrying.
const RETRY_WAIT: Duration = Duration::from_millis(10);

#[derive(Debug, Clone, Copy)]
struct LockEntry {
    tid: TransactionId,
    perm: Permissions,
}

#[derive(Debug, Default)]
struct LockState {
    /// Holders of each page lock. At most one ReadWrite holder, or any
    /// number of ReadOnly holders; a single transaction may be both.
    locks: HashMap<PageId, Vec<LockEntry>>,
    /// The page each blocked transaction is waiting on.
    waiting: HashMap<TransactionId, PageId>,
}

/// The lock table: one monitor serializing every grant, release and
/// deadlock check.
#[derive(Debug, Default)]
pub struct LockManager {
    state: Mutex<LockState>,
    cvar: Condvar,
}

impl LockManager {
    pub fn new() -> LockManager {
        LockManager::default()
    }

    /// Acquire a lock on `pid` for `tid`, blocking until granted. Fails with
    /// `TransactionAborted` when waiting would complete a cycle in the
    /// wait-for graph.
    pub fn acquire(
        &self,
        tid: TransactionId,
        pid: PageId,
        perm: Permissions,
    ) -> Result<(), DbError> {
        let mut state = self.state.lock().unwrap();
        loop {
            if Self::try_grant(&mut state, tid, pid, perm) {
                state.waiting.remove(&tid);
                return Ok(());
            }

            state.waiting.insert(tid, pid);
            if Self::deadlock(&state, tid, pid) {
                crate::strata_debug_log!(
                    "[LockManager::acquire] deadlock: tid {} waiting on {:?}",
                    tid,
                    pid
                );
                state.waiting.remove(&tid);
                self.cvar.notify_all();
                return Err(DbError::TransactionAborted(tid));
            }

            let (guard, _timed_out) = self.cvar.wait_timeout(state, RETRY_WAIT).unwrap();
            state = guard;
        }
    }

    fn try_grant(
        state: &mut LockState,
        tid: TransactionId,
        pid: PageId,
        perm: Permissions,
    ) -> bool {
        let holders = state.locks.entry(pid).or_default();

        if let Some(pos) = holders.iter().position(|h| h.tid == tid) {
            let held = holders[pos].perm;
            if held == perm {
                // Idempotent re-grant.
                return true;
            }
            if held == Permissions::ReadWrite {
                // Holding exclusive and asking for shared: exclusive is
                // strictly stronger, already granted.
                return true;
            }
            // Holding shared and asking for exclusive: upgrade only as the
            // sole holder.
            if holders.len() == 1 {
                holders[pos].perm = Permissions::ReadWrite;
                return true;
            }
            return false;
        }

        if holders.iter().any(|h| h.perm == Permissions::ReadWrite) {
            return false;
        }
        match perm {
            Permissions::ReadOnly => {
                holders.push(LockEntry { tid, perm });
                true
            }
            Permissions::ReadWrite => {
                if holders.is_empty() {
                    holders.push(LockEntry { tid, perm });
                    true
                } else {
                    false
                }
            }
        }
    }

    // Would tid waiting on pid complete a cycle? Walk from each current
    // holder of pid: if any of them is (transitively) blocked on a page tid
    // holds, the wait must not be entered.
    fn deadlock(state: &LockState, tid: TransactionId, pid: PageId) -> bool {
        let holders = match state.locks.get(&pid) {
            Some(h) if !h.is_empty() => h,
            _ => return false,
        };
        let pages_held: Vec<PageId> = state
            .locks
            .iter()
            .filter(|(_, hs)| hs.iter().any(|h| h.tid == tid))
            .map(|(p, _)| *p)
            .collect();

        holders.iter().filter(|h| h.tid != tid).any(|h| {
            let mut visited = HashSet::new();
            Self::waits_on(state, h.tid, &pages_held, tid, &mut visited)
        })
    }

    fn waits_on(
        state: &LockState,
        tid: TransactionId,
        pages_held: &[PageId],
        origin: TransactionId,
        visited: &mut HashSet<TransactionId>,
    ) -> bool {
        if !visited.insert(tid) {
            return false;
        }
        let waiting_page = match state.waiting.get(&tid) {
            Some(p) => *p,
            None => return false,
        };
        if pages_held.contains(&waiting_page) {
            return true;
        }
        let holders = match state.locks.get(&waiting_page) {
            Some(h) => h,
            None => return false,
        };
        holders
            .iter()
            .filter(|h| h.tid != origin)
            .any(|h| Self::waits_on(state, h.tid, pages_held, origin, visited))
    }

    /// Unconditionally release `tid`'s lock on `pid`.
    pub fn release(&self, tid: TransactionId, pid: PageId) {
        let mut state = self.state.lock().unwrap();
        if let Some(holders) = state.locks.get_mut(&pid) {
            holders.retain(|h| h.tid != tid);
            if holders.is_empty() {
                state.locks.remove(&pid);
            }
        }
        self.cvar.notify_all();
    }

    /// Release every lock held by `tid` (transaction end).
    pub fn release_all(&self, tid: TransactionId) {
        let mut state = self.state.lock().unwrap();
        state.locks.retain(|_, holders| {
            holders.retain(|h| h.tid != tid);
            !holders.is_empty()
        });
        state.waiting.remove(&tid);
        self.cvar.notify_all();
    }

    pub fn holds_lock(&self, tid: TransactionId, pid: PageId) -> bool {
        let state = self.state.lock().unwrap();
        state
            .locks
            .get(&pid)
            .map_or(false, |holders| holders.iter().any(|h| h.tid == tid))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::page::HeapPageId;

    fn page(no: usize) -> PageId {
        PageId::Heap(HeapPageId::new(1, no))
    }

    #[test]
    fn shared_locks_are_compatible() {
        let lm = LockManager::new();
        let t1 = TransactionId::new();
        let t2 = TransactionId::new();

        lm.acquire(t1, page(0), Permissions::ReadOnly).unwrap();
        lm.acquire(t2, page(0), Permissions::ReadOnly).unwrap();
        assert!(lm.holds_lock(t1, page(0)));
        assert!(lm.holds_lock(t2, page(0)));
    }

    #[test]
    fn regrant_is_idempotent() {
        let lm = LockManager::new();
        let t1 = TransactionId::new();

        lm.acquire(t1, page(0), Permissions::ReadWrite).unwrap();
        lm.acquire(t1, page(0), Permissions::ReadWrite).unwrap();
        // Shared after exclusive is already covered.
        lm.acquire(t1, page(0), Permissions::ReadOnly).unwrap();
        assert!(lm.holds_lock(t1, page(0)));
    }

    #[test]
    fn sole_shared_holder_upgrades() {
        let lm = LockManager::new();
        let t1 = TransactionId::new();

        lm.acquire(t1, page(0), Permissions::ReadOnly).unwrap();
        lm.acquire(t1, page(0), Permissions::ReadWrite).unwrap();
        assert!(lm.holds_lock(t1, page(0)));
    }

    #[test]
    fn release_all_frees_every_page() {
        let lm = LockManager::new();
        let t1 = TransactionId::new();
        let t2 = TransactionId::new();

        lm.acquire(t1, page(0), Permissions::ReadWrite).unwrap();
        lm.acquire(t1, page(1), Permissions::ReadWrite).unwrap();
        lm.release_all(t1);

        assert!(!lm.holds_lock(t1, page(0)));
        lm.acquire(t2, page(0), Permissions::ReadWrite).unwrap();
        lm.acquire(t2, page(1), Permissions::ReadWrite).unwrap();
    }

    #[test]
    fn blocked_exclusive_proceeds_after_release() {
        use std::sync::Arc;
        use std::thread;

        let lm = Arc::new(LockManager::new());
        let t1 = TransactionId::new();
        let t2 = TransactionId::new();

        lm.acquire(t1, page(0), Permissions::ReadWrite).unwrap();

        let lm2 = Arc::clone(&lm);
        let waiter = thread::spawn(move || lm2.acquire(t2, page(0), Permissions::ReadWrite));

        thread::sleep(Duration::from_millis(50));
        lm.release_all(t1);
        waiter.join().unwrap().unwrap();
        assert!(lm.holds_lock(t2, page(0)));
    }
}
