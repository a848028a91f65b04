//! Shared sync state
//!
//! Thread-safe registry of "namespace N is initially synchronized", shared
//! between the leader syncer (writer) and readers that must block until the
//! initial sync completes. Role transitions go through a CAS-like
//! `try_transit_role`; leaving the leader role clears the synchronized set.
//!
//! Waits are cancellable: the cancel context is polled on a granular tick
//! so an explicit cancel or deadline never hangs a waiter.

use crate::error::{Result, SyncError};
use parking_lot::Mutex;
use rustc_hash::FxHashSet;
use std::sync::Arc;
use std::time::Duration;
use tern_db_core::OpContext;
use tokio::sync::Notify;
use tracing::debug;

/// Raft role of this node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RaftRole {
    #[default]
    None,
    Leader,
    Follower,
    Candidate,
}

/// Role plus the currently known leader
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RaftInfo {
    pub role: RaftRole,
    pub leader_id: i32,
}

impl RaftInfo {
    pub fn leader(leader_id: i32) -> Self {
        Self {
            role: RaftRole::Leader,
            leader_id,
        }
    }

    pub fn follower(leader_id: i32) -> Self {
        Self {
            role: RaftRole::Follower,
            leader_id,
        }
    }
}

#[derive(Debug, Default)]
struct Inner {
    required: FxHashSet<String>,
    synchronized: FxHashSet<String>,
    enabled: bool,
    terminated: bool,
    current: RaftInfo,
    next: RaftInfo,
    initial_sync_done_cnt: usize,
    repl_threads: usize,
}

impl Inner {
    fn requires_sync(&self, name: &str) -> bool {
        self.enabled && (self.required.is_empty() || self.required.contains(name))
    }

    fn is_initial_sync_done(&self, name: &str) -> bool {
        !self.requires_sync(name)
            || (self.current.role == RaftRole::Leader && self.synchronized.contains(name))
    }

    fn is_initial_sync_done_all(&self) -> bool {
        !self.enabled
            || (self.next.role == RaftRole::Leader
                && self.initial_sync_done_cnt == self.repl_threads)
    }
}

/// Granularity of cancellation polling while waiting
const WAIT_TICK: Duration = Duration::from_millis(50);

/// Mutex-guarded sync registry with a cancellable condition
#[derive(Debug, Default)]
pub struct SharedSyncState {
    inner: Mutex<Inner>,
    cond: Notify,
}

impl SharedSyncState {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Wipe state for a new leadership term
    pub fn reset(&self, required: FxHashSet<String>, repl_threads: usize, enabled: bool) {
        let mut g = self.inner.lock();
        g.required = required;
        g.synchronized.clear();
        g.enabled = enabled;
        g.terminated = false;
        g.initial_sync_done_cnt = 0;
        g.repl_threads = repl_threads;
        g.current = RaftInfo::default();
        g.next = RaftInfo::default();
        debug!(repl_threads, enabled, "sync state reset");
    }

    /// Mark one namespace synchronized; a no-op unless this node currently
    /// leads
    pub fn mark_synchronized(&self, name: &str) {
        let mut g = self.inner.lock();
        if g.current.role == RaftRole::Leader {
            let inserted = g.synchronized.insert(name.to_string());
            drop(g);
            debug!(ns = name, inserted, "marking namespace synchronized");
            if inserted {
                self.cond.notify_waiters();
            }
        } else {
            debug!(
                ns = name,
                role = ?g.current.role,
                "ignoring synchronized mark from non-leader"
            );
        }
    }

    /// Mark a whole sync thread finished; the DB counts as synchronized
    /// when every thread has reported
    pub fn mark_synchronized_all(&self) {
        let mut g = self.inner.lock();
        if g.current.role == RaftRole::Leader {
            g.initial_sync_done_cnt += 1;
            let cnt = g.initial_sync_done_cnt;
            drop(g);
            debug!(cnt, "marking whole DB synchronized");
            self.cond.notify_waiters();
        }
    }

    /// Stage the next role
    pub fn set_role(&self, info: RaftInfo) {
        self.inner.lock().next = info;
    }

    /// CAS-like transition: applies only when `expected` is the staged
    /// role. Leaving leadership clears the synchronized registry.
    pub fn try_transit_role(&self, expected: RaftInfo) -> RaftInfo {
        let mut g = self.inner.lock();
        if expected == g.next {
            if g.current.role == RaftRole::Leader && g.current.role != g.next.role {
                debug!("clearing synchronized set on role switch");
                g.synchronized.clear();
                g.initial_sync_done_cnt = 0;
            }
            g.current = g.next;
            drop(g);
            self.cond.notify_waiters();
            return expected;
        }
        g.next
    }

    pub fn current_role(&self) -> RaftInfo {
        self.inner.lock().current
    }

    pub fn roles_pair(&self) -> (RaftInfo, RaftInfo) {
        let g = self.inner.lock();
        (g.current, g.next)
    }

    /// Terminate: wakes every waiter with `Terminated`
    pub fn set_terminated(&self) {
        {
            let mut g = self.inner.lock();
            g.terminated = true;
            g.current = RaftInfo::default();
            g.next = RaftInfo::default();
        }
        self.cond.notify_waiters();
    }

    pub fn is_initial_sync_done(&self, name: &str) -> bool {
        self.inner.lock().is_initial_sync_done(name)
    }

    pub fn is_initial_sync_done_all(&self) -> bool {
        self.inner.lock().is_initial_sync_done_all()
    }

    /// Block until the namespace finishes its initial sync.
    ///
    /// Fails with `Terminated` when the state terminates, and with
    /// `ReplicationState` when the role switches away from leader while
    /// waiting. A successful return implies the node currently leads and
    /// the namespace is in the synchronized set.
    pub async fn await_initial_sync(&self, name: &str, ctx: &OpContext) -> Result<()> {
        loop {
            let notified = self.cond.notified();
            {
                let g = self.inner.lock();
                if g.is_initial_sync_done(name) {
                    return Ok(());
                }
                if g.terminated {
                    return Err(SyncError::Terminated("cluster was terminated".into()));
                }
                if g.next.role == RaftRole::Follower {
                    return Err(SyncError::ReplicationState(
                        "node role was changed to follower".into(),
                    ));
                }
            }
            ctx.check()?;
            debug!(ns = name, "initial sync is not done, awaiting");
            let _ = tokio::time::timeout(WAIT_TICK, notified).await;
        }
    }

    /// Whole-DB variant of [`SharedSyncState::await_initial_sync`]
    pub async fn await_initial_sync_all(&self, ctx: &OpContext) -> Result<()> {
        loop {
            let notified = self.cond.notified();
            {
                let g = self.inner.lock();
                if g.is_initial_sync_done_all() {
                    return Ok(());
                }
                if g.terminated {
                    return Err(SyncError::Terminated("cluster was terminated".into()));
                }
                if g.next.role == RaftRole::Follower {
                    return Err(SyncError::ReplicationState(
                        "node role was changed to follower".into(),
                    ));
                }
            }
            ctx.check()?;
            let _ = tokio::time::timeout(WAIT_TICK, notified).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn leader_state(required: &[&str]) -> Arc<SharedSyncState> {
        let state = SharedSyncState::new();
        state.reset(
            required.iter().map(|s| s.to_string()).collect(),
            1,
            true,
        );
        state.set_role(RaftInfo::leader(0));
        state.try_transit_role(RaftInfo::leader(0));
        state
    }

    #[test]
    fn transit_role_requires_expected() {
        let state = SharedSyncState::new();
        state.set_role(RaftInfo::leader(2));
        // wrong expectation: no transition, staged role returned
        let got = state.try_transit_role(RaftInfo::follower(2));
        assert_eq!(got, RaftInfo::leader(2));
        assert_eq!(state.current_role(), RaftInfo::default());
        // right expectation
        let got = state.try_transit_role(RaftInfo::leader(2));
        assert_eq!(got, RaftInfo::leader(2));
        assert_eq!(state.current_role(), RaftInfo::leader(2));
    }

    #[test]
    fn leaving_leadership_clears_synchronized() {
        let state = leader_state(&["books"]);
        state.mark_synchronized("books");
        assert!(state.is_initial_sync_done("books"));
        state.set_role(RaftInfo::follower(1));
        state.try_transit_role(RaftInfo::follower(1));
        assert!(!state.is_initial_sync_done("books"));
    }

    #[test]
    fn marks_from_non_leader_are_ignored() {
        let state = SharedSyncState::new();
        state.reset(FxHashSet::from_iter(["books".to_string()]), 1, true);
        state.mark_synchronized("books");
        assert!(!state.is_initial_sync_done("books"));
    }

    #[test]
    fn unrequired_namespaces_are_always_done() {
        let state = leader_state(&["books"]);
        assert!(state.is_initial_sync_done("other"));
        assert!(!state.is_initial_sync_done("books"));
    }

    #[tokio::test]
    async fn await_unblocks_on_mark() {
        let state = leader_state(&["books"]);
        let waiter = {
            let state = state.clone();
            tokio::spawn(async move {
                state
                    .await_initial_sync("books", &OpContext::new())
                    .await
            })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        state.mark_synchronized("books");
        waiter.await.unwrap().unwrap();
        assert!(state.is_initial_sync_done("books"));
    }

    #[tokio::test]
    async fn await_fails_on_terminate() {
        let state = leader_state(&["books"]);
        let waiter = {
            let state = state.clone();
            tokio::spawn(async move {
                state
                    .await_initial_sync("books", &OpContext::new())
                    .await
            })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        state.set_terminated();
        let err = waiter.await.unwrap().unwrap_err();
        assert!(matches!(err, SyncError::Terminated(_)));
    }

    #[tokio::test]
    async fn await_fails_on_role_switch() {
        let state = leader_state(&["books"]);
        let waiter = {
            let state = state.clone();
            tokio::spawn(async move {
                state
                    .await_initial_sync("books", &OpContext::new())
                    .await
            })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        state.set_role(RaftInfo::follower(1));
        let err = waiter.await.unwrap().unwrap_err();
        assert!(matches!(err, SyncError::ReplicationState(_)));
    }

    #[tokio::test]
    async fn await_respects_cancel_context() {
        let state = leader_state(&["books"]);
        let flag = tern_db_core::CancelFlag::new();
        let ctx = OpContext::with_cancel(flag.clone());
        let waiter = {
            let state = state.clone();
            tokio::spawn(async move { state.await_initial_sync("books", &ctx).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        flag.cancel();
        let err = waiter.await.unwrap().unwrap_err();
        assert!(matches!(err, SyncError::Core(_)));
    }
}
