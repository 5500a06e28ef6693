//! In-memory test doubles for the two substrate ports. Used by this
//! crate's own tests and exported behind `test-support` for downstream
//! adapter crates' tests — the connector-core analogue of the
//! `test-support` feature convention seen on sibling pack repos' core
//! crates (e.g. `oj-core`, `oj-adapters`).

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use futures::stream::BoxStream;
use membership_types::{ClusterMember, MemberRevision};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

use crate::error::ReconcileError;
use crate::ports::{
    LeaderElectionExecutor, LeaderElectionStreamEvent, MembershipExecutor, MembershipStreamEvent,
};

/// A `MembershipExecutor` backed by channels the test drives directly:
/// `push_event` feeds the watch stream, `writes()`/`deletes()` observe
/// what the code under test actually submitted. `watch_membership_events`
/// may be called more than once — each call opens a fresh channel, and
/// `disconnect()` drops the current sender so a subscriber in mid-stream
/// observes the end of the channel, the same way a dropped `kube::Api`
/// watch would.
pub struct FakeMembershipExecutor {
    writes: AtomicUsize,
    deletes: AtomicUsize,
    current: Mutex<Option<mpsc::Sender<MembershipStreamEvent>>>,
    pending_rx: Mutex<Option<mpsc::Receiver<MembershipStreamEvent>>>,
    fail_writes: std::sync::atomic::AtomicBool,
}

impl Default for FakeMembershipExecutor {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeMembershipExecutor {
    /// Pre-seeds the first subscription's channel so `push_event` can be
    /// called right after construction, before the watcher task has had a
    /// chance to run and call `watch_membership_events` itself.
    pub fn new() -> Self {
        let (tx, rx) = mpsc::channel(64);
        Self {
            writes: AtomicUsize::new(0),
            deletes: AtomicUsize::new(0),
            current: Mutex::new(Some(tx)),
            pending_rx: Mutex::new(Some(rx)),
            fail_writes: std::sync::atomic::AtomicBool::new(false),
        }
    }

    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    pub fn deletes(&self) -> usize {
        self.deletes.load(Ordering::SeqCst)
    }

    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    pub async fn push_event(&self, evt: MembershipStreamEvent) {
        let tx = self
            .current
            .lock()
            .unwrap()
            .clone()
            .expect("watch_membership_events must be subscribed before push_event");
        let _ = tx.send(evt).await;
    }

    /// Ends the current subscription's stream without an explicit
    /// `Disconnected` event, simulating a watch whose underlying
    /// connection just dropped.
    pub fn disconnect(&self) {
        self.current.lock().unwrap().take();
    }
}

#[async_trait]
impl MembershipExecutor for FakeMembershipExecutor {
    async fn write_member_record(
        &self,
        revision: MemberRevision<ClusterMember>,
    ) -> Result<MemberRevision<ClusterMember>, ReconcileError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(ReconcileError::SubstrateUnavailable("fake write failure".into()));
        }
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(revision)
    }

    async fn delete_member_record(&self, _member_id: &str) -> Result<(), ReconcileError> {
        self.deletes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn watch_membership_events(&self) -> BoxStream<'static, MembershipStreamEvent> {
        if let Some(rx) = self.pending_rx.lock().unwrap().take() {
            return Box::pin(ReceiverStream::new(rx));
        }
        let (tx, rx) = mpsc::channel(64);
        *self.current.lock().unwrap() = Some(tx);
        Box::pin(ReceiverStream::new(rx))
    }
}

/// Same re-subscribable shape as [`FakeMembershipExecutor`].
pub struct FakeLeaderElectionExecutor {
    joins: AtomicUsize,
    leaves: AtomicUsize,
    current: Mutex<Option<mpsc::Sender<LeaderElectionStreamEvent>>>,
    pending_rx: Mutex<Option<mpsc::Receiver<LeaderElectionStreamEvent>>>,
}

impl Default for FakeLeaderElectionExecutor {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeLeaderElectionExecutor {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::channel(64);
        Self {
            joins: AtomicUsize::new(0),
            leaves: AtomicUsize::new(0),
            current: Mutex::new(Some(tx)),
            pending_rx: Mutex::new(Some(rx)),
        }
    }

    pub fn joins(&self) -> usize {
        self.joins.load(Ordering::SeqCst)
    }

    pub fn leaves(&self) -> usize {
        self.leaves.load(Ordering::SeqCst)
    }

    pub async fn push_event(&self, evt: LeaderElectionStreamEvent) {
        let tx = self
            .current
            .lock()
            .unwrap()
            .clone()
            .expect("watch_leader_election_updates must be subscribed before push_event");
        let _ = tx.send(evt).await;
    }

    pub fn disconnect(&self) {
        self.current.lock().unwrap().take();
    }
}

#[async_trait]
impl LeaderElectionExecutor for FakeLeaderElectionExecutor {
    async fn join_leader_election(&self, _member_id: &str) -> Result<(), ReconcileError> {
        self.joins.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn leave_leader_election(&self) -> Result<(), ReconcileError> {
        self.leaves.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn watch_leader_election_updates(&self) -> BoxStream<'static, LeaderElectionStreamEvent> {
        if let Some(rx) = self.pending_rx.lock().unwrap().take() {
            return Box::pin(ReceiverStream::new(rx));
        }
        let (tx, rx) = mpsc::channel(64);
        *self.current.lock().unwrap() = Some(tx);
        Box::pin(ReceiverStream::new(rx))
    }
}
