//! The single-writer reconciliation engine. One worker task owns every
//! `ClusterState` mutation; readers observe committed snapshots through a
//! lock-free [`arc_swap::ArcSwap`] and a broadcast stream of deltas.

pub mod supervisor;

use std::sync::Arc;

use arc_swap::ArcSwap;
use futures::stream::{self, StreamExt};
use membership_types::ClusterMember;
use tokio::sync::{broadcast, mpsc, oneshot, Mutex as AsyncMutex};
use tokio_stream::wrappers::BroadcastStream;
use tokio_util::sync::CancellationToken;

use crate::actions::ActionProducer;
use crate::clock::Clock;
use crate::config::ReconcilerConfig;
use crate::error::ReconcileError;
use crate::ports::{LeaderElectionExecutor, MembershipExecutor};
use crate::reconcile_actions::{self, ReconcileActionsContext};
use crate::state::{ClusterState, ClusterStateUpdate};

/// One emission of the `changes()` stream: the new snapshot plus the
/// deltas that produced it. The first emission to a new subscriber carries
/// a synthetic snapshot with no deltas.
#[derive(Clone)]
pub struct Update {
    pub snapshot: ClusterState,
    pub delta_events: Vec<ClusterStateUpdate>,
}

struct QueueItem {
    producer: ActionProducer,
    reply: oneshot::Sender<Result<ClusterState, ReconcileError>>,
}

pub struct Reconciler {
    current: Arc<ArcSwap<ClusterState>>,
    queue_tx: mpsc::UnboundedSender<QueueItem>,
    updates_tx: broadcast::Sender<Update>,
    shutdown: CancellationToken,
    worker: AsyncMutex<Option<tokio::task::JoinHandle<()>>>,
    config: Arc<ReconcilerConfig>,
}

impl Reconciler {
    pub fn spawn(
        local: ClusterMember,
        clock: Arc<dyn Clock>,
        config: Arc<ReconcilerConfig>,
        membership_executor: Arc<dyn MembershipExecutor>,
        leader_election_executor: Arc<dyn LeaderElectionExecutor>,
        desired_in_leader_election: Arc<std::sync::atomic::AtomicBool>,
    ) -> Self {
        let initial = ClusterState::new(local, clock, config.clone());
        let current = Arc::new(ArcSwap::from_pointee(initial));
        let (queue_tx, queue_rx) = mpsc::unbounded_channel::<QueueItem>();
        let (updates_tx, _) = broadcast::channel(1024);
        let shutdown = CancellationToken::new();

        let worker = tokio::spawn(run_worker(
            current.clone(),
            queue_rx,
            updates_tx.clone(),
            shutdown.clone(),
            config.clone(),
            ReconcileActionsContext {
                membership_executor,
                leader_election_executor,
                desired_in_leader_election,
            },
        ));

        Self {
            current,
            queue_tx,
            updates_tx,
            shutdown,
            worker: AsyncMutex::new(Some(worker)),
            config,
        }
    }

    /// Submits an action to the single writer. Resolves once the action's
    /// side effect completes and, on success, its transition commits;
    /// resolves to `Err` without ever committing a partial transition on
    /// side-effect failure.
    pub fn apply(
        &self,
        producer: impl FnOnce(&ClusterState) -> crate::actions::PendingAction + Send + 'static,
    ) -> oneshot::Receiver<Result<ClusterState, ReconcileError>> {
        let (reply, rx) = oneshot::channel();
        let item = QueueItem {
            producer: Box::new(producer),
            reply,
        };
        if self.shutdown.is_cancelled() || self.queue_tx.send(item).is_err() {
            let (reply2, rx2) = oneshot::channel();
            let _ = reply2.send(Err(ReconcileError::ShuttingDown));
            return rx2;
        }
        rx
    }

    pub fn current(&self) -> ClusterState {
        (**self.current.load()).clone()
    }

    /// First emission is a synthetic snapshot of the current state;
    /// subsequent emissions are committed deltas. Backed by a bounded
    /// broadcast channel — a subscriber that falls far enough behind loses
    /// the oldest buffered deltas and should fall back to `current()` for
    /// ground truth.
    pub fn changes(&self) -> impl tokio_stream::Stream<Item = Update> + Send + 'static {
        let initial = Update {
            snapshot: self.current(),
            delta_events: vec![],
        };
        let rx = self.updates_tx.subscribe();
        let rest = BroadcastStream::new(rx).filter_map(|r| async move { r.ok() });
        stream::once(async move { initial }).chain(rest)
    }

    pub fn config(&self) -> &ReconcilerConfig {
        &self.config
    }

    /// Idempotent: stops accepting new actions, drains in-flight work up to
    /// `shutdownGraceMs`, and terminates the worker.
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        let mut guard = self.worker.lock().await;
        if let Some(handle) = guard.take() {
            let grace = self.config.shutdown_grace();
            if tokio::time::timeout(grace, handle).await.is_err() {
                tracing::warn!("reconciler worker did not exit within shutdown grace period");
            }
        }
    }
}

async fn run_worker(
    current: Arc<ArcSwap<ClusterState>>,
    mut queue_rx: mpsc::UnboundedReceiver<QueueItem>,
    updates_tx: broadcast::Sender<Update>,
    shutdown: CancellationToken,
    config: Arc<ReconcilerConfig>,
    ctx: ReconcileActionsContext,
) {
    let mut long_interval = tokio::time::interval(config.long_cycle());
    long_interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    // Consume the immediate first tick so housekeeping doesn't fire before
    // the state has had a chance to receive any external actions.
    long_interval.tick().await;

    loop {
        tokio::select! {
            biased;
            _ = shutdown.cancelled() => {
                drain_on_shutdown(&mut queue_rx);
                break;
            }
            Some(item) = queue_rx.recv() => {
                run_external_action(&current, &updates_tx, item).await;
            }
            _ = long_interval.tick() => {
                run_housekeeping(&current, &updates_tx, &ctx).await;
            }
        }
    }
}

fn drain_on_shutdown(queue_rx: &mut mpsc::UnboundedReceiver<QueueItem>) {
    while let Ok(item) = queue_rx.try_recv() {
        let _ = item.reply.send(Err(ReconcileError::ShuttingDown));
    }
}

async fn run_external_action(
    current: &Arc<ArcSwap<ClusterState>>,
    updates_tx: &broadcast::Sender<Update>,
    item: QueueItem,
) {
    let snapshot = (**current.load()).clone();
    let pending = (item.producer)(&snapshot);
    let result = match pending.await {
        Ok(transition) => {
            let snapshot = (**current.load()).clone();
            match transition(&snapshot) {
                Ok((next, deltas)) => {
                    commit(current, updates_tx, next.clone(), deltas);
                    Ok(next)
                }
                Err(e) => Err(e),
            }
        }
        Err(e) => Err(e),
    };
    let _ = item.reply.send(result);
}

async fn run_housekeeping(
    current: &Arc<ArcSwap<ClusterState>>,
    updates_tx: &broadcast::Sender<Update>,
    ctx: &ReconcileActionsContext,
) {
    let snapshot = (**current.load()).clone();
    let batch = reconcile_actions::plan(&snapshot, ctx);
    for producer in batch {
        let snapshot = (**current.load()).clone();
        let pending = producer(&snapshot);
        match pending.await {
            Ok(transition) => {
                let snapshot = (**current.load()).clone();
                match transition(&snapshot) {
                    Ok((next, deltas)) => commit(current, updates_tx, next, deltas),
                    Err(e) => {
                        tracing::warn!(error = %e, "internal reconciliation transition rejected; will retry next cycle");
                    }
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "internal reconciliation action failed; will retry next cycle");
            }
        }
    }
}

fn commit(
    current: &Arc<ArcSwap<ClusterState>>,
    updates_tx: &broadcast::Sender<Update>,
    next: ClusterState,
    deltas: Vec<ClusterStateUpdate>,
) {
    current.store(Arc::new(next.clone()));
    if !deltas.is_empty() {
        let _ = updates_tx.send(Update {
            snapshot: next,
            delta_events: deltas,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::testing::{FakeLeaderElectionExecutor, FakeMembershipExecutor};
    use membership_types::MemberRevision;
    use std::sync::atomic::AtomicBool;
    use tokio_stream::StreamExt as TokioStreamExt;

    fn reconciler(
        membership: Arc<FakeMembershipExecutor>,
        leader: Arc<FakeLeaderElectionExecutor>,
    ) -> Reconciler {
        let clock: Arc<dyn Clock> = Arc::new(ManualClock::new(1_000_000));
        let config = Arc::new(ReconcilerConfig::with_stale_threshold(9_000));
        Reconciler::spawn(
            ClusterMember::new("local"),
            clock,
            config,
            membership,
            leader,
            Arc::new(AtomicBool::new(false)),
        )
    }

    #[tokio::test]
    async fn apply_commits_and_reports_new_state() {
        let membership = Arc::new(FakeMembershipExecutor::new());
        let leader = Arc::new(FakeLeaderElectionExecutor::new());
        let r = reconciler(membership.clone(), leader);

        let rx = r.apply(crate::actions::register_local(membership.clone(), |mut m| {
            m.active = true;
            MemberRevision::new(m, 1, 0)
        }));
        let next = rx.await.unwrap().unwrap();
        assert_eq!(next.local_revision.revision_number, 1);
        assert_eq!(r.current().local_revision.revision_number, 1);
        r.shutdown().await;
    }

    #[tokio::test]
    async fn changes_stream_first_item_is_current_snapshot() {
        let membership = Arc::new(FakeMembershipExecutor::new());
        let leader = Arc::new(FakeLeaderElectionExecutor::new());
        let r = reconciler(membership, leader);
        let mut changes = Box::pin(r.changes());
        let first = TokioStreamExt::next(&mut changes).await.unwrap();
        assert!(first.delta_events.is_empty());
        assert_eq!(
            first.snapshot.local_revision.payload.member_id,
            "local"
        );
        r.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn heartbeat_bumps_revision_on_long_cycle_ticks() {
        let membership = Arc::new(FakeMembershipExecutor::new());
        let leader = Arc::new(FakeLeaderElectionExecutor::new());
        let clock = Arc::new(ManualClock::new(1_000_000));
        let mut config = ReconcilerConfig::with_stale_threshold(9_000);
        config.heartbeat_interval_ms = 100;
        config.reconciler_long_cycle_ms = 10;
        let r = Reconciler::spawn(
            ClusterMember::new("local"),
            clock.clone() as Arc<dyn Clock>,
            Arc::new(config),
            membership.clone(),
            leader,
            Arc::new(AtomicBool::new(false)),
        );

        let rx = r.apply(crate::actions::register_local(membership.clone(), |mut m| {
            m.active = true;
            MemberRevision::new(m, 1, clock.now_millis())
        }));
        rx.await.unwrap().unwrap();
        assert_eq!(membership.writes(), 1);

        for _ in 0..35 {
            clock.advance(10);
            tokio::time::advance(std::time::Duration::from_millis(10)).await;
        }

        assert!(r.current().local_revision.revision_number >= 4);
        assert!(membership.writes() >= 4);
        r.shutdown().await;
    }

    #[tokio::test]
    async fn shutdown_is_idempotent_and_rejects_further_apply() {
        let membership = Arc::new(FakeMembershipExecutor::new());
        let leader = Arc::new(FakeLeaderElectionExecutor::new());
        let r = reconciler(membership.clone(), leader);
        r.shutdown().await;
        r.shutdown().await;
        let rx = r.apply(crate::actions::register_local(membership, |mut m| {
            m.active = true;
            MemberRevision::new(m, 1, 0)
        }));
        assert!(matches!(
            rx.await.unwrap(),
            Err(ReconcileError::ShuttingDown)
        ));
    }
}
