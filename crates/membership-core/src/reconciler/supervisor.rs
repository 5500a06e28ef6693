//! Owns the two long-lived substrate subscriptions and keeps them alive:
//! each stream is re-subscribed on error or clean completion, with a flat
//! delay between attempts (no exponential backoff — a dropped watch is
//! expected to recover on the next poll interval, not escalate).

use std::sync::Arc;

use futures::StreamExt;
use tokio_util::sync::CancellationToken;

use crate::actions::Transition;
use crate::config::ReconcilerConfig;
use crate::ports::{
    LeaderElectionExecutor, LeaderElectionStreamEvent, MembershipExecutor, MembershipStreamEvent,
};
use crate::reconciler::Reconciler;
use crate::state::{ClusterStateUpdate, StreamKind};

pub struct EventStreamSupervisor {
    shutdown: CancellationToken,
    membership_task: tokio::task::JoinHandle<()>,
    leader_election_task: tokio::task::JoinHandle<()>,
}

impl EventStreamSupervisor {
    pub fn spawn(
        reconciler: Arc<Reconciler>,
        membership_executor: Arc<dyn MembershipExecutor>,
        leader_election_executor: Arc<dyn LeaderElectionExecutor>,
        config: Arc<ReconcilerConfig>,
    ) -> Self {
        let shutdown = CancellationToken::new();

        let membership_task = tokio::spawn(run_membership_subscription(
            reconciler.clone(),
            membership_executor,
            config.clone(),
            shutdown.clone(),
        ));

        let leader_election_task = tokio::spawn(run_leader_election_subscription(
            reconciler,
            leader_election_executor,
            config,
            shutdown.clone(),
        ));

        Self {
            shutdown,
            membership_task,
            leader_election_task,
        }
    }

    pub async fn shutdown(self) {
        self.shutdown.cancel();
        let _ = self.membership_task.await;
        let _ = self.leader_election_task.await;
    }
}

async fn run_membership_subscription(
    reconciler: Arc<Reconciler>,
    executor: Arc<dyn MembershipExecutor>,
    config: Arc<ReconcilerConfig>,
    shutdown: CancellationToken,
) {
    loop {
        if shutdown.is_cancelled() {
            return;
        }
        let mut stream = executor.watch_membership_events();
        tracing::info!("membership event subscription established");
        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => return,
                item = stream.next() => {
                    match item {
                        Some(MembershipStreamEvent::Event(evt)) => {
                            let rx = reconciler.apply(move |_state| {
                                Box::pin(async move {
                                    let transition: Transition =
                                        Box::new(move |state| Ok(state.process_membership_event(evt)));
                                    Ok(transition)
                                })
                            });
                            if let Err(e) = rx.await {
                                tracing::warn!(error = %e, "membership event dropped, reconciler channel closed");
                            }
                        }
                        Some(MembershipStreamEvent::Disconnected { cause }) => {
                            tracing::warn!(cause = %cause, "membership event stream reported disconnect");
                            break;
                        }
                        None => {
                            tracing::warn!("membership event stream completed; treating as transient disconnect");
                            break;
                        }
                    }
                }
            }
        }
        emit_disconnected(&reconciler, StreamKind::Membership).await;
        if shutdown.is_cancelled() {
            return;
        }
        tokio::select! {
            _ = shutdown.cancelled() => return,
            _ = tokio::time::sleep(config.reconnect_interval()) => {}
        }
    }
}

async fn run_leader_election_subscription(
    reconciler: Arc<Reconciler>,
    executor: Arc<dyn LeaderElectionExecutor>,
    config: Arc<ReconcilerConfig>,
    shutdown: CancellationToken,
) {
    loop {
        if shutdown.is_cancelled() {
            return;
        }
        let mut stream = executor.watch_leader_election_updates();
        tracing::info!("leader election event subscription established");
        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => return,
                item = stream.next() => {
                    match item {
                        Some(LeaderElectionStreamEvent::Event(evt)) => {
                            let rx = reconciler.apply(move |_state| {
                                Box::pin(async move {
                                    let transition: Transition = Box::new(move |state| {
                                        Ok(state.process_leader_election_event(evt))
                                    });
                                    Ok(transition)
                                })
                            });
                            if let Err(e) = rx.await {
                                tracing::warn!(error = %e, "leader election event dropped, reconciler channel closed");
                            }
                        }
                        Some(LeaderElectionStreamEvent::Disconnected { cause }) => {
                            tracing::warn!(cause = %cause, "leader election event stream reported disconnect");
                            break;
                        }
                        None => {
                            tracing::warn!("leader election event stream completed; treating as transient disconnect");
                            break;
                        }
                    }
                }
            }
        }
        emit_disconnected(&reconciler, StreamKind::LeaderElection).await;
        if shutdown.is_cancelled() {
            return;
        }
        tokio::select! {
            _ = shutdown.cancelled() => return,
            _ = tokio::time::sleep(config.reconnect_interval()) => {}
        }
    }
}

async fn emit_disconnected(reconciler: &Arc<Reconciler>, kind: StreamKind) {
    let rx = reconciler.apply(move |_state| {
        Box::pin(async move {
            let transition: Transition =
                Box::new(move |state| Ok((state.clone(), vec![ClusterStateUpdate::Disconnected(kind)])));
            Ok(transition)
        })
    });
    let _ = rx.await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::{Clock, ManualClock};
    use crate::testing::{FakeLeaderElectionExecutor, FakeMembershipExecutor};
    use membership_types::ClusterMember;
    use std::sync::atomic::AtomicBool;
    use std::sync::Mutex;

    #[tokio::test]
    async fn reconnects_and_keeps_delivering_sibling_updates() {
        let membership = Arc::new(FakeMembershipExecutor::new());
        let leader = Arc::new(FakeLeaderElectionExecutor::new());
        let clock: Arc<dyn Clock> = Arc::new(ManualClock::new(1_000_000));
        let mut config = ReconcilerConfig::with_stale_threshold(9_000);
        config.reconnect_interval_ms = 10;
        let config = Arc::new(config);

        let reconciler = Arc::new(Reconciler::spawn(
            ClusterMember::new("local"),
            clock,
            config.clone(),
            membership.clone(),
            leader.clone(),
            Arc::new(AtomicBool::new(false)),
        ));

        let supervisor = EventStreamSupervisor::spawn(
            reconciler.clone(),
            membership.clone(),
            leader,
            config,
        );

        let mut changes = Box::pin(reconciler.changes());
        let collected: Arc<Mutex<Vec<ClusterStateUpdate>>> = Arc::new(Mutex::new(Vec::new()));
        let collected_task = collected.clone();
        tokio::spawn(async move {
            use futures::StreamExt as _;
            while let Some(update) = changes.next().await {
                collected_task.lock().unwrap().extend(update.delta_events);
            }
        });

        membership
            .push_event(MembershipStreamEvent::Event(
                crate::state::MembershipEvent::SiblingAdded(membership_types::MemberRevision::new(
                    ClusterMember::new("sibling-a"),
                    1,
                    1_000_000,
                )),
            ))
            .await;
        tokio::time::sleep(std::time::Duration::from_millis(30)).await;
        assert!(reconciler.current().siblings().contains_key("sibling-a"));

        membership.disconnect();
        tokio::time::sleep(std::time::Duration::from_millis(30)).await;
        assert!(collected
            .lock()
            .unwrap()
            .contains(&ClusterStateUpdate::Disconnected(StreamKind::Membership)));

        membership
            .push_event(MembershipStreamEvent::Event(
                crate::state::MembershipEvent::SiblingAdded(membership_types::MemberRevision::new(
                    ClusterMember::new("sibling-b"),
                    1,
                    1_000_000,
                )),
            ))
            .await;
        tokio::time::sleep(std::time::Duration::from_millis(30)).await;
        assert!(reconciler.current().siblings().contains_key("sibling-b"));
        assert!(reconciler.current().siblings().contains_key("sibling-a"));

        supervisor.shutdown().await;
        reconciler.shutdown().await;
    }

    #[tokio::test]
    async fn leader_election_stream_reconnects_and_keeps_delivering_events() {
        let membership = Arc::new(FakeMembershipExecutor::new());
        let leader = Arc::new(FakeLeaderElectionExecutor::new());
        let clock: Arc<dyn Clock> = Arc::new(ManualClock::new(1_000_000));
        let mut config = ReconcilerConfig::with_stale_threshold(9_000);
        config.reconnect_interval_ms = 10;
        let config = Arc::new(config);

        let reconciler = Arc::new(Reconciler::spawn(
            ClusterMember::new("local"),
            clock,
            config.clone(),
            membership.clone(),
            leader.clone(),
            Arc::new(AtomicBool::new(false)),
        ));

        let supervisor = EventStreamSupervisor::spawn(
            reconciler.clone(),
            membership,
            leader.clone(),
            config,
        );

        let mut changes = Box::pin(reconciler.changes());
        let collected: Arc<Mutex<Vec<ClusterStateUpdate>>> = Arc::new(Mutex::new(Vec::new()));
        let collected_task = collected.clone();
        tokio::spawn(async move {
            use futures::StreamExt as _;
            while let Some(update) = changes.next().await {
                collected_task.lock().unwrap().extend(update.delta_events);
            }
        });

        leader
            .push_event(LeaderElectionStreamEvent::Event(
                crate::state::LeaderElectionEvent::LeaderElected {
                    member_id: "local".into(),
                    revision: membership_types::MemberRevision::new(
                        membership_types::LeadershipRecord {
                            member_id: "local".into(),
                            role: membership_types::LeadershipRole::Leader,
                            election_timestamp: 1_000_000,
                        },
                        1,
                        1_000_000,
                    ),
                },
            ))
            .await;
        tokio::time::sleep(std::time::Duration::from_millis(30)).await;
        assert_eq!(
            reconciler.current().local_leadership.payload.role,
            membership_types::LeadershipRole::Leader
        );

        leader.disconnect();
        tokio::time::sleep(std::time::Duration::from_millis(30)).await;
        assert!(collected
            .lock()
            .unwrap()
            .contains(&ClusterStateUpdate::Disconnected(StreamKind::LeaderElection)));

        leader
            .push_event(LeaderElectionStreamEvent::Event(
                crate::state::LeaderElectionEvent::LeaderLost {
                    member_id: "local".into(),
                },
            ))
            .await;
        tokio::time::sleep(std::time::Duration::from_millis(30)).await;
        assert_eq!(
            reconciler.current().local_leadership.payload.role,
            membership_types::LeadershipRole::NonLeader
        );

        supervisor.shutdown().await;
        reconciler.shutdown().await;
    }
}
