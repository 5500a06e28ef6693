//! The public facade: register/unregister membership, join/leave the
//! leadership campaign, and read current cluster state, without exposing
//! the reconciler's internal queuing.

use std::collections::HashMap;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use membership_types::{ClusterMember, LeadershipRecord, MemberRevision};
use tokio_stream::Stream;

use crate::actions;
use crate::clock::{Clock, SystemClock};
use crate::config::{ConfigError, ReconcilerConfig};
use crate::error::ReconcileError;
use crate::ports::{LeaderElectionExecutor, MembershipExecutor};
use crate::reconciler::supervisor::EventStreamSupervisor;
use crate::reconciler::{Reconciler, Update};

pub struct Connector {
    reconciler: Arc<Reconciler>,
    supervisor: tokio::sync::Mutex<Option<EventStreamSupervisor>>,
    membership_executor: Arc<dyn MembershipExecutor>,
    leader_election_executor: Arc<dyn LeaderElectionExecutor>,
    desired_in_leader_election: Arc<AtomicBool>,
}

impl Connector {
    pub fn builder(local_member_id: impl Into<String>) -> ConnectorBuilder {
        ConnectorBuilder::new(local_member_id)
    }

    pub async fn register(
        &self,
        self_update: impl FnOnce(ClusterMember) -> MemberRevision<ClusterMember> + Send + 'static,
    ) -> Result<ClusterMember, ReconcileError> {
        let rx = self.reconciler.apply(actions::register_local(
            self.membership_executor.clone(),
            self_update,
        ));
        let state = rx.await.unwrap_or(Err(ReconcileError::ShuttingDown))?;
        Ok(state.local_revision.payload)
    }

    pub async fn unregister(
        &self,
        self_update: impl FnOnce(ClusterMember) -> MemberRevision<ClusterMember> + Send + 'static,
    ) -> Result<(), ReconcileError> {
        let rx = self.reconciler.apply(actions::unregister_local(
            self.membership_executor.clone(),
            self_update,
        ));
        rx.await.unwrap_or(Err(ReconcileError::ShuttingDown))?;
        Ok(())
    }

    pub async fn join_leadership_group(&self) -> Result<(), ReconcileError> {
        self.desired_in_leader_election
            .store(true, std::sync::atomic::Ordering::SeqCst);
        let rx = self
            .reconciler
            .apply(actions::join_leadership_group(self.leader_election_executor.clone()));
        rx.await.unwrap_or(Err(ReconcileError::ShuttingDown))?;
        Ok(())
    }

    /// `onlyNonLeader = true` avoids the self-demotion surprise of a leader
    /// accidentally leaving its own campaign — in that case the call is a
    /// no-op and returns `false`. Returns `true` iff the campaign was
    /// actually left, i.e. `!inLeaderElectionProcess` after the call. Only
    /// clears `desired_in_leader_election` on an actual leave — flipping it
    /// on a no-op would make the next housekeeping cycle force an
    /// unconditional leave behind `onlyNonLeader`'s back.
    pub async fn leave_leadership_group(&self, only_non_leader: bool) -> Result<bool, ReconcileError> {
        let rx = self.reconciler.apply(actions::leave_leadership_group(
            self.leader_election_executor.clone(),
            only_non_leader,
        ));
        let state = rx.await.unwrap_or(Err(ReconcileError::ShuttingDown))?;
        let left = !state.in_leader_election_process;
        if left {
            self.desired_in_leader_election
                .store(false, std::sync::atomic::Ordering::SeqCst);
        }
        Ok(left)
    }

    pub fn get_local_member(&self) -> ClusterMember {
        self.reconciler.current().local_revision.payload
    }

    pub fn get_siblings(&self) -> HashMap<String, MemberRevision<ClusterMember>> {
        self.reconciler.current().siblings()
    }

    pub fn find_current_leader(&self) -> Option<MemberRevision<LeadershipRecord>> {
        self.reconciler.current().current_leader
    }

    pub fn local_leadership(&self) -> MemberRevision<LeadershipRecord> {
        self.reconciler.current().local_leadership
    }

    pub fn membership_change_events(&self) -> impl Stream<Item = Update> + Send + 'static {
        self.reconciler.changes()
    }

    pub async fn shutdown(&self) {
        if let Some(supervisor) = self.supervisor.lock().await.take() {
            supervisor.shutdown().await;
        }
        self.reconciler.shutdown().await;
    }
}

pub struct ConnectorBuilder {
    local_member_id: String,
    clock: Arc<dyn Clock>,
    config: ReconcilerConfig,
}

impl ConnectorBuilder {
    pub fn new(local_member_id: impl Into<String>) -> Self {
        Self {
            local_member_id: local_member_id.into(),
            clock: Arc::new(SystemClock),
            config: ReconcilerConfig::with_stale_threshold(30_000),
        }
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn config(mut self, config: ReconcilerConfig) -> Self {
        self.config = config;
        self
    }

    pub fn build(
        self,
        membership_executor: Arc<dyn MembershipExecutor>,
        leader_election_executor: Arc<dyn LeaderElectionExecutor>,
    ) -> Result<Connector, ConfigError> {
        self.config.validate()?;
        let config = Arc::new(self.config);
        let desired_in_leader_election = Arc::new(AtomicBool::new(false));

        let reconciler = Arc::new(Reconciler::spawn(
            ClusterMember::new(self.local_member_id),
            self.clock,
            config.clone(),
            membership_executor.clone(),
            leader_election_executor.clone(),
            desired_in_leader_election.clone(),
        ));

        let supervisor = EventStreamSupervisor::spawn(
            reconciler.clone(),
            membership_executor.clone(),
            leader_election_executor.clone(),
            config,
        );

        Ok(Connector {
            reconciler,
            supervisor: tokio::sync::Mutex::new(Some(supervisor)),
            membership_executor,
            leader_election_executor,
            desired_in_leader_election,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakeLeaderElectionExecutor, FakeMembershipExecutor};
    use crate::ports::MembershipStreamEvent;
    use crate::state::MembershipEvent;

    fn executors() -> (Arc<FakeMembershipExecutor>, Arc<FakeLeaderElectionExecutor>) {
        (
            Arc::new(FakeMembershipExecutor::new()),
            Arc::new(FakeLeaderElectionExecutor::new()),
        )
    }

    #[tokio::test]
    async fn register_then_echo_appears_in_local_member() {
        let (membership, leader) = executors();
        let connector = Connector::builder("local")
            .build(membership, leader)
            .unwrap();

        let echoed = connector
            .register(|mut m| {
                m.active = true;
                MemberRevision::new(m, 1, 0)
            })
            .await
            .unwrap();
        assert!(echoed.active);
        assert_eq!(connector.get_local_member().member_id, "local");

        connector.shutdown().await;
    }

    #[tokio::test]
    async fn unregister_clears_registered_flag_and_leadership() {
        let (membership, leader) = executors();
        let connector = Connector::builder("local")
            .build(membership, leader)
            .unwrap();

        connector
            .unregister(|mut m| {
                m.registered = false;
                MemberRevision::new(m, 1, 0)
            })
            .await
            .unwrap();
        assert!(!connector.get_local_member().registered);

        connector.shutdown().await;
    }

    #[tokio::test]
    async fn join_then_leave_leaves_a_non_leader() {
        use crate::state::LeaderElectionEvent;

        let (membership, leader) = executors();
        let leader_clone = leader.clone();
        let connector = Connector::builder("local")
            .build(membership, leader)
            .unwrap();

        connector.join_leadership_group().await.unwrap();
        assert_eq!(leader_clone.joins(), 1);
        assert!(connector.reconciler.current().in_leader_election_process);

        leader_clone
            .push_event(crate::ports::LeaderElectionStreamEvent::Event(
                LeaderElectionEvent::LeaderElected {
                    member_id: "other".to_string(),
                    revision: MemberRevision::new(
                        LeadershipRecord {
                            member_id: "other".to_string(),
                            role: membership_types::LeadershipRole::Leader,
                            election_timestamp: 0,
                        },
                        1,
                        0,
                    ),
                },
            ))
            .await;
        tokio::time::sleep(std::time::Duration::from_millis(30)).await;
        assert_eq!(
            connector.find_current_leader().unwrap().payload.member_id,
            "other"
        );
        assert!(connector.reconciler.current().in_leader_election_process);

        let left = connector.leave_leadership_group(true).await.unwrap();
        assert!(left);
        assert_eq!(leader_clone.leaves(), 1);
        assert!(!connector.reconciler.current().in_leader_election_process);

        connector.shutdown().await;
    }

    #[tokio::test]
    async fn leave_only_non_leader_is_noop_when_local_is_leader() {
        use crate::state::LeaderElectionEvent;

        let (membership, leader) = executors();
        let leader_clone = leader.clone();
        let connector = Connector::builder("local")
            .build(membership, leader)
            .unwrap();

        connector.join_leadership_group().await.unwrap();
        leader_clone
            .push_event(crate::ports::LeaderElectionStreamEvent::Event(
                LeaderElectionEvent::LeaderElected {
                    member_id: "local".to_string(),
                    revision: MemberRevision::new(
                        LeadershipRecord {
                            member_id: "local".to_string(),
                            role: membership_types::LeadershipRole::Leader,
                            election_timestamp: 0,
                        },
                        1,
                        0,
                    ),
                },
            ))
            .await;
        tokio::time::sleep(std::time::Duration::from_millis(30)).await;
        assert!(connector.reconciler.current().in_leader_election_process);

        let left = connector.leave_leadership_group(true).await.unwrap();
        assert!(!left);
        assert_eq!(leader_clone.leaves(), 0);
        assert!(connector.reconciler.current().in_leader_election_process);

        connector.shutdown().await;
    }

    #[tokio::test]
    async fn siblings_reflect_watched_events() {
        let (membership, leader) = executors();
        let membership_clone = membership.clone();
        let connector = Connector::builder("local")
            .build(membership, leader)
            .unwrap();

        membership_clone
            .push_event(MembershipStreamEvent::Event(MembershipEvent::SiblingAdded(
                MemberRevision::new(ClusterMember::new("sibling-a"), 1, 0),
            )))
            .await;

        tokio::time::sleep(std::time::Duration::from_millis(30)).await;
        assert!(connector.get_siblings().contains_key("sibling-a"));

        connector.shutdown().await;
    }
}
