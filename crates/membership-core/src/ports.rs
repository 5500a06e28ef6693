//! The two substrate ports. These are the only interface the core
//! consumes from the external coordination substrate; concrete
//! implementations (e.g. `membership-kube`) live outside this crate.

use async_trait::async_trait;
use futures::stream::BoxStream;
use membership_types::{ClusterMember, MemberRevision};

use crate::error::ReconcileError;
use crate::state::{LeaderElectionEvent, MembershipEvent};

/// A membership-stream event, including the synthetic `Disconnected` the
/// supervisor inserts on stream failure.
#[derive(Debug, Clone, PartialEq)]
pub enum MembershipStreamEvent {
    Event(MembershipEvent),
    Disconnected { cause: String },
}

#[derive(Debug, Clone, PartialEq)]
pub enum LeaderElectionStreamEvent {
    Event(LeaderElectionEvent),
    Disconnected { cause: String },
}

/// Issues create/update/delete on this process's membership record and
/// watches siblings' records.
#[async_trait]
pub trait MembershipExecutor: Send + Sync {
    async fn write_member_record(
        &self,
        revision: MemberRevision<ClusterMember>,
    ) -> Result<MemberRevision<ClusterMember>, ReconcileError>;

    async fn delete_member_record(&self, member_id: &str) -> Result<(), ReconcileError>;

    /// A long-lived stream of membership events. May begin with a sequence
    /// of `SiblingAdded` terminated by `SnapshotEnd`.
    fn watch_membership_events(&self) -> BoxStream<'static, MembershipStreamEvent>;
}

/// Runs this process's participation in the substrate's leader-election
/// campaign and watches campaign outcomes.
#[async_trait]
pub trait LeaderElectionExecutor: Send + Sync {
    async fn join_leader_election(&self, member_id: &str) -> Result<(), ReconcileError>;

    async fn leave_leader_election(&self) -> Result<(), ReconcileError>;

    fn watch_leader_election_updates(&self) -> BoxStream<'static, LeaderElectionStreamEvent>;
}
