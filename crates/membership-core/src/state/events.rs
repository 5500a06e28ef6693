use membership_types::{ClusterMember, LeadershipRecord, MemberRevision};

/// Inbound event from the substrate's membership-event stream
/// (`MembershipExecutor::watch_membership_events`).
#[derive(Debug, Clone, PartialEq)]
pub enum MembershipEvent {
    SiblingAdded(MemberRevision<ClusterMember>),
    SiblingUpdated(MemberRevision<ClusterMember>),
    SiblingRemoved(String),
    SnapshotEnd,
}

/// Inbound event from the substrate's leader-election-event stream
/// (`LeaderElectionExecutor::watch_leader_election_updates`).
#[derive(Debug, Clone, PartialEq)]
pub enum LeaderElectionEvent {
    LeaderElected {
        member_id: String,
        revision: MemberRevision<LeadershipRecord>,
    },
    LeaderLost {
        member_id: String,
    },
    LocalJoined,
    LocalLeft,
}

/// Which of the two long-lived substrate subscriptions produced a
/// `Disconnected` delta.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamKind {
    Membership,
    LeaderElection,
}

/// The delta payload of [`crate::reconciler::Update`] — one entry per
/// committed transition that actually changed observable state.
#[derive(Debug, Clone, PartialEq)]
pub enum ClusterStateUpdate {
    LocalUpdated,
    LocalLeadershipUpdated,
    SiblingAdded(String),
    SiblingUpdated(String),
    SiblingRemoved(String),
    LeaderChanged,
    CampaignStarted,
    CampaignStopped,
    Disconnected(StreamKind),
}
