//! Pure, immutable cluster state and its transitions.
//!
//! No method here performs I/O. [`crate::reconciler::Reconciler`] is the
//! only component that calls these methods, always against the single
//! currently-committed `ClusterState`, and always one transition at a time.

pub mod events;

use std::collections::HashMap;
use std::sync::Arc;

pub use events::{ClusterStateUpdate, LeaderElectionEvent, MembershipEvent, StreamKind};
use membership_types::{supersedes, ClusterMember, LeadershipRecord, LeadershipRole, MemberRevision};

use crate::clock::Clock;
use crate::config::ReconcilerConfig;
use crate::error::ReconcileError;

pub type Deltas = Vec<ClusterStateUpdate>;

#[derive(Clone)]
pub struct ClusterState {
    pub local_revision: MemberRevision<ClusterMember>,
    siblings: HashMap<String, MemberRevision<ClusterMember>>,
    pub local_leadership: MemberRevision<LeadershipRecord>,
    pub current_leader: Option<MemberRevision<LeadershipRecord>>,
    pub in_leader_election_process: bool,
    pub clock: Arc<dyn Clock>,
    pub config: Arc<ReconcilerConfig>,
}

impl std::fmt::Debug for ClusterState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClusterState")
            .field("local_revision", &self.local_revision)
            .field("siblings", &self.siblings)
            .field("local_leadership", &self.local_leadership)
            .field("current_leader", &self.current_leader)
            .field("in_leader_election_process", &self.in_leader_election_process)
            .finish_non_exhaustive()
    }
}

impl ClusterState {
    pub fn new(
        local: ClusterMember,
        clock: Arc<dyn Clock>,
        config: Arc<ReconcilerConfig>,
    ) -> Self {
        let now = clock.now_millis();
        let member_id = local.member_id.clone();
        Self {
            local_revision: MemberRevision::new(local, 0, now),
            siblings: HashMap::new(),
            local_leadership: MemberRevision::new(LeadershipRecord::disabled(member_id), 0, now),
            current_leader: None,
            in_leader_election_process: false,
            clock,
            config,
        }
    }

    /// Siblings filtered by the staleness rule: excludes entries whose
    /// `timestamp` is older than `now - stale_threshold_ms`. The internal
    /// map (`siblings_raw`) retains stale entries for debugging.
    pub fn siblings(&self) -> HashMap<String, MemberRevision<ClusterMember>> {
        let now = self.clock.now_millis();
        let threshold = self.config.stale_threshold_ms;
        self.siblings
            .iter()
            .filter(|(_, rev)| now.saturating_sub(rev.timestamp) <= threshold)
            .map(|(id, rev)| (id.clone(), rev.clone()))
            .collect()
    }

    pub fn siblings_raw(&self) -> &HashMap<String, MemberRevision<ClusterMember>> {
        &self.siblings
    }

    pub fn is_stale(&self, rev: &MemberRevision<ClusterMember>) -> bool {
        self.clock.now_millis().saturating_sub(rev.timestamp) > self.config.stale_threshold_ms
    }

    /// Replaces the local member record. `new_local` must carry a
    /// strictly greater `revision_number` than the current local
    /// revision, and must name the same `member_id` — both are invariants
    /// this connector itself is responsible for upholding when authoring
    /// writes, so a violation here means a programmer bug upstream.
    pub fn set_local_member_revision(
        &self,
        new_local: MemberRevision<ClusterMember>,
    ) -> Result<(Self, Deltas), ReconcileError> {
        if new_local.payload.member_id != self.local_revision.payload.member_id {
            return Err(ReconcileError::InvalidTransition(format!(
                "local member_id changed from {} to {}",
                self.local_revision.payload.member_id, new_local.payload.member_id
            )));
        }
        if new_local.revision_number <= self.local_revision.revision_number {
            return Err(ReconcileError::InvalidTransition(format!(
                "local revision_number {} is not greater than current {}",
                new_local.revision_number, self.local_revision.revision_number
            )));
        }
        let mut next = self.clone();
        next.local_revision = new_local;
        Ok((next, vec![ClusterStateUpdate::LocalUpdated]))
    }

    /// Replaces the local leadership record. Emits a delta only when
    /// `role` actually changes.
    pub fn set_local_leadership_revision(
        &self,
        new_leadership: MemberRevision<LeadershipRecord>,
    ) -> (Self, Deltas) {
        let role_changed = new_leadership.payload.role != self.local_leadership.payload.role;
        let mut next = self.clone();
        next.local_leadership = new_leadership;
        let deltas = if role_changed {
            vec![ClusterStateUpdate::LocalLeadershipUpdated]
        } else {
            vec![]
        };
        (next, deltas)
    }

    pub fn set_in_leader_election_process(&self, running: bool) -> (Self, Deltas) {
        if running == self.in_leader_election_process {
            return (self.clone(), vec![]);
        }
        let mut next = self.clone();
        next.in_leader_election_process = running;
        let delta = if running {
            ClusterStateUpdate::CampaignStarted
        } else {
            ClusterStateUpdate::CampaignStopped
        };
        (next, vec![delta])
    }

    /// Merges an inbound membership event. Events naming the local member
    /// are dropped silently — the substrate echoing our own writes back
    /// must never clobber the authoritative local revision.
    pub fn process_membership_event(&self, evt: MembershipEvent) -> (Self, Deltas) {
        match evt {
            MembershipEvent::SiblingAdded(rev) => self.merge_sibling(rev, true),
            MembershipEvent::SiblingUpdated(rev) => self.merge_sibling(rev, false),
            MembershipEvent::SiblingRemoved(member_id) => {
                if member_id == self.local_revision.payload.member_id {
                    return (self.clone(), vec![]);
                }
                if !self.siblings.contains_key(&member_id) {
                    return (self.clone(), vec![]);
                }
                let mut next = self.clone();
                next.siblings.remove(&member_id);
                (next, vec![ClusterStateUpdate::SiblingRemoved(member_id)])
            }
            MembershipEvent::SnapshotEnd => (self.clone(), vec![]),
        }
    }

    fn merge_sibling(
        &self,
        rev: MemberRevision<ClusterMember>,
        is_add: bool,
    ) -> (Self, Deltas) {
        let member_id = rev.payload.member_id.clone();
        if member_id == self.local_revision.payload.member_id {
            return (self.clone(), vec![]);
        }
        let mut next = self.clone();
        match next.siblings.get(&member_id) {
            Some(existing) if !supersedes(&rev, existing) => (self.clone(), vec![]),
            _ => {
                next.siblings.insert(member_id.clone(), rev);
                let delta = if is_add {
                    ClusterStateUpdate::SiblingAdded(member_id)
                } else {
                    ClusterStateUpdate::SiblingUpdated(member_id)
                };
                (next, vec![delta])
            }
        }
    }

    /// Merges an inbound leader-election event.
    pub fn process_leader_election_event(&self, evt: LeaderElectionEvent) -> (Self, Deltas) {
        match evt {
            LeaderElectionEvent::LeaderElected { member_id, revision } => {
                let mut next = self.clone();
                let leader_changed = next
                    .current_leader
                    .as_ref()
                    .map(|cur| cur.payload.member_id != member_id)
                    .unwrap_or(true);
                next.current_leader = Some(revision.clone());
                let mut deltas = Vec::new();
                if leader_changed {
                    deltas.push(ClusterStateUpdate::LeaderChanged);
                }
                if member_id == next.local_revision.payload.member_id {
                    let now = next.clock.now_millis();
                    let role_changed =
                        next.local_leadership.payload.role != LeadershipRole::Leader;
                    next.local_leadership = MemberRevision::new(
                        LeadershipRecord {
                            member_id: member_id.clone(),
                            role: LeadershipRole::Leader,
                            election_timestamp: now,
                        },
                        next.local_leadership.revision_number + 1,
                        now,
                    );
                    if role_changed {
                        deltas.push(ClusterStateUpdate::LocalLeadershipUpdated);
                    }
                }
                (next, deltas)
            }
            LeaderElectionEvent::LeaderLost { member_id } => {
                let mut next = self.clone();
                let mut deltas = Vec::new();
                let was_leader = next
                    .current_leader
                    .as_ref()
                    .map(|cur| cur.payload.member_id == member_id)
                    .unwrap_or(false);
                if was_leader {
                    next.current_leader = None;
                    deltas.push(ClusterStateUpdate::LeaderChanged);
                }
                if member_id == next.local_revision.payload.member_id
                    && next.local_leadership.payload.role == LeadershipRole::Leader
                {
                    let now = next.clock.now_millis();
                    next.local_leadership = MemberRevision::new(
                        LeadershipRecord {
                            member_id,
                            role: LeadershipRole::NonLeader,
                            election_timestamp: now,
                        },
                        next.local_leadership.revision_number + 1,
                        now,
                    );
                    deltas.push(ClusterStateUpdate::LocalLeadershipUpdated);
                }
                (next, deltas)
            }
            LeaderElectionEvent::LocalJoined => self.set_in_leader_election_process(true),
            LeaderElectionEvent::LocalLeft => self.set_in_leader_election_process(false),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    fn state() -> ClusterState {
        let clock: Arc<dyn Clock> = Arc::new(ManualClock::new(1_000_000));
        let config = Arc::new(ReconcilerConfig::with_stale_threshold(9_000));
        ClusterState::new(ClusterMember::new("local"), clock, config)
    }

    fn sibling_rev(id: &str, n: i64, ts: i64) -> MemberRevision<ClusterMember> {
        MemberRevision::new(ClusterMember::new(id), n, ts)
    }

    #[test]
    fn local_never_appears_among_siblings() {
        let s = state();
        let (s, deltas) = s.process_membership_event(MembershipEvent::SiblingAdded(
            sibling_rev("local", 5, 1_000_000),
        ));
        assert!(deltas.is_empty());
        assert!(!s.siblings().contains_key("local"));
    }

    #[test]
    fn sibling_added_then_superseded_by_higher_revision() {
        let s = state();
        let (s, d1) = s.process_membership_event(MembershipEvent::SiblingAdded(sibling_rev(
            "a", 1, 1_000_000,
        )));
        assert_eq!(d1, vec![ClusterStateUpdate::SiblingAdded("a".into())]);
        let (s, d2) = s.process_membership_event(MembershipEvent::SiblingUpdated(sibling_rev(
            "a", 2, 1_000_100,
        )));
        assert_eq!(d2, vec![ClusterStateUpdate::SiblingUpdated("a".into())]);
        assert_eq!(s.siblings()["a"].revision_number, 2);
    }

    #[test]
    fn lower_or_equal_revision_is_dropped() {
        let s = state();
        let (s, _) = s.process_membership_event(MembershipEvent::SiblingAdded(sibling_rev(
            "a", 3, 1_000_000,
        )));
        let (s, deltas) = s.process_membership_event(MembershipEvent::SiblingUpdated(
            sibling_rev("a", 2, 2_000_000),
        ));
        assert!(deltas.is_empty());
        assert_eq!(s.siblings()["a"].revision_number, 3);
    }

    #[test]
    fn stale_sibling_filtered_from_public_accessor_but_kept_internally() {
        let clock = Arc::new(ManualClock::new(1_000_000));
        let config = Arc::new(ReconcilerConfig::with_stale_threshold(1_000));
        let s = ClusterState::new(
            ClusterMember::new("local"),
            clock.clone() as Arc<dyn Clock>,
            config,
        );
        let (s, _) =
            s.process_membership_event(MembershipEvent::SiblingAdded(sibling_rev("a", 1, 1_000_000)));
        assert!(s.siblings().contains_key("a"));
        clock.advance(2_000);
        assert!(!s.siblings().contains_key("a"));
        assert!(s.siblings_raw().contains_key("a"));
    }

    #[test]
    fn sibling_removed_event_drops_entry() {
        let s = state();
        let (s, _) = s.process_membership_event(MembershipEvent::SiblingAdded(sibling_rev(
            "a", 1, 1_000_000,
        )));
        let (s, deltas) =
            s.process_membership_event(MembershipEvent::SiblingRemoved("a".to_string()));
        assert_eq!(deltas, vec![ClusterStateUpdate::SiblingRemoved("a".into())]);
        assert!(!s.siblings_raw().contains_key("a"));
    }

    #[test]
    fn set_local_member_revision_rejects_non_monotonic() {
        let s = state();
        let stuck = MemberRevision::new(ClusterMember::new("local"), 0, 1_000_000);
        assert!(s.set_local_member_revision(stuck).is_err());
    }

    #[test]
    fn leader_elected_for_local_sets_leader_role() {
        let s = state();
        let (s, deltas) = s.process_leader_election_event(LeaderElectionEvent::LeaderElected {
            member_id: "local".to_string(),
            revision: MemberRevision::new(
                LeadershipRecord {
                    member_id: "local".to_string(),
                    role: LeadershipRole::Leader,
                    election_timestamp: 1_000_000,
                },
                1,
                1_000_000,
            ),
        });
        assert!(deltas.contains(&ClusterStateUpdate::LeaderChanged));
        assert!(deltas.contains(&ClusterStateUpdate::LocalLeadershipUpdated));
        assert_eq!(s.local_leadership.payload.role, LeadershipRole::Leader);
        assert_eq!(
            s.current_leader.unwrap().payload.member_id,
            "local".to_string()
        );
    }

    #[test]
    fn leader_elected_for_sibling_leaves_local_role_alone() {
        let s = state();
        let (s, deltas) = s.process_leader_election_event(LeaderElectionEvent::LeaderElected {
            member_id: "other".to_string(),
            revision: MemberRevision::new(
                LeadershipRecord {
                    member_id: "other".to_string(),
                    role: LeadershipRole::Leader,
                    election_timestamp: 1_000_000,
                },
                1,
                1_000_000,
            ),
        });
        assert_eq!(deltas, vec![ClusterStateUpdate::LeaderChanged]);
        assert_eq!(s.local_leadership.payload.role, LeadershipRole::NonLeader);
    }

    #[test]
    fn local_joined_and_left_toggle_campaign_flag() {
        let s = state();
        let (s, deltas) = s.process_leader_election_event(LeaderElectionEvent::LocalJoined);
        assert_eq!(deltas, vec![ClusterStateUpdate::CampaignStarted]);
        assert!(s.in_leader_election_process);
        let (s, deltas) = s.process_leader_election_event(LeaderElectionEvent::LocalLeft);
        assert_eq!(deltas, vec![ClusterStateUpdate::CampaignStopped]);
        assert!(!s.in_leader_election_process);
    }
}
