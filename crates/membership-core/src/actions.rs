//! Pure factories producing `(side effect, transition)` pairs.
//!
//! Each factory is itself a function of the current [`ClusterState`] — it
//! reads whatever it needs from the snapshot handed to it (e.g. the current
//! local payload, to hand to a caller-supplied `selfUpdate`) and returns a
//! [`PendingAction`]: a future that performs the substrate side effect and,
//! only on success, yields the pure [`Transition`] to commit. Nothing here
//! touches I/O synchronously and nothing here is awaited by more than one
//! caller — [`crate::reconciler::Reconciler`] is the sole driver.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use membership_types::{ClusterMember, LeadershipRecord, LeadershipRole, MemberRevision};

use crate::error::ReconcileError;
use crate::ports::{LeaderElectionExecutor, MembershipExecutor};
use crate::state::{ClusterState, Deltas};

pub type Transition = Box<dyn FnOnce(&ClusterState) -> Result<(ClusterState, Deltas), ReconcileError> + Send>;

pub type PendingAction = Pin<Box<dyn Future<Output = Result<Transition, ReconcileError>> + Send>>;

/// An action producer: evaluated by the reconciler against the current
/// state right before its side effect begins, so `selfUpdate` always sees
/// the freshest local payload, preserving ordering between successive
/// `apply` calls.
pub type ActionProducer = Box<dyn FnOnce(&ClusterState) -> PendingAction + Send>;

/// Registers or updates the local member. `selfUpdate` receives the
/// current local payload and returns the revision to write — letting the
/// caller bump the version, flip `active`, add labels, etc.
pub fn register_local<F>(executor: Arc<dyn MembershipExecutor>, self_update: F) -> ActionProducer
where
    F: FnOnce(ClusterMember) -> MemberRevision<ClusterMember> + Send + 'static,
{
    Box::new(move |state: &ClusterState| {
        let desired = self_update(state.local_revision.payload.clone());
        let executor = executor.clone();
        Box::pin(async move {
            let echoed = executor.write_member_record(desired).await?;
            let transition: Transition =
                Box::new(move |state: &ClusterState| state.set_local_member_revision(echoed));
            Ok(transition)
        })
    })
}

/// Removes the local member. The side effect deletes the substrate
/// record; the transition marks the local member `registered = false` and
/// clears leadership back to `Disabled`, regardless of what `selfUpdate`
/// returned — departure always wins.
pub fn unregister_local<F>(executor: Arc<dyn MembershipExecutor>, self_update: F) -> ActionProducer
where
    F: FnOnce(ClusterMember) -> MemberRevision<ClusterMember> + Send + 'static,
{
    Box::new(move |state: &ClusterState| {
        let desired = self_update(state.local_revision.payload.clone());
        let member_id = desired.payload.member_id.clone();
        let executor = executor.clone();
        Box::pin(async move {
            executor.delete_member_record(&member_id).await?;
            let transition: Transition = Box::new(move |state: &ClusterState| {
                let mut departed = desired;
                departed.payload.registered = false;
                let (next, mut deltas) = state.set_local_member_revision(departed)?;
                let now = next.clock.now_millis();
                let (next, leadership_deltas) = next.set_local_leadership_revision(
                    MemberRevision::new(LeadershipRecord::disabled(member_id), 0, now),
                );
                deltas.extend(leadership_deltas);
                Ok((next, deltas))
            });
            Ok(transition)
        })
    })
}

/// Begins this member's participation in the leadership campaign.
pub fn join_leadership_group(executor: Arc<dyn LeaderElectionExecutor>) -> ActionProducer {
    Box::new(move |state: &ClusterState| {
        let member_id = state.local_revision.payload.member_id.clone();
        let executor = executor.clone();
        Box::pin(async move {
            executor.join_leader_election(&member_id).await?;
            let transition: Transition =
                Box::new(|state: &ClusterState| Ok(state.set_in_leader_election_process(true)));
            Ok(transition)
        })
    })
}

/// Ends this member's participation in the leadership campaign. When
/// `only_non_leader` is set and this member currently holds the lease,
/// the side effect is a no-op and the transition is identity — evaluated
/// against the state at commit time, so a leadership change racing in
/// from the event stream is always observed before this decision is made.
pub fn leave_leadership_group(
    executor: Arc<dyn LeaderElectionExecutor>,
    only_non_leader: bool,
) -> ActionProducer {
    Box::new(move |state: &ClusterState| {
        let is_leader = state.local_leadership.payload.role == LeadershipRole::Leader;
        if only_non_leader && is_leader {
            let transition: Transition = Box::new(|state: &ClusterState| Ok((state.clone(), vec![])));
            return Box::pin(async move { Ok(transition) });
        }
        let executor = executor.clone();
        Box::pin(async move {
            executor.leave_leader_election().await?;
            let transition: Transition =
                Box::new(|state: &ClusterState| Ok(state.set_in_leader_election_process(false)));
            Ok(transition)
        })
    })
}
