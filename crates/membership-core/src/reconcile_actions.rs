//! Decides which internal self-actions are needed to converge the current
//! state, in the fixed order heartbeat → GC → leadership, at most one of
//! each per batch.

use std::sync::Arc;

use membership_types::MemberRevision;

use crate::actions::{self, ActionProducer};
use crate::ports::{LeaderElectionExecutor, MembershipExecutor};
use crate::state::ClusterState;

pub struct ReconcileActionsContext {
    pub membership_executor: Arc<dyn MembershipExecutor>,
    pub leader_election_executor: Arc<dyn LeaderElectionExecutor>,
    /// Whether the connector's desired participation in the leadership
    /// pool is currently "in" — set by `joinLeadershipGroup`/
    /// `leaveLeadershipGroup` and consulted here so a reconnected
    /// supervisor re-issues the join/leave the substrate lost track of.
    pub desired_in_leader_election: Arc<std::sync::atomic::AtomicBool>,
}

/// Builds the batch of internal actions for one long cycle. Each returned
/// producer is executed by the reconciler exactly like an
/// externally-submitted action; failures are logged and dropped, never
/// surfaced to callers.
pub fn plan(state: &ClusterState, ctx: &ReconcileActionsContext) -> Vec<ActionProducer> {
    let mut batch = Vec::with_capacity(3);

    if let Some(action) = heartbeat(state, ctx) {
        batch.push(action);
    }
    if let Some(action) = stale_sibling_gc(state) {
        batch.push(action);
    }
    if let Some(action) = leadership(state, ctx) {
        batch.push(action);
    }

    batch
}

fn heartbeat(state: &ClusterState, ctx: &ReconcileActionsContext) -> Option<ActionProducer> {
    let now = state.clock.now_millis();
    let age = now.saturating_sub(state.local_revision.timestamp);
    if age <= state.config.heartbeat_interval_ms {
        return None;
    }
    let executor = ctx.membership_executor.clone();
    // Same payload, bumped revision_number, refreshed timestamp — unlike
    // the public `register` facade there is no caller-supplied selfUpdate
    // here; a heartbeat never changes what the member advertises.
    Some(Box::new(move |state: &ClusterState| {
        let current = state.local_revision.clone();
        let now = state.clock.now_millis();
        let desired = MemberRevision::new(current.payload, current.revision_number + 1, now);
        Box::pin(async move {
            let echoed = executor.write_member_record(desired).await?;
            let transition: crate::actions::Transition =
                Box::new(move |state: &ClusterState| state.set_local_member_revision(echoed));
            Ok(transition)
        })
    }))
}

fn stale_sibling_gc(state: &ClusterState) -> Option<ActionProducer> {
    let gc_threshold = state.config.gc_threshold_ms();
    let now = state.clock.now_millis();
    let dead: Vec<String> = state
        .siblings_raw()
        .iter()
        .filter(|(_, rev)| now.saturating_sub(rev.timestamp) > gc_threshold)
        .map(|(id, _)| id.clone())
        .collect();
    if dead.is_empty() {
        return None;
    }
    Some(Box::new(move |_state: &ClusterState| {
        Box::pin(async move {
            let transition: crate::actions::Transition = Box::new(move |state: &ClusterState| {
                let mut next = state.clone();
                let mut deltas = Vec::new();
                for id in &dead {
                    if next.siblings_raw().contains_key(id) {
                        let (n, mut d) = next
                            .process_membership_event(crate::state::MembershipEvent::SiblingRemoved(
                                id.clone(),
                            ));
                        next = n;
                        deltas.append(&mut d);
                    }
                }
                Ok((next, deltas))
            });
            Ok(transition)
        })
    }))
}

fn leadership(state: &ClusterState, ctx: &ReconcileActionsContext) -> Option<ActionProducer> {
    let desired = ctx
        .desired_in_leader_election
        .load(std::sync::atomic::Ordering::SeqCst);
    let running = state.in_leader_election_process;
    if desired == running {
        return None;
    }
    if desired {
        Some(actions::join_leadership_group(
            ctx.leader_election_executor.clone(),
        ))
    } else {
        Some(actions::leave_leadership_group(
            ctx.leader_election_executor.clone(),
            false,
        ))
    }
}
