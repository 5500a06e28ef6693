//! [`LeaderElectionExecutor`] backed by a single Kubernetes `Lease`,
//! polled on a fixed interval via `kube_leader_election::LeaseLock` the
//! same way the renew loop here is driven (ground: storage-operator's
//! cluster controller's leadership loop).

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::BoxStream;
use kube::Client;
use kube_leader_election::{LeaseLock, LeaseLockParams, LeaseLockResult};
use membership_core::error::ReconcileError;
use membership_core::ports::{LeaderElectionExecutor, LeaderElectionStreamEvent};
use membership_core::state::LeaderElectionEvent;
use membership_types::{LeadershipRecord, LeadershipRole, MemberRevision};
use tokio::sync::{mpsc, Mutex};
use tokio_stream::wrappers::ReceiverStream;

/// Where `run_campaign` sends its events. A `std::sync::Mutex` over the
/// current sender rather than a captured clone, so a resubscribe (fresh
/// `watch_leader_election_updates` call after a disconnect) installs a new
/// channel the still-running campaign task picks up on its next event
/// without needing to be restarted.
type SharedSender = Arc<StdMutex<Option<mpsc::Sender<LeaderElectionStreamEvent>>>>;

pub struct KubeLeaderElectionExecutor {
    client: Client,
    namespace: String,
    lease_name: String,
    lease_ttl: Duration,
    renew_every: Duration,
    task: Mutex<Option<tokio::task::JoinHandle<()>>>,
    current_tx: SharedSender,
    revision_counter: Arc<AtomicI64>,
}

impl KubeLeaderElectionExecutor {
    pub fn new(
        client: Client,
        namespace: impl Into<String>,
        lease_name: impl Into<String>,
        lease_ttl: Duration,
        renew_every: Duration,
    ) -> Self {
        Self {
            client,
            namespace: namespace.into(),
            lease_name: lease_name.into(),
            lease_ttl,
            renew_every,
            task: Mutex::new(None),
            current_tx: Arc::new(StdMutex::new(None)),
            revision_counter: Arc::new(AtomicI64::new(0)),
        }
    }
}

#[async_trait]
impl LeaderElectionExecutor for KubeLeaderElectionExecutor {
    async fn join_leader_election(&self, member_id: &str) -> Result<(), ReconcileError> {
        let mut guard = self.task.lock().await;
        if guard.is_some() {
            return Ok(());
        }
        let lock = LeaseLock::new(
            self.client.clone(),
            &self.namespace,
            LeaseLockParams {
                holder_id: member_id.to_string(),
                lease_name: self.lease_name.clone(),
                lease_ttl: self.lease_ttl,
            },
        );
        let member_id = member_id.to_string();
        let current_tx = self.current_tx.clone();
        let revision_counter = self.revision_counter.clone();
        let renew_every = self.renew_every;
        *guard = Some(tokio::spawn(run_campaign(
            lock,
            member_id,
            current_tx,
            revision_counter,
            renew_every,
        )));
        Ok(())
    }

    async fn leave_leader_election(&self) -> Result<(), ReconcileError> {
        if let Some(task) = self.task.lock().await.take() {
            task.abort();
        }
        Ok(())
    }

    /// Re-subscribable: each call opens a fresh channel and installs it as
    /// the campaign's current sender, the same contract
    /// `KubeMembershipExecutor::watch_membership_events` offers via a
    /// fresh `watcher()` per call.
    fn watch_leader_election_updates(&self) -> BoxStream<'static, LeaderElectionStreamEvent> {
        let (tx, rx) = mpsc::channel(64);
        *self.current_tx.lock().unwrap() = Some(tx);
        Box::pin(ReceiverStream::new(rx))
    }
}

/// Sends on whichever channel is current, dropping the event silently if
/// nobody is subscribed (before the first `watch_leader_election_updates`
/// call, or during the brief gap while a subscriber is reconnecting) —
/// the campaign keeps renewing the lease regardless of whether anyone is
/// watching.
async fn emit(current_tx: &SharedSender, evt: LeaderElectionStreamEvent) {
    let tx = current_tx.lock().unwrap().clone();
    if let Some(tx) = tx {
        let _ = tx.send(evt).await;
    }
}

async fn run_campaign(
    lock: LeaseLock,
    member_id: String,
    current_tx: SharedSender,
    revision_counter: Arc<AtomicI64>,
    renew_every: Duration,
) {
    let mut current_holder: Option<String> = None;
    let mut interval = tokio::time::interval(renew_every);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        interval.tick().await;
        match lock.try_acquire_or_renew().await {
            Ok(LeaseLockResult::Acquired(_)) => {
                if current_holder.as_deref() != Some(member_id.as_str()) {
                    current_holder = Some(member_id.clone());
                    let revision = revision_counter.fetch_add(1, Ordering::SeqCst) + 1;
                    let now = now_millis();
                    let evt = LeaderElectionEvent::LeaderElected {
                        member_id: member_id.clone(),
                        revision: MemberRevision::new(
                            LeadershipRecord {
                                member_id: member_id.clone(),
                                role: LeadershipRole::Leader,
                                election_timestamp: now,
                            },
                            revision,
                            now,
                        ),
                    };
                    emit(&current_tx, LeaderElectionStreamEvent::Event(evt)).await;
                }
            }
            Ok(LeaseLockResult::NotAcquired(lease)) => {
                let holder = lease
                    .spec
                    .as_ref()
                    .and_then(|s| s.holder_identity.clone());
                if current_holder.as_deref() == Some(member_id.as_str()) {
                    current_holder = holder.clone();
                    let evt = LeaderElectionEvent::LeaderLost {
                        member_id: member_id.clone(),
                    };
                    emit(&current_tx, LeaderElectionStreamEvent::Event(evt)).await;
                }
                if let Some(holder) = holder
                    && current_holder.as_deref() != Some(holder.as_str())
                {
                    current_holder = Some(holder.clone());
                    let revision = revision_counter.fetch_add(1, Ordering::SeqCst) + 1;
                    let now = now_millis();
                    let evt = LeaderElectionEvent::LeaderElected {
                        member_id: holder.clone(),
                        revision: MemberRevision::new(
                            LeadershipRecord {
                                member_id: holder,
                                role: LeadershipRole::Leader,
                                election_timestamp: now,
                            },
                            revision,
                            now,
                        ),
                    };
                    emit(&current_tx, LeaderElectionStreamEvent::Event(evt)).await;
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "leader election renew/acquire failed");
                emit(
                    &current_tx,
                    LeaderElectionStreamEvent::Disconnected {
                        cause: e.to_string(),
                    },
                )
                .await;
            }
        }
    }
}

fn now_millis() -> i64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}
