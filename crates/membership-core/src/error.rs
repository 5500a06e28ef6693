use crate::config::ConfigError;

/// Errors surfaced to callers of [`crate::reconciler::Reconciler::apply`] and
/// [`crate::connector::Connector`]'s facade methods.
#[derive(Debug, thiserror::Error)]
pub enum ReconcileError {
    /// The substrate was unreachable when a side effect ran. Recoverable —
    /// the next reconciliation cycle retries.
    #[error("substrate unavailable: {0}")]
    SubstrateUnavailable(String),

    /// Optimistic-concurrency conflict on a member record. Recoverable —
    /// the next membership event realigns state.
    #[error("conflict writing member record: {0}")]
    Conflict(String),

    /// The connector has begun shutdown; new actions are rejected outright.
    #[error("connector is shutting down")]
    ShuttingDown,

    /// A transition violated a `ClusterState` invariant (e.g. non-monotonic
    /// revision numbers supplied by a caller). Indicates a programmer bug
    /// upstream, not a transient condition.
    #[error("invalid transition: {0}")]
    InvalidTransition(String),

    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),
}

impl ReconcileError {
    /// Whether the next reconciliation cycle is expected to heal this
    /// failure without caller intervention.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            ReconcileError::SubstrateUnavailable(_) | ReconcileError::Conflict(_)
        )
    }
}
