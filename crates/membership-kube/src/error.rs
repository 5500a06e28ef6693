use membership_core::ReconcileError;

/// Maps a raw `kube::Error` onto the substrate-agnostic error the core
/// understands. A 409 Conflict means an optimistic-concurrency race on the
/// member record; anything else talking to the apiserver is treated as a
/// transient substrate outage.
pub fn from_kube_error(err: kube::Error) -> ReconcileError {
    if let kube::Error::Api(ref api_err) = err
        && api_err.code == 409
    {
        return ReconcileError::Conflict(api_err.message.clone());
    }
    ReconcileError::SubstrateUnavailable(err.to_string())
}
