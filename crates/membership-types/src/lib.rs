//! Domain types shared between the connector core and its substrate adapters:
//! the member/leadership value types the core reasons about, and the
//! Kubernetes custom resource used to carry them over the wire.

use std::collections::BTreeMap;

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// A network address a member advertises to its siblings.
#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, Eq, JsonSchema)]
pub struct Address {
    pub host: String,
    pub port: u16,
}

/// A versioned record: `revision_number` orders writes from the same
/// authoring member; `timestamp` is wall-clock millis at authoring time.
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, JsonSchema)]
pub struct MemberRevision<T> {
    pub payload: T,
    pub revision_number: i64,
    pub timestamp: i64,
}

impl<T> MemberRevision<T> {
    pub fn new(payload: T, revision_number: i64, timestamp: i64) -> Self {
        Self {
            payload,
            revision_number,
            timestamp,
        }
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> MemberRevision<U> {
        MemberRevision {
            payload: f(self.payload),
            revision_number: self.revision_number,
            timestamp: self.timestamp,
        }
    }
}

/// Ordering per §3: higher `revision_number` wins; ties broken by
/// `timestamp`; remaining ties keep the existing record (idempotence),
/// so this is a strict `>` on the tuple, never `>=`.
pub fn supersedes<T>(candidate: &MemberRevision<T>, existing: &MemberRevision<T>) -> bool {
    (candidate.revision_number, candidate.timestamp)
        > (existing.revision_number, existing.timestamp)
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, Eq, JsonSchema)]
pub struct ClusterMember {
    pub member_id: String,
    pub active: bool,
    pub enabled: bool,
    pub registered: bool,
    pub labels: BTreeMap<String, String>,
    pub addresses: Vec<Address>,
}

impl ClusterMember {
    pub fn new(member_id: impl Into<String>) -> Self {
        Self {
            member_id: member_id.into(),
            active: true,
            enabled: true,
            registered: true,
            labels: BTreeMap::new(),
            addresses: Vec::new(),
        }
    }
}

#[derive(Deserialize, Serialize, Clone, Copy, Debug, Default, PartialEq, Eq, JsonSchema)]
pub enum LeadershipRole {
    Disabled,
    #[default]
    NonLeader,
    Leader,
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, JsonSchema)]
pub struct LeadershipRecord {
    pub member_id: String,
    pub role: LeadershipRole,
    pub election_timestamp: i64,
}

impl LeadershipRecord {
    pub fn disabled(member_id: impl Into<String>) -> Self {
        Self {
            member_id: member_id.into(),
            role: LeadershipRole::Disabled,
            election_timestamp: 0,
        }
    }
}

/// Kubernetes-native representation of a `MemberRevision<ClusterMember>`.
///
/// The connector's substrate adapter upserts/lists/watches this resource;
/// the connector core itself never depends on `kube` directly.
#[derive(CustomResource, Serialize, Deserialize, Default, Debug, PartialEq, Clone, JsonSchema)]
#[kube(
    group = "membership.eosin.io",
    version = "v1",
    kind = "MemberRecord",
    plural = "memberrecords",
    derive = "PartialEq",
    status = "MemberRecordStatus",
    namespaced
)]
#[kube(derive = "Default")]
pub struct MemberRecordSpec {
    pub member_id: String,
    pub active: bool,
    pub enabled: bool,
    pub registered: bool,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    #[serde(default)]
    pub addresses: Vec<Address>,
    pub revision_number: i64,
    pub timestamp: i64,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
pub struct MemberRecordStatus {
    /// Timestamp the apiserver last observed this object at, echoed back
    /// to callers of `writeMemberRecord` as the normalized revision.
    pub observed_timestamp: Option<i64>,
}

impl From<&MemberRevision<ClusterMember>> for MemberRecordSpec {
    fn from(rev: &MemberRevision<ClusterMember>) -> Self {
        Self {
            member_id: rev.payload.member_id.clone(),
            active: rev.payload.active,
            enabled: rev.payload.enabled,
            registered: rev.payload.registered,
            labels: rev.payload.labels.clone(),
            addresses: rev.payload.addresses.clone(),
            revision_number: rev.revision_number,
            timestamp: rev.timestamp,
        }
    }
}

impl From<&MemberRecordSpec> for MemberRevision<ClusterMember> {
    fn from(spec: &MemberRecordSpec) -> Self {
        MemberRevision::new(
            ClusterMember {
                member_id: spec.member_id.clone(),
                active: spec.active,
                enabled: spec.enabled,
                registered: spec.registered,
                labels: spec.labels.clone(),
                addresses: spec.addresses.clone(),
            },
            spec.revision_number,
            spec.timestamp,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rev(n: i64, t: i64) -> MemberRevision<ClusterMember> {
        MemberRevision::new(ClusterMember::new("a"), n, t)
    }

    #[test]
    fn higher_revision_number_supersedes() {
        assert!(supersedes(&rev(2, 0), &rev(1, 100)));
    }

    #[test]
    fn equal_revision_breaks_tie_on_timestamp() {
        assert!(supersedes(&rev(1, 5), &rev(1, 4)));
        assert!(!supersedes(&rev(1, 4), &rev(1, 5)));
    }

    #[test]
    fn full_tie_keeps_existing() {
        assert!(!supersedes(&rev(1, 5), &rev(1, 5)));
    }

    #[test]
    fn spec_roundtrip_preserves_payload() {
        let original = rev(7, 1234);
        let spec = MemberRecordSpec::from(&original);
        let back = MemberRevision::<ClusterMember>::from(&spec);
        assert_eq!(original, back);
    }
}
