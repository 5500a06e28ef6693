//! [`MembershipExecutor`] backed by `MemberRecord` custom resources: one
//! resource per member, name == member_id, upserted with server-side apply
//! and watched with `kube::runtime::watcher`.

use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::StreamExt;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::api::{DeleteParams, Patch, PatchParams};
use kube::runtime::watcher::{self, Event};
use kube::{Api, Client};
use membership_core::error::ReconcileError;
use membership_core::ports::{MembershipExecutor, MembershipStreamEvent};
use membership_core::state::MembershipEvent;
use membership_types::{ClusterMember, MemberRecord, MemberRecordSpec, MemberRevision};

use crate::error::from_kube_error;

const FIELD_MANAGER: &str = "membership-kube";

pub struct KubeMembershipExecutor {
    api: Api<MemberRecord>,
}

impl KubeMembershipExecutor {
    pub fn new(client: Client, namespace: &str) -> Self {
        Self {
            api: Api::namespaced(client, namespace),
        }
    }
}

#[async_trait]
impl MembershipExecutor for KubeMembershipExecutor {
    async fn write_member_record(
        &self,
        revision: MemberRevision<ClusterMember>,
    ) -> Result<MemberRevision<ClusterMember>, ReconcileError> {
        let name = revision.payload.member_id.clone();
        let spec = MemberRecordSpec::from(&revision);
        let record = MemberRecord {
            metadata: ObjectMeta {
                name: Some(name.clone()),
                labels: Some(
                    [(
                        membership_common::annotations::MEMBER_ID.to_string(),
                        name.clone(),
                    )]
                    .into_iter()
                    .collect(),
                ),
                ..Default::default()
            },
            spec,
            status: None,
        };

        let applied = self
            .api
            .patch(
                &name,
                &PatchParams::apply(FIELD_MANAGER).force(),
                &Patch::Apply(&record),
            )
            .await
            .map_err(from_kube_error)?;

        Ok(MemberRevision::from(&applied.spec))
    }

    async fn delete_member_record(&self, member_id: &str) -> Result<(), ReconcileError> {
        match self.api.delete(member_id, &DeleteParams::default()).await {
            Ok(_) => Ok(()),
            Err(kube::Error::Api(api_err)) if api_err.code == 404 => Ok(()),
            Err(e) => Err(from_kube_error(e)),
        }
    }

    fn watch_membership_events(&self) -> BoxStream<'static, MembershipStreamEvent> {
        let stream = watcher(self.api.clone(), watcher::Config::default());
        stream
            .filter_map(|result| async move {
                match result {
                    Ok(Event::Init) => None,
                    Ok(Event::InitApply(obj)) => Some(MembershipStreamEvent::Event(
                        MembershipEvent::SiblingAdded(MemberRevision::from(&obj.spec)),
                    )),
                    Ok(Event::InitDone) => {
                        Some(MembershipStreamEvent::Event(MembershipEvent::SnapshotEnd))
                    }
                    Ok(Event::Apply(obj)) => Some(MembershipStreamEvent::Event(
                        MembershipEvent::SiblingUpdated(MemberRevision::from(&obj.spec)),
                    )),
                    Ok(Event::Delete(obj)) => Some(MembershipStreamEvent::Event(
                        MembershipEvent::SiblingRemoved(obj.spec.member_id.clone()),
                    )),
                    Err(e) => Some(MembershipStreamEvent::Disconnected {
                        cause: e.to_string(),
                    }),
                }
            })
            .boxed()
    }
}
