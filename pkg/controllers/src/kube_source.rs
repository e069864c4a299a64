use std::fmt::Debug;

use async_trait::async_trait;
use futures_util::{StreamExt, TryStreamExt};
use k8s_openapi::api::authorization::v1::{
    ResourceAttributes, SelfSubjectAccessReview, SelfSubjectAccessReviewSpec,
};
use k8s_openapi::api::rbac::v1 as rbacv1;
use kube::api::{Api, ListParams, PostParams, WatchEvent, WatchParams};
use kube::{Client, Resource};
use pkg_constants::rbac::RBAC_API_GROUP;
use pkg_types::event::{ListSnapshot, RbacEvent, RbacObject, WatchKind};
use pkg_types::rbac::ResourceVersion;
use serde::de::DeserializeOwned;
use tracing::{debug, warn};

use crate::decode;
use crate::source::{EventStream, RbacSource, SourceError};

type Decoder<K> = fn(K) -> Result<RbacObject, SourceError>;

/// RBAC objects from the Kubernetes API server, cluster-wide.
#[derive(Clone)]
pub struct KubeSource {
    client: Client,
}

impl KubeSource {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// In-cluster config, falling back to the local kubeconfig.
    pub async fn try_default() -> Result<Self, kube::Error> {
        Ok(Self::new(Client::try_default().await?))
    }
}

fn source_error(err: kube::Error) -> SourceError {
    match err {
        kube::Error::Api(resp) if resp.code == 403 => SourceError::Forbidden(resp.message),
        kube::Error::Api(resp) if resp.code == 410 => SourceError::Expired(resp.message),
        other => SourceError::Transient(other.to_string()),
    }
}

async fn list_objects<K>(
    api: Api<K>,
    kind: WatchKind,
    decode: Decoder<K>,
) -> Result<ListSnapshot, SourceError>
where
    K: Resource + Clone + DeserializeOwned + Debug,
{
    let list = api.list(&ListParams::default()).await.map_err(source_error)?;
    let resource_version =
        decode::parse_version(kind, list.metadata.resource_version.as_deref())?;
    let objects = list
        .items
        .into_iter()
        .filter_map(|item| match decode(item) {
            Ok(obj) => Some(obj),
            Err(e) => {
                warn!("Skipping listed object: {}", e);
                None
            }
        })
        .collect();
    Ok(ListSnapshot {
        resource_version,
        objects,
    })
}

async fn watch_objects<K>(
    api: Api<K>,
    kind: WatchKind,
    from: ResourceVersion,
    decode: Decoder<K>,
) -> Result<EventStream, SourceError>
where
    K: Resource + Clone + DeserializeOwned + Debug + Send + 'static,
{
    let stream = api
        .watch(&WatchParams::default(), &from.to_string())
        .await
        .map_err(source_error)?;
    debug!("Watching {} from version {}", kind, from);

    let events = stream.map_err(source_error).map(move |item| match item? {
        WatchEvent::Added(obj) | WatchEvent::Modified(obj) => decode(obj).map(RbacObject::applied),
        WatchEvent::Deleted(obj) => decode(obj).map(RbacObject::deleted),
        WatchEvent::Bookmark(bookmark) => {
            decode::parse_version(kind, Some(&bookmark.metadata.resource_version))
                .map(RbacEvent::Bookmark)
        }
        WatchEvent::Error(status) if status.code == 410 => Err(SourceError::Expired(status.message)),
        WatchEvent::Error(status) => Err(SourceError::Transient(format!(
            "{} ({})",
            status.message, status.code
        ))),
    });
    Ok(events.boxed())
}

#[async_trait]
impl RbacSource for KubeSource {
    async fn list(&self, kind: WatchKind) -> Result<ListSnapshot, SourceError> {
        let client = self.client.clone();
        match kind {
            WatchKind::Roles => {
                list_objects::<rbacv1::Role>(Api::all(client), kind, decode::role).await
            }
            WatchKind::ClusterRoles => {
                list_objects::<rbacv1::ClusterRole>(Api::all(client), kind, decode::cluster_role)
                    .await
            }
            WatchKind::RoleBindings => {
                list_objects::<rbacv1::RoleBinding>(Api::all(client), kind, decode::role_binding)
                    .await
            }
            WatchKind::ClusterRoleBindings => {
                list_objects::<rbacv1::ClusterRoleBinding>(
                    Api::all(client),
                    kind,
                    decode::cluster_role_binding,
                )
                .await
            }
        }
    }

    async fn watch(
        &self,
        kind: WatchKind,
        from: ResourceVersion,
    ) -> Result<EventStream, SourceError> {
        let client = self.client.clone();
        match kind {
            WatchKind::Roles => {
                watch_objects::<rbacv1::Role>(Api::all(client), kind, from, decode::role).await
            }
            WatchKind::ClusterRoles => {
                watch_objects::<rbacv1::ClusterRole>(
                    Api::all(client),
                    kind,
                    from,
                    decode::cluster_role,
                )
                .await
            }
            WatchKind::RoleBindings => {
                watch_objects::<rbacv1::RoleBinding>(
                    Api::all(client),
                    kind,
                    from,
                    decode::role_binding,
                )
                .await
            }
            WatchKind::ClusterRoleBindings => {
                watch_objects::<rbacv1::ClusterRoleBinding>(
                    Api::all(client),
                    kind,
                    from,
                    decode::cluster_role_binding,
                )
                .await
            }
        }
    }

    async fn can_i(&self, kind: WatchKind, verb: &str) -> Result<bool, SourceError> {
        let review = SelfSubjectAccessReview {
            spec: SelfSubjectAccessReviewSpec {
                resource_attributes: Some(ResourceAttributes {
                    group: Some(RBAC_API_GROUP.to_string()),
                    resource: Some(kind.plural().to_string()),
                    verb: Some(verb.to_string()),
                    ..Default::default()
                }),
                ..Default::default()
            },
            ..Default::default()
        };
        let api: Api<SelfSubjectAccessReview> = Api::all(self.client.clone());
        let response = api
            .create(&PostParams::default(), &review)
            .await
            .map_err(source_error)?;
        let allowed = response.status.map(|s| s.allowed).unwrap_or(false);
        debug!("Access review: {} {} -> {}", verb, kind, allowed);
        Ok(allowed)
    }
}
