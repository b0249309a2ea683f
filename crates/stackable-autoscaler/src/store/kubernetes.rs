use async_trait::async_trait;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector;
use kube::{
    Api, Client, ResourceExt,
    api::{DeleteParams, ListParams, Patch, PatchParams, PostParams},
};
use serde_json::json;
use snafu::ResultExt;

use crate::{
    config::SyncOptions,
    crd::{DatabaseCluster, DatabaseMonitor},
    selector::LabelSelectorExt,
    store::{
        CLUSTER_KIND, Error, InvalidSelectorSnafu, MONITOR_KIND, MonitorStore, ResourceStore,
        Result, Verb,
    },
};

/// A store backed by the Kubernetes API.
///
/// It wraps an underlying [`kube::Client`] and translates the API errors the
/// synchronizer cares about (404 and 409) into [`Error::NotFound`],
/// [`Error::AlreadyExists`] and [`Error::Conflict`].
#[derive(Clone)]
pub struct KubeStore {
    client: Client,
    post_params: PostParams,
    merge_patch_params: PatchParams,
    delete_params: DeleteParams,
}

impl KubeStore {
    pub fn new(client: Client, options: &SyncOptions) -> Self {
        let field_manager = Some(options.field_manager.clone());

        Self {
            client,
            post_params: PostParams {
                field_manager: field_manager.clone(),
                ..PostParams::default()
            },
            merge_patch_params: PatchParams {
                field_manager,
                ..PatchParams::default()
            },
            delete_params: DeleteParams::default(),
        }
    }

    /// Returns a [`kube::Client`] that can be freely used.
    pub fn as_kube_client(&self) -> Client {
        self.client.clone()
    }

    fn clusters(&self, namespace: &str) -> Api<DatabaseCluster> {
        Api::namespaced(self.client.clone(), namespace)
    }

    fn monitors(&self, namespace: &str) -> Api<DatabaseMonitor> {
        Api::namespaced(self.client.clone(), namespace)
    }
}

/// Maps the status codes of failed requests to the store errors.
fn classify(
    source: kube::Error,
    verb: Verb,
    kind: &'static str,
    namespace: &str,
    name: &str,
) -> Error {
    let code = match &source {
        kube::Error::Api(response) => Some(response.code),
        _ => None,
    };

    let namespace = namespace.to_owned();
    let name = name.to_owned();
    match code {
        Some(404) => Error::NotFound {
            kind,
            namespace,
            name,
        },
        Some(409) if verb == Verb::Create => Error::AlreadyExists {
            kind,
            namespace,
            name,
        },
        Some(409) => Error::Conflict {
            kind,
            namespace,
            name,
        },
        _ => Error::Api {
            verb,
            kind,
            target: format!("{namespace}/{name}"),
            source,
        },
    }
}

#[async_trait]
impl ResourceStore for KubeStore {
    async fn list(
        &self,
        namespace: &str,
        selector: &LabelSelector,
    ) -> Result<Vec<DatabaseCluster>> {
        let query = selector.to_query_string().context(InvalidSelectorSnafu)?;
        tracing::trace!(namespace, selector = %query, "Listing clusters");

        let clusters = self
            .clusters(namespace)
            .list(&ListParams::default().labels(&query))
            .await
            .map_err(|source| Error::Api {
                verb: Verb::List,
                kind: CLUSTER_KIND,
                target: namespace.to_owned(),
                source,
            })?;

        Ok(clusters.items)
    }

    async fn create(&self, cluster: &DatabaseCluster) -> Result<DatabaseCluster> {
        let namespace = cluster.namespace().unwrap_or_default();
        let name = cluster.name_any();
        let api = self.clusters(&namespace);
        let to_error =
            |source: kube::Error| classify(source, Verb::Create, CLUSTER_KIND, &namespace, &name);

        let created = api
            .create(&self.post_params, cluster)
            .await
            .map_err(to_error)?;

        // The status subresource ignores the status sent along with the
        // object, so it is written separately.
        match &cluster.status {
            Some(status) => api
                .patch_status(
                    &name,
                    &self.merge_patch_params,
                    &Patch::Merge(json!({ "status": status })),
                )
                .await
                .map_err(to_error),
            None => Ok(created),
        }
    }

    async fn update(&self, cluster: &DatabaseCluster) -> Result<DatabaseCluster> {
        let namespace = cluster.namespace().unwrap_or_default();
        let name = cluster.name_any();

        self.clusters(&namespace)
            .replace(&name, &self.post_params, cluster)
            .await
            .map_err(|source| classify(source, Verb::Update, CLUSTER_KIND, &namespace, &name))
    }

    async fn delete(&self, namespace: &str, name: &str) -> Result<()> {
        self.clusters(namespace)
            .delete(name, &self.delete_params)
            .await
            .map_err(|source| classify(source, Verb::Delete, CLUSTER_KIND, namespace, name))?;

        Ok(())
    }
}

#[async_trait]
impl MonitorStore for KubeStore {
    async fn get_monitor(&self, namespace: &str, name: &str) -> Result<DatabaseMonitor> {
        self.monitors(namespace)
            .get(name)
            .await
            .map_err(|source| classify(source, Verb::GetMonitor, MONITOR_KIND, namespace, name))
    }

    async fn update_monitor(&self, monitor: &DatabaseMonitor) -> Result<DatabaseMonitor> {
        let namespace = monitor.namespace().unwrap_or_default();
        let name = monitor.name_any();

        self.monitors(&namespace)
            .replace(&name, &self.post_params, monitor)
            .await
            .map_err(|source| {
                classify(source, Verb::UpdateMonitor, MONITOR_KIND, &namespace, &name)
            })
    }
}
