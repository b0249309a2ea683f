use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::ResourceRequirements;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::{crd::ClusterRef, plan::ComponentKind};

/// A database cluster consisting of storage and compute nodes.
///
/// Autoscaling groups are themselves `DatabaseCluster`s which reference the
/// cluster they extend in [`DatabaseClusterSpec::cluster`].
#[derive(CustomResource, Clone, Debug, Default, Deserialize, JsonSchema, PartialEq, Serialize)]
#[kube(
    group = "autoscaling.stackable.tech",
    version = "v1alpha1",
    kind = "DatabaseCluster",
    plural = "databaseclusters",
    shortname = "dbcluster",
    status = "DatabaseClusterStatus",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct DatabaseClusterSpec {
    /// The cluster this cluster is an autoscaling group of.
    pub cluster: Option<ClusterRef>,

    /// The storage nodes of this cluster.
    pub storage_node: Option<NodeGroupSpec>,

    /// The compute nodes of this cluster.
    pub compute_node: Option<NodeGroupSpec>,
}

impl DatabaseClusterSpec {
    /// Returns the node group slot for the given component.
    pub fn node_group(&self, component: ComponentKind) -> Option<&NodeGroupSpec> {
        match component {
            ComponentKind::StorageNode => self.storage_node.as_ref(),
            ComponentKind::ComputeNode => self.compute_node.as_ref(),
        }
    }

    pub fn node_group_mut(&mut self, component: ComponentKind) -> &mut Option<NodeGroupSpec> {
        match component {
            ComponentKind::StorageNode => &mut self.storage_node,
            ComponentKind::ComputeNode => &mut self.compute_node,
        }
    }
}

#[derive(Clone, Debug, Default, Deserialize, JsonSchema, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeGroupSpec {
    /// Number of nodes in this group.
    pub replicas: u32,

    /// Requests and limits of every node in this group.
    #[serde(default)]
    pub resources: ResourceRequirements,

    /// Labels the nodes advertise, e.g. for placement decisions.
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
}

#[derive(Clone, Debug, Default, Deserialize, JsonSchema, Eq, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DatabaseClusterStatus {
    /// The monitor which scrapes this cluster.
    pub monitor: Option<ClusterRef>,
}

impl DatabaseCluster {
    /// Returns the monitor this cluster declares in its status, if any.
    pub fn monitor(&self) -> Option<&ClusterRef> {
        self.status.as_ref()?.monitor.as_ref()
    }

    /// Returns `true` if this cluster is an autoscaling group of the cluster
    /// `parent_name` in `parent_namespace`.
    pub fn is_group_of(&self, parent_name: &str, parent_namespace: &str) -> bool {
        let own_namespace = self.metadata.namespace.as_deref().unwrap_or(parent_namespace);

        self.spec.cluster.as_ref().is_some_and(|parent| {
            parent.name == parent_name && parent.namespace_or(own_namespace) == parent_namespace
        })
    }
}

#[cfg(test)]
mod tests {
    use indoc::indoc;

    use super::*;

    #[test]
    fn deserialize_group_cluster() {
        let input = indoc! {"
            apiVersion: autoscaling.stackable.tech/v1alpha1
            kind: DatabaseCluster
            metadata:
              name: basic-storage-1
              namespace: default
            spec:
              cluster:
                name: basic
              storageNode:
                replicas: 3
            status:
              monitor:
                name: basic-monitor
        "};

        let cluster: DatabaseCluster = serde_yaml::from_str(input).expect("valid cluster");

        assert!(cluster.is_group_of("basic", "default"));
        assert!(!cluster.is_group_of("basic", "other"));
        assert_eq!(
            cluster.spec.node_group(ComponentKind::StorageNode).map(|group| group.replicas),
            Some(3)
        );
        assert_eq!(cluster.spec.node_group(ComponentKind::ComputeNode), None);
        assert_eq!(
            cluster.monitor().map(|monitor| monitor.name.as_str()),
            Some("basic-monitor")
        );
    }

    #[test]
    fn cluster_without_parent_is_no_group() {
        let cluster = DatabaseCluster::new("basic", DatabaseClusterSpec::default());

        assert!(!cluster.is_group_of("basic", "default"));
        assert_eq!(cluster.monitor(), None);
    }
}
