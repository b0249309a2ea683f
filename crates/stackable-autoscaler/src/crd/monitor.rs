use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::crd::ClusterRef;

/// Scrapes metrics of a list of [`DatabaseCluster`][1]s.
///
/// The list is shared: the autoscaler appends group clusters when it creates
/// them and removes them again when they are deleted, while users may add
/// their own entries.
///
/// [1]: crate::crd::DatabaseCluster
#[derive(
    CustomResource, Clone, Debug, Default, Deserialize, JsonSchema, PartialEq, Eq, Serialize,
)]
#[kube(
    group = "autoscaling.stackable.tech",
    version = "v1alpha1",
    kind = "DatabaseMonitor",
    plural = "databasemonitors",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct DatabaseMonitorSpec {
    /// The clusters scraped by this monitor.
    #[serde(default)]
    pub clusters: Vec<ClusterRef>,
}
