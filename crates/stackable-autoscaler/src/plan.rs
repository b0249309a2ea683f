//! Plans as emitted by the capacity planner.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumString};

/// The desired state of one autoscaling group.
///
/// The group a plan belongs to is stored in its [`labels`](Self::labels)
/// under the configured group label key, see
/// [`SyncOptions::group_label_key`](crate::config::SyncOptions::group_label_key).
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Plan {
    /// The component this plan scales, e.g. `storage-node`. Parsed into a
    /// [`ComponentKind`] when the plan is reconciled.
    pub component: String,

    /// The desired number of replicas.
    pub count: u32,

    /// Selects the resource profile used when the group is created.
    pub resource_type: String,

    #[serde(default)]
    pub labels: BTreeMap<String, String>,
}

impl Plan {
    pub fn component_kind(&self) -> Result<ComponentKind, strum::ParseError> {
        self.component.parse()
    }
}

/// The components of a [`DatabaseCluster`](crate::crd::DatabaseCluster)
/// which can be autoscaled.
#[derive(AsRefStr, Clone, Copy, Debug, Display, EnumString, Eq, Hash, PartialEq)]
#[strum(serialize_all = "kebab-case")]
pub enum ComponentKind {
    StorageNode,
    ComputeNode,
}
