//! Custom resources read and written during a reconciliation pass.
//!
//! - [`DatabaseCluster`] is both the parent cluster and the per-group cluster
//!   created for every autoscaling group. Group clusters point back to their
//!   parent via [`DatabaseClusterSpec::cluster`].
//! - [`DatabaseMonitor`] aggregates the clusters it scrapes in
//!   [`DatabaseMonitorSpec::clusters`].
//! - [`DatabaseAutoscaler`] carries the resource profiles used to size newly
//!   created group clusters.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

mod autoscaler;
mod cluster;
mod monitor;

pub use autoscaler::*;
pub use cluster::*;
pub use monitor::*;

/// A reference to a [`DatabaseCluster`], optionally in another namespace.
#[derive(
    Clone, Debug, Default, Deserialize, Eq, Hash, JsonSchema, Ord, PartialEq, PartialOrd, Serialize,
)]
#[serde(rename_all = "camelCase")]
pub struct ClusterRef {
    /// The name of the referenced object.
    pub name: String,

    /// The namespace of the referenced object. If unset, the namespace of the
    /// object holding the reference is used.
    pub namespace: Option<String>,
}

impl ClusterRef {
    pub fn new(name: impl Into<String>, namespace: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            namespace: Some(namespace.into()),
        }
    }

    /// Returns the namespace of the referenced object, falling back to
    /// `default` when the reference does not name one.
    pub fn namespace_or<'a>(&'a self, default: &'a str) -> &'a str {
        self.namespace.as_deref().unwrap_or(default)
    }

    /// Returns `true` if both references point at the same object when
    /// resolved relative to `default_namespace`.
    pub fn same_object(&self, other: &Self, default_namespace: &str) -> bool {
        self.name == other.name
            && self.namespace_or(default_namespace) == other.namespace_or(default_namespace)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_object_resolves_missing_namespace() {
        let explicit = ClusterRef::new("basic", "default");
        let implicit = ClusterRef {
            name: "basic".to_owned(),
            namespace: None,
        };

        assert!(explicit.same_object(&implicit, "default"));
        assert!(!explicit.same_object(&implicit, "other"));
        assert!(!explicit.same_object(&ClusterRef::new("other", "default"), "default"));
    }
}
