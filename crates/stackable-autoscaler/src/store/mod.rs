//! Access to the objects a reconciliation pass reads and writes.
//!
//! The [`Synchronizer`](crate::sync::Synchronizer) only talks to the
//! [`ResourceStore`] and [`MonitorStore`] traits. [`KubeStore`] implements
//! both against the Kubernetes API, [`MemoryStore`] keeps everything in
//! memory and allows injecting failures.

use async_trait::async_trait;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector;
use snafu::Snafu;
use strum::Display;

use crate::{
    crd::{DatabaseCluster, DatabaseMonitor},
    selector::SelectorError,
};

mod kubernetes;
mod memory;

pub use self::{
    kubernetes::KubeStore,
    memory::{Fault, FaultKind, MemoryStore},
};

pub type Result<T, E = Error> = std::result::Result<T, E>;

pub(crate) const CLUSTER_KIND: &str = "DatabaseCluster";
pub(crate) const MONITOR_KIND: &str = "DatabaseMonitor";

/// The operations a store offers.
#[derive(Clone, Copy, Debug, Display, Eq, Hash, PartialEq)]
#[strum(serialize_all = "snake_case")]
pub enum Verb {
    List,
    Create,
    Update,
    Delete,
    GetMonitor,
    UpdateMonitor,
}

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum Error {
    #[snafu(display("{kind} {namespace}/{name} was not found"))]
    NotFound {
        kind: &'static str,
        namespace: String,
        name: String,
    },

    #[snafu(display("{kind} {namespace}/{name} already exists"))]
    AlreadyExists {
        kind: &'static str,
        namespace: String,
        name: String,
    },

    #[snafu(display("{kind} {namespace}/{name} was modified concurrently"))]
    Conflict {
        kind: &'static str,
        namespace: String,
        name: String,
    },

    #[snafu(display("failed to convert label selector into a query"))]
    InvalidSelector { source: SelectorError },

    /// The `target` is either `namespace/name` or just the namespace when
    /// listing.
    #[snafu(display("failed to {verb} {kind} {target}"))]
    Api {
        verb: Verb,
        kind: &'static str,
        target: String,
        source: kube::Error,
    },

    #[snafu(display("store is unavailable, failed to {verb} {kind} {target}"))]
    Unavailable {
        verb: Verb,
        kind: &'static str,
        target: String,
    },
}

impl Error {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// Returns `true` if the write was rejected because the object changed
    /// since it was read.
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict { .. })
    }
}

/// Persists the [`DatabaseCluster`]s of autoscaling groups.
///
/// Updates use optimistic concurrency: the resource version of the submitted
/// object is the expected version and a mismatch fails with
/// [`Error::Conflict`].
#[async_trait]
pub trait ResourceStore: Send + Sync {
    /// Lists the clusters in `namespace` matching `selector`.
    async fn list(
        &self,
        namespace: &str,
        selector: &LabelSelector,
    ) -> Result<Vec<DatabaseCluster>>;

    /// Creates a cluster. A status set on `cluster` is persisted as well.
    ///
    /// Fails with [`Error::AlreadyExists`] if the name is taken.
    async fn create(&self, cluster: &DatabaseCluster) -> Result<DatabaseCluster>;

    /// Replaces a cluster, see the trait documentation for concurrency.
    async fn update(&self, cluster: &DatabaseCluster) -> Result<DatabaseCluster>;

    /// Fails with [`Error::NotFound`] if there is no such cluster.
    async fn delete(&self, namespace: &str, name: &str) -> Result<()>;
}

/// Persists [`DatabaseMonitor`]s.
#[async_trait]
pub trait MonitorStore: Send + Sync {
    async fn get_monitor(&self, namespace: &str, name: &str) -> Result<DatabaseMonitor>;

    /// Replaces a monitor. Fails with [`Error::Conflict`] if it changed since
    /// `monitor` was read.
    async fn update_monitor(&self, monitor: &DatabaseMonitor) -> Result<DatabaseMonitor>;
}
