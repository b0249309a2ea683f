//! Converges the autoscaling groups of a cluster towards a set of plans.
//!
//! A pass runs in three phases, strictly in this order:
//!
//! 1. Groups which exist but are no longer planned are deleted and detached
//!    from their monitor.
//! 2. Groups which exist and are planned are scaled to the planned replicas
//!    and attached to their monitor, if a previous pass failed to do so.
//! 3. Groups which are planned but do not exist are created and attached to
//!    their monitor.
//!
//! The first error aborts the pass. Nothing which was already applied is
//! rolled back; every step is idempotent, so the caller is expected to retry
//! the whole pass.

use std::collections::BTreeMap;

use kube::{
    Resource, ResourceExt,
    core::DynamicObject,
    runtime::reflector::ObjectRef,
};
use snafu::{OptionExt, ResultExt, Snafu};
use strum::{EnumDiscriminants, IntoStaticStr};
use tracing::{Instrument, info_span, instrument};

use crate::{
    config::SyncOptions,
    crd::{
        ClusterRef, DatabaseAutoscaler, DatabaseCluster, DatabaseClusterSpec,
        DatabaseClusterStatus, DatabaseMonitor, NodeGroupSpec,
    },
    group::{self, GroupDiff, MissingLabelError},
    logging::controller::ReconcilerError,
    monitor::{self, MonitorReferences},
    plan::{ComponentKind, Plan},
    store::{self, MonitorStore, ResourceStore},
};

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, EnumDiscriminants, Snafu)]
#[strum_discriminants(derive(IntoStaticStr))]
pub enum Error {
    #[snafu(display("object has no namespace"))]
    ObjectHasNoNamespace,

    #[snafu(display("object has no name"))]
    ObjectHasNoName,

    #[snafu(display("plan #{index} has no group"))]
    PlanWithoutGroup {
        source: MissingLabelError,
        index: usize,
    },

    /// Only reachable with a [`ResourceStore`] which does not honor the
    /// group selector passed to [`ResourceStore::list`].
    #[snafu(display("cluster {name:?} has no group"))]
    ClusterWithoutGroup {
        source: MissingLabelError,
        name: String,
    },

    #[snafu(display("plan for group {group:?} has unsupported component {component:?}"))]
    UnsupportedComponentKind {
        source: strum::ParseError,
        group: String,
        component: String,
    },

    #[snafu(display("no resource profile {resource_type:?} found for group {group:?}"))]
    ResourceProfileNotFound {
        group: String,
        resource_type: String,
    },

    #[snafu(display("failed to list group clusters in namespace {namespace:?}"))]
    ListClusters {
        source: store::Error,
        namespace: String,
    },

    #[snafu(display("failed to delete group cluster {namespace}/{name}"))]
    DeleteCluster {
        source: store::Error,
        namespace: String,
        name: String,
    },

    #[snafu(display("failed to detach group cluster {namespace}/{name} from its monitor"))]
    DetachFromMonitor {
        source: monitor::Error,
        namespace: String,
        name: String,
    },

    #[snafu(display("failed to update group cluster {namespace}/{name}"))]
    UpdateCluster {
        source: store::Error,
        namespace: String,
        name: String,
    },

    #[snafu(display("failed to create group cluster {namespace}/{name}"))]
    CreateCluster {
        source: store::Error,
        namespace: String,
        name: String,
    },

    #[snafu(display("failed to attach group cluster {namespace}/{name} to its monitor"))]
    AttachToMonitor {
        source: monitor::Error,
        namespace: String,
        name: String,
    },
}

/// A coarse classification of [`Error`]s.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ErrorKind {
    /// The group of a plan or cluster could not be determined.
    MissingLabel,

    /// The input is malformed, e.g. a plan refers to an unknown component.
    InvalidInput,

    /// Reading from a store failed.
    StoreRead,

    /// A write was rejected because the object changed since it was read.
    StoreWriteConflict,

    /// Any other failed write.
    StoreWrite,
}

impl ErrorKind {
    fn of_write(source: &store::Error) -> Self {
        if source.is_conflict() {
            Self::StoreWriteConflict
        } else {
            Self::StoreWrite
        }
    }

    fn of_monitor(source: &monitor::Error) -> Self {
        match source {
            monitor::Error::GetMonitor { .. } => Self::StoreRead,
            monitor::Error::UpdateMonitor { source, .. } => Self::of_write(source),
        }
    }
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::PlanWithoutGroup { .. } | Self::ClusterWithoutGroup { .. } => {
                ErrorKind::MissingLabel
            }
            Self::ObjectHasNoNamespace
            | Self::ObjectHasNoName
            | Self::UnsupportedComponentKind { .. }
            | Self::ResourceProfileNotFound { .. } => ErrorKind::InvalidInput,
            Self::ListClusters { .. } => ErrorKind::StoreRead,
            Self::DeleteCluster { source, .. }
            | Self::UpdateCluster { source, .. }
            | Self::CreateCluster { source, .. } => ErrorKind::of_write(source),
            Self::DetachFromMonitor { source, .. } | Self::AttachToMonitor { source, .. } => {
                ErrorKind::of_monitor(source)
            }
        }
    }
}

impl ReconcilerError for Error {
    fn category(&self) -> &'static str {
        ErrorDiscriminants::from(self).into()
    }

    fn secondary_object(&self) -> Option<ObjectRef<DynamicObject>> {
        match self {
            Self::DeleteCluster {
                namespace, name, ..
            }
            | Self::UpdateCluster {
                namespace, name, ..
            }
            | Self::CreateCluster {
                namespace, name, ..
            } => Some(
                ObjectRef::<DatabaseCluster>::new(name)
                    .within(namespace)
                    .erase(),
            ),
            Self::DetachFromMonitor { source, .. } | Self::AttachToMonitor { source, .. } => {
                let (monitor::Error::GetMonitor {
                    namespace, name, ..
                }
                | monitor::Error::UpdateMonitor {
                    namespace, name, ..
                }) = source;
                Some(
                    ObjectRef::<DatabaseMonitor>::new(name)
                        .within(namespace)
                        .erase(),
                )
            }
            _ => None,
        }
    }
}

/// The groups changed by a successful pass.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct SyncOutcome {
    pub deleted: Vec<String>,
    pub updated: Vec<String>,
    pub created: Vec<String>,
}

/// A planned group together with its validated component.
#[derive(Debug)]
struct DesiredGroup<'p> {
    plan: &'p Plan,
    component: ComponentKind,
}

/// The cluster which is autoscaled.
struct Parent<'a> {
    cluster: &'a DatabaseCluster,
    namespace: String,
    name: String,
}

/// Runs reconciliation passes against a [`ResourceStore`] and a
/// [`MonitorStore`].
///
/// The synchronizer holds no state between passes. The same instance can be
/// used for any number of parent clusters, concurrently as well.
pub struct Synchronizer<'a> {
    clusters: &'a dyn ResourceStore,
    monitors: MonitorReferences<'a>,
    options: &'a SyncOptions,
}

impl<'a> Synchronizer<'a> {
    pub fn new(
        clusters: &'a dyn ResourceStore,
        monitors: &'a dyn MonitorStore,
        options: &'a SyncOptions,
    ) -> Self {
        Self {
            clusters,
            monitors: MonitorReferences::new(monitors),
            options,
        }
    }

    /// Converges the autoscaling groups of `parent` towards `plans`.
    ///
    /// `autoscaler` supplies the resource profiles of newly created groups.
    /// If several plans belong to the same group, the last one wins.
    #[instrument(
        skip_all,
        fields(
            parent.name = parent.metadata.name.as_deref(),
            parent.namespace = parent.metadata.namespace.as_deref(),
            plans = plans.len(),
        )
    )]
    pub async fn sync(
        &self,
        parent: &DatabaseCluster,
        autoscaler: &DatabaseAutoscaler,
        plans: &[Plan],
    ) -> Result<SyncOutcome> {
        let parent = Parent {
            cluster: parent,
            namespace: parent.namespace().context(ObjectHasNoNamespaceSnafu)?,
            name: parent.metadata.name.clone().context(ObjectHasNoNameSnafu)?,
        };

        let desired = self.desired_groups(plans)?;
        let mut observed = self.observed_groups(&parent).await?;

        let diff = GroupDiff::new(
            &desired.keys().cloned().collect(),
            &observed.keys().cloned().collect(),
        );
        tracing::debug!(
            to_delete = ?diff.to_delete,
            to_update = ?diff.to_update,
            to_create = ?diff.to_create,
            "Computed group changes"
        );

        let mut outcome = SyncOutcome::default();
        for group in &diff.to_delete {
            let Some(cluster) = observed.remove(group) else {
                continue;
            };
            self.delete_group(&parent, cluster)
                .instrument(info_span!("delete_group", group = %group))
                .await?;
            outcome.deleted.push(group.clone());
        }

        for group in &diff.to_update {
            let (Some(desired), Some(cluster)) = (desired.get(group), observed.remove(group))
            else {
                continue;
            };
            self.update_group(group, desired, autoscaler, cluster)
                .instrument(info_span!("update_group", group = %group))
                .await?;
            outcome.updated.push(group.clone());
        }

        for group in &diff.to_create {
            let Some(desired) = desired.get(group) else {
                continue;
            };
            self.create_group(&parent, group, desired, autoscaler)
                .instrument(info_span!("create_group", group = %group))
                .await?;
            outcome.created.push(group.clone());
        }

        tracing::info!(
            deleted = outcome.deleted.len(),
            updated = outcome.updated.len(),
            created = outcome.created.len(),
            "Synchronized autoscaling groups"
        );
        Ok(outcome)
    }

    /// Maps every planned group to its plan. Later plans replace earlier ones
    /// for the same group, and only the remaining plans are validated.
    fn desired_groups<'p>(
        &self,
        plans: &'p [Plan],
    ) -> Result<BTreeMap<String, DesiredGroup<'p>>> {
        let mut plans_by_group = BTreeMap::new();
        for (index, plan) in plans.iter().enumerate() {
            let group = group::group_name(&plan.labels, &self.options.group_label_key)
                .context(PlanWithoutGroupSnafu { index })?;
            if plans_by_group.insert(group.to_owned(), plan).is_some() {
                tracing::debug!(group, index, "Plan replaces an earlier plan of the same group");
            }
        }

        plans_by_group
            .into_iter()
            .map(|(group, plan)| {
                let component = plan.component_kind().with_context(|_| {
                    UnsupportedComponentKindSnafu {
                        group: &group,
                        component: &plan.component,
                    }
                })?;
                Ok((group, DesiredGroup { plan, component }))
            })
            .collect()
    }

    /// Lists the group clusters of `parent`, keyed by group.
    async fn observed_groups(
        &self,
        parent: &Parent<'_>,
    ) -> Result<BTreeMap<String, DatabaseCluster>> {
        let selector = group::group_selector(&self.options.group_label_key);
        let clusters = self
            .clusters
            .list(&parent.namespace, &selector)
            .await
            .with_context(|_| ListClustersSnafu {
                namespace: parent.namespace.clone(),
            })?;

        let mut observed = BTreeMap::new();
        for cluster in clusters {
            if !cluster.is_group_of(&parent.name, &parent.namespace) {
                continue;
            }

            let group = group::group_name(cluster.labels(), &self.options.group_label_key)
                .with_context(|_| ClusterWithoutGroupSnafu {
                    name: cluster.name_any(),
                })?
                .to_owned();
            observed.insert(group, cluster);
        }

        Ok(observed)
    }

    async fn delete_group(&self, parent: &Parent<'_>, cluster: DatabaseCluster) -> Result<()> {
        let name = cluster.name_any();
        let namespace = cluster
            .namespace()
            .unwrap_or_else(|| parent.namespace.clone());

        match self.clusters.delete(&namespace, &name).await {
            Ok(()) => tracing::info!(%namespace, %name, "Deleted group cluster"),
            Err(source) if source.is_not_found() => {
                tracing::warn!(%namespace, %name, "Group cluster was already deleted")
            }
            Err(source) => {
                return Err(source).context(DeleteClusterSnafu {
                    namespace: &namespace,
                    name: &name,
                });
            }
        }

        // Detaching also runs if the cluster was already gone, a previous
        // pass may have failed between the delete and the detach.
        if let Some(monitor) = cluster.monitor() {
            self.monitors
                .detach(monitor.namespace_or(&namespace), &monitor.name, &name)
                .await
                .context(DetachFromMonitorSnafu {
                    namespace: &namespace,
                    name: &name,
                })?;
        }

        Ok(())
    }

    async fn update_group(
        &self,
        group: &str,
        desired: &DesiredGroup<'_>,
        autoscaler: &DatabaseAutoscaler,
        observed: DatabaseCluster,
    ) -> Result<()> {
        let mut cluster = observed;
        match cluster.spec.node_group_mut(desired.component) {
            Some(node_group) => node_group.replicas = desired.plan.count,
            // The group switched components, the new one is sized like a new group
            slot @ None => *slot = Some(self.node_group(group, desired, autoscaler)?),
        }

        let name = cluster.name_any();
        let namespace = cluster.namespace().unwrap_or_default();
        self.clusters
            .update(&cluster)
            .await
            .context(UpdateClusterSnafu {
                namespace: &namespace,
                name: &name,
            })?;

        tracing::info!(
            %namespace,
            %name,
            component = %desired.component,
            replicas = desired.plan.count,
            "Updated group cluster"
        );

        // A previous pass may have created the cluster but failed to attach it
        if let Some(monitor) = cluster.monitor() {
            self.monitors
                .attach(
                    monitor.namespace_or(&namespace),
                    &monitor.name,
                    &ClusterRef::new(&name, &namespace),
                )
                .await
                .context(AttachToMonitorSnafu {
                    namespace: &namespace,
                    name: &name,
                })?;
        }

        Ok(())
    }

    async fn create_group(
        &self,
        parent: &Parent<'_>,
        group: &str,
        desired: &DesiredGroup<'_>,
        autoscaler: &DatabaseAutoscaler,
    ) -> Result<()> {
        let cluster = self.build_group_cluster(parent, group, desired, autoscaler)?;
        let namespace = parent.namespace.clone();

        let created = self
            .clusters
            .create(&cluster)
            .await
            .context(CreateClusterSnafu {
                namespace: &namespace,
                name: group,
            })?;
        tracing::info!(
            %namespace,
            name = group,
            component = %desired.component,
            replicas = desired.plan.count,
            "Created group cluster"
        );

        if let Some(monitor) = created.monitor().or_else(|| cluster.monitor()) {
            self.monitors
                .attach(
                    monitor.namespace_or(&namespace),
                    &monitor.name,
                    &ClusterRef::new(created.name_any(), &namespace),
                )
                .await
                .context(AttachToMonitorSnafu {
                    namespace: &namespace,
                    name: group,
                })?;
        }

        Ok(())
    }

    /// Builds the cluster of a new group.
    ///
    /// The group inherits the monitor of its parent, so it is attached to
    /// that monitor as soon as it is created.
    fn build_group_cluster(
        &self,
        parent: &Parent<'_>,
        group: &str,
        desired: &DesiredGroup<'_>,
        autoscaler: &DatabaseAutoscaler,
    ) -> Result<DatabaseCluster> {
        let mut labels = desired.plan.labels.clone();
        labels.insert(self.options.group_label_key.clone(), group.to_owned());

        let mut spec = DatabaseClusterSpec {
            cluster: Some(ClusterRef::new(&parent.name, &parent.namespace)),
            ..DatabaseClusterSpec::default()
        };
        *spec.node_group_mut(desired.component) =
            Some(self.node_group(group, desired, autoscaler)?);

        let mut cluster = DatabaseCluster::new(group, spec);
        cluster.metadata.namespace = Some(parent.namespace.clone());
        cluster.metadata.labels = Some(labels);
        cluster.metadata.owner_references = parent
            .cluster
            .controller_owner_ref(&())
            .map(|owner| vec![owner]);
        cluster.status = parent
            .cluster
            .monitor()
            .map(|monitor| DatabaseClusterStatus {
                monitor: Some(monitor.clone()),
            });

        Ok(cluster)
    }

    /// Builds the node group for `desired`, sized by the first resource
    /// profile matching the plan.
    fn node_group(
        &self,
        group: &str,
        desired: &DesiredGroup<'_>,
        autoscaler: &DatabaseAutoscaler,
    ) -> Result<NodeGroupSpec> {
        let plan = desired.plan;
        let profile = autoscaler
            .spec
            .resource_profile(&plan.resource_type)
            .context(ResourceProfileNotFoundSnafu {
                group,
                resource_type: &plan.resource_type,
            })?;

        Ok(NodeGroupSpec {
            replicas: plan.count,
            resources: profile.to_resource_requirements(),
            labels: plan.labels.clone(),
        })
    }
}
