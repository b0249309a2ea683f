//! Keeps the cluster list of a [`DatabaseMonitor`] in line with the group
//! clusters which are created and deleted.
//!
//! Both operations are read-modify-write cycles protected by optimistic
//! concurrency. If the monitor changed between reading and writing, it is
//! read again and the edit is retried once before giving up.

use snafu::{ResultExt, Snafu};
use tracing::instrument;

use crate::{
    crd::{ClusterRef, DatabaseMonitor},
    store::{self, MonitorStore},
};

/// How often an edit is retried after a conflicting write.
const CONFLICT_RETRIES: usize = 1;

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("failed to get monitor {namespace}/{name}"))]
    GetMonitor {
        source: store::Error,
        namespace: String,
        name: String,
    },

    #[snafu(display("failed to update monitor {namespace}/{name}"))]
    UpdateMonitor {
        source: store::Error,
        namespace: String,
        name: String,
    },
}

impl Error {
    /// The store error which caused this error.
    pub fn store_error(&self) -> &store::Error {
        match self {
            Self::GetMonitor { source, .. } | Self::UpdateMonitor { source, .. } => source,
        }
    }
}

/// Attaches clusters to and detaches clusters from monitors.
pub struct MonitorReferences<'a> {
    store: &'a dyn MonitorStore,
}

impl<'a> MonitorReferences<'a> {
    pub fn new(store: &'a dyn MonitorStore) -> Self {
        Self { store }
    }

    /// Appends `cluster` to the clusters of the monitor, unless an entry with
    /// the same name and namespace is already present.
    #[instrument(skip(self))]
    pub async fn attach(
        &self,
        monitor_namespace: &str,
        monitor_name: &str,
        cluster: &ClusterRef,
    ) -> Result<(), Error> {
        self.edit(monitor_namespace, monitor_name, |clusters| {
            if clusters
                .iter()
                .any(|entry| entry.same_object(cluster, monitor_namespace))
            {
                return false;
            }

            clusters.push(cluster.clone());
            true
        })
        .await
    }

    /// Removes every entry named `cluster_name` from the clusters of the
    /// monitor.
    ///
    /// A missing monitor references nothing, so there is nothing to detach
    /// from.
    #[instrument(skip(self))]
    pub async fn detach(
        &self,
        monitor_namespace: &str,
        monitor_name: &str,
        cluster_name: &str,
    ) -> Result<(), Error> {
        let result = self
            .edit(monitor_namespace, monitor_name, |clusters| {
                let before = clusters.len();
                clusters.retain(|entry| entry.name != cluster_name);
                clusters.len() != before
            })
            .await;

        match result {
            Err(Error::GetMonitor { source, .. }) if source.is_not_found() => {
                tracing::debug!("Monitor does not exist, nothing to detach");
                Ok(())
            }
            result => result,
        }
    }

    /// Applies `edit` to the cluster list of the monitor and persists the
    /// result. `edit` returns whether it changed the list, unchanged lists
    /// are not written.
    async fn edit(
        &self,
        namespace: &str,
        name: &str,
        edit: impl Fn(&mut Vec<ClusterRef>) -> bool,
    ) -> Result<(), Error> {
        let mut attempt = 0;
        loop {
            let mut monitor: DatabaseMonitor = self
                .store
                .get_monitor(namespace, name)
                .await
                .context(GetMonitorSnafu { namespace, name })?;

            if !edit(&mut monitor.spec.clusters) {
                tracing::debug!("Monitor is already up to date");
                return Ok(());
            }

            match self.store.update_monitor(&monitor).await {
                Ok(_) => {
                    tracing::info!("Updated monitor clusters");
                    return Ok(());
                }
                Err(source) if source.is_conflict() && attempt < CONFLICT_RETRIES => {
                    attempt += 1;
                    tracing::debug!(attempt, "Monitor changed concurrently, retrying");
                }
                Err(source) => return Err(source).context(UpdateMonitorSnafu { namespace, name }),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        crd::DatabaseMonitorSpec,
        store::{Fault, FaultKind, MemoryStore, Verb},
    };

    const NAMESPACE: &str = "default";
    const MONITOR: &str = "basic-monitor";

    fn store_with_monitor(clusters: Vec<ClusterRef>) -> MemoryStore {
        let store = MemoryStore::new();
        let mut monitor = DatabaseMonitor::new(MONITOR, DatabaseMonitorSpec { clusters });
        monitor.metadata.namespace = Some(NAMESPACE.to_owned());
        store.insert_monitor(monitor);
        store
    }

    fn clusters(store: &MemoryStore) -> Vec<ClusterRef> {
        store
            .monitor(NAMESPACE, MONITOR)
            .map(|monitor| monitor.spec.clusters)
            .unwrap_or_default()
    }

    #[tokio::test]
    async fn attach_appends_once() {
        let store = store_with_monitor(vec![ClusterRef::new("basic", NAMESPACE)]);
        let references = MonitorReferences::new(&store);
        let group = ClusterRef::new("g1", NAMESPACE);

        references.attach(NAMESPACE, MONITOR, &group).await.unwrap();
        references.attach(NAMESPACE, MONITOR, &group).await.unwrap();

        assert_eq!(
            clusters(&store),
            [ClusterRef::new("basic", NAMESPACE), group]
        );
        assert_eq!(
            store
                .calls()
                .iter()
                .filter(|(verb, _)| *verb == Verb::UpdateMonitor)
                .count(),
            1
        );
    }

    #[tokio::test]
    async fn attach_treats_implicit_namespace_as_duplicate() {
        let store = store_with_monitor(vec![ClusterRef {
            name: "g1".to_owned(),
            namespace: None,
        }]);
        let references = MonitorReferences::new(&store);

        references
            .attach(NAMESPACE, MONITOR, &ClusterRef::new("g1", NAMESPACE))
            .await
            .unwrap();

        assert_eq!(clusters(&store).len(), 1);
    }

    #[tokio::test]
    async fn detach_removes_all_entries_by_name() {
        let store = store_with_monitor(vec![
            ClusterRef::new("g1", NAMESPACE),
            ClusterRef::new("basic", NAMESPACE),
            ClusterRef::new("g1", "other"),
        ]);
        let references = MonitorReferences::new(&store);

        references.detach(NAMESPACE, MONITOR, "g1").await.unwrap();

        assert_eq!(clusters(&store), [ClusterRef::new("basic", NAMESPACE)]);
    }

    #[tokio::test]
    async fn detach_from_missing_monitor_succeeds() {
        let store = MemoryStore::new();
        let references = MonitorReferences::new(&store);

        references.detach(NAMESPACE, MONITOR, "g1").await.unwrap();
    }

    #[tokio::test]
    async fn attach_to_missing_monitor_fails() {
        let store = MemoryStore::new();
        let references = MonitorReferences::new(&store);

        let err = references
            .attach(NAMESPACE, MONITOR, &ClusterRef::new("g1", NAMESPACE))
            .await
            .unwrap_err();

        assert!(matches!(err, Error::GetMonitor { .. }), "{err}");
        assert!(err.store_error().is_not_found());
    }

    #[tokio::test]
    async fn conflict_is_retried_once() {
        let store = store_with_monitor(Vec::new());
        store.inject(Fault::new(Verb::UpdateMonitor, MONITOR, FaultKind::Conflict));
        let references = MonitorReferences::new(&store);

        references
            .attach(NAMESPACE, MONITOR, &ClusterRef::new("g1", NAMESPACE))
            .await
            .unwrap();

        assert_eq!(clusters(&store), [ClusterRef::new("g1", NAMESPACE)]);
        assert_eq!(
            store
                .calls()
                .iter()
                .filter(|(verb, _)| *verb == Verb::GetMonitor)
                .count(),
            2
        );
    }

    #[tokio::test]
    async fn second_conflict_is_surfaced() {
        let store = store_with_monitor(vec![ClusterRef::new("g1", NAMESPACE)]);
        store.inject(Fault::new(Verb::UpdateMonitor, MONITOR, FaultKind::Conflict));
        store.inject(Fault::new(Verb::UpdateMonitor, MONITOR, FaultKind::Conflict));
        let references = MonitorReferences::new(&store);

        let err = references
            .detach(NAMESPACE, MONITOR, "g1")
            .await
            .unwrap_err();

        assert!(matches!(err, Error::UpdateMonitor { .. }), "{err}");
        assert!(err.store_error().is_conflict());
        assert_eq!(clusters(&store), [ClusterRef::new("g1", NAMESPACE)]);
    }
}
