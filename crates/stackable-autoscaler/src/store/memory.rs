use std::{
    collections::BTreeMap,
    sync::{Mutex, MutexGuard, PoisonError},
};

use async_trait::async_trait;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector;
use kube::{Resource, ResourceExt};
use snafu::ResultExt;

use crate::{
    crd::{DatabaseCluster, DatabaseMonitor},
    selector::LabelSelectorExt,
    store::{
        CLUSTER_KIND, Error, InvalidSelectorSnafu, MONITOR_KIND, MonitorStore, ResourceStore,
        Result, Verb,
    },
};

/// The failure a [`Fault`] produces.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum FaultKind {
    NotFound,
    Conflict,
    Unavailable,
}

/// A failure returned by the next matching call to a [`MemoryStore`].
///
/// A fault matches a call if the verb is the same and `name` equals the name
/// of the object (or the namespace for [`Verb::List`]). It is consumed by the
/// first matching call. Faults are evaluated before the call touches any
/// state, so a faulted delete leaves the object in place.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Fault {
    pub verb: Verb,
    pub name: String,
    pub kind: FaultKind,
}

impl Fault {
    pub fn new(verb: Verb, name: impl Into<String>, kind: FaultKind) -> Self {
        Self {
            verb,
            name: name.into(),
            kind,
        }
    }
}

type ObjectKey = (String, String);

#[derive(Debug, Default)]
struct State {
    clusters: BTreeMap<ObjectKey, DatabaseCluster>,
    monitors: BTreeMap<ObjectKey, DatabaseMonitor>,
    last_resource_version: u64,
    faults: Vec<Fault>,
    calls: Vec<(Verb, String)>,
}

impl State {
    /// Records the call and returns the error of the first matching fault.
    fn call(&mut self, verb: Verb, kind: &'static str, namespace: &str, name: &str) -> Result<()> {
        self.calls.push((verb, name.to_owned()));

        let Some(index) = self
            .faults
            .iter()
            .position(|fault| fault.verb == verb && fault.name == name)
        else {
            return Ok(());
        };

        let namespace = namespace.to_owned();
        let name = name.to_owned();
        Err(match self.faults.remove(index).kind {
            FaultKind::NotFound => Error::NotFound {
                kind,
                namespace,
                name,
            },
            FaultKind::Conflict => Error::Conflict {
                kind,
                namespace,
                name,
            },
            FaultKind::Unavailable => Error::Unavailable {
                verb,
                kind,
                target: format!("{namespace}/{name}"),
            },
        })
    }

    fn next_resource_version(&mut self) -> String {
        self.last_resource_version += 1;
        self.last_resource_version.to_string()
    }
}

/// Builds the key of a namespaced object.
fn key_of<K: Resource>(object: &K) -> ObjectKey {
    (object.namespace().unwrap_or_default(), object.name_any())
}

/// Replaces the stored object if the resource version of `object` matches,
/// an unset resource version replaces unconditionally.
fn replace<K: Resource + Clone>(
    objects: &mut BTreeMap<ObjectKey, K>,
    object: &K,
    resource_version: String,
    kind: &'static str,
) -> Result<K> {
    let key = key_of(object);
    let (namespace, name) = key.clone();
    let Some(stored) = objects.get_mut(&key) else {
        return Err(Error::NotFound {
            kind,
            namespace,
            name,
        });
    };

    let expected = object.meta().resource_version.as_ref();
    if expected.is_some_and(|expected| Some(expected) != stored.meta().resource_version.as_ref()) {
        return Err(Error::Conflict {
            kind,
            namespace,
            name,
        });
    }

    let mut updated = object.clone();
    updated.meta_mut().resource_version = Some(resource_version);
    *stored = updated.clone();
    Ok(updated)
}

/// An in-memory store implementing [`ResourceStore`] and [`MonitorStore`].
///
/// It assigns resource versions and enforces optimistic concurrency like the
/// API server does. Failures can be injected with [`MemoryStore::inject`] and
/// every call is recorded, see [`MemoryStore::calls`].
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<State>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    // The state stays consistent even if a holder of the lock panicked, every
    // mutation completes before the guard is dropped.
    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Stores `cluster` as is, overwriting any cluster with the same name.
    pub fn insert_cluster(&self, mut cluster: DatabaseCluster) -> DatabaseCluster {
        let mut state = self.state();
        cluster.metadata.resource_version = Some(state.next_resource_version());
        state.clusters.insert(key_of(&cluster), cluster.clone());
        cluster
    }

    /// Stores `monitor` as is, overwriting any monitor with the same name.
    pub fn insert_monitor(&self, mut monitor: DatabaseMonitor) -> DatabaseMonitor {
        let mut state = self.state();
        monitor.metadata.resource_version = Some(state.next_resource_version());
        state.monitors.insert(key_of(&monitor), monitor.clone());
        monitor
    }

    pub fn cluster(&self, namespace: &str, name: &str) -> Option<DatabaseCluster> {
        let key = (namespace.to_owned(), name.to_owned());
        self.state().clusters.get(&key).cloned()
    }

    pub fn monitor(&self, namespace: &str, name: &str) -> Option<DatabaseMonitor> {
        let key = (namespace.to_owned(), name.to_owned());
        self.state().monitors.get(&key).cloned()
    }

    /// Returns the names of all clusters in `namespace`, sorted.
    pub fn cluster_names(&self, namespace: &str) -> Vec<String> {
        self.state()
            .clusters
            .keys()
            .filter(|(cluster_namespace, _)| cluster_namespace == namespace)
            .map(|(_, name)| name.clone())
            .collect()
    }

    pub fn inject(&self, fault: Fault) {
        self.state().faults.push(fault);
    }

    /// Returns every call made so far together with the name of the object
    /// (or the namespace for [`Verb::List`]).
    pub fn calls(&self) -> Vec<(Verb, String)> {
        self.state().calls.clone()
    }

    /// Returns `true` if `verb` was called for the object `name`.
    pub fn was_called(&self, verb: Verb, name: &str) -> bool {
        self.state()
            .calls
            .iter()
            .any(|(called, called_name)| *called == verb && called_name == name)
    }
}

#[async_trait]
impl ResourceStore for MemoryStore {
    async fn list(
        &self,
        namespace: &str,
        selector: &LabelSelector,
    ) -> Result<Vec<DatabaseCluster>> {
        let mut state = self.state();
        state.call(Verb::List, CLUSTER_KIND, namespace, namespace)?;

        let mut clusters = Vec::new();
        for ((cluster_namespace, _), cluster) in &state.clusters {
            if cluster_namespace == namespace
                && selector
                    .matches(cluster.labels())
                    .context(InvalidSelectorSnafu)?
            {
                clusters.push(cluster.clone());
            }
        }

        Ok(clusters)
    }

    async fn create(&self, cluster: &DatabaseCluster) -> Result<DatabaseCluster> {
        let mut state = self.state();
        let key = key_of(cluster);
        let (namespace, name) = key.clone();
        state.call(Verb::Create, CLUSTER_KIND, &namespace, &name)?;

        if state.clusters.contains_key(&key) {
            return Err(Error::AlreadyExists {
                kind: CLUSTER_KIND,
                namespace,
                name,
            });
        }

        let mut created = cluster.clone();
        created.metadata.resource_version = Some(state.next_resource_version());
        state.clusters.insert(key, created.clone());
        Ok(created)
    }

    async fn update(&self, cluster: &DatabaseCluster) -> Result<DatabaseCluster> {
        let mut state = self.state();
        let (namespace, name) = key_of(cluster);
        state.call(Verb::Update, CLUSTER_KIND, &namespace, &name)?;

        let resource_version = state.next_resource_version();
        replace(&mut state.clusters, cluster, resource_version, CLUSTER_KIND)
    }

    async fn delete(&self, namespace: &str, name: &str) -> Result<()> {
        let mut state = self.state();
        state.call(Verb::Delete, CLUSTER_KIND, namespace, name)?;

        match state
            .clusters
            .remove(&(namespace.to_owned(), name.to_owned()))
        {
            Some(_) => Ok(()),
            None => Err(Error::NotFound {
                kind: CLUSTER_KIND,
                namespace: namespace.to_owned(),
                name: name.to_owned(),
            }),
        }
    }
}

#[async_trait]
impl MonitorStore for MemoryStore {
    async fn get_monitor(&self, namespace: &str, name: &str) -> Result<DatabaseMonitor> {
        let mut state = self.state();
        state.call(Verb::GetMonitor, MONITOR_KIND, namespace, name)?;

        state
            .monitors
            .get(&(namespace.to_owned(), name.to_owned()))
            .cloned()
            .ok_or_else(|| Error::NotFound {
                kind: MONITOR_KIND,
                namespace: namespace.to_owned(),
                name: name.to_owned(),
            })
    }

    async fn update_monitor(&self, monitor: &DatabaseMonitor) -> Result<DatabaseMonitor> {
        let mut state = self.state();
        let (namespace, name) = key_of(monitor);
        state.call(Verb::UpdateMonitor, MONITOR_KIND, &namespace, &name)?;

        let resource_version = state.next_resource_version();
        replace(&mut state.monitors, monitor, resource_version, MONITOR_KIND)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;
    use crate::{
        crd::{DatabaseClusterSpec, DatabaseMonitorSpec},
        group::{AUTOSCALING_GROUP_LABEL_KEY, group_selector},
    };

    fn cluster(name: &str, group: Option<&str>) -> DatabaseCluster {
        let mut cluster = DatabaseCluster::new(name, DatabaseClusterSpec::default());
        cluster.metadata.namespace = Some("default".to_owned());
        cluster.metadata.labels = group.map(|group| {
            BTreeMap::from([(AUTOSCALING_GROUP_LABEL_KEY.to_owned(), group.to_owned())])
        });
        cluster
    }

    #[tokio::test]
    async fn list_filters_by_namespace_and_selector() {
        let store = MemoryStore::new();
        store.insert_cluster(cluster("basic", None));
        store.insert_cluster(cluster("g1", Some("g1")));
        let mut elsewhere = cluster("g2", Some("g2"));
        elsewhere.metadata.namespace = Some("other".to_owned());
        store.insert_cluster(elsewhere);

        let listed = store
            .list("default", &group_selector(AUTOSCALING_GROUP_LABEL_KEY))
            .await
            .expect("list succeeds");

        let names: Vec<_> = listed.iter().map(ResourceExt::name_any).collect();
        assert_eq!(names, ["g1"]);
    }

    #[tokio::test]
    async fn create_rejects_existing_name() {
        let store = MemoryStore::new();
        store
            .create(&cluster("g1", Some("g1")))
            .await
            .expect("first create succeeds");

        let err = store
            .create(&cluster("g1", Some("g1")))
            .await
            .expect_err("second create fails");
        assert!(matches!(err, Error::AlreadyExists { .. }), "{err}");
    }

    #[tokio::test]
    async fn update_enforces_resource_version() {
        let store = MemoryStore::new();
        let stored = store.insert_cluster(cluster("g1", Some("g1")));

        let updated = store.update(&stored).await.expect("fresh update succeeds");
        assert_ne!(updated.metadata.resource_version, stored.metadata.resource_version);

        let err = store.update(&stored).await.expect_err("stale update fails");
        assert!(err.is_conflict(), "{err}");

        let err = store
            .update(&cluster("missing", None))
            .await
            .expect_err("update of a missing cluster fails");
        assert!(err.is_not_found(), "{err}");
    }

    #[tokio::test]
    async fn delete_missing_cluster_is_not_found() {
        let store = MemoryStore::new();
        store.insert_cluster(cluster("g1", Some("g1")));

        store.delete("default", "g1").await.expect("delete succeeds");
        let err = store
            .delete("default", "g1")
            .await
            .expect_err("second delete fails");
        assert!(err.is_not_found(), "{err}");
    }

    #[tokio::test]
    async fn faults_are_consumed_once() {
        let store = MemoryStore::new();
        let mut monitor = DatabaseMonitor::new("monitor", DatabaseMonitorSpec::default());
        monitor.metadata.namespace = Some("default".to_owned());
        store.insert_monitor(monitor);
        store.inject(Fault::new(
            Verb::GetMonitor,
            "monitor",
            FaultKind::Unavailable,
        ));

        let err = store
            .get_monitor("default", "monitor")
            .await
            .expect_err("injected fault is returned");
        assert!(matches!(err, Error::Unavailable { .. }), "{err}");

        store
            .get_monitor("default", "monitor")
            .await
            .expect("fault is consumed");
        assert_eq!(
            store.calls(),
            [
                (Verb::GetMonitor, "monitor".to_owned()),
                (Verb::GetMonitor, "monitor".to_owned())
            ]
        );
    }
}
