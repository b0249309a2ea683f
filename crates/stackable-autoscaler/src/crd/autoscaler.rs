use std::collections::BTreeMap;

use k8s_openapi::{
    api::core::v1::ResourceRequirements, apimachinery::pkg::api::resource::Quantity,
};
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::crd::ClusterRef;

const CPU: &str = "cpu";
const MEMORY: &str = "memory";
const STORAGE: &str = "storage";

/// Enables autoscaling for a [`DatabaseCluster`][1].
///
/// [1]: crate::crd::DatabaseCluster
#[derive(CustomResource, Clone, Debug, Default, Deserialize, JsonSchema, PartialEq, Serialize)]
#[kube(
    group = "autoscaling.stackable.tech",
    version = "v1alpha1",
    kind = "DatabaseAutoscaler",
    plural = "databaseautoscalers",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct DatabaseAutoscalerSpec {
    /// The cluster which is autoscaled.
    pub cluster: ClusterRef,

    /// The resource profiles available to newly created groups. Plans select
    /// a profile by its [`ResourceProfile::resource_type`].
    #[serde(default)]
    pub resources: Vec<ResourceProfile>,
}

#[derive(Clone, Debug, Default, Deserialize, JsonSchema, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceProfile {
    /// The name plans use to select this profile.
    pub resource_type: String,

    pub cpu: Option<Quantity>,
    pub memory: Option<Quantity>,
    pub storage: Option<Quantity>,
}

impl ResourceProfile {
    /// Converts the profile into requirements which request and limit the
    /// same amount of every resource set in the profile.
    pub fn to_resource_requirements(&self) -> ResourceRequirements {
        let quantities: BTreeMap<String, Quantity> = [
            (CPU, &self.cpu),
            (MEMORY, &self.memory),
            (STORAGE, &self.storage),
        ]
        .into_iter()
        .filter_map(|(name, quantity)| Some((name.to_owned(), quantity.clone()?)))
        .collect();

        ResourceRequirements {
            limits: Some(quantities.clone()),
            requests: Some(quantities),
            ..ResourceRequirements::default()
        }
    }
}

impl DatabaseAutoscalerSpec {
    /// Returns the first profile with the given resource type.
    pub fn resource_profile(&self, resource_type: &str) -> Option<&ResourceProfile> {
        self.resources
            .iter()
            .find(|profile| profile.resource_type == resource_type)
    }
}
