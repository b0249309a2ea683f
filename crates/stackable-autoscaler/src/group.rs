//! Group identities and the diff between desired and observed groups.

use std::collections::{BTreeMap, BTreeSet};

use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, LabelSelectorRequirement};
use snafu::{OptionExt, Snafu};

/// The default label key holding the name of an autoscaling group.
pub const AUTOSCALING_GROUP_LABEL_KEY: &str = "autoscaling.stackable.tech/group";

#[derive(Debug, PartialEq, Snafu)]
#[snafu(display("label {key:?} is missing"))]
pub struct MissingLabelError {
    key: String,
}

/// Returns the group identity stored under `key` in `labels`.
pub fn group_name<'a>(
    labels: &'a BTreeMap<String, String>,
    key: &str,
) -> Result<&'a str, MissingLabelError> {
    labels
        .get(key)
        .map(String::as_str)
        .context(MissingLabelSnafu { key })
}

/// Selects every object carrying the group label `key`, regardless of its
/// value.
pub fn group_selector(key: &str) -> LabelSelector {
    LabelSelector {
        match_expressions: Some(vec![LabelSelectorRequirement {
            key: key.to_owned(),
            operator: "Exists".to_owned(),
            values: None,
        }]),
        match_labels: None,
    }
}

/// Partitions the union of desired and observed groups.
///
/// Every group ends up in exactly one of the three sets.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct GroupDiff {
    /// Observed, but no longer desired.
    pub to_delete: BTreeSet<String>,

    /// Both desired and observed.
    pub to_update: BTreeSet<String>,

    /// Desired, but not observed yet.
    pub to_create: BTreeSet<String>,
}

impl GroupDiff {
    pub fn new(desired: &BTreeSet<String>, observed: &BTreeSet<String>) -> Self {
        Self {
            to_delete: observed.difference(desired).cloned().collect(),
            to_update: desired.intersection(observed).cloned().collect(),
            to_create: desired.difference(observed).cloned().collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.to_delete.is_empty() && self.to_update.is_empty() && self.to_create.is_empty()
    }
}
