use std::collections::BTreeMap;

use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, LabelSelectorRequirement};
use snafu::Snafu;

type Result<T, E = SelectorError> = std::result::Result<T, E>;

#[derive(Debug, PartialEq, Snafu)]
pub enum SelectorError {
    #[snafu(display("label selector with binary operator {operator:?} must have values"))]
    LabelSelectorBinaryOperatorWithoutValues { operator: String },

    #[snafu(display("label selector with unary operator {operator:?} must not have values"))]
    LabelSelectorUnaryOperatorWithValues { operator: String },

    #[snafu(display("labelSelector has an invalid operator {operator:?}"))]
    LabelSelectorInvalidOperator { operator: String },
}

/// The operator of a validated [`LabelSelectorRequirement`].
enum Operator<'a> {
    In(&'a [String]),
    NotIn(&'a [String]),
    Exists,
    DoesNotExist,
}

impl<'a> Operator<'a> {
    fn parse(requirement: &'a LabelSelectorRequirement) -> Result<Self> {
        let values = requirement.values.as_deref().unwrap_or_default();

        match requirement.operator.as_str() {
            operator @ ("In" | "NotIn") if values.is_empty() => {
                LabelSelectorBinaryOperatorWithoutValuesSnafu { operator }.fail()
            }
            "In" => Ok(Self::In(values)),
            "NotIn" => Ok(Self::NotIn(values)),
            operator @ ("Exists" | "DoesNotExist") if !values.is_empty() => {
                LabelSelectorUnaryOperatorWithValuesSnafu { operator }.fail()
            }
            "Exists" => Ok(Self::Exists),
            "DoesNotExist" => Ok(Self::DoesNotExist),
            operator => LabelSelectorInvalidOperatorSnafu { operator }.fail(),
        }
    }
}

/// This trait extends the functionality of [`LabelSelector`].
///
/// Implementing this trait for any other type other than [`LabelSelector`]
/// can result in undefined behaviour.
pub trait LabelSelectorExt {
    /// Takes a [`LabelSelector`] and converts it to a String that can be used
    /// in Kubernetes API calls. It will return an error if the LabelSelector
    /// contains illegal things (e.g. an `Exists` operator with a value).
    fn to_query_string(&self) -> Result<String>;

    /// Evaluates the selector against `labels` the same way the API server
    /// does when listing objects. An empty selector matches everything.
    fn matches(&self, labels: &BTreeMap<String, String>) -> Result<bool>;
}

impl LabelSelectorExt for LabelSelector {
    fn to_query_string(&self) -> Result<String> {
        // match_labels are the equivalent of the "In" operator with a single
        // value. Both parts are joined on commas.
        let mut terms: Vec<String> = self
            .match_labels
            .iter()
            .flatten()
            .map(|(key, value)| format!("{key}={value}"))
            .collect();

        // Only the first invalid requirement is reported.
        // TODO: Return all errors in one go: https://github.com/stackabletech/operator-rs/issues/127
        for requirement in self.match_expressions.iter().flatten() {
            let key = &requirement.key;
            let term = match Operator::parse(requirement)? {
                Operator::In(values) => format!("{key} in ({})", values.join(", ")),
                Operator::NotIn(values) => format!("{key} notin ({})", values.join(", ")),
                Operator::Exists => key.to_string(),
                Operator::DoesNotExist => format!("!{key}"),
            };
            terms.push(term);
        }

        Ok(terms.join(","))
    }

    fn matches(&self, labels: &BTreeMap<String, String>) -> Result<bool> {
        let labels_match = self
            .match_labels
            .iter()
            .flatten()
            .all(|(key, value)| labels.get(key) == Some(value));

        let mut expressions_match = true;
        for requirement in self.match_expressions.iter().flatten() {
            let value = labels.get(&requirement.key);
            // Every requirement is validated, even after the first mismatch.
            expressions_match &= match Operator::parse(requirement)? {
                Operator::In(values) => value.is_some_and(|value| values.contains(value)),
                Operator::NotIn(values) => !value.is_some_and(|value| values.contains(value)),
                Operator::Exists => value.is_some(),
                Operator::DoesNotExist => value.is_none(),
            };
        }

        Ok(labels_match && expressions_match)
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    fn requirement(key: &str, operator: &str, values: Option<&[&str]>) -> LabelSelectorRequirement {
        LabelSelectorRequirement {
            key: key.to_string(),
            operator: operator.to_string(),
            values: values.map(|values| values.iter().map(|value| value.to_string()).collect()),
        }
    }

    #[test]
    fn test_label_selector() {
        let mut match_labels = BTreeMap::new();
        match_labels.insert("foo".to_string(), "bar".to_string());
        match_labels.insert("hui".to_string(), "buh".to_string());

        let match_expressions = vec![
            requirement("foo", "In", Some(&["bar"])),
            requirement("foo", "In", Some(&["quick", "bar"])),
            requirement("foo", "NotIn", Some(&["quick", "bar"])),
            requirement("foo", "Exists", None),
            requirement("foo", "DoesNotExist", None),
        ];

        let ls = LabelSelector {
            match_expressions: Some(match_expressions),
            match_labels: Some(match_labels.clone()),
        };
        assert_eq!(
            ls.to_query_string().unwrap(),
            "foo=bar,hui=buh,foo in (bar),foo in (quick, bar),foo notin (quick, bar),foo,!foo",
        );

        let ls = LabelSelector {
            match_expressions: None,
            match_labels: Some(match_labels),
        };
        assert_eq!(ls.to_query_string().unwrap(), "foo=bar,hui=buh",);

        let ls = LabelSelector {
            match_expressions: None,
            match_labels: None,
        };
        assert_eq!(ls.to_query_string().unwrap(), "");
    }

    #[rstest]
    #[case(requirement("foo", "In", None), SelectorError::LabelSelectorBinaryOperatorWithoutValues { operator: "In".to_string() })]
    #[case(requirement("foo", "NotIn", Some(&[])), SelectorError::LabelSelectorBinaryOperatorWithoutValues { operator: "NotIn".to_string() })]
    #[case(requirement("foo", "Exists", Some(&["foobar"])), SelectorError::LabelSelectorUnaryOperatorWithValues { operator: "Exists".to_string() })]
    #[case(requirement("foo", "IllegalOperator", None), SelectorError::LabelSelectorInvalidOperator { operator: "IllegalOperator".to_string() })]
    fn invalid_selector(#[case] requirement: LabelSelectorRequirement, #[case] error: SelectorError) {
        let ls = LabelSelector {
            match_expressions: Some(vec![requirement]),
            match_labels: None,
        };

        assert_eq!(ls.to_query_string().unwrap_err(), error);
        assert_eq!(ls.matches(&BTreeMap::new()).unwrap_err(), error);
    }

    #[rstest]
    #[case(requirement("group", "Exists", None), &[("group", "g1")], true)]
    #[case(requirement("group", "Exists", None), &[("zone", "a")], false)]
    #[case(requirement("group", "DoesNotExist", None), &[("zone", "a")], true)]
    #[case(requirement("group", "In", Some(&["g1", "g2"])), &[("group", "g2")], true)]
    #[case(requirement("group", "In", Some(&["g1", "g2"])), &[("group", "g3")], false)]
    #[case(requirement("group", "NotIn", Some(&["g1"])), &[("group", "g3")], true)]
    #[case(requirement("group", "NotIn", Some(&["g1"])), &[], true)]
    fn match_expressions(
        #[case] requirement: LabelSelectorRequirement,
        #[case] labels: &[(&str, &str)],
        #[case] expected: bool,
    ) {
        let labels = labels
            .iter()
            .map(|(key, value)| (key.to_string(), value.to_string()))
            .collect();
        let ls = LabelSelector {
            match_expressions: Some(vec![requirement]),
            match_labels: None,
        };

        assert_eq!(ls.matches(&labels).unwrap(), expected);
    }

    #[test]
    fn match_labels_and_expressions() {
        let ls = LabelSelector {
            match_expressions: Some(vec![requirement("group", "Exists", None)]),
            match_labels: Some(BTreeMap::from([("zone".to_string(), "a".to_string())])),
        };

        let labels = BTreeMap::from([
            ("group".to_string(), "g1".to_string()),
            ("zone".to_string(), "a".to_string()),
        ]);
        assert!(ls.matches(&labels).unwrap());

        let labels = BTreeMap::from([("group".to_string(), "g1".to_string())]);
        assert!(!ls.matches(&labels).unwrap());

        assert!(LabelSelector::default().matches(&labels).unwrap());
    }
}
