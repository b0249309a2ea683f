//! Options of a reconciliation pass.

use serde::Deserialize;

use crate::group::AUTOSCALING_GROUP_LABEL_KEY;

/// The default field manager used for all writes.
pub const DEFAULT_FIELD_MANAGER: &str = "autoscaling.stackable.tech";

#[cfg_attr(
    feature = "clap",
    derive(clap::Args),
    command(next_help_heading = "Autoscaling Options")
)]
#[derive(Clone, Debug, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SyncOptions {
    /// The label key which holds the autoscaling group of plans and group clusters.
    #[cfg_attr(
        feature = "clap",
        arg(
            long = "autoscaling-group-label",
            env = "AUTOSCALING_GROUP_LABEL",
            default_value = AUTOSCALING_GROUP_LABEL_KEY
        )
    )]
    #[serde(default = "SyncOptions::default_group_label_key")]
    pub group_label_key: String,

    /// The field manager recorded for every object written.
    #[cfg_attr(
        feature = "clap",
        arg(long, env = "FIELD_MANAGER", default_value = DEFAULT_FIELD_MANAGER)
    )]
    #[serde(default = "SyncOptions::default_field_manager")]
    pub field_manager: String,
}

impl SyncOptions {
    fn default_group_label_key() -> String {
        AUTOSCALING_GROUP_LABEL_KEY.to_owned()
    }

    fn default_field_manager() -> String {
        DEFAULT_FIELD_MANAGER.to_owned()
    }
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            group_label_key: Self::default_group_label_key(),
            field_manager: Self::default_field_manager(),
        }
    }
}

#[cfg(test)]
mod tests {
    use indoc::indoc;

    use super::*;

    #[test]
    fn deserialize_with_defaults() {
        let options: SyncOptions = serde_yaml::from_str("{}").expect("valid options");
        assert_eq!(options, SyncOptions::default());

        let options: SyncOptions = serde_yaml::from_str(indoc! {"
            groupLabelKey: example.com/group
        "})
        .expect("valid options");
        assert_eq!(options.group_label_key, "example.com/group");
        assert_eq!(options.field_manager, DEFAULT_FIELD_MANAGER);
    }

    #[cfg(feature = "clap")]
    #[test]
    fn parse_arguments() {
        use clap::Parser;

        #[derive(Parser)]
        struct Cli {
            #[command(flatten)]
            options: SyncOptions,
        }

        let cli = Cli::parse_from(["autoscaler"]);
        assert_eq!(cli.options, SyncOptions::default());

        let cli = Cli::parse_from([
            "autoscaler",
            "--autoscaling-group-label",
            "example.com/group",
            "--field-manager",
            "example",
        ]);
        assert_eq!(
            cli.options,
            SyncOptions {
                group_label_key: "example.com/group".to_owned(),
                field_manager: "example".to_owned(),
            }
        );
    }
}
