//! Reconciles the autoscaling groups of a [`DatabaseCluster`][1] against the
//! plans emitted by an external capacity planner.
//!
//! Every plan describes one group. A reconciliation pass lists the group
//! clusters which currently exist, deletes the ones no longer planned, scales
//! the ones which are still planned and creates the missing ones. Whenever the
//! membership changes, the [`DatabaseMonitor`][2] referenced by a group is kept
//! in sync.
//!
//! The entry point is [`sync::Synchronizer`].
//!
//! ## Crate Features
//!
//! - `default` enables `clap`.
//! - `clap` derives [`clap::Args`] for [`config::SyncOptions`].
//!
//! [1]: crate::crd::DatabaseCluster
//! [2]: crate::crd::DatabaseMonitor

pub mod config;
pub mod crd;
pub mod group;
pub mod logging;
pub mod monitor;
pub mod plan;
pub mod selector;
pub mod store;
pub mod sync;

// External re-exports
pub use k8s_openapi;
pub use kube;
