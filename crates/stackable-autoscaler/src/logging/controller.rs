//! Facilities for reporting the outcome of reconciliation passes
//!
//! The primary entry point is [`report_sync_result`].

use std::error::Error;

use kube::{Resource, core::DynamicObject, runtime::reflector::ObjectRef};

use crate::sync::SyncOutcome;

/// [`Error`] extensions that help report reconciliation errors
///
/// This should be implemented for reconciler error types.
pub trait ReconcilerError: Error {
    /// `PascalCase`d name for the error category
    ///
    /// This can typically be implemented by delegating to [`strum::EnumDiscriminants`] and [`strum::IntoStaticStr`].
    fn category(&self) -> &'static str;

    /// A reference to a secondary object providing additional context, if any
    ///
    /// This should be [`Some`] if the error happens while evaluating some related object
    /// (for example: when writing a group cluster or the monitor of the parent).
    fn secondary_object(&self) -> Option<ObjectRef<DynamicObject>> {
        None
    }
}

/// Reports the result of a reconciliation pass of `parent` to the current
/// [`tracing::Subscriber`]
pub fn report_sync_result<K, E>(parent: &ObjectRef<K>, result: &Result<SyncOutcome, E>)
where
    K: Resource,
    E: ReconcilerError + 'static,
{
    match result {
        Ok(outcome) => {
            tracing::info!(
                object = %parent,
                deleted = ?outcome.deleted,
                updated = ?outcome.updated,
                created = ?outcome.created,
                "Reconciled object"
            );
        }
        Err(err) => report_sync_error(parent, err),
    }
}

fn report_sync_error<K, E>(parent: &ObjectRef<K>, error: &E)
where
    K: Resource,
    E: ReconcilerError + 'static,
{
    match error.secondary_object() {
        Some(secondary) => tracing::error!(
            object = %parent,
            error.category = error.category(),
            secondary = %secondary,
            error = error as &dyn Error,
            "Failed to reconcile object",
        ),
        None => tracing::error!(
            object = %parent,
            error.category = error.category(),
            error = error as &dyn Error,
            "Failed to reconcile object",
        ),
    }
}
