//! Finalizer bookkeeping and teardown of the cluster-scoped issuer.
//!
//! Owned children are left to garbage collection; only the issuer, which
//! has no owner reference, needs explicit cleanup.

use super::app_namespace;
use crate::client::ClusterClient;
use crate::conditions::APPLICATION_FINALIZER;
use crate::crd::Application;
use crate::error::{OperatorError, Result};
use crate::naming::issuer_name;
use kube::runtime::controller::Action;
use kube::ResourceExt;
use tracing::info;

pub fn has_finalizer(app: &Application) -> bool {
    app.finalizers().iter().any(|f| f == APPLICATION_FINALIZER)
}

/// Add the finalizer if missing and persist it right away.
///
/// Returns the Application as stored after the call. The write carries the
/// observed resourceVersion, so a concurrent edit surfaces as a conflict.
pub async fn ensure_finalizer<C: ClusterClient>(cluster: &C, app: &Application) -> Result<Application> {
    if has_finalizer(app) {
        return Ok(app.clone());
    }
    let namespace = app_namespace(app)?;

    let mut updated = app.clone();
    updated
        .metadata
        .finalizers
        .get_or_insert_with(Vec::new)
        .push(APPLICATION_FINALIZER.to_string());
    let stored = cluster.replace(&namespace, &updated).await?;
    info!("Added finalizer to Application {}/{}", namespace, app.name_any());
    Ok(stored)
}

/// Handle a deleting Application: delete the issuer, then release the finalizer.
///
/// Any failure leaves the finalizer in place, so deletion stays blocked
/// until a later pass succeeds.
pub async fn teardown<C: ClusterClient>(cluster: &C, app: &Application) -> Result<Action> {
    if !has_finalizer(app) {
        return Ok(Action::await_change());
    }
    let namespace = app_namespace(app)?;
    let name = app.name_any();
    info!("Handling deletion of Application {}/{}", namespace, name);

    let issuer = issuer_name(&namespace);
    let deleted = cluster
        .delete_issuer(&issuer)
        .await
        .map_err(|e| OperatorError::Finalizer {
            name: name.clone(),
            cause: format!("deleting ClusterIssuer {}: {}", issuer, e),
        })?;
    if deleted {
        info!(issuer = %issuer, "Deleted ClusterIssuer");
    }

    let mut released = app.clone();
    if let Some(finalizers) = released.metadata.finalizers.as_mut() {
        finalizers.retain(|f| f != APPLICATION_FINALIZER);
    }
    cluster.replace(&namespace, &released).await?;

    info!("Finalizer removed for Application {}/{}", namespace, name);
    Ok(Action::await_change())
}
