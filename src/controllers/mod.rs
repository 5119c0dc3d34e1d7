//! Controllers for the Application operator
//!
//! The Application controller watches Application resources, their owned
//! children and the cert-manager issuers, and drives each Application towards
//! the state described in its spec.

mod application;
mod backoff;
mod finalizer;
mod sync;
mod tls;

pub use application::{applications_for_issuer, ApplicationController};
pub use backoff::{backoff_delay, FailureTracker};
pub use finalizer::{ensure_finalizer, has_finalizer, teardown};
pub use sync::{
    build_deployment, container_env, create_or_update, delete_if_present, sync_config_map,
    sync_deployment, sync_ingress, sync_secret, sync_service, ApplyOutcome,
};
pub use tls::{
    bind_ingress_tls, desired_issuer, reconcile_issuer, reconcile_tls, IssuerOutcome, TlsState,
};

use crate::crd::Application;
use crate::error::{OperatorError, Result};
use kube::ResourceExt;

/// Namespace of an Application; always set for a namespaced kind read from the API.
pub(crate) fn app_namespace(app: &Application) -> Result<String> {
    app.namespace().ok_or_else(|| {
        OperatorError::InvalidState(format!("Application {} has no namespace", app.name_any()))
    })
}
