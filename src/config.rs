//! Runtime configuration shared by every reconcile pass.

use crate::naming::OPERATOR_NAME;
use std::time::Duration;

/// Tunables for the Application controller
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperatorConfig {
    /// Field manager used for server-side apply
    pub field_manager: String,
    /// Ingress class set on managed Ingresses and on the HTTP-01 solver
    pub ingress_class: String,
    /// Maximum number of Applications reconciled in parallel
    pub concurrency: u16,
    /// How long to wait before re-checking an issuer that is not ready yet
    pub issuer_poll_interval: Duration,
    /// Periodic resync of converged Applications
    pub resync_interval: Duration,
    /// Restrict watches to one namespace; all namespaces when `None`
    pub watch_namespace: Option<String>,
}

impl Default for OperatorConfig {
    fn default() -> Self {
        Self {
            field_manager: OPERATOR_NAME.to_string(),
            ingress_class: "kong".to_string(),
            concurrency: 2,
            issuer_poll_interval: Duration::from_secs(30),
            resync_interval: Duration::from_secs(300),
            watch_namespace: None,
        }
    }
}
