//! Kubernetes-standard status condition helpers
//!
//! Provides constants and builder functions for the Application status
//! conditions, following the Kubernetes API conventions.

use crate::crd::ApplicationCondition;
use chrono::Utc;

// Condition status values
pub const CONDITION_TRUE: &str = "True";

// Application condition types
pub const APPLICATION_CONDITION_AVAILABLE: &str = "Available";

pub const REASON_RECONCILED: &str = "Reconciled";
pub const MESSAGE_RECONCILED: &str = "Application resources successfully reconciled";

/// Finalizer guarding the cluster-scoped issuer
pub const APPLICATION_FINALIZER: &str = "apps.example.com/finalizer";

/// Build a condition with the current timestamp.
pub fn build_condition(
    condition_type: &str,
    status: &str,
    reason: &str,
    message: &str,
) -> ApplicationCondition {
    ApplicationCondition {
        r#type: condition_type.to_string(),
        status: status.to_string(),
        last_transition_time: Some(Utc::now().to_rfc3339()),
        reason: Some(reason.to_string()),
        message: Some(message.to_string()),
    }
}

/// The condition written once an Application has fully converged.
pub fn available_condition() -> ApplicationCondition {
    build_condition(
        APPLICATION_CONDITION_AVAILABLE,
        CONDITION_TRUE,
        REASON_RECONCILED,
        MESSAGE_RECONCILED,
    )
}

/// Returns the condition list to persist, or `None` when the most recent
/// condition already reports `Available=True` and no write is needed.
pub fn mark_available(current: &[ApplicationCondition]) -> Option<Vec<ApplicationCondition>> {
    match current.first() {
        Some(c) if c.r#type == APPLICATION_CONDITION_AVAILABLE && c.status == CONDITION_TRUE => {
            None
        }
        _ => Some(vec![available_condition()]),
    }
}
