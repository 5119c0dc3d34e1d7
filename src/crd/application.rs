//! Application Custom Resource Definition
//!
//! Describes a deployable service: the container to run, how it is exposed,
//! its environment and an optional ACME-backed TLS setup.

use super::issuer::AcmeIssuer;
use crate::error::{OperatorError, Result};
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Application is the Schema for the applications API
#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
#[kube(
    group = "apps.example.com",
    version = "v1alpha1",
    kind = "Application",
    namespaced,
    status = "ApplicationStatus",
    shortname = "app",
    printcolumn = r#"{"name":"Image","type":"string","jsonPath":".spec.image"}"#,
    printcolumn = r#"{"name":"Replicas","type":"integer","jsonPath":".spec.replicas"}"#,
    printcolumn = r#"{"name":"Available","type":"string","jsonPath":".status.conditions[0].status"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct ApplicationSpec {
    /// Number of replicas; the Deployment default applies when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replicas: Option<i32>,

    /// Container image reference
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,

    /// Port the container listens on
    pub container_port: i32,

    /// Service exposure
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service: Option<ApplicationService>,

    /// Ingress exposure
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ingress: Option<ApplicationIngress>,

    /// Environment variables. `CM_` and `SEC_` prefixed names are routed
    /// into the ConfigMap and Secret respectively.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub env_vars: Vec<EnvVar>,

    /// Container resource requests and limits
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resources: Option<ResourceRequirements>,

    /// TLS through an ACME cluster issuer
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tls: Option<TlsSpec>,
}

/// Service exposure for an Application
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ApplicationService {
    /// Service port, mapped onto the container port
    pub port: i32,
    /// Service type (ClusterIP, NodePort, LoadBalancer); ClusterIP when unset
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub type_: Option<String>,
    /// Annotations copied onto the Service
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,
}

/// Ingress exposure for an Application
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ApplicationIngress {
    /// Host the rule matches
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
    /// HTTP path prefix
    pub path: String,
    /// Annotations copied onto the Ingress
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,
}

/// A literal environment variable as written by the user
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
pub struct EnvVar {
    /// Variable name, optionally prefixed with `CM_` or `SEC_`
    pub name: String,
    /// Variable value
    #[serde(default)]
    pub value: String,
}

/// Resource requirements for the application container
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ResourceRequirements {
    /// Resource requests
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub requests: Option<ResourceList>,
    /// Resource limits
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limits: Option<ResourceList>,
}

/// Resource quantities
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq)]
pub struct ResourceList {
    /// CPU quantity (e.g., "500m", "2")
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cpu: Option<String>,
    /// Memory quantity (e.g., "512Mi", "2Gi")
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory: Option<String>,
}

/// TLS configuration
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TlsSpec {
    /// Enable TLS provisioning
    #[serde(default)]
    pub enable: bool,
    /// Issuer configuration
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub issuer: Option<IssuerSpec>,
}

/// Issuer configuration for TLS
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct IssuerSpec {
    /// ACME issuer settings passed through to cert-manager
    pub acme_issuer: AcmeIssuer,
}

/// Status of the Application
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ApplicationStatus {
    /// Conditions representing the Application state, most recent first
    #[serde(default)]
    pub conditions: Vec<ApplicationCondition>,
}

/// Condition of the Application
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ApplicationCondition {
    /// Type of condition
    pub r#type: String,
    /// Status of the condition (True, False, Unknown)
    pub status: String,
    /// Last time the condition transitioned
    #[serde(default)]
    pub last_transition_time: Option<String>,
    /// Reason for the condition
    #[serde(default)]
    pub reason: Option<String>,
    /// Human-readable message
    #[serde(default)]
    pub message: Option<String>,
}

impl ApplicationSpec {
    /// True when TLS provisioning is requested
    pub fn tls_enabled(&self) -> bool {
        self.tls.as_ref().is_some_and(|t| t.enable)
    }

    /// ACME settings, present only when TLS is enabled and configured
    pub fn acme_issuer(&self) -> Option<&AcmeIssuer> {
        self.tls
            .as_ref()
            .filter(|t| t.enable)
            .and_then(|t| t.issuer.as_ref())
            .map(|i| &i.acme_issuer)
    }

    /// Non-empty ingress host, the name certificates are issued for
    pub fn tls_host(&self) -> Option<&str> {
        self.ingress
            .as_ref()
            .and_then(|i| i.host.as_deref())
            .filter(|h| !h.is_empty())
    }

    /// The configured container image
    pub fn image(&self) -> Result<&str> {
        self.image
            .as_deref()
            .filter(|i| !i.is_empty())
            .ok_or_else(|| OperatorError::InvalidSpec("spec.image is required".to_string()))
    }

    /// Reject specs that cannot be rendered into managed resources.
    pub fn validate(&self) -> Result<()> {
        self.image()?;

        if self.container_port <= 0 || self.container_port > 65535 {
            return Err(OperatorError::InvalidSpec(format!(
                "spec.containerPort {} is out of range",
                self.container_port
            )));
        }
        if let Some(replicas) = self.replicas {
            if replicas < 0 {
                return Err(OperatorError::InvalidSpec(format!(
                    "spec.replicas must not be negative, got {}",
                    replicas
                )));
            }
        }
        if self.ingress.is_some() && self.service.is_none() {
            return Err(OperatorError::InvalidSpec(
                "spec.ingress requires spec.service to route traffic".to_string(),
            ));
        }
        if self.tls_enabled() {
            if self.tls_host().is_none() {
                return Err(OperatorError::InvalidSpec(
                    "spec.tls.enable requires spec.ingress.host".to_string(),
                ));
            }
            if self.acme_issuer().is_none() {
                return Err(OperatorError::InvalidSpec(
                    "spec.tls.enable requires spec.tls.issuer.acmeIssuer".to_string(),
                ));
            }
        }
        Ok(())
    }
}
