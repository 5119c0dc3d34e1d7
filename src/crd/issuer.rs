//! cert-manager `ClusterIssuer`, reduced to the ACME fields this operator manages.
//!
//! See <https://cert-manager.io/docs/reference/api-docs/#cert-manager.io/v1.ClusterIssuer>.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Cluster-scoped certificate issuer owned by cert-manager
#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Default)]
#[kube(
    group = "cert-manager.io",
    version = "v1",
    kind = "ClusterIssuer",
    status = "IssuerStatus"
)]
#[serde(rename_all = "camelCase")]
pub struct IssuerSpecBody {
    /// ACME issuer configuration
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub acme: Option<AcmeIssuer>,
}

/// See <https://cert-manager.io/docs/reference/api-docs/#acme.cert-manager.io/v1.ACMEIssuer>.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct AcmeIssuer {
    /// Email address used for ACME registration
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    /// ACME directory URL
    pub server: String,
    /// Secret holding the ACME account private key
    pub private_key_secret_ref: SecretKeySelector,
    /// Skip TLS verification of the ACME server
    #[serde(
        default,
        rename = "skipTLSVerify",
        skip_serializing_if = "Option::is_none"
    )]
    pub skip_tls_verify: Option<bool>,
    /// Challenge solvers
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub solvers: Vec<AcmeChallengeSolver>,
}

/// Reference to a key in a Secret
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Default)]
pub struct SecretKeySelector {
    /// Secret name
    pub name: String,
    /// Key within the secret
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
}

/// A single ACME challenge solver
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct AcmeChallengeSolver {
    /// HTTP-01 challenge configuration
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub http01: Option<AcmeChallengeSolverHttp01>,
}

/// HTTP-01 solver
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct AcmeChallengeSolverHttp01 {
    /// Solve through a temporary Ingress
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ingress: Option<AcmeChallengeSolverHttp01Ingress>,
}

/// Ingress settings for the HTTP-01 solver
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct AcmeChallengeSolverHttp01Ingress {
    /// Ingress class used for the challenge Ingress
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ingress_class_name: Option<String>,
}

/// Observed issuer state
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct IssuerStatus {
    /// Issuer conditions as reported by cert-manager
    #[serde(default)]
    pub conditions: Vec<IssuerCondition>,
}

/// A cert-manager issuer condition
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct IssuerCondition {
    /// Condition type, typically `Ready`
    pub r#type: String,
    /// True, False or Unknown
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl ClusterIssuer {
    /// The issuer counts as ready when its first reported condition is `True`.
    pub fn is_ready(&self) -> bool {
        self.status
            .as_ref()
            .and_then(|s| s.conditions.first())
            .is_some_and(|c| c.status == crate::conditions::CONDITION_TRUE)
    }
}
