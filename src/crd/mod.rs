//! Custom Resource Definitions used by the Application operator
//!
//! - Application: the desired state of a deployable service (owned by this operator)
//! - ClusterIssuer: the cert-manager issuer provisioned for TLS (owned by cert-manager)

mod application;
mod issuer;

pub use application::{
    Application, ApplicationCondition, ApplicationIngress, ApplicationService, ApplicationSpec,
    ApplicationStatus, EnvVar, IssuerSpec, ResourceList, ResourceRequirements, TlsSpec,
};
pub use issuer::{
    AcmeChallengeSolver, AcmeChallengeSolverHttp01, AcmeChallengeSolverHttp01Ingress, AcmeIssuer,
    ClusterIssuer, IssuerCondition, IssuerSpecBody, IssuerStatus, SecretKeySelector,
};
