//! Application Kubernetes Operator
//!
//! Turns a single `Application` resource into the Kubernetes objects needed
//! to run and expose a containerised service.
//!
//! ## Managed resources
//!
//! - `ConfigMap` / `Secret`: `CM_` and `SEC_` prefixed environment variables
//! - `Deployment`: the application container, applied with server-side apply
//! - `Service` / `Ingress`: optional exposure
//! - cert-manager `ClusterIssuer`: optional ACME TLS, one per namespace
//!
//! ## Example
//!
//! ```yaml
//! apiVersion: apps.example.com/v1alpha1
//! kind: Application
//! metadata:
//!   name: demo
//!   namespace: ns1
//! spec:
//!   image: nginx:1.27
//!   containerPort: 8080
//!   envVars:
//!     - name: CM_MODE
//!       value: prod
//!   service:
//!     port: 80
//!   ingress:
//!     host: demo.example.com
//!     path: /
//! ```

pub mod client;
pub mod conditions;
pub mod config;
pub mod controllers;
pub mod crd;
pub mod error;
pub mod leader_election;
pub mod metrics;
pub mod naming;

#[cfg(test)]
pub(crate) mod testing;

pub use client::{ClusterClient, KubeClusterClient};
pub use config::OperatorConfig;
pub use controllers::ApplicationController;
pub use crd::{
    AcmeIssuer, Application, ApplicationCondition, ApplicationSpec, ApplicationStatus,
    ClusterIssuer,
};
pub use error::{OperatorError, Result};
pub use metrics::Metrics;
