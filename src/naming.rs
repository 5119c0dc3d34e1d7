//! Derived names, labels and environment routing.
//!
//! These are compatibility contracts: child resource names, the issuer name
//! and the env prefixes must stay bit-exact across releases.

use crate::crd::{Application, EnvVar};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use kube::{Resource, ResourceExt};
use std::collections::BTreeMap;

/// Field manager and `managed` label value
pub const OPERATOR_NAME: &str = "application-operator";

/// Prefix routing a variable into the ConfigMap
pub const CONFIGMAP_PREFIX: &str = "CM_";
/// Prefix routing a variable into the Secret
pub const SECRET_PREFIX: &str = "SEC_";

const ISSUER_PREFIX: &str = "app-";
const ISSUER_SUFFIX: &str = "-issuer";

pub fn config_map_name(app: &Application) -> String {
    format!("{}-config", app.name_any())
}

pub fn secret_name(app: &Application) -> String {
    format!("{}-secret", app.name_any())
}

pub fn deployment_name(app: &Application) -> String {
    format!("{}-deployment", app.name_any())
}

pub fn service_name(app: &Application) -> String {
    format!("{}-service", app.name_any())
}

pub fn ingress_name(app: &Application) -> String {
    format!("{}-ingress", app.name_any())
}

/// Issuer name for a namespace. One issuer serves every Application in it.
pub fn issuer_name(namespace: &str) -> String {
    format!("{}{}{}", ISSUER_PREFIX, namespace, ISSUER_SUFFIX)
}

/// Inverse of [`issuer_name`], used to narrow issuer watch events to one namespace.
pub fn namespace_from_issuer_name(name: &str) -> Option<&str> {
    name.strip_prefix(ISSUER_PREFIX)
        .and_then(|rest| rest.strip_suffix(ISSUER_SUFFIX))
        .filter(|ns| !ns.is_empty())
}

/// Labels carried by every managed child; also the pod selector.
pub fn common_labels(app: &Application) -> BTreeMap<String, String> {
    let mut labels = BTreeMap::new();
    labels.insert("app".to_string(), app.name_any());
    labels.insert("managed".to_string(), OPERATOR_NAME.to_string());
    labels
}

/// Controller owner reference pointing at the Application.
pub fn owner_reference(app: &Application) -> OwnerReference {
    OwnerReference {
        api_version: Application::api_version(&()).to_string(),
        kind: Application::kind(&()).to_string(),
        name: app.name_any(),
        uid: app.metadata.uid.clone().unwrap_or_default(),
        controller: Some(true),
        block_owner_deletion: Some(true),
    }
}

/// Where a user-provided variable ends up
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnvRoute<'a> {
    /// Key in the ConfigMap, prefix stripped
    ConfigMap(&'a str),
    /// Key in the Secret, prefix stripped
    Secret(&'a str),
    /// Literal value on the container
    Literal,
}

pub fn route_env(name: &str) -> EnvRoute<'_> {
    if let Some(key) = name.strip_prefix(CONFIGMAP_PREFIX) {
        EnvRoute::ConfigMap(key)
    } else if let Some(key) = name.strip_prefix(SECRET_PREFIX) {
        EnvRoute::Secret(key)
    } else {
        EnvRoute::Literal
    }
}

/// Entries routed to the ConfigMap, keyed by stripped name. Later duplicates win.
pub fn config_map_data(env: &[EnvVar]) -> BTreeMap<String, String> {
    env.iter()
        .filter_map(|v| match route_env(&v.name) {
            EnvRoute::ConfigMap(key) => Some((key.to_string(), v.value.clone())),
            _ => None,
        })
        .collect()
}

/// Entries routed to the Secret, keyed by stripped name. Later duplicates win.
pub fn secret_data(env: &[EnvVar]) -> BTreeMap<String, String> {
    env.iter()
        .filter_map(|v| match route_env(&v.name) {
            EnvRoute::Secret(key) => Some((key.to_string(), v.value.clone())),
            _ => None,
        })
        .collect()
}
