//! Child resource synchronizers.
//!
//! Each synchronizer renders one managed resource from the Application spec
//! and converges the cluster towards it, reporting what it had to do.

use super::app_namespace;
use crate::client::{ClusterClient, NamespacedObject};
use crate::config::OperatorConfig;
use crate::crd::Application;
use crate::error::Result;
use crate::naming::{
    common_labels, config_map_data, config_map_name, deployment_name, ingress_name,
    owner_reference, route_env, secret_data, secret_name, service_name, EnvRoute,
};
use k8s_openapi::api::apps::v1::{Deployment, DeploymentSpec};
use k8s_openapi::api::core::v1::{
    ConfigMap, ConfigMapKeySelector, Container, ContainerPort, EnvVar, EnvVarSource, PodSpec,
    PodTemplateSpec, ResourceRequirements, Secret, SecretKeySelector, Service, ServicePort,
};
use k8s_openapi::api::networking::v1::{
    HTTPIngressPath, HTTPIngressRuleValue, Ingress, IngressBackend, IngressRule,
    IngressServiceBackend, ServiceBackendPort,
};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use k8s_openapi::ByteString;
use kube::ResourceExt;
use std::collections::BTreeMap;
use std::fmt;

const SERVICE_PORT_NAME: &str = "http";
const DEFAULT_SERVICE_TYPE: &str = "ClusterIP";
const INGRESS_PATH_TYPE: &str = "Prefix";

/// What a synchronizer did to its resource
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    Created,
    Updated,
    Unchanged,
    Deleted,
}

impl ApplyOutcome {
    /// True for anything but `Unchanged`
    pub fn is_change(self) -> bool {
        self != ApplyOutcome::Unchanged
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ApplyOutcome::Created => "created",
            ApplyOutcome::Updated => "updated",
            ApplyOutcome::Unchanged => "unchanged",
            ApplyOutcome::Deleted => "deleted",
        }
    }
}

impl fmt::Display for ApplyOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Read the live object, create it when missing, otherwise run `mutate` on a
/// copy and write it back only if something differs.
pub async fn create_or_update<C, K, F>(
    cluster: &C,
    namespace: &str,
    name: &str,
    mut mutate: F,
) -> Result<ApplyOutcome>
where
    C: ClusterClient,
    K: NamespacedObject + PartialEq + Default,
    F: FnMut(&mut K) + Send,
{
    match cluster.get::<K>(namespace, name).await? {
        None => {
            let mut obj = K::default();
            obj.meta_mut().name = Some(name.to_string());
            obj.meta_mut().namespace = Some(namespace.to_string());
            mutate(&mut obj);
            cluster.create(namespace, &obj).await?;
            Ok(ApplyOutcome::Created)
        }
        Some(live) => {
            let mut desired = live.clone();
            mutate(&mut desired);
            if desired == live {
                return Ok(ApplyOutcome::Unchanged);
            }
            cluster.replace(namespace, &desired).await?;
            Ok(ApplyOutcome::Updated)
        }
    }
}

/// Delete a resource if it exists. Absent counts as `Unchanged`.
pub async fn delete_if_present<C, K>(cluster: &C, namespace: &str, name: &str) -> Result<ApplyOutcome>
where
    C: ClusterClient,
    K: NamespacedObject,
{
    if cluster.delete::<K>(namespace, name).await? {
        Ok(ApplyOutcome::Deleted)
    } else {
        Ok(ApplyOutcome::Unchanged)
    }
}

pub async fn sync_config_map<C: ClusterClient>(cluster: &C, app: &Application) -> Result<ApplyOutcome> {
    let namespace = app_namespace(app)?;
    let name = config_map_name(app);
    let data = config_map_data(&app.spec.env_vars);
    if data.is_empty() {
        return delete_if_present::<C, ConfigMap>(cluster, &namespace, &name).await;
    }

    let labels = common_labels(app);
    let owner = owner_reference(app);
    create_or_update(cluster, &namespace, &name, |cm: &mut ConfigMap| {
        cm.metadata.labels = Some(labels.clone());
        cm.metadata.owner_references = Some(vec![owner.clone()]);
        cm.data = Some(data.clone());
    })
    .await
}

pub async fn sync_secret<C: ClusterClient>(cluster: &C, app: &Application) -> Result<ApplyOutcome> {
    let namespace = app_namespace(app)?;
    let name = secret_name(app);
    let data: BTreeMap<String, ByteString> = secret_data(&app.spec.env_vars)
        .into_iter()
        .map(|(k, v)| (k, ByteString(v.into_bytes())))
        .collect();
    if data.is_empty() {
        return delete_if_present::<C, Secret>(cluster, &namespace, &name).await;
    }

    let labels = common_labels(app);
    let owner = owner_reference(app);
    create_or_update(cluster, &namespace, &name, |secret: &mut Secret| {
        secret.metadata.labels = Some(labels.clone());
        secret.metadata.owner_references = Some(vec![owner.clone()]);
        secret.data = Some(data.clone());
    })
    .await
}

/// Container environment: prefixed variables become key references, the
/// rest pass through literally. Spec order is preserved.
pub fn container_env(app: &Application) -> Vec<EnvVar> {
    app.spec
        .env_vars
        .iter()
        .map(|var| match route_env(&var.name) {
            EnvRoute::ConfigMap(key) => EnvVar {
                name: key.to_string(),
                value_from: Some(EnvVarSource {
                    config_map_key_ref: Some(ConfigMapKeySelector {
                        name: config_map_name(app),
                        key: key.to_string(),
                        optional: None,
                    }),
                    ..Default::default()
                }),
                value: None,
            },
            EnvRoute::Secret(key) => EnvVar {
                name: key.to_string(),
                value_from: Some(EnvVarSource {
                    secret_key_ref: Some(SecretKeySelector {
                        name: secret_name(app),
                        key: key.to_string(),
                        optional: None,
                    }),
                    ..Default::default()
                }),
                value: None,
            },
            EnvRoute::Literal => EnvVar {
                name: var.name.clone(),
                value: Some(var.value.clone()),
                value_from: None,
            },
        })
        .collect()
}

fn build_resource_requirements(spec: &crate::crd::ResourceRequirements) -> Option<ResourceRequirements> {
    fn quantities(list: Option<&crate::crd::ResourceList>) -> Option<BTreeMap<String, Quantity>> {
        let list = list?;
        let mut out = BTreeMap::new();
        if let Some(cpu) = &list.cpu {
            out.insert("cpu".to_string(), Quantity(cpu.clone()));
        }
        if let Some(memory) = &list.memory {
            out.insert("memory".to_string(), Quantity(memory.clone()));
        }
        if out.is_empty() {
            None
        } else {
            Some(out)
        }
    }

    let limits = quantities(spec.limits.as_ref());
    let requests = quantities(spec.requests.as_ref());
    if limits.is_none() && requests.is_none() {
        return None;
    }
    Some(ResourceRequirements {
        limits,
        requests,
        ..Default::default()
    })
}

/// Full desired Deployment; every field here is re-asserted on each pass.
pub fn build_deployment(app: &Application) -> Result<Deployment> {
    let labels = common_labels(app);
    let env = container_env(app);

    let container = Container {
        name: app.name_any(),
        image: Some(app.spec.image()?.to_string()),
        ports: Some(vec![ContainerPort {
            container_port: app.spec.container_port,
            ..Default::default()
        }]),
        env: if env.is_empty() { None } else { Some(env) },
        resources: app
            .spec
            .resources
            .as_ref()
            .and_then(build_resource_requirements),
        ..Default::default()
    };

    Ok(Deployment {
        metadata: ObjectMeta {
            name: Some(deployment_name(app)),
            namespace: Some(app_namespace(app)?),
            labels: Some(labels.clone()),
            owner_references: Some(vec![owner_reference(app)]),
            ..Default::default()
        },
        spec: Some(DeploymentSpec {
            replicas: app.spec.replicas,
            selector: LabelSelector {
                match_labels: Some(labels.clone()),
                ..Default::default()
            },
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(labels),
                    ..Default::default()
                }),
                spec: Some(PodSpec {
                    containers: vec![container],
                    ..Default::default()
                }),
            },
            ..Default::default()
        }),
        ..Default::default()
    })
}

pub async fn sync_deployment<C: ClusterClient>(
    cluster: &C,
    app: &Application,
    config: &OperatorConfig,
) -> Result<ApplyOutcome> {
    let namespace = app_namespace(app)?;
    let desired = build_deployment(app)?;

    let before = cluster
        .get::<Deployment>(&namespace, &deployment_name(app))
        .await?
        .map(|d| d.metadata.resource_version);
    let applied = cluster
        .apply(&namespace, &desired, &config.field_manager)
        .await?;

    Ok(match before {
        None => ApplyOutcome::Created,
        Some(version) if version == applied.metadata.resource_version => ApplyOutcome::Unchanged,
        Some(_) => ApplyOutcome::Updated,
    })
}

pub async fn sync_service<C: ClusterClient>(cluster: &C, app: &Application) -> Result<ApplyOutcome> {
    let namespace = app_namespace(app)?;
    let name = service_name(app);
    let Some(spec) = app.spec.service.as_ref() else {
        return delete_if_present::<C, Service>(cluster, &namespace, &name).await;
    };

    let labels = common_labels(app);
    let owner = owner_reference(app);
    let service_type = spec
        .type_
        .clone()
        .filter(|t| !t.is_empty())
        .unwrap_or_else(|| DEFAULT_SERVICE_TYPE.to_string());
    let annotations = spec.annotations.clone();
    let port = spec.port;
    let container_port = app.spec.container_port;

    create_or_update(cluster, &namespace, &name, |svc: &mut Service| {
        svc.metadata.labels = Some(labels.clone());
        svc.metadata.owner_references = Some(vec![owner.clone()]);
        svc.metadata.annotations = if annotations.is_empty() {
            None
        } else {
            Some(annotations.clone())
        };

        let svc_spec = svc.spec.get_or_insert_with(Default::default);
        // Keep the cluster-allocated node port unless the type no longer has one
        let node_port = if service_type == DEFAULT_SERVICE_TYPE {
            None
        } else {
            svc_spec
                .ports
                .as_ref()
                .and_then(|ports| {
                    ports
                        .iter()
                        .find(|p| p.name.as_deref() == Some(SERVICE_PORT_NAME))
                })
                .and_then(|p| p.node_port)
        };
        svc_spec.type_ = Some(service_type.clone());
        svc_spec.selector = Some(labels.clone());
        svc_spec.ports = Some(vec![ServicePort {
            name: Some(SERVICE_PORT_NAME.to_string()),
            port,
            target_port: Some(IntOrString::Int(container_port)),
            protocol: Some("TCP".to_string()),
            node_port,
            ..Default::default()
        }]);
    })
    .await
}

pub async fn sync_ingress<C: ClusterClient>(
    cluster: &C,
    app: &Application,
    config: &OperatorConfig,
) -> Result<ApplyOutcome> {
    let namespace = app_namespace(app)?;
    let name = ingress_name(app);
    let Some(spec) = app.spec.ingress.as_ref() else {
        return delete_if_present::<C, Ingress>(cluster, &namespace, &name).await;
    };

    let labels = common_labels(app);
    let owner = owner_reference(app);
    let annotations = spec.annotations.clone();
    let host = spec.host.clone().filter(|h| !h.is_empty());
    let path = spec.path.clone();
    let backend_port = app.spec.service.as_ref().map(|s| s.port);
    let backend_service = service_name(app);
    let ingress_class = config.ingress_class.clone();
    let tls_enabled = app.spec.tls_enabled();

    create_or_update(cluster, &namespace, &name, |ingress: &mut Ingress| {
        ingress.metadata.labels = Some(labels.clone());
        ingress.metadata.owner_references = Some(vec![owner.clone()]);
        ingress.metadata.annotations = if annotations.is_empty() {
            None
        } else {
            Some(annotations.clone())
        };

        let ingress_spec = ingress.spec.get_or_insert_with(Default::default);
        ingress_spec.ingress_class_name = Some(ingress_class.clone());
        ingress_spec.rules = Some(vec![IngressRule {
            host: host.clone(),
            http: Some(HTTPIngressRuleValue {
                paths: vec![HTTPIngressPath {
                    path: Some(path.clone()),
                    path_type: INGRESS_PATH_TYPE.to_string(),
                    backend: IngressBackend {
                        service: Some(IngressServiceBackend {
                            name: backend_service.clone(),
                            port: Some(ServiceBackendPort {
                                number: backend_port,
                                name: None,
                            }),
                        }),
                        resource: None,
                    },
                }],
            }),
        }]);
        // The tls block belongs to the TLS binder while TLS is on
        if !tls_enabled {
            ingress_spec.tls = None;
        }
    })
    .await
}
