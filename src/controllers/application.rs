//! Application Controller
//!
//! Reconciles Application custom resources into a ConfigMap, Secret,
//! Deployment, Service and Ingress, provisions TLS through a cert-manager
//! ClusterIssuer and reports an `Available` condition once converged.

use super::backoff::{backoff_delay, FailureTracker};
use super::finalizer::{ensure_finalizer, teardown};
use super::sync::{
    sync_config_map, sync_deployment, sync_ingress, sync_secret, sync_service, ApplyOutcome,
};
use super::tls::reconcile_tls;
use super::app_namespace;
use crate::client::{ClusterClient, KubeClusterClient};
use crate::conditions::mark_available;
use crate::config::OperatorConfig;
use crate::crd::{Application, ApplicationStatus, ClusterIssuer};
use crate::error::{OperatorError, Result};
use crate::metrics::Metrics;
use crate::naming::{
    config_map_name, deployment_name, ingress_name, namespace_from_issuer_name, secret_name,
    service_name,
};
use futures::StreamExt;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{ConfigMap, Secret, Service};
use k8s_openapi::api::networking::v1::Ingress;
use k8s_openapi::NamespaceResourceScope;
use kube::api::Api;
use kube::runtime::controller::{Action, Config as ControllerConfig, Controller};
use kube::runtime::reflector::ObjectRef;
use kube::runtime::watcher::Config;
use kube::{Client, Resource, ResourceExt};
use serde::de::DeserializeOwned;
use std::fmt::Debug;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Reconciler state shared by every pass
pub struct ApplicationController<C = KubeClusterClient> {
    cluster: C,
    config: OperatorConfig,
    metrics: Metrics,
    failures: FailureTracker,
}

/// Api scoped to the watched namespace, or cluster-wide
fn scoped_api<K>(client: &Client, namespace: Option<&str>) -> Api<K>
where
    K: Resource<DynamicType = (), Scope = NamespaceResourceScope> + Clone + DeserializeOwned + Debug,
{
    match namespace {
        Some(ns) => Api::namespaced(client.clone(), ns),
        None => Api::all(client.clone()),
    }
}

/// Applications to requeue when an issuer changes.
///
/// Issuers named `app-<ns>-issuer` map to the Applications in `<ns>`; any
/// other issuer conservatively maps to every known Application.
pub fn applications_for_issuer(
    apps: &[Arc<Application>],
    issuer: &str,
) -> Vec<ObjectRef<Application>> {
    let namespace = namespace_from_issuer_name(issuer);
    apps.iter()
        .filter(|app| namespace.map_or(true, |ns| app.namespace().as_deref() == Some(ns)))
        .map(|app| ObjectRef::from_obj(app.as_ref()))
        .collect()
}

fn object_key(app: &Application) -> String {
    format!(
        "{}/{}",
        app.namespace().unwrap_or_default(),
        app.name_any()
    )
}

impl ApplicationController<KubeClusterClient> {
    /// Create a new Application controller
    pub fn new(client: Client, config: OperatorConfig, metrics: Metrics) -> Self {
        Self::with_cluster(KubeClusterClient::new(client), config, metrics)
    }

    /// Run the Application controller until a shutdown signal arrives
    pub async fn run(self: Arc<Self>) -> Result<()> {
        let client = self.cluster.client().clone();
        let namespace = self.config.watch_namespace.as_deref();
        let apps: Api<Application> = scoped_api(&client, namespace);
        let issuers: Api<ClusterIssuer> = Api::all(client.clone());

        info!(
            namespace = namespace.unwrap_or("*"),
            concurrency = self.config.concurrency,
            "Starting Application controller"
        );

        let controller = Controller::new(apps, Config::default());
        let store = controller.store();

        controller
            .with_config(ControllerConfig::default().concurrency(self.config.concurrency))
            .owns(scoped_api::<ConfigMap>(&client, namespace), Config::default())
            .owns(scoped_api::<Secret>(&client, namespace), Config::default())
            .owns(scoped_api::<Deployment>(&client, namespace), Config::default())
            .owns(scoped_api::<Service>(&client, namespace), Config::default())
            .owns(scoped_api::<Ingress>(&client, namespace), Config::default())
            .watches(issuers, Config::default(), move |issuer: ClusterIssuer| {
                applications_for_issuer(&store.state(), &issuer.name_any())
            })
            .shutdown_on_signal()
            .run(
                |app, ctx| async move { ctx.reconcile(app).await },
                |app, error, ctx| ctx.error_policy(app, error),
                Arc::clone(&self),
            )
            .for_each(|result| async move {
                match result {
                    Ok((obj, _action)) => {
                        debug!("Reconciled Application: {}", obj.name);
                    }
                    Err(e) => {
                        warn!("Reconciliation failed: {}", e);
                    }
                }
            })
            .await;

        info!("Application controller stopped");
        Ok(())
    }
}

impl<C: ClusterClient> ApplicationController<C> {
    pub fn with_cluster(cluster: C, config: OperatorConfig, metrics: Metrics) -> Self {
        Self {
            cluster,
            config,
            metrics,
            failures: FailureTracker::default(),
        }
    }

    /// Reconcile one Application; a success clears its backoff.
    pub async fn reconcile(&self, app: Arc<Application>) -> Result<Action> {
        let _timer = self.metrics.count_and_measure();
        let action = self.reconcile_application(&app).await?;
        self.failures.reset(&object_key(&app));
        Ok(action)
    }

    /// Requeue a failed Application with per-object exponential backoff.
    pub fn error_policy(&self, app: Arc<Application>, error: &OperatorError) -> Action {
        let key = object_key(&app);
        self.metrics.reconcile_failure(error);
        if error.is_not_found() {
            // Gone mid-pass; the next event or requeue finds out which object
            self.failures.reset(&key);
            debug!("Object vanished reconciling Application {}: {}", key, error);
            return Action::requeue(backoff_delay(1));
        }
        let delay = self.failures.record_failure(&key);
        if error.is_conflict() {
            debug!("Conflict reconciling Application {}, retrying in {:?}", key, delay);
        } else {
            warn!("Reconciliation error for Application {}: {}, retrying in {:?}", key, error, delay);
        }
        Action::requeue(delay)
    }

    async fn reconcile_application(&self, app: &Application) -> Result<Action> {
        let name = app.name_any();
        let namespace = app_namespace(app)?;

        let Some(app) = self.cluster.get::<Application>(&namespace, &name).await? else {
            debug!("Application {}/{} no longer exists", namespace, name);
            return Ok(Action::await_change());
        };

        info!("Reconciling Application {}/{}", namespace, name);

        if app.metadata.deletion_timestamp.is_some() {
            return teardown(&self.cluster, &app).await;
        }

        app.spec.validate()?;

        let outcome = sync_config_map(&self.cluster, &app).await?;
        self.record("ConfigMap", &config_map_name(&app), outcome);

        let outcome = sync_secret(&self.cluster, &app).await?;
        self.record("Secret", &secret_name(&app), outcome);

        let outcome = sync_deployment(&self.cluster, &app, &self.config).await?;
        self.record("Deployment", &deployment_name(&app), outcome);

        let outcome = sync_service(&self.cluster, &app).await?;
        self.record("Service", &service_name(&app), outcome);

        let outcome = sync_ingress(&self.cluster, &app, &self.config).await?;
        self.record("Ingress", &ingress_name(&app), outcome);

        let app = ensure_finalizer(&self.cluster, &app).await?;

        let tls = reconcile_tls(&self.cluster, &app, &self.config).await?;

        self.update_status(&app, &namespace).await?;

        if tls.is_pending() {
            info!(
                "Waiting for ClusterIssuer of Application {}/{} ({:?})",
                namespace, name, tls
            );
            return Ok(Action::requeue(self.config.issuer_poll_interval));
        }
        Ok(Action::requeue(self.config.resync_interval))
    }

    fn record(&self, kind: &str, name: &str, outcome: ApplyOutcome) {
        self.metrics.child_outcome(kind, outcome);
        if outcome.is_change() {
            info!(kind, name, %outcome, "Synchronized managed resource");
        } else {
            debug!(kind, name, "Managed resource up to date");
        }
    }

    /// Write the Available condition unless it is already the head condition
    async fn update_status(&self, app: &Application, namespace: &str) -> Result<()> {
        let current = app
            .status
            .as_ref()
            .map(|s| s.conditions.as_slice())
            .unwrap_or_default();
        let Some(conditions) = mark_available(current) else {
            return Ok(());
        };

        let status = serde_json::to_value(ApplicationStatus { conditions })?;
        self.cluster
            .patch_status::<Application>(namespace, &app.name_any(), status)
            .await?;
        info!("Application {}/{} is Available", namespace, app.name_any());
        Ok(())
    }
}
