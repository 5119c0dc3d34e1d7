//! Cluster access seam.
//!
//! Reconcile logic talks to the API server only through [`ClusterClient`], so
//! the same code runs against `kube::Client` in production and an in-memory
//! store in tests.

use crate::crd::ClusterIssuer;
use crate::error::{OperatorError, Result};
use async_trait::async_trait;
use k8s_openapi::NamespaceResourceScope;
use kube::api::{Api, DeleteParams, Patch, PatchParams, PostParams};
use kube::{Client, Resource, ResourceExt};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fmt::Debug;

/// Any namespaced kind the operator reads or writes.
pub trait NamespacedObject:
    Resource<DynamicType = (), Scope = NamespaceResourceScope>
    + Clone
    + Debug
    + Serialize
    + DeserializeOwned
    + Send
    + Sync
    + 'static
{
}

impl<K> NamespacedObject for K where
    K: Resource<DynamicType = (), Scope = NamespaceResourceScope>
        + Clone
        + Debug
        + Serialize
        + DeserializeOwned
        + Send
        + Sync
        + 'static
{
}

/// Operations the reconciler needs from the cluster.
///
/// Writes carry the object's `resourceVersion`; a stale version fails with a
/// 409 that is left to the retry layer.
#[async_trait]
pub trait ClusterClient: Send + Sync {
    /// Fetch an object, `None` when it does not exist
    async fn get<K: NamespacedObject>(&self, namespace: &str, name: &str) -> Result<Option<K>>;

    async fn create<K: NamespacedObject>(&self, namespace: &str, obj: &K) -> Result<K>;

    /// Full update guarded by the object's resourceVersion
    async fn replace<K: NamespacedObject>(&self, namespace: &str, obj: &K) -> Result<K>;

    /// Server-side apply with forced field ownership
    async fn apply<K: NamespacedObject>(
        &self,
        namespace: &str,
        obj: &K,
        field_manager: &str,
    ) -> Result<K>;

    /// Delete an object. Returns `false` when it was already absent.
    async fn delete<K: NamespacedObject>(&self, namespace: &str, name: &str) -> Result<bool>;

    /// Merge-patch the status subresource
    async fn patch_status<K: NamespacedObject>(
        &self,
        namespace: &str,
        name: &str,
        status: serde_json::Value,
    ) -> Result<()>;

    async fn get_issuer(&self, name: &str) -> Result<Option<ClusterIssuer>>;

    async fn create_issuer(&self, issuer: &ClusterIssuer) -> Result<ClusterIssuer>;

    async fn replace_issuer(&self, issuer: &ClusterIssuer) -> Result<ClusterIssuer>;

    /// Delete an issuer. Returns `false` when it was already absent.
    async fn delete_issuer(&self, name: &str) -> Result<bool>;
}

/// [`ClusterClient`] backed by the Kubernetes API
#[derive(Clone)]
pub struct KubeClusterClient {
    client: Client,
}

impl KubeClusterClient {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    fn namespaced<K: NamespacedObject>(&self, namespace: &str) -> Api<K> {
        Api::namespaced(self.client.clone(), namespace)
    }

    fn issuers(&self) -> Api<ClusterIssuer> {
        Api::all(self.client.clone())
    }
}

fn object_name<K: Resource<DynamicType = ()>>(obj: &K) -> Result<String> {
    obj.meta().name.clone().ok_or_else(|| {
        OperatorError::InvalidState(format!("{} has no metadata.name", K::kind(&())))
    })
}

fn absent_on_404<T>(result: std::result::Result<T, kube::Error>) -> Result<bool> {
    match result {
        Ok(_) => Ok(true),
        Err(kube::Error::Api(ae)) if ae.code == 404 => Ok(false),
        Err(e) => Err(e.into()),
    }
}

#[async_trait]
impl ClusterClient for KubeClusterClient {
    async fn get<K: NamespacedObject>(&self, namespace: &str, name: &str) -> Result<Option<K>> {
        Ok(self.namespaced::<K>(namespace).get_opt(name).await?)
    }

    async fn create<K: NamespacedObject>(&self, namespace: &str, obj: &K) -> Result<K> {
        Ok(self
            .namespaced::<K>(namespace)
            .create(&PostParams::default(), obj)
            .await?)
    }

    async fn replace<K: NamespacedObject>(&self, namespace: &str, obj: &K) -> Result<K> {
        let name = object_name(obj)?;
        Ok(self
            .namespaced::<K>(namespace)
            .replace(&name, &PostParams::default(), obj)
            .await?)
    }

    async fn apply<K: NamespacedObject>(
        &self,
        namespace: &str,
        obj: &K,
        field_manager: &str,
    ) -> Result<K> {
        let name = object_name(obj)?;
        Ok(self
            .namespaced::<K>(namespace)
            .patch(
                &name,
                &PatchParams::apply(field_manager).force(),
                &Patch::Apply(obj),
            )
            .await?)
    }

    async fn delete<K: NamespacedObject>(&self, namespace: &str, name: &str) -> Result<bool> {
        absent_on_404(
            self.namespaced::<K>(namespace)
                .delete(name, &DeleteParams::default())
                .await,
        )
    }

    async fn patch_status<K: NamespacedObject>(
        &self,
        namespace: &str,
        name: &str,
        status: serde_json::Value,
    ) -> Result<()> {
        let patch = serde_json::json!({ "status": status });
        self.namespaced::<K>(namespace)
            .patch_status(name, &PatchParams::default(), &Patch::Merge(&patch))
            .await?;
        Ok(())
    }

    async fn get_issuer(&self, name: &str) -> Result<Option<ClusterIssuer>> {
        Ok(self.issuers().get_opt(name).await?)
    }

    async fn create_issuer(&self, issuer: &ClusterIssuer) -> Result<ClusterIssuer> {
        Ok(self
            .issuers()
            .create(&PostParams::default(), issuer)
            .await?)
    }

    async fn replace_issuer(&self, issuer: &ClusterIssuer) -> Result<ClusterIssuer> {
        Ok(self
            .issuers()
            .replace(&issuer.name_any(), &PostParams::default(), issuer)
            .await?)
    }

    async fn delete_issuer(&self, name: &str) -> Result<bool> {
        absent_on_404(self.issuers().delete(name, &DeleteParams::default()).await)
    }
}
