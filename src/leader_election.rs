//! Lease-based leader election.
//!
//! Only the holder of the `coordination.k8s.io/v1` Lease runs the
//! Application controller. Standby replicas poll until the holder stops
//! renewing and the lease expires.

use chrono::{DateTime, Utc};
use k8s_openapi::api::coordination::v1::{Lease, LeaseSpec};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{MicroTime, ObjectMeta};
use kube::api::{Api, PostParams};
use kube::Client;
use std::time::Duration;
use tracing::{debug, info, warn};

const SERVICE_ACCOUNT_NAMESPACE: &str = "/var/run/secrets/kubernetes.io/serviceaccount/namespace";

/// Lease name and timings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeaseSettings {
    pub name: String,
    pub duration_secs: i32,
    pub renew_interval: Duration,
    pub retry_interval: Duration,
}

impl Default for LeaseSettings {
    fn default() -> Self {
        Self {
            name: "application-operator-leader".to_string(),
            duration_secs: 15,
            renew_interval: Duration::from_secs(10),
            retry_interval: Duration::from_secs(5),
        }
    }
}

/// Namespace holding the Lease: the explicit value, else the pod's own
/// namespace, else `default`.
pub fn detect_namespace(explicit: Option<&str>) -> String {
    if let Some(ns) = explicit.filter(|ns| !ns.is_empty()) {
        return ns.to_string();
    }
    std::fs::read_to_string(SERVICE_ACCOUNT_NAMESPACE)
        .map(|s| s.trim().to_string())
        .unwrap_or_else(|_| "default".to_string())
}

/// Identity recorded as lease holder
pub fn default_identity() -> String {
    std::env::var("POD_NAME")
        .or_else(|_| std::env::var("HOSTNAME"))
        .unwrap_or_else(|_| format!("application-operator-{:08x}", rand::random::<u32>()))
}

fn holder(spec: Option<&LeaseSpec>) -> Option<&str> {
    spec.and_then(|s| s.holder_identity.as_deref())
}

/// A lease without a holder or without a renewal inside its duration is free.
pub fn is_expired(spec: Option<&LeaseSpec>, default_duration_secs: i32, now: DateTime<Utc>) -> bool {
    let Some(spec) = spec else {
        return true;
    };
    if spec.holder_identity.is_none() {
        return true;
    }
    let duration = i64::from(spec.lease_duration_seconds.unwrap_or(default_duration_secs));
    match spec.renew_time.as_ref() {
        Some(MicroTime(renewed)) => now.signed_duration_since(*renewed).num_seconds() > duration,
        None => true,
    }
}

/// Spec written when `identity` claims or renews the lease
pub fn claim(previous: Option<&LeaseSpec>, identity: &str, duration_secs: i32, now: DateTime<Utc>) -> LeaseSpec {
    let now = MicroTime(now);
    let takeover = holder(previous) != Some(identity);
    let transitions = previous.and_then(|s| s.lease_transitions).unwrap_or(0);
    LeaseSpec {
        holder_identity: Some(identity.to_string()),
        lease_duration_seconds: Some(duration_secs),
        acquire_time: if takeover {
            Some(now.clone())
        } else {
            previous.and_then(|s| s.acquire_time.clone())
        },
        renew_time: Some(now),
        lease_transitions: Some(match previous {
            Some(_) if takeover => transitions + 1,
            _ => transitions,
        }),
        ..Default::default()
    }
}

pub struct LeaderElector {
    lease_api: Api<Lease>,
    identity: String,
    settings: LeaseSettings,
}

impl LeaderElector {
    pub fn new(client: Client, namespace: &str, identity: String, settings: LeaseSettings) -> Self {
        info!(identity = %identity, namespace = %namespace, lease = %settings.name, "Initialized leader elector");
        Self {
            lease_api: Api::namespaced(client, namespace),
            identity,
            settings,
        }
    }

    pub fn identity(&self) -> &str {
        &self.identity
    }

    /// Blocks until the lease is ours.
    pub async fn acquire(&self) {
        info!(identity = %self.identity, "Waiting to acquire leader lease '{}'", self.settings.name);
        loop {
            match self.try_acquire().await {
                Ok(true) => {
                    info!(identity = %self.identity, "Acquired leader lease");
                    return;
                }
                Ok(false) => debug!("Lease held by another instance, retrying in {:?}", self.settings.retry_interval),
                Err(e) => warn!("Lease acquisition error: {}, retrying in {:?}", e, self.settings.retry_interval),
            }
            tokio::time::sleep(self.settings.retry_interval).await;
        }
    }

    /// Renew periodically; returns once leadership is lost.
    pub async fn keep_renewing(&self) -> anyhow::Result<()> {
        loop {
            tokio::time::sleep(self.settings.renew_interval).await;
            match self.renew().await {
                Ok(true) => {}
                Ok(false) => anyhow::bail!("leader lease '{}' lost", self.settings.name),
                Err(e) => warn!("Lease renewal error: {}", e),
            }
        }
    }

    /// Returns `Ok(false)` once someone else holds the lease.
    pub async fn renew(&self) -> anyhow::Result<bool> {
        let lease = self.lease_api.get(&self.settings.name).await?;
        if holder(lease.spec.as_ref()) != Some(self.identity.as_str()) {
            return Ok(false);
        }
        let ok = self.write(&lease).await?;
        if ok {
            debug!("Renewed leader lease");
        } else {
            warn!("Lease conflict during renewal, lost leadership");
        }
        Ok(ok)
    }

    /// Clear the holder so a standby can take over without waiting for expiry.
    pub async fn release(&self) {
        let lease = match self.lease_api.get(&self.settings.name).await {
            Ok(l) => l,
            Err(e) => {
                warn!("Failed to read lease for release: {}", e);
                return;
            }
        };
        if holder(lease.spec.as_ref()) != Some(self.identity.as_str()) {
            debug!("Lease not held by us, skipping release");
            return;
        }

        let mut released = lease;
        if let Some(spec) = released.spec.as_mut() {
            spec.holder_identity = None;
        }
        match self
            .lease_api
            .replace(&self.settings.name, &PostParams::default(), &released)
            .await
        {
            Ok(_) => info!(identity = %self.identity, "Released leader lease"),
            Err(e) => warn!("Failed to release leader lease: {}", e),
        }
    }

    async fn try_acquire(&self) -> anyhow::Result<bool> {
        match self.lease_api.get_opt(&self.settings.name).await? {
            None => self.create().await,
            Some(existing) => {
                let spec = existing.spec.as_ref();
                let ours = holder(spec) == Some(self.identity.as_str());
                if ours || is_expired(spec, self.settings.duration_secs, Utc::now()) {
                    self.write(&existing).await
                } else {
                    Ok(false)
                }
            }
        }
    }

    async fn create(&self) -> anyhow::Result<bool> {
        let lease = Lease {
            metadata: ObjectMeta {
                name: Some(self.settings.name.clone()),
                ..Default::default()
            },
            spec: Some(claim(None, &self.identity, self.settings.duration_secs, Utc::now())),
        };
        match self.lease_api.create(&PostParams::default(), &lease).await {
            Ok(_) => Ok(true),
            Err(kube::Error::Api(ae)) if ae.code == 409 => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    /// Replace the lease guarded by its resourceVersion; a conflict means we lost the race.
    async fn write(&self, existing: &Lease) -> anyhow::Result<bool> {
        let mut updated = existing.clone();
        updated.spec = Some(claim(
            existing.spec.as_ref(),
            &self.identity,
            self.settings.duration_secs,
            Utc::now(),
        ));
        match self
            .lease_api
            .replace(&self.settings.name, &PostParams::default(), &updated)
            .await
        {
            Ok(_) => Ok(true),
            Err(kube::Error::Api(ae)) if ae.code == 409 => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}
