//! TLS provisioning through a cert-manager ClusterIssuer.
//!
//! A pass moves through: issuer missing (create, wait), issuer drifted
//! (update, wait), issuer not ready (wait), issuer ready (bind the
//! certificate secret onto the Ingress). Waiting is always a requeue.

use super::app_namespace;
use super::sync::{create_or_update, ApplyOutcome};
use crate::client::ClusterClient;
use crate::config::OperatorConfig;
use crate::crd::{
    AcmeChallengeSolver, AcmeChallengeSolverHttp01, AcmeChallengeSolverHttp01Ingress, AcmeIssuer,
    Application, ClusterIssuer, IssuerSpecBody,
};
use crate::error::{OperatorError, Result};
use crate::naming::{ingress_name, issuer_name, OPERATOR_NAME};
use k8s_openapi::api::networking::v1::{Ingress, IngressTLS};
use std::collections::BTreeMap;
use tracing::{debug, info};

/// What happened to the issuer during this pass
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IssuerOutcome {
    Created,
    Updated,
    Unchanged,
}

/// Result of one pass of the TLS state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TlsState {
    /// TLS not requested
    Disabled,
    /// Issuer was just written or is not ready; check again later
    WaitingForIssuer(IssuerOutcome),
    /// Issuer ready and the Ingress carries the TLS block
    Bound(ApplyOutcome),
}

impl TlsState {
    /// True when the orchestrator must requeue instead of reporting Available
    pub fn is_pending(&self) -> bool {
        matches!(self, TlsState::WaitingForIssuer(_))
    }
}

/// Issuer as this operator wants it, solvers pinned to one HTTP-01 solver
/// on the configured ingress class.
pub fn desired_issuer(namespace: &str, acme: &AcmeIssuer, config: &OperatorConfig) -> ClusterIssuer {
    let mut acme = acme.clone();
    acme.solvers = vec![AcmeChallengeSolver {
        http01: Some(AcmeChallengeSolverHttp01 {
            ingress: Some(AcmeChallengeSolverHttp01Ingress {
                ingress_class_name: Some(config.ingress_class.clone()),
            }),
        }),
    }];

    let mut issuer = ClusterIssuer::new(&issuer_name(namespace), IssuerSpecBody { acme: Some(acme) });
    issuer.metadata.labels = Some(BTreeMap::from([(
        "managed".to_string(),
        OPERATOR_NAME.to_string(),
    )]));
    issuer
}

/// Fields compared against the live issuer; anything else is left alone
fn drifted(live: &AcmeIssuer, wanted: &AcmeIssuer) -> bool {
    live.email != wanted.email
        || live.server != wanted.server
        || live.private_key_secret_ref != wanted.private_key_secret_ref
}

/// Create the namespace's issuer or bring its ACME settings in line.
pub async fn reconcile_issuer<C: ClusterClient>(
    cluster: &C,
    namespace: &str,
    acme: &AcmeIssuer,
    config: &OperatorConfig,
) -> Result<(IssuerOutcome, ClusterIssuer)> {
    let name = issuer_name(namespace);
    let Some(live) = cluster.get_issuer(&name).await? else {
        let created = cluster
            .create_issuer(&desired_issuer(namespace, acme, config))
            .await?;
        info!(issuer = %name, "Created ClusterIssuer");
        return Ok((IssuerOutcome::Created, created));
    };

    let mut updated = live.clone();
    match updated.spec.acme.as_mut() {
        Some(current) if !drifted(current, acme) => {
            return Ok((IssuerOutcome::Unchanged, live));
        }
        Some(current) => {
            current.email = acme.email.clone();
            current.server = acme.server.clone();
            current.private_key_secret_ref = acme.private_key_secret_ref.clone();
        }
        None => {
            updated.spec.acme = desired_issuer(namespace, acme, config).spec.acme;
        }
    }
    let replaced = cluster.replace_issuer(&updated).await?;
    info!(issuer = %name, "Updated ClusterIssuer ACME settings");
    Ok((IssuerOutcome::Updated, replaced))
}

/// Point rule 0 at the host and make tls[0] reference the certificate secret.
pub async fn bind_ingress_tls<C: ClusterClient>(
    cluster: &C,
    app: &Application,
    host: &str,
    secret_name: &str,
) -> Result<ApplyOutcome> {
    let namespace = app_namespace(app)?;
    let name = ingress_name(app);
    if cluster.get::<Ingress>(&namespace, &name).await?.is_none() {
        return Err(OperatorError::InvalidState(format!(
            "Ingress {}/{} must exist before TLS can be bound",
            namespace, name
        )));
    }

    let tls = IngressTLS {
        hosts: Some(vec![host.to_string()]),
        secret_name: Some(secret_name.to_string()),
    };
    create_or_update(cluster, &namespace, &name, |ingress: &mut Ingress| {
        let spec = ingress.spec.get_or_insert_with(Default::default);
        if let Some(rule) = spec.rules.as_mut().and_then(|rules| rules.first_mut()) {
            rule.host = Some(host.to_string());
        }
        match spec.tls.as_mut() {
            Some(entries) if !entries.is_empty() => entries[0] = tls.clone(),
            _ => spec.tls = Some(vec![tls.clone()]),
        }
    })
    .await
}

/// Run one pass of the TLS state machine for an Application.
pub async fn reconcile_tls<C: ClusterClient>(
    cluster: &C,
    app: &Application,
    config: &OperatorConfig,
) -> Result<TlsState> {
    let Some(acme) = app.spec.acme_issuer() else {
        return Ok(TlsState::Disabled);
    };
    let host = app.spec.tls_host().ok_or_else(|| {
        OperatorError::InvalidSpec("spec.tls.enable requires spec.ingress.host".to_string())
    })?;
    let namespace = app_namespace(app)?;

    let (outcome, issuer) = reconcile_issuer(cluster, &namespace, acme, config).await?;
    if outcome != IssuerOutcome::Unchanged {
        return Ok(TlsState::WaitingForIssuer(outcome));
    }
    if !issuer.is_ready() {
        debug!(issuer = %issuer_name(&namespace), "ClusterIssuer not ready yet");
        return Ok(TlsState::WaitingForIssuer(IssuerOutcome::Unchanged));
    }

    let bound = bind_ingress_tls(cluster, app, host, &acme.private_key_secret_ref.name).await?;
    if bound.is_change() {
        info!(ingress = %ingress_name(app), host = %host, "Bound TLS to Ingress");
    }
    Ok(TlsState::Bound(bound))
}
