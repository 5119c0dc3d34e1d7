//! Application Kubernetes Operator
//!
//! Reconciles `Application` resources into Deployments, Services, Ingresses
//! and cert-manager issuers.
//!
//! ## Usage
//!
//! ```bash
//! # Run the operator (requires kubeconfig)
//! application-operator
//!
//! # Watch a single namespace with debug logs
//! RUST_LOG=debug application-operator --namespace team-a
//! ```

use application_operator::leader_election::{self, LeaderElector, LeaseSettings};
use application_operator::{metrics, ApplicationController, Metrics, OperatorConfig};
use clap::Parser;
use kube::Client;
use prometheus::Registry;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Application Kubernetes Operator
#[derive(Parser, Debug)]
#[command(name = "application-operator")]
#[command(version, about = "Kubernetes Operator for Application resources")]
struct Args {
    /// Namespace to watch (all namespaces when unset)
    #[arg(long, env = "WATCH_NAMESPACE")]
    namespace: Option<String>,

    /// Maximum number of Applications reconciled concurrently
    #[arg(long, env = "CONCURRENCY", default_value_t = 2)]
    concurrency: u16,

    /// Seconds between readiness checks of a pending ClusterIssuer
    #[arg(long, env = "ISSUER_POLL_INTERVAL_SECS", default_value_t = 30)]
    issuer_poll_interval_secs: u64,

    /// Seconds between periodic resyncs of a converged Application
    #[arg(long, env = "RESYNC_INTERVAL_SECS", default_value_t = 300)]
    resync_interval_secs: u64,

    /// Ingress class for managed Ingresses and HTTP-01 solvers
    #[arg(long, env = "INGRESS_CLASS", default_value = "kong")]
    ingress_class: String,

    /// Enable leader election for HA deployments
    #[arg(long, env = "LEADER_ELECTION", default_value_t = false)]
    leader_election: bool,

    /// Namespace for the leader election Lease (auto-detected if unset)
    #[arg(long, env = "LEADER_ELECTION_NAMESPACE")]
    leader_election_namespace: Option<String>,

    /// Metrics and health endpoint bind address
    #[arg(long, env = "METRICS_BIND_ADDRESS", default_value = "0.0.0.0:8080")]
    metrics_bind_address: SocketAddr,
}

impl Args {
    fn operator_config(&self) -> OperatorConfig {
        OperatorConfig {
            ingress_class: self.ingress_class.clone(),
            concurrency: self.concurrency,
            issuer_poll_interval: Duration::from_secs(self.issuer_poll_interval_secs),
            resync_interval: Duration::from_secs(self.resync_interval_secs),
            watch_namespace: self.namespace.clone().filter(|ns| !ns.is_empty()),
            ..OperatorConfig::default()
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    let args = Args::parse();
    let config = args.operator_config();

    info!("Starting Application Kubernetes Operator");
    info!("Leader election: {}", args.leader_election);
    info!(
        "Watching namespace: {}",
        config.watch_namespace.as_deref().unwrap_or("all")
    );

    let registry = Registry::new();
    let metrics = Metrics::new()?.register(&registry)?;
    let metrics_handle = tokio::spawn(metrics::serve(args.metrics_bind_address, registry));

    // Create Kubernetes client
    let client = Client::try_default().await?;
    info!("Connected to Kubernetes API server");

    // Leader election: acquire the lease before starting the controller
    let elector = if args.leader_election {
        let ns = leader_election::detect_namespace(args.leader_election_namespace.as_deref());
        let elector = LeaderElector::new(
            client.clone(),
            &ns,
            leader_election::default_identity(),
            LeaseSettings::default(),
        );
        elector.acquire().await;
        Some(Arc::new(elector))
    } else {
        None
    };

    let controller = Arc::new(ApplicationController::new(client, config, metrics));
    let controller_handle = tokio::spawn(async move {
        if let Err(e) = controller.run().await {
            error!("Application controller error: {}", e);
        }
    });

    // Periodic lease renewal (pending forever when leader election is disabled)
    let renewer = elector.clone();
    let renew_handle = tokio::spawn(async move {
        match renewer {
            Some(e) => {
                if let Err(err) = e.keep_renewing().await {
                    error!(identity = %e.identity(), "{}", err);
                }
            }
            None => std::future::pending::<()>().await,
        }
    });

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Received shutdown signal");
        }
        result = controller_handle => {
            if let Err(e) = result {
                error!("Application controller task failed: {}", e);
            }
        }
        result = metrics_handle => {
            match result {
                Ok(Err(e)) => error!("Metrics server failed: {}", e),
                Err(e) => error!("Metrics server task failed: {}", e),
                Ok(Ok(())) => {}
            }
        }
        _ = renew_handle => {
            error!("Leader lease lost, initiating shutdown");
        }
    }

    // Release the lease so a standby replica can take over immediately
    if let Some(e) = &elector {
        e.release().await;
    }

    info!("Application Operator shutting down");
    Ok(())
}
