//! Run a single reconcile pass over one StatefulSet.

use std::io::Write;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use k8s_openapi::api::apps::v1::StatefulSet;
use k8s_openapi::api::core::v1::Pod;
use kube::api::{Api, ListParams};
use tokio::time::timeout;
use tracing_subscriber::prelude::*;

use petset_controller::k8s::{K8sEventRecorder, K8sPetClient};
use petset_controller::pet::iterator::sync_pet_set;
use petset_controller::Config;

#[tokio::main]
async fn main() -> Result<()> {
    // Setup tracing/logging system.
    tracing_subscriber::registry()
        // Filter spans based on the RUST_LOG env var.
        .with(tracing_subscriber::EnvFilter::from_default_env())
        // Send a copy of all spans to stdout in compact form.
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(true)
                .with_level(true)
                .with_ansi(true),
        )
        // Install this registry as the global tracing registry.
        .try_init()
        .context("error initializing logging/tracing system")?;

    let cfg = Arc::new(Config::new()?);
    tracing::info!(
        namespace = %cfg.namespace,
        statefulset = %cfg.statefulset,
        update_retries = %cfg.update_retries,
        "starting PetSet reconcile pass",
    );
    let res = run(cfg).await;
    if let Err(err) = res.as_ref() {
        tracing::error!(error = ?err);
    }

    // Ensure any pending output is flushed.
    let _ = std::io::stdout().flush();
    let _ = std::io::stderr().flush();

    res
}

async fn run(cfg: Arc<Config>) -> Result<()> {
    let client = kube::Client::try_default().await.context("error initializing K8s client")?;

    let api: Api<StatefulSet> = Api::namespaced(client.clone(), &cfg.namespace);
    let sts = timeout(cfg.api_timeout(), api.get(&cfg.statefulset))
        .await
        .context("timeout while fetching StatefulSet")?
        .context("error fetching StatefulSet")?;
    let selector = sts
        .spec
        .as_ref()
        .and_then(|spec| spec.selector.match_labels.as_ref())
        .map(|labels| labels.iter().map(|(key, val)| format!("{}={}", key, val)).collect::<Vec<_>>().join(","))
        .context("StatefulSet has no selector match labels")?;
    let api: Api<Pod> = Api::namespaced(client.clone(), &cfg.namespace);
    let params = ListParams {
        label_selector: Some(selector),
        ..Default::default()
    };
    let pods = timeout(cfg.api_timeout(), api.list(&params))
        .await
        .context("timeout while listing pods")?
        .context("error listing pods")?;

    let recorder = Arc::new(K8sEventRecorder::new(client.clone(), cfg.clone()));
    let pet_client = K8sPetClient::new(client, cfg.clone(), recorder);
    let outcome = sync_pet_set(&pet_client, Arc::new(sts), &pods.items).await;
    tracing::info!(
        replicas = outcome.replicas,
        blocking_pet = ?outcome.blocking_pet,
        blocked = outcome.blocked,
        errors = outcome.errors.len(),
        "PetSet reconcile pass complete",
    );
    if !outcome.errors.is_empty() {
        bail!("{} error(s) during reconcile pass, first: {:#}", outcome.errors.len(), outcome.errors[0]);
    }
    Ok(())
}
