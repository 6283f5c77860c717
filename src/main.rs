use futures::StreamExt;
use kube::runtime::{watcher, Controller};
use kube::{Api, Client};
use otelop::config::OperatorConfig;
use otelop::controller::{error_policy, reconcile, Context};
use otelop::crd::{OpenTelemetryCollector, MANAGED_BY_VALUE};
use otelop::server::{
    create_metrics, run_health_server, shutdown_channel, wait_for_signal, ReadinessState,
};
use otelop::upgrade::cluster::managed_selector;
use otelop::upgrade::{
    collector_registry, upgrade_fleet, KubeAutoscalerStore, KubeCollectorStore,
    KubeEventPublisher, UpgradeContext,
};
use std::sync::Arc;
use tracing::{error, info, warn};

/// Only collectors carrying the managed-by label are watched
fn watcher_config() -> watcher::Config {
    watcher::Config::default().labels(&managed_selector())
}

fn collector_api(client: Client, namespace: Option<&str>) -> Api<OpenTelemetryCollector> {
    match namespace {
        Some(ns) => Api::namespaced(client, ns),
        None => Api::all(client),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let config = OperatorConfig::from_env()?;
    info!(
        collector_version = %config.collector_version,
        namespace = config.watch_namespace.as_deref().unwrap_or("<all>"),
        auto_upgrade = config.auto_upgrade,
        "Starting OpenTelemetry collector operator"
    );

    let (shutdown_controller, shutdown_signal) = shutdown_channel();

    // Not ready until the startup fleet upgrade has run
    let readiness = ReadinessState::new();

    let metrics = create_metrics()?;
    info!("Prometheus metrics registry initialized");

    let registry = Arc::new(collector_registry()?);
    info!(
        routines = registry.len(),
        latest = ?registry.latest().map(ToString::to_string),
        "Upgrade routines registered"
    );

    let client = match Client::try_default().await {
        Ok(c) => c,
        Err(e) => {
            error!(error = %e, "Failed to create Kubernetes client");
            return Err(e.into());
        }
    };
    info!("Connected to Kubernetes cluster");

    let health_handle = {
        let readiness = readiness.clone();
        let metrics = metrics.clone();
        let signal = shutdown_signal.clone();
        let port = config.health_port;
        tokio::spawn(async move {
            if let Err(e) = run_health_server(port, readiness, metrics, signal).await {
                warn!(error = %e, "Health server failed");
            }
        })
    };
    info!(port = config.health_port, "Health server task spawned");

    let events = Arc::new(KubeEventPublisher::new(
        client.clone(),
        MANAGED_BY_VALUE,
        config.pod_name.clone(),
    ));
    let autoscalers = Arc::new(KubeAutoscalerStore::new(client.clone()));
    let store = Arc::new(KubeCollectorStore::new(
        client.clone(),
        config.watch_namespace.clone(),
    ));
    let upgrade = UpgradeContext::new(
        config.collector_version.clone(),
        events,
        autoscalers,
        Some(metrics.clone()),
    );

    if !config.auto_upgrade {
        info!("Automatic upgrades disabled, not starting the upgrade controller");
        readiness.set_ready();
        let signal = wait_for_signal().await?;
        info!(signal, "Initiating graceful shutdown");
        shutdown_controller.shutdown();
        let _ = health_handle.await;
        return Ok(());
    }

    // A failed scan is not fatal: the controller revisits every instance on its initial list
    match upgrade_fleet(&registry, &upgrade, store.as_ref()).await {
        Ok(report) if !report.failed.is_empty() => {
            warn!(failed = ?report.failed, "Some collectors could not be upgraded");
        }
        Ok(_) => {}
        Err(e) => error!(error = %e, "Fleet upgrade failed"),
    }

    let ctx = Arc::new(Context::new(registry, upgrade, store));

    readiness.set_ready();
    info!("Operator ready, starting reconciliation loop");

    let collectors = collector_api(client, config.watch_namespace.as_deref());
    let controller = Controller::new(collectors, watcher_config())
        .graceful_shutdown_on(shutdown_signal.clone().cancelled())
        .run(reconcile, error_policy, ctx)
        .for_each(|res| async move {
            if let Ok((obj, _action)) = res {
                info!(collector = %obj.name, namespace = ?obj.namespace, "Reconciled");
            }
            // error_policy already logs failures
        });

    tokio::select! {
        _ = controller => {
            info!("Controller stream ended");
        }
        signal = wait_for_signal() => {
            match signal {
                Ok(name) => info!(signal = name, "Initiating graceful shutdown"),
                Err(e) => error!(error = %e, "Failed to listen for termination signals"),
            }
            readiness.set_not_ready();
        }
    }

    shutdown_controller.shutdown();

    info!("Stopping components...");
    if tokio::time::timeout(std::time::Duration::from_secs(5), health_handle)
        .await
        .is_err()
    {
        warn!("Health server did not stop in time");
    }

    info!("Operator shut down gracefully");
    Ok(())
}

#[cfg(test)]
#[path = "main_test.rs"]
mod tests;
