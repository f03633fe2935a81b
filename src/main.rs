// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0
use anyhow::Result;
use kube::Client;
use tokio::sync::watch;
use tracing::info;

use velero_annotations_controller::config::Config;
use velero_annotations_controller::constants;
use velero_annotations_controller::controller::run_pipeline;
use velero_annotations_controller::leader::LeaderElector;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt::init();

    info!("Preparing the velero annotations controller ...");

    // Load configuration; malformed input fails here, before any watch starts
    let config = Config::from_env()?;
    match &config.namespace_filter {
        Some(namespaces) => info!(
            "Environment variable {} is set, the controller will watch only following namespaces: {:?}",
            constants::env::NS_FILTER,
            namespaces
        ),
        None => info!("Controller is configured to watch all namespaces."),
    }
    if config.pvcs_only {
        info!(
            "Environment variable {} != \"false\": the controller will watch only volumes with a PVC.",
            constants::env::PVCS_ONLY
        );
    } else {
        info!(
            "Environment variable {} == \"false\": the controller will watch all volumes.",
            constants::env::PVCS_ONLY
        );
    }

    // Create Kubernetes client
    let client = Client::try_default().await?;
    info!("Connected to Kubernetes cluster");

    // Shutdown signal shared by the elector and the pipeline
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        shutdown_signal().await;
        info!("Shutdown signal received");
        let _ = shutdown_tx.send(true);
    });

    info!("Starting the controller ...");
    let elector = LeaderElector::new(&client);
    info!("Election identity: {}", elector.identity());

    let pipeline_client = client.clone();
    elector
        .run(shutdown_rx, move |stop| {
            run_pipeline(pipeline_client.clone(), config.clone(), stop)
        })
        .await?;

    info!("Ending the controller ...");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(_) => std::future::pending().await,
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
