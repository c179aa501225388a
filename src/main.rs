// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0
use anyhow::Result;
use k8s_openapi::api::core::v1::Secret;
use kube::{Api, Client};
use std::collections::HashSet;
use tracing::info;

use custodian::config::Config;
use custodian::events;
use custodian::sync::{ResourceLocation, SyncEngine};
use custodian::trigger::{self, CacheSync};
use custodian::trust::TrustBundleMaintainer;
use custodian::types::custodian::Custodian;
use custodian::watch::{spawn_named_watcher, spawn_namespace_watchers};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt::init();

    info!("Starting Custodian operator");

    // Load configuration
    let config = Config::from_env()?;
    info!(
        "Configuration loaded: watching {} namespaces, operator namespace {}",
        config.watched_namespaces.len(),
        config.operator_namespace
    );

    // Create Kubernetes client
    let client = Client::try_default().await?;
    info!("Connected to Kubernetes cluster");

    let recorder = events::recorder(client.clone());

    // Shutdown signal: ctrl-c flips the watch channel
    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Shutdown signal received");
            let _ = shutdown_tx.send(true);
        }
    });

    // The operator namespace is always watched: it holds the bundle and
    // the sync sources rooted there
    let namespaces: HashSet<String> = config
        .watched_namespaces
        .iter()
        .cloned()
        .chain([config.operator_namespace.clone()])
        .collect();

    // Sync engine plus its change notifications
    let (engine, engine_trigger) = SyncEngine::new(
        client.clone(),
        recorder.clone(),
        namespaces.clone(),
        config.operator_namespace.clone(),
        config.custodian_name.clone(),
    );

    let mut engine_caches =
        spawn_namespace_watchers(&client, &namespaces, &engine.trigger_handle(), &shutdown_rx);
    let custodians: Api<Custodian> = Api::namespaced(client.clone(), &config.operator_namespace);
    engine_caches.push(spawn_named_watcher(
        custodians,
        &config.custodian_name,
        engine.trigger_handle(),
        shutdown_rx.clone(),
    ));

    // Trust bundle maintainer, driven by the signing secret
    let maintainer = TrustBundleMaintainer::new(
        client.clone(),
        recorder,
        config.operator_namespace.clone(),
        config.ca_bundle_name.clone(),
        config.signing_secret_name.clone(),
    );

    let (bundle_handle, bundle_trigger) = trigger::channel();
    let mut bundle_caches = CacheSync::new();
    let signing_secrets: Api<Secret> =
        Api::namespaced(client.clone(), &config.operator_namespace);
    bundle_caches.push(spawn_named_watcher(
        signing_secrets,
        &config.signing_secret_name,
        bundle_handle,
        shutdown_rx.clone(),
    ));

    // Fan the maintained bundle out into every watched namespace
    let bundle_source =
        ResourceLocation::new(&config.operator_namespace, &config.ca_bundle_name);
    for namespace in &config.watched_namespaces {
        if namespace != &config.operator_namespace {
            engine
                .sync_config_map(
                    ResourceLocation::new(namespace, &config.ca_bundle_name),
                    bundle_source.clone(),
                )
                .await?;
        }
    }

    info!("Starting reconciliation loops...");

    // Run both loops until the shutdown signal
    tokio::try_join!(
        engine.run(engine_trigger, engine_caches, shutdown_rx.clone()),
        maintainer.run(bundle_trigger, bundle_caches, shutdown_rx),
    )?;

    info!("Custodian operator stopped");
    Ok(())
}
