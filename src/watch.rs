// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Watch wiring: every event on a watched resource pokes the owning
//! trigger; the stream's initial-listing marker feeds the cache gate.

use crate::trigger::{CacheSync, TriggerHandle};
use futures::{pin_mut, StreamExt};
use k8s_openapi::api::core::v1::{ConfigMap, Secret};
use kube::{Api, Client, Resource};
use kube_runtime::{watcher, WatchStreamExt};
use serde::de::DeserializeOwned;
use std::collections::HashSet;
use std::fmt::Debug;
use tokio::sync::{oneshot, watch};
use tracing::{debug, warn};

/// Watch one Api, poking the trigger on every event.
///
/// The returned receiver fires once the initial listing is complete.
pub fn spawn_watcher<K>(
    api: Api<K>,
    watcher_config: watcher::Config,
    trigger: TriggerHandle,
    mut shutdown: watch::Receiver<bool>,
) -> oneshot::Receiver<()>
where
    K: Resource + Clone + DeserializeOwned + Debug + Send + 'static,
{
    let (synced_tx, synced_rx) = oneshot::channel();

    tokio::spawn(async move {
        let events = watcher(api, watcher_config).default_backoff();
        pin_mut!(events);
        let mut synced = Some(synced_tx);

        loop {
            tokio::select! {
                _ = shutdown.changed() => break,
                event = events.next() => match event {
                    Some(Ok(event)) => {
                        if matches!(event, watcher::Event::InitDone) {
                            if let Some(tx) = synced.take() {
                                let _ = tx.send(());
                            }
                        }
                        trigger.poke();
                    }
                    Some(Err(e)) => warn!("Watch stream error: {}", e),
                    None => break,
                }
            }
        }
        debug!("Watch stream stopped");
    });

    synced_rx
}

/// Watch ConfigMaps and Secrets in every watched namespace.
pub fn spawn_namespace_watchers(
    client: &Client,
    namespaces: &HashSet<String>,
    trigger: &TriggerHandle,
    shutdown: &watch::Receiver<bool>,
) -> CacheSync {
    let mut caches = CacheSync::new();

    for namespace in namespaces {
        let config_maps: Api<ConfigMap> = Api::namespaced(client.clone(), namespace);
        caches.push(spawn_watcher(
            config_maps,
            watcher::Config::default(),
            trigger.clone(),
            shutdown.clone(),
        ));

        let secrets: Api<Secret> = Api::namespaced(client.clone(), namespace);
        caches.push(spawn_watcher(
            secrets,
            watcher::Config::default(),
            trigger.clone(),
            shutdown.clone(),
        ));
    }

    caches
}

/// Watch a single named object.
pub fn spawn_named_watcher<K>(
    api: Api<K>,
    name: &str,
    trigger: TriggerHandle,
    shutdown: watch::Receiver<bool>,
) -> oneshot::Receiver<()>
where
    K: Resource + Clone + DeserializeOwned + Debug + Send + 'static,
{
    let config = watcher::Config::default().fields(&format!("metadata.name={}", name));
    spawn_watcher(api, config, trigger, shutdown)
}
