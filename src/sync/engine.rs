// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! The reconciliation engine: holds the rule tables, replays them on every
//! trigger, and reports aggregate health on the Custodian status.

use crate::constants::conditions::RESOURCE_SYNC_DEGRADED;
use crate::error::{aggregate_message, CustodianError, Result};
use crate::sync::resources;
use crate::sync::rules::{ResourceLocation, SyncRules};
use crate::trigger::{self, CacheSync, Trigger, TriggerHandle};
use crate::types::custodian::{upsert_condition, Condition, Custodian, ManagementState};
use kube::api::{Patch, PatchParams};
use kube::runtime::events::Recorder;
use kube::{Api, Client};
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::{watch, RwLock};
use tracing::{debug, info, instrument, warn};

pub struct SyncEngine {
    client: Client,
    recorder: Recorder,
    /// Rule mutation and the reconciliation pass are mutually exclusive;
    /// registrations take the write side, the pass the read side
    rules: RwLock<SyncRules>,
    /// Namespaces covered by the watchers; rules may only refer to these
    known_namespaces: HashSet<String>,
    operator_namespace: String,
    custodian_name: String,
    trigger: TriggerHandle,
}

impl SyncEngine {
    pub fn new(
        client: Client,
        recorder: Recorder,
        known_namespaces: HashSet<String>,
        operator_namespace: String,
        custodian_name: String,
    ) -> (Arc<Self>, Trigger) {
        let (handle, trigger) = trigger::channel();

        let engine = Arc::new(Self {
            client,
            recorder,
            rules: RwLock::new(SyncRules::default()),
            known_namespaces,
            operator_namespace,
            custodian_name,
            trigger: handle,
        });

        (engine, trigger)
    }

    /// Handle for watchers to request a reconciliation pass.
    pub fn trigger_handle(&self) -> TriggerHandle {
        self.trigger.clone()
    }

    /// Register (or overwrite) a ConfigMap sync rule and schedule a pass.
    ///
    /// An empty source means "delete the destination on every pass".
    pub async fn sync_config_map(
        &self,
        destination: ResourceLocation,
        source: ResourceLocation,
    ) -> Result<()> {
        self.validate_rule(&destination, &source)?;

        let mut rules = self.rules.write().await;
        rules.config_maps.insert(destination, source);
        drop(rules);

        self.trigger.poke();
        Ok(())
    }

    /// Register (or overwrite) a Secret sync rule and schedule a pass.
    pub async fn sync_secret(
        &self,
        destination: ResourceLocation,
        source: ResourceLocation,
    ) -> Result<()> {
        self.validate_rule(&destination, &source)?;

        let mut rules = self.rules.write().await;
        rules.secrets.insert(destination, source);
        drop(rules);

        self.trigger.poke();
        Ok(())
    }

    fn validate_rule(&self, destination: &ResourceLocation, source: &ResourceLocation) -> Result<()> {
        if !self.known_namespaces.contains(&destination.namespace) {
            return Err(CustodianError::UnwatchedNamespace(
                destination.namespace.clone(),
            ));
        }
        if !source.is_empty() && !self.known_namespaces.contains(&source.namespace) {
            return Err(CustodianError::UnwatchedNamespace(source.namespace.clone()));
        }
        Ok(())
    }

    /// Drive the engine from its trigger until shutdown.
    pub async fn run(
        self: Arc<Self>,
        trigger: Trigger,
        caches: CacheSync,
        mut shutdown: watch::Receiver<bool>,
    ) -> anyhow::Result<()> {
        info!("SyncEngine waiting for caches to sync...");
        if !caches.wait(&mut shutdown).await {
            return Ok(());
        }

        info!("SyncEngine started");
        let engine = self.clone();
        trigger::run_loop(trigger, shutdown, move || {
            let engine = engine.clone();
            async move { engine.sync().await }
        })
        .await;

        info!("SyncEngine stopped");
        Ok(())
    }

    /// One reconciliation pass: replay every rule, aggregate failures into
    /// the health condition.
    #[instrument(skip(self))]
    async fn sync(&self) -> Result<()> {
        let api: Api<Custodian> = Api::namespaced(self.client.clone(), &self.operator_namespace);
        let custodian = api.get(&self.custodian_name).await?;

        match custodian.management_state() {
            ManagementState::Unmanaged => {
                debug!("Management state is Unmanaged, skipping pass");
                return Ok(());
            }
            ManagementState::Removed => {
                // previously created destinations are intentionally left behind
                debug!("Management state is Removed, skipping pass");
                return Ok(());
            }
            ManagementState::Managed => {}
        }

        // held for the whole pass; registrations wait until it completes
        let rules = self.rules.read().await;
        let mut errors: Vec<CustodianError> = Vec::new();

        for (destination, source) in &rules.config_maps {
            let outcome = if source.is_empty() {
                resources::delete_config_map(&self.client, &self.recorder, destination)
                    .await
                    .map(|_| ())
            } else {
                resources::sync_config_map(&self.client, &self.recorder, source, destination, &[])
                    .await
                    .map(|_| ())
            };
            if let Err(e) = outcome {
                errors.push(CustodianError::for_rule(
                    "configmap",
                    destination.to_string(),
                    e,
                ));
            }
        }

        for (destination, source) in &rules.secrets {
            let outcome = if source.is_empty() {
                resources::delete_secret(&self.client, &self.recorder, destination)
                    .await
                    .map(|_| ())
            } else {
                resources::sync_secret(&self.client, &self.recorder, source, destination, &[])
                    .await
                    .map(|_| ())
            };
            if let Err(e) = outcome {
                errors.push(CustodianError::for_rule(
                    "secret",
                    destination.to_string(),
                    e,
                ));
            }
        }

        self.report_health(&api, &custodian, errors).await
    }

    /// Overwrite the sync health condition. Per-rule errors are absorbed
    /// here; only a failure to record them is surfaced to the caller.
    async fn report_health(
        &self,
        api: &Api<Custodian>,
        custodian: &Custodian,
        errors: Vec<CustodianError>,
    ) -> Result<()> {
        let condition = if errors.is_empty() {
            Condition {
                condition_type: RESOURCE_SYNC_DEGRADED.to_string(),
                status: "False".to_string(),
                reason: None,
                message: None,
                last_transition_time: Some(chrono::Utc::now().to_rfc3339()),
            }
        } else {
            warn!("{} sync rule(s) failed this pass", errors.len());
            Condition {
                condition_type: RESOURCE_SYNC_DEGRADED.to_string(),
                status: "True".to_string(),
                reason: Some("Error".to_string()),
                message: Some(aggregate_message(&errors)),
                last_transition_time: Some(chrono::Utc::now().to_rfc3339()),
            }
        };

        let mut conditions = custodian.conditions();
        upsert_condition(&mut conditions, condition);

        let patch = serde_json::json!({"status": {"conditions": conditions}});
        api.patch_status(
            &self.custodian_name,
            &PatchParams::default(),
            &Patch::Merge(&patch),
        )
        .await?;

        Ok(())
    }
}
