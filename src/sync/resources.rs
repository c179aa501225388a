// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Per-kind mirror operations: copy a source object onto a destination
//! location, or delete the destination. Absence of the destination on
//! delete is never an error; absence of the source mirrors as deletion.

use crate::error::Result;
use crate::events;
use crate::sync::rules::ResourceLocation;
use k8s_openapi::api::core::v1::{ConfigMap, Secret};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use kube::api::{DeleteParams, ObjectMeta, PostParams};
use kube::runtime::events::Recorder;
use kube::{Api, Client};
use std::collections::BTreeMap;
use tracing::{debug, instrument};

/// Mirror a source ConfigMap to the destination location.
///
/// Returns the resulting object (None if the destination was deleted
/// because the source is gone) and whether anything was written.
#[instrument(skip(client, recorder, owner_refs))]
pub async fn sync_config_map(
    client: &Client,
    recorder: &Recorder,
    source: &ResourceLocation,
    destination: &ResourceLocation,
    owner_refs: &[OwnerReference],
) -> Result<(Option<ConfigMap>, bool)> {
    let sources: Api<ConfigMap> = Api::namespaced(client.clone(), &source.namespace);

    match sources.get_opt(&source.name).await? {
        None => {
            let deleted = delete_config_map(client, recorder, destination).await?;
            Ok((None, deleted))
        }
        Some(source_map) => {
            let desired = mirrored_config_map(source_map, destination, owner_refs);
            let (applied, changed) =
                apply_config_map(client, recorder, destination, desired).await?;
            Ok((Some(applied), changed))
        }
    }
}

/// Mirror a source Secret to the destination location.
#[instrument(skip(client, recorder, owner_refs))]
pub async fn sync_secret(
    client: &Client,
    recorder: &Recorder,
    source: &ResourceLocation,
    destination: &ResourceLocation,
    owner_refs: &[OwnerReference],
) -> Result<(Option<Secret>, bool)> {
    let sources: Api<Secret> = Api::namespaced(client.clone(), &source.namespace);

    match sources.get_opt(&source.name).await? {
        None => {
            let deleted = delete_secret(client, recorder, destination).await?;
            Ok((None, deleted))
        }
        Some(source_secret) => {
            let desired = mirrored_secret(source_secret, destination, owner_refs);
            let (applied, changed) = apply_secret(client, recorder, destination, desired).await?;
            Ok((Some(applied), changed))
        }
    }
}

/// Delete the destination ConfigMap; already absent is not an error.
pub async fn delete_config_map(
    client: &Client,
    recorder: &Recorder,
    destination: &ResourceLocation,
) -> Result<bool> {
    let api: Api<ConfigMap> = Api::namespaced(client.clone(), &destination.namespace);
    match api.delete(&destination.name, &DeleteParams::default()).await {
        Ok(_) => {
            events::emit(
                recorder,
                &events::config_map_ref(&destination.namespace, &destination.name),
                "ConfigMapDeleted",
                "Sync",
                format!("{} deleted", destination),
            )
            .await;
            Ok(true)
        }
        Err(kube::Error::Api(err)) if err.code == 404 => {
            debug!("ConfigMap {} already absent", destination);
            Ok(false)
        }
        Err(e) => Err(e.into()),
    }
}

/// Delete the destination Secret; already absent is not an error.
pub async fn delete_secret(
    client: &Client,
    recorder: &Recorder,
    destination: &ResourceLocation,
) -> Result<bool> {
    let api: Api<Secret> = Api::namespaced(client.clone(), &destination.namespace);
    match api.delete(&destination.name, &DeleteParams::default()).await {
        Ok(_) => {
            events::emit(
                recorder,
                &events::secret_ref(&destination.namespace, &destination.name),
                "SecretDeleted",
                "Sync",
                format!("{} deleted", destination),
            )
            .await;
            Ok(true)
        }
        Err(kube::Error::Api(err)) if err.code == 404 => {
            debug!("Secret {} already absent", destination);
            Ok(false)
        }
        Err(e) => Err(e.into()),
    }
}

/// Re-home the source object at the destination: identity swapped, payload
/// and labels/annotations kept, server-owned metadata cleared.
fn mirrored_config_map(
    source: ConfigMap,
    destination: &ResourceLocation,
    owner_refs: &[OwnerReference],
) -> ConfigMap {
    ConfigMap {
        metadata: mirrored_metadata(&source.metadata, destination, owner_refs),
        data: source.data,
        binary_data: source.binary_data,
        immutable: source.immutable,
    }
}

fn mirrored_secret(
    source: Secret,
    destination: &ResourceLocation,
    owner_refs: &[OwnerReference],
) -> Secret {
    Secret {
        metadata: mirrored_metadata(&source.metadata, destination, owner_refs),
        data: source.data,
        string_data: source.string_data,
        type_: source.type_,
        immutable: source.immutable,
    }
}

fn mirrored_metadata(
    source: &ObjectMeta,
    destination: &ResourceLocation,
    owner_refs: &[OwnerReference],
) -> ObjectMeta {
    ObjectMeta {
        namespace: Some(destination.namespace.clone()),
        name: Some(destination.name.clone()),
        labels: source.labels.clone(),
        annotations: source.annotations.clone(),
        owner_references: if owner_refs.is_empty() {
            None
        } else {
            Some(owner_refs.to_vec())
        },
        ..Default::default()
    }
}

async fn apply_config_map(
    client: &Client,
    recorder: &Recorder,
    destination: &ResourceLocation,
    desired: ConfigMap,
) -> Result<(ConfigMap, bool)> {
    let api: Api<ConfigMap> = Api::namespaced(client.clone(), &destination.namespace);

    match api.get_opt(&destination.name).await? {
        None => {
            let created = api.create(&PostParams::default(), &desired).await?;
            events::emit(
                recorder,
                &events::config_map_ref(&destination.namespace, &destination.name),
                "ConfigMapCreated",
                "Sync",
                format!("{} created", destination),
            )
            .await;
            Ok((created, true))
        }
        Some(mut existing) => {
            let mut changed = merge_mirrored_metadata(&mut existing.metadata, &desired.metadata);
            if existing.data != desired.data {
                existing.data = desired.data;
                changed = true;
            }
            if existing.binary_data != desired.binary_data {
                existing.binary_data = desired.binary_data;
                changed = true;
            }
            if !changed {
                return Ok((existing, false));
            }

            let updated = api
                .replace(&destination.name, &PostParams::default(), &existing)
                .await?;
            events::emit(
                recorder,
                &events::config_map_ref(&destination.namespace, &destination.name),
                "ConfigMapUpdated",
                "Sync",
                format!("{} updated", destination),
            )
            .await;
            Ok((updated, true))
        }
    }
}

async fn apply_secret(
    client: &Client,
    recorder: &Recorder,
    destination: &ResourceLocation,
    desired: Secret,
) -> Result<(Secret, bool)> {
    let api: Api<Secret> = Api::namespaced(client.clone(), &destination.namespace);

    match api.get_opt(&destination.name).await? {
        None => {
            let created = api.create(&PostParams::default(), &desired).await?;
            events::emit(
                recorder,
                &events::secret_ref(&destination.namespace, &destination.name),
                "SecretCreated",
                "Sync",
                format!("{} created", destination),
            )
            .await;
            Ok((created, true))
        }
        Some(mut existing) => {
            let mut changed = merge_mirrored_metadata(&mut existing.metadata, &desired.metadata);
            if existing.data != desired.data {
                existing.data = desired.data;
                changed = true;
            }
            if existing.type_ != desired.type_ {
                existing.type_ = desired.type_;
                changed = true;
            }
            if !changed {
                return Ok((existing, false));
            }

            let updated = api
                .replace(&destination.name, &PostParams::default(), &existing)
                .await?;
            events::emit(
                recorder,
                &events::secret_ref(&destination.namespace, &destination.name),
                "SecretUpdated",
                "Sync",
                format!("{} updated", destination),
            )
            .await;
            Ok((updated, true))
        }
    }
}

/// Fold the mirrored labels/annotations into the existing object so keys
/// added by other actors on the destination do not cause write flapping.
fn merge_mirrored_metadata(existing: &mut ObjectMeta, desired: &ObjectMeta) -> bool {
    let mut changed = merge_string_map(&mut existing.labels, &desired.labels);
    changed |= merge_string_map(&mut existing.annotations, &desired.annotations);
    changed
}

fn merge_string_map(
    target: &mut Option<BTreeMap<String, String>>,
    desired: &Option<BTreeMap<String, String>>,
) -> bool {
    let Some(desired) = desired else {
        return false;
    };

    let target = target.get_or_insert_with(Default::default);
    let mut changed = false;
    for (key, value) in desired {
        if target.get(key) != Some(value) {
            target.insert(key.clone(), value.clone());
            changed = true;
        }
    }
    changed
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{not_found_json, MockService};

    fn make_source_config_map() -> ConfigMap {
        ConfigMap {
            metadata: ObjectMeta {
                name: Some("settings".to_string()),
                namespace: Some("infra".to_string()),
                labels: Some(BTreeMap::from([(
                    "app".to_string(),
                    "custodian".to_string(),
                )])),
                resource_version: Some("42".to_string()),
                uid: Some("abc".to_string()),
                ..Default::default()
            },
            data: Some(BTreeMap::from([(
                "threshold".to_string(),
                "10".to_string(),
            )])),
            ..Default::default()
        }
    }

    #[test]
    fn test_mirrored_config_map_swaps_identity() {
        let destination = ResourceLocation::new("apps", "settings-copy");

        let mirrored = mirrored_config_map(make_source_config_map(), &destination, &[]);

        assert_eq!(mirrored.metadata.namespace.as_deref(), Some("apps"));
        assert_eq!(mirrored.metadata.name.as_deref(), Some("settings-copy"));
        assert_eq!(mirrored.metadata.resource_version, None);
        assert_eq!(mirrored.metadata.uid, None);
        assert_eq!(mirrored.data, make_source_config_map().data);
        assert_eq!(mirrored.metadata.labels, make_source_config_map().metadata.labels);
    }

    #[test]
    fn test_mirrored_config_map_owner_refs() {
        let destination = ResourceLocation::new("apps", "settings-copy");

        let mirrored = mirrored_config_map(make_source_config_map(), &destination, &[]);
        assert_eq!(mirrored.metadata.owner_references, None);

        let owner = OwnerReference {
            api_version: "v1".to_string(),
            kind: "ConfigMap".to_string(),
            name: "parent".to_string(),
            uid: "uid".to_string(),
            ..Default::default()
        };
        let mirrored = mirrored_config_map(make_source_config_map(), &destination, &[owner.clone()]);
        assert_eq!(mirrored.metadata.owner_references, Some(vec![owner]));
    }

    #[test]
    fn test_mirrored_secret_keeps_type() {
        let source = Secret {
            metadata: ObjectMeta {
                name: Some("token".to_string()),
                namespace: Some("infra".to_string()),
                ..Default::default()
            },
            type_: Some("kubernetes.io/tls".to_string()),
            ..Default::default()
        };

        let mirrored = mirrored_secret(source, &ResourceLocation::new("apps", "token"), &[]);
        assert_eq!(mirrored.type_.as_deref(), Some("kubernetes.io/tls"));
    }

    #[test]
    fn test_merge_string_map_reports_changes() {
        let mut target = Some(BTreeMap::from([
            ("keep".to_string(), "1".to_string()),
            ("stale".to_string(), "old".to_string()),
        ]));
        let desired = Some(BTreeMap::from([("stale".to_string(), "new".to_string())]));

        assert!(merge_string_map(&mut target, &desired));

        let target = target.unwrap();
        // foreign keys survive, mirrored keys win
        assert_eq!(target.get("keep").map(String::as_str), Some("1"));
        assert_eq!(target.get("stale").map(String::as_str), Some("new"));
    }

    #[test]
    fn test_merge_string_map_unchanged() {
        let mut target = Some(BTreeMap::from([("a".to_string(), "1".to_string())]));
        let desired = Some(BTreeMap::from([("a".to_string(), "1".to_string())]));

        assert!(!merge_string_map(&mut target, &desired));
    }

    #[tokio::test]
    async fn test_delete_config_map_absent_is_benign() {
        let mock = MockService::new().on_request(
            "DELETE",
            "/api/v1/namespaces/apps/configmaps/settings",
            404,
            &not_found_json("configmaps", "settings"),
        );
        let client = mock.into_client();
        let recorder = crate::events::recorder(client.clone());

        let deleted = delete_config_map(
            &client,
            &recorder,
            &ResourceLocation::new("apps", "settings"),
        )
        .await
        .unwrap();

        assert!(!deleted);
    }
}
