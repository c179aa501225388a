// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Keeps the trust bundle ConfigMap in step with the current signing
//! certificate: read, merge, write back only when the content changed.

use crate::constants::keys;
use crate::error::{CustodianError, Result};
use crate::events;
use crate::trigger::{self, CacheSync, Trigger};
use crate::trust::bundle::{self, CaCertificate};
use k8s_openapi::api::core::v1::{ConfigMap, Secret};
use kube::api::{ObjectMeta, PostParams};
use kube::runtime::events::Recorder;
use kube::{Api, Client};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, info, instrument};

pub struct TrustBundleMaintainer {
    client: Client,
    recorder: Recorder,
    /// Namespace holding both the bundle ConfigMap and the signing Secret
    namespace: String,
    /// Name of the bundle ConfigMap
    bundle_name: String,
    /// Name of the Secret carrying the current signing certificate
    signing_secret_name: String,
}

impl TrustBundleMaintainer {
    pub fn new(
        client: Client,
        recorder: Recorder,
        namespace: String,
        bundle_name: String,
        signing_secret_name: String,
    ) -> Arc<Self> {
        Arc::new(Self {
            client,
            recorder,
            namespace,
            bundle_name,
            signing_secret_name,
        })
    }

    /// Drive the maintainer from its trigger until shutdown.
    pub async fn run(
        self: Arc<Self>,
        trigger: Trigger,
        caches: CacheSync,
        mut shutdown: watch::Receiver<bool>,
    ) -> anyhow::Result<()> {
        info!("TrustBundleMaintainer waiting for caches to sync...");
        if !caches.wait(&mut shutdown).await {
            return Ok(());
        }

        info!("TrustBundleMaintainer started");
        let maintainer = self.clone();
        trigger::run_loop(trigger, shutdown, move || {
            let maintainer = maintainer.clone();
            async move { maintainer.reconcile().await }
        })
        .await;

        info!("TrustBundleMaintainer stopped");
        Ok(())
    }

    /// One pass: read the signing certificate and converge the bundle.
    #[instrument(skip(self), fields(bundle = %format!("{}/{}", self.namespace, self.bundle_name)))]
    async fn reconcile(&self) -> Result<()> {
        let secrets: Api<Secret> = Api::namespaced(self.client.clone(), &self.namespace);

        let Some(secret) = secrets.get_opt(&self.signing_secret_name).await? else {
            debug!(
                "Signing secret {}/{} not present, nothing to do",
                self.namespace, self.signing_secret_name
            );
            return Ok(());
        };

        let Some(cert_bytes) = secret.data.as_ref().and_then(|d| d.get(keys::SIGNING_CERT))
        else {
            return Err(CustodianError::Certificate(format!(
                "signing secret {}/{} has no {} key",
                self.namespace,
                self.signing_secret_name,
                keys::SIGNING_CERT
            )));
        };

        let signer = CaCertificate::from_pem(&cert_bytes.0)?;
        self.ensure_bundle_contains(&signer).await
    }

    /// Guarantee the stored bundle holds `signer` plus all still-valid
    /// previously trusted certificates, deduplicated and pruned.
    pub async fn ensure_bundle_contains(&self, signer: &CaCertificate) -> Result<()> {
        let api: Api<ConfigMap> = Api::namespaced(self.client.clone(), &self.namespace);

        let existing = api.get_opt(&self.bundle_name).await?;
        let original_blob = existing
            .as_ref()
            .and_then(|cm| cm.data.as_ref())
            .and_then(|data| data.get(keys::CA_BUNDLE))
            .cloned();

        let existing_certs = match &original_blob {
            Some(blob) => bundle::decode(blob)?,
            None => Vec::new(),
        };

        let now = chrono::Utc::now().timestamp();
        let merged = bundle::merge(signer, &existing_certs, now);
        let encoded = bundle::encode(&merged);

        if existing.is_some() && original_blob.as_deref() == Some(encoded.as_str()) {
            debug!("Trust bundle already up to date ({} certs)", merged.len());
            return Ok(());
        }

        events::emit(
            &self.recorder,
            &events::config_map_ref(&self.namespace, &self.bundle_name),
            "TrustBundleUpdateRequired",
            "EnsureBundle",
            format!(
                "{}/{} requires an updated bundle for signer {:?}",
                self.namespace,
                self.bundle_name,
                signer.subject()
            ),
        )
        .await;

        match existing {
            Some(mut bundle_map) => {
                bundle_map
                    .data
                    .get_or_insert_with(Default::default)
                    .insert(keys::CA_BUNDLE.to_string(), encoded.clone());
                self.update_or_create(&api, bundle_map).await?;
            }
            None => {
                let bundle_map = self.new_bundle_map(encoded);
                self.create_or_update(&api, bundle_map).await?;
            }
        }

        info!(
            "Trust bundle {}/{} written with {} certificates",
            self.namespace,
            self.bundle_name,
            merged.len()
        );
        Ok(())
    }

    fn new_bundle_map(&self, encoded: String) -> ConfigMap {
        ConfigMap {
            metadata: ObjectMeta {
                namespace: Some(self.namespace.clone()),
                name: Some(self.bundle_name.clone()),
                ..Default::default()
            },
            data: Some([(keys::CA_BUNDLE.to_string(), encoded)].into()),
            ..Default::default()
        }
    }

    /// Update, falling back to create if the object vanished underneath us.
    async fn update_or_create(&self, api: &Api<ConfigMap>, bundle_map: ConfigMap) -> Result<()> {
        match api
            .replace(&self.bundle_name, &PostParams::default(), &bundle_map)
            .await
        {
            Err(kube::Error::Api(err)) if err.code == 404 => {
                debug!("Bundle deleted concurrently, recreating");
                let mut recreated = bundle_map;
                recreated.metadata.resource_version = None;
                api.create(&PostParams::default(), &recreated).await?;
                Ok(())
            }
            Err(e) => Err(e.into()),
            Ok(_) => Ok(()),
        }
    }

    /// Create, falling back to update if someone else created it first.
    async fn create_or_update(&self, api: &Api<ConfigMap>, bundle_map: ConfigMap) -> Result<()> {
        match api.create(&PostParams::default(), &bundle_map).await {
            Err(kube::Error::Api(err)) if err.code == 409 => {
                debug!("Bundle created concurrently, updating instead");
                let current = api.get(&self.bundle_name).await?;
                let mut updated = bundle_map;
                updated.metadata.resource_version = current.metadata.resource_version;
                api.replace(&self.bundle_name, &PostParams::default(), &updated)
                    .await?;
                Ok(())
            }
            Err(e) => Err(e.into()),
            Ok(_) => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{configmap_json, not_found_json, MockService};
    use rcgen::{date_time_ymd, CertificateParams, KeyPair};

    fn make_signer() -> CaCertificate {
        let mut params = CertificateParams::default();
        params.not_before = date_time_ymd(2025, 1, 1);
        params.not_after = date_time_ymd(2035, 1, 1);
        let key = KeyPair::generate().unwrap();
        let cert = params.self_signed(&key).unwrap();
        CaCertificate::from_der(cert.der().to_vec()).unwrap()
    }

    fn make_maintainer(mock: MockService) -> TrustBundleMaintainer {
        let client = mock.into_client();
        let recorder = crate::events::recorder(client.clone());
        TrustBundleMaintainer {
            client,
            recorder,
            namespace: "custodian-system".to_string(),
            bundle_name: "ca-bundle".to_string(),
            signing_secret_name: "signing-key".to_string(),
        }
    }

    const BUNDLE_PATH: &str = "/api/v1/namespaces/custodian-system/configmaps/ca-bundle";
    const CREATE_PATH: &str = "/api/v1/namespaces/custodian-system/configmaps";

    #[tokio::test]
    async fn test_absent_container_is_created() {
        let mock = MockService::new()
            .on_request("GET", BUNDLE_PATH, 404, &not_found_json("configmaps", "ca-bundle"))
            .on_request(
                "POST",
                CREATE_PATH,
                201,
                &configmap_json("custodian-system", "ca-bundle", &[]),
            );
        let requests = mock.requests();
        let maintainer = make_maintainer(mock);

        maintainer
            .ensure_bundle_contains(&make_signer())
            .await
            .unwrap();

        let recorded = requests.lock().unwrap();
        let create = recorded
            .iter()
            .find(|r| r.method == "POST" && r.path == CREATE_PATH)
            .expect("bundle should be created");
        assert!(create.body.contains("ca-bundle.crt"));
        assert!(create.body.contains("BEGIN CERTIFICATE"));
    }

    #[tokio::test]
    async fn test_unchanged_bundle_is_not_written() {
        let signer = make_signer();
        let blob = bundle::encode(&[signer.clone()]);

        let mock = MockService::new().on_request(
            "GET",
            BUNDLE_PATH,
            200,
            &configmap_json(
                "custodian-system",
                "ca-bundle",
                &[("ca-bundle.crt", blob.as_str())],
            ),
        );
        let requests = mock.requests();
        let maintainer = make_maintainer(mock);

        maintainer.ensure_bundle_contains(&signer).await.unwrap();

        let recorded = requests.lock().unwrap();
        assert!(
            recorded.iter().all(|r| r.method == "GET"),
            "no writes expected, saw: {:?}",
            recorded
        );
    }

    #[tokio::test]
    async fn test_corrupt_bundle_aborts_pass() {
        let mock = MockService::new().on_request(
            "GET",
            BUNDLE_PATH,
            200,
            &configmap_json(
                "custodian-system",
                "ca-bundle",
                &[("ca-bundle.crt", "garbage, not a bundle")],
            ),
        );
        let requests = mock.requests();
        let maintainer = make_maintainer(mock);

        let result = maintainer.ensure_bundle_contains(&make_signer()).await;

        assert!(matches!(result, Err(CustodianError::BundleDecode(_))));
        let recorded = requests.lock().unwrap();
        assert!(recorded.iter().all(|r| r.method == "GET"));
    }

    #[tokio::test]
    async fn test_existing_bundle_gains_signer() {
        let old = {
            let mut params = CertificateParams::default();
            params.not_before = date_time_ymd(2024, 1, 1);
            params.not_after = date_time_ymd(2034, 1, 1);
            let key = KeyPair::generate().unwrap();
            let cert = params.self_signed(&key).unwrap();
            CaCertificate::from_der(cert.der().to_vec()).unwrap()
        };
        let blob = bundle::encode(&[old]);

        let mock = MockService::new()
            .on_request(
                "GET",
                BUNDLE_PATH,
                200,
                &configmap_json(
                    "custodian-system",
                    "ca-bundle",
                    &[("ca-bundle.crt", blob.as_str())],
                ),
            )
            .on_request(
                "PUT",
                BUNDLE_PATH,
                200,
                &configmap_json("custodian-system", "ca-bundle", &[]),
            );
        let requests = mock.requests();
        let maintainer = make_maintainer(mock);

        maintainer
            .ensure_bundle_contains(&make_signer())
            .await
            .unwrap();

        let recorded = requests.lock().unwrap();
        let update = recorded
            .iter()
            .find(|r| r.method == "PUT" && r.path == BUNDLE_PATH)
            .expect("bundle should be updated in place");
        // both the old cert and the new signer are in the written bundle
        assert_eq!(update.body.matches("BEGIN CERTIFICATE").count(), 2);
    }
}
