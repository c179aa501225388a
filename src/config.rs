// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0
use anyhow::{bail, Context, Result};
use std::env;

/// Operator configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    /// Namespaces whose ConfigMaps and Secrets are watched and eligible as
    /// sync sources and destinations
    pub watched_namespaces: Vec<String>,
    /// Namespace the operator's own resources live in
    pub operator_namespace: String,
    /// Name of the Custodian resource carrying management state and status
    pub custodian_name: String,
    /// Name of the Secret holding the current signing certificate
    pub signing_secret_name: String,
    /// Name of the ConfigMap holding the trust bundle
    pub ca_bundle_name: String,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        let watched = env::var("WATCHED_NAMESPACES")
            .context("WATCHED_NAMESPACES environment variable not set")?;
        let watched_namespaces = parse_namespaces(&watched)?;

        let operator_namespace = env::var("OPERATOR_NAMESPACE")
            .context("OPERATOR_NAMESPACE environment variable not set")?;

        let custodian_name = env::var("CUSTODIAN_NAME").unwrap_or_else(|_| "cluster".to_string());
        let signing_secret_name =
            env::var("SIGNING_SECRET_NAME").unwrap_or_else(|_| "signing-key".to_string());
        let ca_bundle_name =
            env::var("CA_BUNDLE_NAME").unwrap_or_else(|_| "ca-bundle".to_string());

        Ok(Config {
            watched_namespaces,
            operator_namespace,
            custodian_name,
            signing_secret_name,
            ca_bundle_name,
        })
    }
}

/// Split a comma-separated namespace list, rejecting an empty result
fn parse_namespaces(raw: &str) -> Result<Vec<String>> {
    let namespaces: Vec<String> = raw
        .split(',')
        .map(str::trim)
        .filter(|ns| !ns.is_empty())
        .map(str::to_string)
        .collect();

    if namespaces.is_empty() {
        bail!("WATCHED_NAMESPACES must name at least one namespace");
    }

    Ok(namespaces)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_namespaces_splits_and_trims() {
        let namespaces = parse_namespaces("kube-system, apps ,infra").unwrap();
        assert_eq!(namespaces, vec!["kube-system", "apps", "infra"]);
    }

    #[test]
    fn test_parse_namespaces_single() {
        let namespaces = parse_namespaces("apps").unwrap();
        assert_eq!(namespaces, vec!["apps"]);
    }

    #[test]
    fn test_parse_namespaces_rejects_empty() {
        assert!(parse_namespaces("").is_err());
        assert!(parse_namespaces(" , ,").is_err());
    }
}
