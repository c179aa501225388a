// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CustodianError {
    #[error("Kubernetes API error: {0}")]
    KubeError(#[from] kube::Error),

    #[error("namespace \"{0}\" is not watched")]
    UnwatchedNamespace(String),

    #[error("failed to decode trust bundle: {0}")]
    BundleDecode(String),

    #[error("invalid certificate: {0}")]
    Certificate(String),

    #[error("syncing {kind} {destination} failed: {source}")]
    RuleSync {
        kind: &'static str,
        destination: String,
        #[source]
        source: Box<CustodianError>,
    },
}

impl CustodianError {
    /// Wrap an error with the rule it occurred on.
    pub fn for_rule(kind: &'static str, destination: String, source: CustodianError) -> Self {
        CustodianError::RuleSync {
            kind,
            destination,
            source: Box::new(source),
        }
    }
}

/// Join per-rule errors into one multi-line message for the status condition.
pub fn aggregate_message(errors: &[CustodianError]) -> String {
    errors
        .iter()
        .map(|e| e.to_string())
        .collect::<Vec<_>>()
        .join("\n")
}

pub type Result<T> = std::result::Result<T, CustodianError>;
