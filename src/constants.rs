// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

/// The operator name used for event reporting and status patches
pub const OPERATOR_NAME: &str = "custodian";

/// Well-known keys inside the objects the operator manages
pub mod keys {
    /// ConfigMap key holding the concatenated PEM trust bundle
    pub const CA_BUNDLE: &str = "ca-bundle.crt";
    /// Secret key holding the PEM-encoded signing certificate
    pub const SIGNING_CERT: &str = "tls.crt";
}

/// Condition types written to the Custodian status
pub mod conditions {
    /// "True" when the last sync pass had at least one rule failure
    pub const RESOURCE_SYNC_DEGRADED: &str = "ResourceSyncDegraded";
}

/// Retry configuration for failed reconciliation passes
pub mod retry {
    /// Initial delay in seconds before re-running a failed pass
    pub const BASE_SECS: u64 = 1;
    /// Maximum delay in seconds (exponential backoff cap)
    pub const MAX_SECS: u64 = 60;
}
