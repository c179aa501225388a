// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Trust bundle maintenance: certificate bookkeeping and the ConfigMap
//! read-modify-write loop that keeps the bundle current.

pub mod bundle;
pub mod maintainer;

pub use bundle::CaCertificate;
pub use maintainer::TrustBundleMaintainer;
