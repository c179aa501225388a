// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Pure trust bundle operations: decode, merge, encode.
//!
//! A bundle is an ordered list of distinct certificates. Merging prepends
//! the current signer, drops expired entries, and deduplicates by raw DER
//! bytes so the output is deterministic for a given input order.

use crate::error::{CustodianError, Result};
use pem::{EncodeConfig, LineEnding, Pem};

const CERTIFICATE_TAG: &str = "CERTIFICATE";

/// One X.509 certificate: raw DER plus the parsed validity window.
///
/// Equality is raw-byte equality; the parsed fields are derived and never
/// diverge from the DER.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaCertificate {
    der: Vec<u8>,
    subject: String,
    not_before: i64,
    not_after: i64,
}

impl CaCertificate {
    /// Parse a certificate from raw DER bytes.
    pub fn from_der(der: Vec<u8>) -> Result<Self> {
        let (_, parsed) = x509_parser::parse_x509_certificate(&der)
            .map_err(|e| CustodianError::Certificate(format!("malformed DER: {}", e)))?;

        let subject = parsed.subject().to_string();
        let not_before = parsed.validity().not_before.timestamp();
        let not_after = parsed.validity().not_after.timestamp();

        Ok(Self {
            der,
            subject,
            not_before,
            not_after,
        })
    }

    /// Parse the first CERTIFICATE block of a PEM blob.
    pub fn from_pem(blob: &[u8]) -> Result<Self> {
        let blocks = pem::parse_many(blob)
            .map_err(|e| CustodianError::Certificate(format!("malformed PEM: {}", e)))?;

        let block = blocks
            .into_iter()
            .find(|b| b.tag() == CERTIFICATE_TAG)
            .ok_or_else(|| {
                CustodianError::Certificate("no CERTIFICATE block found".to_string())
            })?;

        Self::from_der(block.contents().to_vec())
    }

    pub fn der(&self) -> &[u8] {
        &self.der
    }

    pub fn subject(&self) -> &str {
        &self.subject
    }

    /// Validity window bounds as unix timestamps.
    pub fn not_before(&self) -> i64 {
        self.not_before
    }

    pub fn not_after(&self) -> i64 {
        self.not_after
    }

    /// Strict wall-clock comparison: expired once `now` passes not-after.
    pub fn expired_at(&self, now: i64) -> bool {
        self.not_after <= now
    }
}

/// Decode a stored bundle blob into its ordered certificate list.
///
/// A malformed blob is a hard error: trust material is never silently
/// discarded. Non-certificate PEM blocks are ignored.
pub fn decode(blob: &str) -> Result<Vec<CaCertificate>> {
    let blocks = pem::parse_many(blob.as_bytes())
        .map_err(|e| CustodianError::BundleDecode(e.to_string()))?;

    let certificates = blocks
        .into_iter()
        .filter(|b| b.tag() == CERTIFICATE_TAG)
        .map(|b| {
            CaCertificate::from_der(b.contents().to_vec())
                .map_err(|e| CustodianError::BundleDecode(e.to_string()))
        })
        .collect::<Result<Vec<_>>>()?;

    if certificates.is_empty() && !blob.trim().is_empty() {
        return Err(CustodianError::BundleDecode(
            "no certificates found in non-empty bundle".to_string(),
        ));
    }

    Ok(certificates)
}

/// Build the desired bundle: signer first, then all still-valid previously
/// trusted certificates, deduplicated by raw bytes in first-seen order.
pub fn merge(signer: &CaCertificate, existing: &[CaCertificate], now: i64) -> Vec<CaCertificate> {
    let mut worklist = Vec::with_capacity(existing.len() + 1);
    worklist.push(signer.clone());
    worklist.extend_from_slice(existing);

    let mut merged: Vec<CaCertificate> = Vec::with_capacity(worklist.len());
    for certificate in worklist {
        if certificate.expired_at(now) {
            continue;
        }
        // n^2 scan; bundles hold tens of entries at most
        if merged.iter().any(|kept| kept.der == certificate.der) {
            continue;
        }
        merged.push(certificate);
    }

    merged
}

/// Serialize the bundle as concatenated PEM, deterministic in list order.
pub fn encode(certificates: &[CaCertificate]) -> String {
    certificates
        .iter()
        .map(|c| {
            pem::encode_config(
                &Pem::new(CERTIFICATE_TAG, c.der.clone()),
                EncodeConfig::new().set_line_ending(LineEnding::LF),
            )
        })
        .collect()
}
