// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Declarative resource synchronization: rule tables, per-kind mirror
//! operations, and the reconciliation engine that replays the rules.

pub mod engine;
pub mod resources;
pub mod rules;

pub use engine::SyncEngine;
pub use rules::ResourceLocation;
