// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Sync rule storage: destination -> source mappings per resource kind.

use std::collections::HashMap;
use std::fmt;

/// Identifies a named resource within a namespace.
///
/// The empty location is a sentinel: as a source it means "delete the
/// destination", and it never refers to a real object.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct ResourceLocation {
    pub namespace: String,
    pub name: String,
}

impl ResourceLocation {
    pub fn new(namespace: &str, name: &str) -> Self {
        Self {
            namespace: namespace.to_string(),
            name: name.to_string(),
        }
    }

    /// The "no source / delete destination" sentinel.
    pub const fn empty() -> Self {
        Self {
            namespace: String::new(),
            name: String::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.namespace.is_empty() && self.name.is_empty()
    }
}

impl fmt::Display for ResourceLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// The authoritative desired-state record: one table per resource kind,
/// keyed by destination. The engine holds no other memory of intent.
#[derive(Debug, Default)]
pub struct SyncRules {
    pub config_maps: HashMap<ResourceLocation, ResourceLocation>,
    pub secrets: HashMap<ResourceLocation, ResourceLocation>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_sentinel() {
        assert!(ResourceLocation::empty().is_empty());
        assert!(!ResourceLocation::new("apps", "settings").is_empty());
    }

    #[test]
    fn test_equality_by_namespace_and_name() {
        assert_eq!(
            ResourceLocation::new("apps", "settings"),
            ResourceLocation::new("apps", "settings")
        );
        assert_ne!(
            ResourceLocation::new("apps", "settings"),
            ResourceLocation::new("infra", "settings")
        );
    }

    #[test]
    fn test_display() {
        assert_eq!(
            ResourceLocation::new("apps", "settings").to_string(),
            "apps/settings"
        );
    }

    #[test]
    fn test_rule_insert_overwrites_destination() {
        let mut rules = SyncRules::default();
        let destination = ResourceLocation::new("apps", "settings");

        rules
            .config_maps
            .insert(destination.clone(), ResourceLocation::new("infra", "old"));
        rules
            .config_maps
            .insert(destination.clone(), ResourceLocation::new("infra", "new"));

        assert_eq!(rules.config_maps.len(), 1);
        assert_eq!(
            rules.config_maps.get(&destination),
            Some(&ResourceLocation::new("infra", "new"))
        );
    }
}
