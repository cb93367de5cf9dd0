//! Persona definitions and registry
//!
//! Personas are loaded from a directory of YAML files, one persona per file.
//! Files named `agent-schema*` describe the format itself and are skipped.

use crate::error::BreakdownError;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Raise `concern` when `trigger` appears in the description
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConcernRule {
    /// Case-insensitive keyword
    pub trigger: String,
    /// Concern text
    pub concern: String,
}

/// One persona's configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersonaConfig {
    /// Persona key, unique per registry
    pub persona: String,
    /// Display name
    #[serde(default)]
    pub name: Option<String>,
    /// Role description
    #[serde(default)]
    pub role: Option<String>,
    /// Keywords the persona reacts to
    #[serde(default)]
    pub keywords: Vec<String>,
    /// Components the persona owns
    #[serde(default)]
    pub components: Vec<String>,
    /// Keyword-triggered concerns
    #[serde(default)]
    pub concerns: Vec<ConcernRule>,
    /// Standing recommendations
    #[serde(default)]
    pub recommendations: Vec<String>,
    /// Any other keys, passed through to analyzers untouched
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl PersonaConfig {
    /// Create persona with no rules
    pub fn new(persona: impl Into<String>) -> Self {
        Self {
            persona: persona.into(),
            name: None,
            role: None,
            keywords: Vec::new(),
            components: Vec::new(),
            concerns: Vec::new(),
            recommendations: Vec::new(),
            extra: serde_json::Map::new(),
        }
    }

    /// With display name
    #[inline]
    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// With keyword
    #[inline]
    #[must_use]
    pub fn with_keyword(mut self, keyword: impl Into<String>) -> Self {
        self.keywords.push(keyword.into());
        self
    }

    /// With owned component
    #[inline]
    #[must_use]
    pub fn with_component(mut self, component: impl Into<String>) -> Self {
        self.components.push(component.into());
        self
    }

    /// With concern rule
    #[inline]
    #[must_use]
    pub fn with_concern(mut self, trigger: impl Into<String>, concern: impl Into<String>) -> Self {
        self.concerns.push(ConcernRule {
            trigger: trigger.into(),
            concern: concern.into(),
        });
        self
    }

    /// With recommendation
    #[inline]
    #[must_use]
    pub fn with_recommendation(mut self, recommendation: impl Into<String>) -> Self {
        self.recommendations.push(recommendation.into());
        self
    }

    /// Name for display, falling back to the key
    #[must_use]
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.persona)
    }
}

/// Ordered set of personas, keyed by persona key
#[derive(Debug, Clone, Default)]
pub struct PersonaRegistry {
    personas: IndexMap<String, PersonaConfig>,
}

impl PersonaRegistry {
    /// Create empty registry
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Build registry from configs; later duplicates replace earlier ones
    pub fn from_personas(personas: impl IntoIterator<Item = PersonaConfig>) -> Self {
        let mut registry = Self::new();
        for persona in personas {
            registry.insert(persona);
        }
        registry
    }

    /// Load every persona file in a directory
    ///
    /// Unparseable files and files without a `persona` key are logged and
    /// skipped.
    ///
    /// # Errors
    /// - `BreakdownError::Config` if the directory cannot be read
    pub fn load_dir(dir: impl AsRef<Path>) -> Result<Self, BreakdownError> {
        let dir = dir.as_ref();
        let entries = std::fs::read_dir(dir)
            .map_err(|e| BreakdownError::Config(format!("{}: {e}", dir.display())))?;

        let mut registry = Self::new();
        for entry in entries.flatten() {
            let path = entry.path();
            let is_yaml = path
                .extension()
                .and_then(|ext| ext.to_str())
                .is_some_and(|ext| matches!(ext, "yaml" | "yml"));
            let skipped = path
                .file_name()
                .and_then(|name| name.to_str())
                .is_some_and(|name| name.starts_with("agent-schema"));
            if !is_yaml || skipped {
                continue;
            }

            match load_persona_file(&path) {
                Ok(config) => {
                    tracing::debug!(persona = %config.persona, path = %path.display(), "Loaded persona");
                    if let Some(previous) = registry.insert(config) {
                        tracing::warn!(persona = %previous.persona, "Duplicate persona replaced");
                    }
                }
                Err(reason) => {
                    tracing::warn!(path = %path.display(), %reason, "Skipping persona file");
                }
            }
        }

        tracing::info!(count = registry.len(), dir = %dir.display(), "Persona registry loaded");
        Ok(registry)
    }

    /// Insert persona, keeping key order
    pub fn insert(&mut self, config: PersonaConfig) -> Option<PersonaConfig> {
        let previous = self.personas.insert(config.persona.clone(), config);
        self.personas.sort_keys();
        previous
    }

    /// Restrict to the named personas
    ///
    /// # Errors
    /// - `BreakdownError::Config` if a name is not registered
    pub fn select<S: AsRef<str>>(&self, names: &[S]) -> Result<Self, BreakdownError> {
        let mut selected = Self::new();
        for name in names {
            let name = name.as_ref();
            let config = self
                .personas
                .get(name)
                .ok_or_else(|| BreakdownError::Config(format!("unknown persona: {name}")))?;
            selected.insert(config.clone());
        }
        Ok(selected)
    }

    /// Look up a persona
    #[must_use]
    pub fn get(&self, persona: &str) -> Option<&PersonaConfig> {
        self.personas.get(persona)
    }

    /// Persona count
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.personas.len()
    }

    /// Check if no persona is registered
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.personas.is_empty()
    }

    /// Personas in key order
    pub fn iter(&self) -> impl Iterator<Item = &PersonaConfig> {
        self.personas.values()
    }

    /// Persona keys in order
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.personas.keys().map(String::as_str)
    }
}

fn load_persona_file(path: &Path) -> Result<PersonaConfig, String> {
    let text = std::fs::read_to_string(path).map_err(|e| e.to_string())?;
    let config: PersonaConfig = serde_yaml::from_str(&text).map_err(|e| e.to_string())?;
    if config.persona.trim().is_empty() {
        return Err("empty persona key".to_string());
    }
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_orders_by_key() {
        let registry = PersonaRegistry::from_personas([
            PersonaConfig::new("UX_DESIGNER"),
            PersonaConfig::new("BACKEND_ENGINEER"),
            PersonaConfig::new("PRODUCT_MANAGER"),
        ]);
        let keys: Vec<_> = registry.keys().collect();
        assert_eq!(keys, vec!["BACKEND_ENGINEER", "PRODUCT_MANAGER", "UX_DESIGNER"]);
    }

    #[test]
    fn duplicate_key_replaces() {
        let mut registry = PersonaRegistry::new();
        assert!(registry.insert(PersonaConfig::new("PM")).is_none());
        assert!(registry
            .insert(PersonaConfig::new("PM").with_name("Product"))
            .is_some());
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.get("PM").unwrap().display_name(), "Product");
    }

    #[test]
    fn select_rejects_unknown_names() {
        let registry =
            PersonaRegistry::from_personas([PersonaConfig::new("A"), PersonaConfig::new("B")]);
        assert_eq!(registry.select(&["B"]).unwrap().len(), 1);
        assert!(matches!(
            registry.select(&["C"]),
            Err(BreakdownError::Config(_))
        ));
    }

    #[test]
    fn yaml_keeps_extra_keys() {
        let config: PersonaConfig = serde_yaml::from_str(
            "persona: STAFF_ENGINEER\n\
             name: Staff Engineer\n\
             keywords: [api, latency]\n\
             concerns:\n  - trigger: latency\n    concern: Tail latency budget\n\
             dataSources: [arch-docs]\n",
        )
        .unwrap();

        assert_eq!(config.display_name(), "Staff Engineer");
        assert_eq!(config.concerns[0].trigger, "latency");
        assert!(config.extra.contains_key("dataSources"));
    }
}
