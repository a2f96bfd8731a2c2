//! Declarative half of the Reach components: contracts and metadata live in
//! `data/components.json` so they can be edited and schema-checked without
//! touching the behaviour code.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use world_schema::{ComponentContract, SystemMetadata, TemplateMetadata};

pub const BUILTIN_COMPONENTS: &str = include_str!("data/components.json");

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct TemplateSpec {
    pub name: Option<String>,
    pub contract: Option<ComponentContract>,
    pub metadata: Option<TemplateMetadata>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct SystemSpec {
    pub name: Option<String>,
    pub contract: Option<ComponentContract>,
    pub metadata: Option<SystemMetadata>,
}

impl SystemSpec {
    /// Tunable from `metadata.parameters`, or `default` when absent or not
    /// finite.
    pub fn parameter(&self, key: &str, default: f64) -> f64 {
        self.metadata
            .as_ref()
            .and_then(|metadata| metadata.parameters.get(key))
            .copied()
            .filter(|value| value.is_finite())
            .unwrap_or(default)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct ComponentCatalog {
    pub templates: BTreeMap<String, TemplateSpec>,
    pub systems: BTreeMap<String, SystemSpec>,
}

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("failed to parse component catalog: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl ComponentCatalog {
    pub fn builtin() -> Self {
        Self::from_json_str(BUILTIN_COMPONENTS).expect("builtin component catalog should parse")
    }

    pub fn from_json_str(json: &str) -> Result<Self, CatalogError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn from_file(path: &Path) -> Result<Self, CatalogError> {
        let contents = fs::read_to_string(path).map_err(|source| CatalogError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json_str(&contents)
    }

    /// Missing entries yield an empty spec; the validator reports components
    /// that end up without a contract.
    pub fn template(&self, id: &str) -> TemplateSpec {
        self.templates.get(id).cloned().unwrap_or_default()
    }

    pub fn system(&self, id: &str) -> SystemSpec {
        self.systems.get(id).cloned().unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_catalog_covers_every_component() {
        let catalog = ComponentCatalog::builtin();
        assert_eq!(
            catalog.templates.keys().map(String::as_str).collect::<Vec<_>>(),
            vec![
                "ability_discovery",
                "faction_rise",
                "hero_emergence",
                "rule_codification",
                "settlement_founding"
            ]
        );
        assert_eq!(catalog.systems.len(), 4);
        assert!(catalog
            .templates
            .values()
            .all(|spec| spec.contract.is_some() && spec.metadata.is_some()));
    }

    #[test]
    fn parameters_fall_back_to_defaults() {
        let catalog = ComponentCatalog::builtin();
        let alliance = catalog.system("alliance_formation");
        assert_eq!(alliance.parameter("alliance_base_chance", 0.1), 0.5);
        assert_eq!(alliance.parameter("missing", 0.25), 0.25);
        assert!(catalog.system("unknown").contract.is_none());
    }
}
