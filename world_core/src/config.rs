use std::{
    env, fs, io,
    path::{Path, PathBuf},
    sync::Arc,
};

use schemars::JsonSchema;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use thiserror::Error;
use world_schema::{
    DeclarativePressure, DistributionTargets, DomainSchema, EntityOperatorRegistry, Era,
    FeedbackLoop, PressureFile, Prominence, TagRegistry, WorldSeed,
};

use crate::distribution::DEFAULT_CLUSTER_STRENGTH_THRESHOLD;
use crate::pressure::PressureSettings;

pub const BUILTIN_ENGINE_CONFIG: &str = include_str!("data/engine_config.json");
pub const ENGINE_CONFIG_ENV: &str = "WORLDGEN_CONFIG_PATH";
pub const WORLD_DEFINITION_ENV: &str = "WORLDGEN_DEFINITION_DIR";

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct EngineConfig {
    pub seed: u64,
    /// Multiplies every population target and growth bound.
    pub scale_factor: f64,
    /// Epochs allotted to eras that do not declare their own.
    pub epochs_per_era: u32,
    pub simulation_ticks_per_growth: u32,
    pub max_ticks: u64,
    /// Per-template run cap before scaling.
    pub template_run_cap: u32,
    pub growth: GrowthConfig,
    pub relationship_budget: RelationshipBudget,
    pub clustering: ClusteringConfig,
    pub coordinate_overlap_radius: f64,
    pub prune: PruneConfig,
    pub feedback_validation_interval: u32,
    pub pressure: PressureSettings,
    pub enrichment: EnrichmentConfig,
    pub aggressive_system_threshold: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            seed: 1337,
            scale_factor: 1.0,
            epochs_per_era: 5,
            simulation_ticks_per_growth: 10,
            max_ticks: 500,
            template_run_cap: 12,
            growth: GrowthConfig::default(),
            relationship_budget: RelationshipBudget::default(),
            clustering: ClusteringConfig::default(),
            coordinate_overlap_radius: 0.5,
            prune: PruneConfig::default(),
            feedback_validation_interval: 5,
            pressure: PressureSettings::default(),
            enrichment: EnrichmentConfig::default(),
            aggressive_system_threshold: 20,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct GrowthConfig {
    pub min_per_epoch: f64,
    pub max_per_epoch: f64,
    /// Relative jitter applied to the per-epoch growth target.
    pub jitter: f64,
    pub attempts_per_target: f64,
    /// Warn when an epoch creates more than this multiple of its target.
    pub high_growth_factor: f64,
    /// Stop when entities reach this multiple of the scaled total target.
    pub excessive_growth_factor: f64,
}

impl Default for GrowthConfig {
    fn default() -> Self {
        Self {
            min_per_epoch: 3.0,
            max_per_epoch: 25.0,
            jitter: 0.3,
            attempts_per_target: 10.0,
            high_growth_factor: 2.0,
            excessive_growth_factor: 10.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct RelationshipBudget {
    pub max_per_simulation_tick: usize,
}

impl Default for RelationshipBudget {
    fn default() -> Self {
        Self {
            max_per_simulation_tick: 40,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct ClusteringConfig {
    pub strength_threshold: f64,
}

impl Default for ClusteringConfig {
    fn default() -> Self {
        Self {
            strength_threshold: DEFAULT_CLUSTER_STRENGTH_THRESHOLD,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct PruneConfig {
    pub forgotten_age: u64,
    pub min_relationships: usize,
    pub mortal_kind: String,
    pub alive_status: String,
    pub dead_status: String,
    pub death_age: u64,
    pub death_chance: f64,
}

impl Default for PruneConfig {
    fn default() -> Self {
        Self {
            forgotten_age: 50,
            min_relationships: 2,
            mortal_kind: "npc".to_string(),
            alive_status: "alive".to_string(),
            dead_status: "dead".to_string(),
            death_age: 80,
            death_chance: 0.3,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct EnrichmentConfig {
    pub enabled: bool,
    pub images: bool,
    pub batch_size: usize,
    /// Only entities at or above this prominence are enriched.
    pub min_prominence: Prominence,
}

impl Default for EnrichmentConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            images: false,
            batch_size: 8,
            min_prominence: Prominence::Recognized,
        }
    }
}

impl EngineConfig {
    pub fn builtin() -> Arc<Self> {
        Arc::new(
            serde_json::from_str(BUILTIN_ENGINE_CONFIG)
                .expect("builtin engine config should parse"),
        )
    }

    pub fn from_json_str(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    pub fn from_file(path: &Path) -> Result<Self, EngineConfigError> {
        let contents = fs::read_to_string(path).map_err(|source| EngineConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config = EngineConfig::from_json_str(&contents)?;
        Ok(config)
    }

    /// `ceil(value * scale_factor)`, never below one.
    pub fn scaled(&self, value: f64) -> usize {
        (value * self.scale_factor).ceil().max(1.0) as usize
    }
}

#[derive(Debug, Error)]
pub enum EngineConfigError {
    #[error("failed to parse engine config: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("failed to read engine config from {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

#[derive(Debug, Clone)]
pub struct EngineConfigMetadata {
    path: Option<PathBuf>,
}

impl EngineConfigMetadata {
    pub fn new(path: Option<PathBuf>) -> Self {
        Self { path }
    }

    pub fn path(&self) -> Option<&PathBuf> {
        self.path.as_ref()
    }
}

pub fn load_engine_config_from_env() -> (Arc<EngineConfig>, EngineConfigMetadata) {
    if let Some(path) = env::var(ENGINE_CONFIG_ENV).ok().map(PathBuf::from) {
        match EngineConfig::from_file(&path) {
            Ok(config) => {
                tracing::info!(
                    target: "worldgen::config",
                    path = %path.display(),
                    "engine_config.loaded=file"
                );
                return (Arc::new(config), EngineConfigMetadata::new(Some(path)));
            }
            Err(err) => {
                tracing::warn!(
                    target: "worldgen::config",
                    path = %path.display(),
                    error = %err,
                    "engine_config.load_failed"
                );
            }
        }
    }

    let config = EngineConfig::builtin();
    tracing::info!(target: "worldgen::config", "engine_config.loaded=builtin");
    (config, EngineConfigMetadata::new(None))
}

/// Everything a domain declares about its world.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct WorldDefinition {
    pub domain: DomainSchema,
    pub eras: Vec<Era>,
    pub pressures: Vec<DeclarativePressure>,
    pub targets: DistributionTargets,
    pub registries: Vec<EntityOperatorRegistry>,
    pub tags: TagRegistry,
    pub feedback_loops: Vec<FeedbackLoop>,
    pub seed: WorldSeed,
}

#[derive(Debug, Error)]
pub enum WorldDefinitionError {
    #[error("failed to parse world definition: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("failed to parse {path}: {source}")]
    ParseFile {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl WorldDefinition {
    pub fn from_json_str(json: &str) -> Result<Self, WorldDefinitionError> {
        Ok(serde_json::from_str(json)?)
    }

    /// Load a definition split across one file per section. `domain.json`,
    /// `eras.json`, `pressures.json`, `targets.json` and `registries.json`
    /// are required; `tags.json`, `feedback_loops.json` and `seed.json` are
    /// optional.
    pub fn from_dir(dir: &Path) -> Result<Self, WorldDefinitionError> {
        let pressures: PressureFile = read_json(&dir.join("pressures.json"))?;
        Ok(Self {
            domain: read_json(&dir.join("domain.json"))?,
            eras: read_json(&dir.join("eras.json"))?,
            pressures: pressures.pressures,
            targets: read_json(&dir.join("targets.json"))?,
            registries: read_json(&dir.join("registries.json"))?,
            tags: read_optional_json(&dir.join("tags.json"))?,
            feedback_loops: read_optional_json(&dir.join("feedback_loops.json"))?,
            seed: read_optional_json(&dir.join("seed.json"))?,
        })
    }

    /// Reads `WORLDGEN_DEFINITION_DIR` when set. `Ok(None)` means the caller
    /// should fall back to its builtin definition.
    pub fn load_from_env() -> Result<Option<Self>, WorldDefinitionError> {
        let Some(dir) = env::var(WORLD_DEFINITION_ENV).ok().map(PathBuf::from) else {
            return Ok(None);
        };
        let definition = Self::from_dir(&dir)?;
        tracing::info!(
            target: "worldgen::config",
            path = %dir.display(),
            "world_definition.loaded=dir"
        );
        Ok(Some(definition))
    }

    pub fn era(&self, id: &str) -> Option<&Era> {
        self.eras.iter().find(|era| era.id == id)
    }
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T, WorldDefinitionError> {
    let contents = fs::read_to_string(path).map_err(|source| WorldDefinitionError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_str(&contents).map_err(|source| WorldDefinitionError::ParseFile {
        path: path.to_path_buf(),
        source,
    })
}

fn read_optional_json<T: DeserializeOwned + Default>(
    path: &Path,
) -> Result<T, WorldDefinitionError> {
    if path.exists() {
        read_json(path)
    } else {
        Ok(T::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_config_matches_defaults() {
        let config = EngineConfig::builtin();
        let defaults = EngineConfig::default();
        assert_eq!(config.max_ticks, defaults.max_ticks);
        assert_eq!(config.prune.death_age, 80);
        assert_eq!(config.clustering.strength_threshold, 0.6);
        assert_eq!(config.feedback_validation_interval, 5);
        assert_eq!(config.pressure.max_delta, 15.0);
    }

    #[test]
    fn partial_config_fills_defaults() {
        let config =
            EngineConfig::from_json_str(r#"{"seed": 9, "prune": {"death_chance": 0.5}}"#)
                .expect("parse");
        assert_eq!(config.seed, 9);
        assert_eq!(config.prune.death_chance, 0.5);
        assert_eq!(config.prune.forgotten_age, 50);
        assert_eq!(config.relationship_budget.max_per_simulation_tick, 40);
    }

    #[test]
    fn scaled_rounds_up() {
        let config = EngineConfig {
            scale_factor: 0.5,
            ..Default::default()
        };
        assert_eq!(config.scaled(3.0), 2);
        assert_eq!(config.scaled(25.0), 13);
        assert_eq!(config.scaled(0.0), 1);
    }

    #[test]
    fn missing_file_reports_path() {
        let err = EngineConfig::from_file(Path::new("/nonexistent/engine.json")).unwrap_err();
        assert!(err.to_string().contains("/nonexistent/engine.json"));
        let err = WorldDefinition::from_dir(Path::new("/nonexistent")).unwrap_err();
        assert!(matches!(err, WorldDefinitionError::Read { .. }));
    }
}
