//! The Sundered Reach: a small fantasy domain for the world-growth engine.
//!
//! Provides the builtin world definition (kinds, eras, pressures, targets,
//! registries, tags, feedback loops and a seed), the growth templates,
//! simulation systems and era rules that act on it, and offline naming and
//! lore services.

use std::sync::Arc;

use world_core::{EngineConfig, EngineSetup, WorldDefinition, WorldDefinitionError};
use world_schema::PressureFile;

pub mod catalog;
pub mod era_rules;
pub mod lore;
pub mod naming;
pub mod systems;
pub mod templates;

pub use catalog::{CatalogError, ComponentCatalog, SystemSpec, TemplateSpec};
pub use era_rules::SettlementAbandonment;
pub use lore::{ChronicleLore, PromptImages};
pub use naming::{FnvHasher, SyllableNameGenerator};
pub use systems::{AllianceFormation, ConflictContagion, FriendshipFormation, ProminenceEvolution};
pub use templates::{
    AbilityDiscovery, FactionRise, HeroEmergence, RuleCodification, SettlementFounding,
};

/// Cultures with a naming profile. Must match `domain.json`.
pub const CULTURES: [&str; 3] = ["highland", "coastal", "riverside"];

pub const BUILTIN_DOMAIN: &str = include_str!("data/domain.json");
pub const BUILTIN_ERAS: &str = include_str!("data/eras.json");
pub const BUILTIN_PRESSURES: &str = include_str!("data/pressures.json");
pub const BUILTIN_TARGETS: &str = include_str!("data/targets.json");
pub const BUILTIN_REGISTRIES: &str = include_str!("data/registries.json");
pub const BUILTIN_TAGS: &str = include_str!("data/tags.json");
pub const BUILTIN_FEEDBACK_LOOPS: &str = include_str!("data/feedback_loops.json");
pub const BUILTIN_SEED: &str = include_str!("data/seed.json");

/// Assemble the builtin definition from its per-section files.
pub fn builtin_world() -> WorldDefinition {
    let pressures: PressureFile =
        serde_json::from_str(BUILTIN_PRESSURES).expect("builtin pressures should parse");
    WorldDefinition {
        domain: serde_json::from_str(BUILTIN_DOMAIN).expect("builtin domain should parse"),
        eras: serde_json::from_str(BUILTIN_ERAS).expect("builtin eras should parse"),
        pressures: pressures.pressures,
        targets: serde_json::from_str(BUILTIN_TARGETS).expect("builtin targets should parse"),
        registries: serde_json::from_str(BUILTIN_REGISTRIES)
            .expect("builtin registries should parse"),
        tags: serde_json::from_str(BUILTIN_TAGS).expect("builtin tags should parse"),
        feedback_loops: serde_json::from_str(BUILTIN_FEEDBACK_LOOPS)
            .expect("builtin feedback loops should parse"),
        seed: serde_json::from_str(BUILTIN_SEED).expect("builtin seed should parse"),
    }
}

/// Definition from `WORLDGEN_DEFINITION_DIR`, or the builtin one when the
/// variable is unset.
pub fn load_world_from_env() -> Result<WorldDefinition, WorldDefinitionError> {
    match WorldDefinition::load_from_env()? {
        Some(definition) => Ok(definition),
        None => {
            tracing::info!(target: "worldgen::config", "world_definition.loaded=builtin");
            Ok(builtin_world())
        }
    }
}

/// Wire every Reach component into an engine setup. Name generation is
/// salted with the run seed.
pub fn reach_setup(
    config: Arc<EngineConfig>,
    definition: WorldDefinition,
    catalog: &ComponentCatalog,
) -> EngineSetup {
    let salt = config.seed;
    EngineSetup::new(config, definition)
        .with_template(SettlementFounding::new(catalog))
        .with_template(FactionRise::new(catalog))
        .with_template(HeroEmergence::new(catalog))
        .with_template(AbilityDiscovery::new(catalog))
        .with_template(RuleCodification::new(catalog))
        .with_system(AllianceFormation::new(catalog))
        .with_system(ConflictContagion::new(catalog))
        .with_system(ProminenceEvolution::new(catalog))
        .with_system(FriendshipFormation::new(catalog))
        .with_era_rule(SettlementAbandonment::default())
        .with_name_generator(SyllableNameGenerator::new(salt))
        .with_lore_service(Arc::new(ChronicleLore))
        .with_image_service(Arc::new(PromptImages::default()))
}

pub fn builtin_setup(config: Arc<EngineConfig>) -> EngineSetup {
    reach_setup(config, builtin_world(), &ComponentCatalog::builtin())
}
