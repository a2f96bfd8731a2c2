use std::sync::Arc;

use futures::executor::block_on;
use world_core::{EngineConfig, ExportedWorld, WorldEngine};
use world_domain::builtin_setup;

pub fn config(seed: u64, scale: f64) -> Arc<EngineConfig> {
    let mut config = (*EngineConfig::builtin()).clone();
    config.seed = seed;
    config.scale_factor = scale;
    Arc::new(config)
}

pub fn engine(seed: u64, scale: f64) -> WorldEngine {
    WorldEngine::new(builtin_setup(config(seed, scale))).expect("builtin world should validate")
}

/// Run the builtin Reach to completion and export it.
#[allow(dead_code)]
pub fn grow_world(seed: u64) -> ExportedWorld {
    let mut engine = engine(seed, 1.0);
    engine.run();
    block_on(engine.finalize())
}
