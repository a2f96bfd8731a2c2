//! Procedural world-growth engine.
//!
//! A [`WorldEngine`] grows a typed entity/relationship graph by alternating
//! growth templates with simulation systems, steered by distribution targets,
//! homeostatic pressures and era multipliers. Domains plug in behaviour through
//! the traits in [`component`] and describe their world with a
//! [`WorldDefinition`].

pub mod component;
pub mod config;
pub mod contracts;
pub mod distribution;
pub mod emitter;
pub mod engine;
pub mod enrichment;
mod error;
pub mod export;
pub mod graph;
pub mod homeostasis;
pub mod log_forward;
pub mod naming;
pub mod pressure;
pub mod selection;
pub mod stats;
pub mod validator;

pub use component::{
    EntityRef, EraRule, GrowthTemplate, RelationshipDraft, SimulationSystem, SystemResult,
    TemplateResult,
};
pub use config::{
    load_engine_config_from_env, EngineConfig, EngineConfigError, EngineConfigMetadata,
    WorldDefinition, WorldDefinitionError, ENGINE_CONFIG_ENV, WORLD_DEFINITION_ENV,
};
pub use contracts::{ActivationBlock, ContractEnforcer, TagHealthReport};
pub use distribution::{
    DeviationCategory, DeviationReport, DistributionState, DistributionTracker, GraphMetrics,
};
pub use emitter::{
    ChannelEmitter, LogLevel, NullEmitter, SimulationEmitter, SimulationEvent, TracingEmitter,
};
pub use engine::{EngineSetup, WorldEngine};
pub use enrichment::{
    EnrichmentError, EnrichmentQueue, EnrichmentService, EnrichmentSubject, ImageGenerationService,
    ImageRecord, LoreRecord,
};
pub use error::{ComponentError, EngineError, GraphError};
pub use export::{ExportMetadata, ExportedWorld};
pub use graph::{
    EntityDraft, EntityFilter, EntityPatch, GraphSettings, NewRelationship, WorldGraph,
};
pub use homeostasis::{
    DynamicWeightCalculator, FeedbackAnalyzer, LoopHealth, LoopStatus, PopulationReport,
    PopulationTracker,
};
pub use log_forward::{log_channel, LogEnvelope, LogForwardLayer};
pub use naming::{NameGenerator, NameRequest, NamingError};
pub use pressure::{Pressure, PressureInterpreter, PressureLoadError, PressureSettings};
pub use selection::{SystemSelector, TemplateSelector};
pub use stats::{EngineWarning, EpochStats, RunStatistics, TerminationReason};
pub use validator::{FrameworkValidator, ValidationReport};
