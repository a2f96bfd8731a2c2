//! Serializable data model shared by the world-growth engine, its domain
//! packs and host tooling.

pub mod contract;
pub mod domain;
pub mod entity;
pub mod era;
pub mod feedback;
pub mod history;
pub mod pressure;
pub mod registry;
pub mod relationship;
pub mod seed;
pub mod tags;
pub mod targets;

pub use contract::{
    Affects, ComponentContract, EffectOperation, EnabledBy, EntityCountCondition, EntityEffect,
    GraphEffects, PressureEffect, PressureThreshold, ProducedEntity, ProducedRelationship,
    Produces, RelationshipEffect, SystemMetadata, TemplateMetadata,
};
pub use domain::{
    CultureDefinition, DomainSchema, EntityKindDefinition, RelationshipKindDefinition,
};
pub use entity::{flag_tags, EntityId, HardState, Point, Prominence, TagValue, Tags, TemporalRange};
pub use era::Era;
pub use feedback::{FeedbackLoop, LoopPolarity, MetricRef};
pub use history::{HistoryEvent, HistoryEventKind, RelationshipKey};
pub use pressure::{
    ComponentFlow, CountSelector, DeclarativePressure, Equilibrium, FeedbackFactor,
    PressureContract, PressureFile, PressureGrowth,
};
pub use registry::{
    AncestorSelector, AncestorStrategy, CreatorRef, EntityOperatorRegistry, ExpectedDistribution,
    LineageRule, ModifierRef,
};
pub use relationship::{Relationship, RelationshipStatus, DEFAULT_RELATIONSHIP_STRENGTH};
pub use seed::{SeedRelationship, WorldSeed};
pub use tags::{TagDefinition, TagRarity, TagRegistry};
pub use targets::{
    ClusterCountTarget, ConnectivityTargets, CorrectionStrength, DensityTargets,
    DistributionTargets, EraTargetOverride, GlobalTargets, RatioTargets, RelationshipTargets,
    TargetTuning, TotalEntitiesTarget,
};
