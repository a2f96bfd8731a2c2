//! Behaviour units supplied by a domain: growth templates, simulation systems
//! and era rules.
//!
//! Templates and systems only read the graph. They describe the changes they
//! want as drafts and the engine applies them through the graph API.

use std::collections::BTreeMap;

use rand::rngs::SmallRng;
use world_schema::{
    ComponentContract, EntityId, HardState, RelationshipKey, SystemMetadata, TemplateMetadata,
};

use crate::error::ComponentError;
use crate::graph::{EntityDraft, EntityPatch, NewRelationship, WorldGraph};

/// Endpoint of a relationship produced by a template: either an entity drafted
/// in the same result (by index) or one already in the graph.
#[derive(Debug, Clone, PartialEq)]
pub enum EntityRef {
    Draft(usize),
    Existing(EntityId),
}

impl From<EntityId> for EntityRef {
    fn from(id: EntityId) -> Self {
        EntityRef::Existing(id)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RelationshipDraft {
    pub kind: String,
    pub src: EntityRef,
    pub dst: EntityRef,
    pub strength: Option<f64>,
    pub distance: Option<f64>,
}

impl RelationshipDraft {
    pub fn new(kind: impl Into<String>, src: impl Into<EntityRef>, dst: impl Into<EntityRef>) -> Self {
        Self {
            kind: kind.into(),
            src: src.into(),
            dst: dst.into(),
            strength: None,
            distance: None,
        }
    }

    pub fn with_strength(mut self, strength: f64) -> Self {
        self.strength = Some(strength);
        self
    }

    pub fn with_distance(mut self, distance: f64) -> Self {
        self.distance = Some(distance);
        self
    }
}

#[derive(Debug, Clone, Default)]
pub struct TemplateResult {
    pub entities: Vec<EntityDraft>,
    pub relationships: Vec<RelationshipDraft>,
    pub description: String,
}

#[derive(Debug, Clone, Default)]
pub struct SystemResult {
    pub relationships_added: Vec<NewRelationship>,
    pub relationships_ended: Vec<RelationshipKey>,
    pub entities_modified: Vec<(EntityId, EntityPatch)>,
    pub pressure_changes: BTreeMap<String, f64>,
    pub description: String,
}

impl SystemResult {
    pub fn is_empty(&self) -> bool {
        self.relationships_added.is_empty()
            && self.relationships_ended.is_empty()
            && self.entities_modified.is_empty()
            && self.pressure_changes.is_empty()
    }
}

pub trait GrowthTemplate {
    fn id(&self) -> &str;

    fn name(&self) -> &str {
        self.id()
    }

    fn metadata(&self) -> Option<&TemplateMetadata> {
        None
    }

    fn contract(&self) -> Option<&ComponentContract> {
        None
    }

    fn can_apply(&self, graph: &WorldGraph) -> bool;

    /// Candidate anchor entities. Templates that need no anchor return an
    /// empty list and receive `None` in `expand`.
    fn find_targets(&self, graph: &WorldGraph) -> Vec<HardState>;

    fn expand(
        &self,
        graph: &WorldGraph,
        target: Option<&HardState>,
        rng: &mut SmallRng,
    ) -> Result<TemplateResult, ComponentError>;
}

pub trait SimulationSystem {
    fn id(&self) -> &str;

    fn name(&self) -> &str {
        self.id()
    }

    fn metadata(&self) -> Option<&SystemMetadata> {
        None
    }

    fn contract(&self) -> Option<&ComponentContract> {
        None
    }

    /// `modifier` is the era-derived intensity, already clamped; systems with
    /// a zero modifier are never called.
    fn apply(
        &self,
        graph: &WorldGraph,
        modifier: f64,
        rng: &mut SmallRng,
    ) -> Result<SystemResult, ComponentError>;
}

/// One-off hook run at the end of each epoch of its era.
pub trait EraRule {
    fn era_id(&self) -> &str;

    fn apply(
        &self,
        graph: &mut WorldGraph,
        rng: &mut SmallRng,
    ) -> Result<Option<String>, ComponentError>;
}
