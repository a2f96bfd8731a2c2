//! The world graph: sole owner of entity, relationship and pressure state.
//!
//! Every read hands out an owned copy, so templates and systems can never
//! hold references into the graph while it is mutated. All writes go through
//! the explicit methods below.

use std::collections::BTreeMap;

use ahash::AHashSet;
use tracing::warn;
use world_schema::{
    EntityId, HardState, HistoryEvent, Point, Prominence, Relationship, RelationshipStatus, Tags,
    TemporalRange, DEFAULT_RELATIONSHIP_STRENGTH,
};

use crate::error::GraphError;
use crate::naming::{NameGenerator, NameRequest};

type RelationshipIndexKey = (String, EntityId, EntityId);

#[derive(Debug, Clone)]
pub struct GraphSettings {
    pub coordinate_overlap_radius: f64,
}

impl Default for GraphSettings {
    fn default() -> Self {
        Self {
            coordinate_overlap_radius: 0.5,
        }
    }
}

/// Request to create a new entity. The graph assigns id and timestamps.
#[derive(Debug, Clone, Default)]
pub struct EntityDraft {
    pub kind: String,
    pub subtype: String,
    pub name: Option<String>,
    pub description: String,
    pub status: String,
    pub prominence: Prominence,
    pub culture: Option<String>,
    pub tags: Tags,
    pub coordinates: Option<Point>,
    pub temporal: Option<TemporalRange>,
}

impl EntityDraft {
    pub fn new(kind: impl Into<String>, subtype: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            subtype: subtype.into(),
            ..Default::default()
        }
    }
}

/// Partial update applied by `update_entity`. `None` fields are untouched.
#[derive(Debug, Clone, Default, PartialEq, serde::Serialize)]
pub struct EntityPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prominence: Option<Prominence>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub culture: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub coordinates: Option<Point>,
    #[serde(skip_serializing_if = "Tags::is_empty")]
    pub set_tags: Tags,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub remove_tags: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_tick: Option<u64>,
}

impl EntityPatch {
    pub fn is_empty(&self) -> bool {
        self == &EntityPatch::default()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewRelationship {
    pub kind: String,
    pub src: EntityId,
    pub dst: EntityId,
    pub strength: Option<f64>,
    pub distance: Option<f64>,
    pub category: Option<String>,
}

impl NewRelationship {
    pub fn new(kind: impl Into<String>, src: EntityId, dst: EntityId) -> Self {
        Self {
            kind: kind.into(),
            src,
            dst,
            strength: None,
            distance: None,
            category: None,
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

/// Query predicate for entity lookups. Unset fields match everything.
#[derive(Debug, Clone, Default)]
pub struct EntityFilter {
    pub kind: Option<String>,
    pub subtype: Option<String>,
    pub status: Option<String>,
    pub culture: Option<String>,
    pub tag: Option<String>,
    pub min_prominence: Option<Prominence>,
}

impl EntityFilter {
    pub fn kind(kind: impl Into<String>) -> Self {
        Self {
            kind: Some(kind.into()),
            ..Default::default()
        }
    }

    pub fn with_subtype(mut self, subtype: impl Into<String>) -> Self {
        self.subtype = Some(subtype.into());
        self
    }

    pub fn with_status(mut self, status: impl Into<String>) -> Self {
        self.status = Some(status.into());
        self
    }

    pub fn with_culture(mut self, culture: impl Into<String>) -> Self {
        self.culture = Some(culture.into());
        self
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tag = Some(tag.into());
        self
    }

    pub fn with_min_prominence(mut self, prominence: Prominence) -> Self {
        self.min_prominence = Some(prominence);
        self
    }

    pub fn matches(&self, entity: &HardState) -> bool {
        self.kind.as_ref().map_or(true, |kind| &entity.kind == kind)
            && self
                .subtype
                .as_ref()
                .map_or(true, |subtype| &entity.subtype == subtype)
            && self
                .status
                .as_ref()
                .map_or(true, |status| &entity.status == status)
            && self
                .culture
                .as_ref()
                .map_or(true, |culture| entity.culture.as_ref() == Some(culture))
            && self.tag.as_ref().map_or(true, |tag| entity.has_tag(tag))
            && self
                .min_prominence
                .map_or(true, |minimum| entity.prominence >= minimum)
    }
}

pub struct WorldGraph {
    entities: BTreeMap<EntityId, HardState>,
    relationships: Vec<Relationship>,
    relationship_index: AHashSet<RelationshipIndexKey>,
    relationship_categories: BTreeMap<String, String>,
    pressures: BTreeMap<String, f64>,
    history: Vec<HistoryEvent>,
    tick: u64,
    epoch: u32,
    era_id: String,
    next_id: u64,
    namer: Option<Box<dyn NameGenerator>>,
    settings: GraphSettings,
    overlap_warnings: u32,
}

impl std::fmt::Debug for WorldGraph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorldGraph")
            .field("entities", &self.entities.len())
            .field("relationships", &self.relationships.len())
            .field("tick", &self.tick)
            .field("epoch", &self.epoch)
            .field("era_id", &self.era_id)
            .finish()
    }
}

impl Default for WorldGraph {
    fn default() -> Self {
        Self::new(GraphSettings::default(), None)
    }
}

impl WorldGraph {
    pub fn new(settings: GraphSettings, namer: Option<Box<dyn NameGenerator>>) -> Self {
        Self {
            entities: BTreeMap::new(),
            relationships: Vec::new(),
            relationship_index: AHashSet::new(),
            relationship_categories: BTreeMap::new(),
            pressures: BTreeMap::new(),
            history: Vec::new(),
            tick: 0,
            epoch: 0,
            era_id: String::new(),
            next_id: 0,
            namer,
            settings,
            overlap_warnings: 0,
        }
    }

    pub fn has_name_generator(&self) -> bool {
        self.namer.is_some()
    }

    /// Default relationship categories, keyed by relationship kind.
    pub fn with_relationship_categories(mut self, categories: BTreeMap<String, String>) -> Self {
        self.relationship_categories = categories;
        self
    }

    // ---------------------------------------------------------------------
    // Entities
    // ---------------------------------------------------------------------

    /// Create an entity. Coordinates are checked first, then tags are
    /// attached, then a name is resolved (explicit or generated).
    pub fn create_entity(&mut self, draft: EntityDraft) -> Result<EntityId, GraphError> {
        let EntityDraft {
            kind,
            subtype,
            name,
            description,
            status,
            prominence,
            culture,
            tags,
            coordinates,
            temporal,
        } = draft;

        let Some(coordinates) = coordinates else {
            return Err(GraphError::MissingCoordinates { kind });
        };
        self.check_overlap(&kind, &coordinates);

        let name = match name.filter(|name| !name.trim().is_empty()) {
            Some(name) => name,
            None => self.generate_name(&kind, &subtype, prominence, &tags, culture.as_deref())?,
        };

        let id = self.allocate_id(&kind);
        let entity = HardState {
            id: id.clone(),
            kind,
            subtype,
            name,
            description,
            status,
            prominence,
            culture,
            tags,
            links: Vec::new(),
            coordinates,
            temporal: temporal.or(Some(TemporalRange {
                start_tick: self.tick,
                end_tick: None,
            })),
            created_at: self.tick,
            updated_at: self.tick,
        };
        self.entities.insert(id.clone(), entity);
        Ok(id)
    }

    /// Insert a fully formed entity, keeping its id. Used for world seeds.
    pub fn insert_seed_entity(&mut self, mut entity: HardState) -> Result<(), GraphError> {
        if self.entities.contains_key(&entity.id) {
            return Err(GraphError::DuplicateEntity { id: entity.id });
        }
        entity.links.clear();
        self.entities.insert(entity.id.clone(), entity);
        Ok(())
    }

    pub fn update_entity(&mut self, id: &EntityId, patch: EntityPatch) -> bool {
        let tick = self.tick;
        let Some(entity) = self.entities.get_mut(id) else {
            return false;
        };
        if let Some(name) = patch.name {
            entity.name = name;
        }
        if let Some(description) = patch.description {
            entity.description = description;
        }
        if let Some(status) = patch.status {
            entity.status = status;
        }
        if let Some(prominence) = patch.prominence {
            entity.prominence = prominence;
        }
        if let Some(culture) = patch.culture {
            entity.culture = Some(culture);
        }
        if let Some(coordinates) = patch.coordinates {
            entity.coordinates = coordinates;
        }
        for tag in &patch.remove_tags {
            entity.tags.remove(tag);
        }
        entity.tags.extend(patch.set_tags);
        if let Some(end_tick) = patch.end_tick {
            let start_tick = entity
                .temporal
                .map(|range| range.start_tick)
                .unwrap_or(entity.created_at);
            entity.temporal = Some(TemporalRange {
                start_tick,
                end_tick: Some(end_tick),
            });
        }
        entity.updated_at = tick;
        true
    }

    pub fn entity(&self, id: &EntityId) -> Option<HardState> {
        self.entities.get(id).cloned()
    }

    pub fn contains(&self, id: &EntityId) -> bool {
        self.entities.contains_key(id)
    }

    pub fn entities(&self) -> Vec<HardState> {
        self.entities.values().cloned().collect()
    }

    pub fn entity_ids(&self) -> Vec<EntityId> {
        self.entities.keys().cloned().collect()
    }

    pub fn find_entities(&self, filter: &EntityFilter) -> Vec<HardState> {
        self.entities
            .values()
            .filter(|entity| filter.matches(entity))
            .cloned()
            .collect()
    }

    pub fn count_entities(&self, filter: &EntityFilter) -> usize {
        self.entities
            .values()
            .filter(|entity| filter.matches(entity))
            .count()
    }

    pub fn entity_count(&self) -> usize {
        self.entities.len()
    }

    /// Same-kind entities closer than the overlap radius trigger a warning
    /// but never block creation.
    pub fn overlap_warnings(&self) -> u32 {
        self.overlap_warnings
    }

    // ---------------------------------------------------------------------
    // Relationships
    // ---------------------------------------------------------------------

    /// Returns false without mutating anything when an endpoint is missing or
    /// the `(kind, src, dst)` triple already exists.
    pub fn add_relationship(&mut self, relationship: NewRelationship) -> bool {
        let NewRelationship {
            kind,
            src,
            dst,
            strength,
            distance,
            category,
        } = relationship;

        if !self.entities.contains_key(&src) || !self.entities.contains_key(&dst) {
            return false;
        }
        let key = (kind.clone(), src.clone(), dst.clone());
        if self.relationship_index.contains(&key) {
            return false;
        }

        let strength = strength
            .filter(|value| value.is_finite())
            .unwrap_or(DEFAULT_RELATIONSHIP_STRENGTH)
            .clamp(0.0, 1.0);
        let category = category.or_else(|| self.relationship_categories.get(&kind).cloned());
        let relationship = Relationship {
            kind,
            src,
            dst,
            strength,
            distance,
            category,
            status: RelationshipStatus::Active,
            created_at: self.tick,
        };

        let tick = self.tick;
        if let Some(source) = self.entities.get_mut(&relationship.src) {
            source.links.push(relationship.clone());
            source.updated_at = tick;
        }
        self.relationship_index.insert(key);
        self.relationships.push(relationship);
        true
    }

    pub fn remove_relationship(&mut self, kind: &str, src: &EntityId, dst: &EntityId) -> bool {
        let key = (kind.to_string(), src.clone(), dst.clone());
        if !self.relationship_index.remove(&key) {
            return false;
        }
        self.relationships
            .retain(|relationship| !relationship.matches(kind, src, dst));
        if let Some(source) = self.entities.get_mut(src) {
            source.links.retain(|link| !link.matches(kind, src, dst));
        }
        true
    }

    /// Flip a relationship to historical, keeping it in the record.
    pub fn archive_relationship(&mut self, kind: &str, src: &EntityId, dst: &EntityId) -> bool {
        let Some(relationship) = self
            .relationships
            .iter_mut()
            .find(|relationship| relationship.matches(kind, src, dst))
        else {
            return false;
        };
        relationship.status = RelationshipStatus::Historical;
        if let Some(source) = self.entities.get_mut(src) {
            for link in source.links.iter_mut() {
                if link.matches(kind, src, dst) {
                    link.status = RelationshipStatus::Historical;
                }
            }
        }
        true
    }

    pub fn set_relationship_strength(
        &mut self,
        kind: &str,
        src: &EntityId,
        dst: &EntityId,
        strength: f64,
    ) -> bool {
        if !strength.is_finite() {
            return false;
        }
        let strength = strength.clamp(0.0, 1.0);
        let Some(relationship) = self
            .relationships
            .iter_mut()
            .find(|relationship| relationship.matches(kind, src, dst))
        else {
            return false;
        };
        relationship.strength = strength;
        if let Some(source) = self.entities.get_mut(src) {
            for link in source.links.iter_mut() {
                if link.matches(kind, src, dst) {
                    link.strength = strength;
                }
            }
        }
        true
    }

    /// Bulk replacement of the canonical relationship list.
    ///
    /// Per-entity link caches are NOT rebuilt; call [`WorldGraph::rebuild_links`]
    /// for the entities whose caches must reflect the new list. Duplicate
    /// triples and dangling endpoints are dropped.
    pub fn replace_relationships(&mut self, relationships: Vec<Relationship>) {
        self.relationship_index.clear();
        self.relationships.clear();
        for relationship in relationships {
            if !self.entities.contains_key(&relationship.src)
                || !self.entities.contains_key(&relationship.dst)
            {
                continue;
            }
            let key = (
                relationship.kind.clone(),
                relationship.src.clone(),
                relationship.dst.clone(),
            );
            if self.relationship_index.insert(key) {
                self.relationships.push(relationship);
            }
        }
    }

    pub fn rebuild_links(&mut self, ids: &[EntityId]) {
        for id in ids {
            let links: Vec<Relationship> = self
                .relationships
                .iter()
                .filter(|relationship| &relationship.src == id)
                .cloned()
                .collect();
            if let Some(entity) = self.entities.get_mut(id) {
                entity.links = links;
            }
        }
    }

    pub fn has_relationship(&self, kind: &str, src: &EntityId, dst: &EntityId) -> bool {
        self.relationship_index
            .contains(&(kind.to_string(), src.clone(), dst.clone()))
    }

    /// Active relationship of `kind` between the two entities in either
    /// direction.
    pub fn has_active_link_between(&self, kind: &str, a: &EntityId, b: &EntityId) -> bool {
        self.relationships.iter().any(|relationship| {
            relationship.is_active()
                && relationship.kind == kind
                && ((&relationship.src == a && &relationship.dst == b)
                    || (&relationship.src == b && &relationship.dst == a))
        })
    }

    pub fn relationships(&self) -> Vec<Relationship> {
        self.relationships.clone()
    }

    pub fn active_relationships(&self) -> Vec<Relationship> {
        self.relationships
            .iter()
            .filter(|relationship| relationship.is_active())
            .cloned()
            .collect()
    }

    /// Active relationships touching `id` in either direction.
    pub fn relationships_of(&self, id: &EntityId) -> Vec<Relationship> {
        self.relationships
            .iter()
            .filter(|relationship| relationship.is_active() && relationship.touches(id))
            .cloned()
            .collect()
    }

    pub fn connection_count(&self, id: &EntityId) -> usize {
        self.relationships
            .iter()
            .filter(|relationship| relationship.is_active() && relationship.touches(id))
            .count()
    }

    pub fn relationship_count(&self) -> usize {
        self.relationships.len()
    }

    pub fn count_relationships(&self, kind: &str) -> usize {
        self.relationships
            .iter()
            .filter(|relationship| relationship.is_active() && relationship.kind == kind)
            .count()
    }

    // ---------------------------------------------------------------------
    // Pressures, clock and history
    // ---------------------------------------------------------------------

    pub fn pressure(&self, id: &str) -> f64 {
        self.pressures.get(id).copied().unwrap_or(0.0)
    }

    pub fn pressures(&self) -> BTreeMap<String, f64> {
        self.pressures.clone()
    }

    /// Values are clamped to [0, 100].
    pub fn set_pressure(&mut self, id: &str, value: f64) {
        let value = if value.is_finite() {
            value.clamp(0.0, 100.0)
        } else {
            0.0
        };
        self.pressures.insert(id.to_string(), value);
    }

    pub fn adjust_pressure(&mut self, id: &str, delta: f64) {
        let current = self.pressure(id);
        self.set_pressure(id, current + delta);
    }

    pub fn tick(&self) -> u64 {
        self.tick
    }

    pub fn advance_tick(&mut self) {
        self.tick += 1;
    }

    pub fn epoch(&self) -> u32 {
        self.epoch
    }

    pub(crate) fn set_epoch(&mut self, epoch: u32) {
        self.epoch = epoch;
    }

    pub fn era_id(&self) -> &str {
        &self.era_id
    }

    pub(crate) fn set_era(&mut self, era_id: &str) {
        self.era_id = era_id.to_string();
    }

    pub fn record_event(&mut self, event: HistoryEvent) {
        self.history.push(event);
    }

    pub fn history(&self) -> Vec<HistoryEvent> {
        self.history.clone()
    }

    pub fn history_len(&self) -> usize {
        self.history.len()
    }

    // ---------------------------------------------------------------------
    // Crate-internal borrowing views for measurement passes. These never
    // escape the crate.
    // ---------------------------------------------------------------------

    pub(crate) fn iter_entities(&self) -> impl Iterator<Item = &HardState> {
        self.entities.values()
    }

    pub(crate) fn iter_relationships(&self) -> impl Iterator<Item = &Relationship> {
        self.relationships.iter()
    }

    pub(crate) fn entity_ref(&self, id: &EntityId) -> Option<&HardState> {
        self.entities.get(id)
    }

    fn allocate_id(&mut self, kind: &str) -> EntityId {
        loop {
            self.next_id += 1;
            let candidate = EntityId(format!("{kind}_{}", self.next_id));
            if !self.entities.contains_key(&candidate) {
                return candidate;
            }
        }
    }

    fn check_overlap(&mut self, kind: &str, coordinates: &Point) {
        let radius = self.settings.coordinate_overlap_radius;
        if radius <= 0.0 {
            return;
        }
        let overlapping = self
            .entities
            .values()
            .find(|entity| entity.kind == kind && entity.coordinates.distance(coordinates) < radius)
            .map(|entity| entity.id.clone());
        if let Some(existing) = overlapping {
            self.overlap_warnings += 1;
            warn!(
                target: "worldgen::graph",
                kind,
                existing = %existing,
                radius,
                "entity.coordinate_overlap"
            );
        }
    }

    fn generate_name(
        &self,
        kind: &str,
        subtype: &str,
        prominence: Prominence,
        tags: &Tags,
        culture: Option<&str>,
    ) -> Result<String, GraphError> {
        let Some(namer) = &self.namer else {
            return Err(GraphError::NameUnavailable {
                kind: kind.to_string(),
            });
        };
        let request = NameRequest {
            kind,
            subtype,
            prominence,
            tags,
            culture,
            context: None,
        };
        match namer.generate(&request) {
            Ok(name) => Ok(name),
            Err(err) => {
                warn!(
                    target: "worldgen::graph",
                    kind,
                    subtype,
                    error = %err,
                    "entity.name_generation_failed"
                );
                Ok(format!("unnamed {kind}"))
            }
        }
    }
}
