//! Simulation systems for the Reach. Systems return proposals; the engine
//! applies them, enforces the per-tick relationship budget and archives what
//! systems end.

use std::collections::{BTreeMap, BTreeSet};

use rand::rngs::SmallRng;
use rand::Rng;
use world_core::{
    ComponentError, EntityFilter, EntityPatch, NewRelationship, SimulationSystem, SystemResult,
    WorldGraph,
};
use world_schema::{ComponentContract, EntityId, HardState, RelationshipKey, SystemMetadata};

use crate::catalog::{ComponentCatalog, SystemSpec};

type Pair = (EntityId, EntityId);

/// Unordered key so `(a, b)` and `(b, a)` collide.
fn pair(a: &EntityId, b: &EntityId) -> Pair {
    if a <= b {
        (a.clone(), b.clone())
    } else {
        (b.clone(), a.clone())
    }
}

fn active_factions(graph: &WorldGraph) -> Vec<HardState> {
    graph.find_entities(&EntityFilter::kind("faction").with_status("active"))
}

/// Symmetric adjacency of active relationships of `kind`.
fn links_of_kind(graph: &WorldGraph, kind: &str) -> BTreeMap<EntityId, BTreeSet<EntityId>> {
    let mut links: BTreeMap<EntityId, BTreeSet<EntityId>> = BTreeMap::new();
    for relationship in graph.active_relationships() {
        if relationship.kind != kind {
            continue;
        }
        links
            .entry(relationship.src.clone())
            .or_default()
            .insert(relationship.dst.clone());
        links
            .entry(relationship.dst)
            .or_default()
            .insert(relationship.src);
    }
    links
}

fn linked(links: &BTreeMap<EntityId, BTreeSet<EntityId>>, a: &EntityId, b: &EntityId) -> bool {
    links.get(a).is_some_and(|set| set.contains(b))
}

/// Picks a direction for a new symmetric link that the graph has never held
/// in either orientation. Archived links keep their triple, so a pair that
/// already had this kind of link in both directions cannot get another.
fn free_direction(graph: &WorldGraph, kind: &str, a: &EntityId, b: &EntityId) -> Option<Pair> {
    if !graph.has_relationship(kind, a, b) {
        Some((a.clone(), b.clone()))
    } else if !graph.has_relationship(kind, b, a) {
        Some((b.clone(), a.clone()))
    } else {
        None
    }
}

macro_rules! system_spec_accessors {
    () => {
        fn name(&self) -> &str {
            self.spec.name.as_deref().unwrap_or(Self::ID)
        }

        fn metadata(&self) -> Option<&SystemMetadata> {
            self.spec.metadata.as_ref()
        }

        fn contract(&self) -> Option<&ComponentContract> {
            self.spec.contract.as_ref()
        }
    };
}

/// Factions that share an enemy may ally. Each ordered pair gets one roll per
/// tick, and a pair never holds more than one alliance.
pub struct AllianceFormation {
    spec: SystemSpec,
    base_chance: f64,
    conflict_relief: f64,
}

impl AllianceFormation {
    pub const ID: &'static str = "alliance_formation";

    pub fn new(catalog: &ComponentCatalog) -> Self {
        let spec = catalog.system(Self::ID);
        Self {
            base_chance: spec.parameter("alliance_base_chance", 0.5),
            conflict_relief: spec.parameter("conflict_relief", 1.0),
            spec,
        }
    }
}

impl SimulationSystem for AllianceFormation {
    fn id(&self) -> &str {
        Self::ID
    }

    system_spec_accessors!();

    fn apply(
        &self,
        graph: &WorldGraph,
        modifier: f64,
        rng: &mut SmallRng,
    ) -> Result<SystemResult, ComponentError> {
        let factions = active_factions(graph);
        let wars = links_of_kind(graph, "at_war_with");
        let alliances = links_of_kind(graph, "allied_with");
        let chance = (self.base_chance * modifier).clamp(0.0, 1.0);

        let mut result = SystemResult::default();
        let mut pending: BTreeSet<Pair> = BTreeSet::new();
        for a in &factions {
            for b in &factions {
                if a.id == b.id {
                    continue;
                }
                let key = pair(&a.id, &b.id);
                if pending.contains(&key)
                    || linked(&alliances, &a.id, &b.id)
                    || linked(&wars, &a.id, &b.id)
                {
                    continue;
                }
                let (Some(enemies_a), Some(enemies_b)) = (wars.get(&a.id), wars.get(&b.id)) else {
                    continue;
                };
                if enemies_a.is_disjoint(enemies_b) {
                    continue;
                }
                let Some((src, dst)) = free_direction(graph, "allied_with", &a.id, &b.id) else {
                    continue;
                };
                if rng.gen_bool(chance) {
                    pending.insert(key);
                    result
                        .relationships_added
                        .push(NewRelationship::new("allied_with", src, dst).with_strength(0.7));
                }
            }
        }

        if !result.relationships_added.is_empty() {
            let formed = result.relationships_added.len();
            result
                .pressure_changes
                .insert("conflict".to_string(), -self.conflict_relief * formed as f64);
            result.description = format!("{formed} alliances formed against common enemies");
        }
        Ok(result)
    }
}

/// Wars spread to the allies of the defender, break out at random in
/// proportion to conflict pressure, and sometimes end.
pub struct ConflictContagion {
    spec: SystemSpec,
    spread_chance: f64,
    outbreak_chance: f64,
    max_outbreaks: usize,
    peace_chance: f64,
    conflict_per_war: f64,
}

impl ConflictContagion {
    pub const ID: &'static str = "conflict_contagion";

    pub fn new(catalog: &ComponentCatalog) -> Self {
        let spec = catalog.system(Self::ID);
        Self {
            spread_chance: spec.parameter("spread_chance", 0.35),
            outbreak_chance: spec.parameter("outbreak_chance", 0.01),
            max_outbreaks: spec.parameter("max_outbreaks_per_tick", 2.0).max(0.0) as usize,
            peace_chance: spec.parameter("peace_chance", 0.05),
            conflict_per_war: spec.parameter("conflict_per_war", 0.5),
            spec,
        }
    }
}

impl SimulationSystem for ConflictContagion {
    fn id(&self) -> &str {
        Self::ID
    }

    system_spec_accessors!();

    fn apply(
        &self,
        graph: &WorldGraph,
        modifier: f64,
        rng: &mut SmallRng,
    ) -> Result<SystemResult, ComponentError> {
        let wars = links_of_kind(graph, "at_war_with");
        let alliances = links_of_kind(graph, "allied_with");
        let mut result = SystemResult::default();
        let mut pending: BTreeSet<Pair> = BTreeSet::new();

        let blocked = |pending: &BTreeSet<Pair>, a: &EntityId, b: &EntityId| {
            a == b
                || pending.contains(&pair(a, b))
                || linked(&wars, a, b)
                || linked(&alliances, a, b)
        };

        let spread = (self.spread_chance * modifier).clamp(0.0, 1.0);
        let active_wars: Vec<_> = graph
            .active_relationships()
            .into_iter()
            .filter(|relationship| relationship.kind == "at_war_with")
            .collect();
        for war in &active_wars {
            let Some(allies) = alliances.get(&war.dst) else {
                continue;
            };
            for ally in allies {
                if blocked(&pending, &war.src, ally) {
                    continue;
                }
                let Some((src, dst)) = free_direction(graph, "at_war_with", &war.src, ally) else {
                    continue;
                };
                if rng.gen_bool(spread) {
                    pending.insert(pair(&src, &dst));
                    result
                        .relationships_added
                        .push(NewRelationship::new("at_war_with", src, dst).with_strength(0.6));
                }
            }
        }

        let pressure = graph.pressure("conflict") / 50.0;
        let outbreak = (self.outbreak_chance * modifier * pressure).clamp(0.0, 1.0);
        let factions = active_factions(graph);
        let mut outbreaks = 0;
        'outer: for (index, a) in factions.iter().enumerate() {
            for b in &factions[index + 1..] {
                if outbreaks >= self.max_outbreaks {
                    break 'outer;
                }
                if blocked(&pending, &a.id, &b.id) {
                    continue;
                }
                let Some((src, dst)) = free_direction(graph, "at_war_with", &a.id, &b.id) else {
                    continue;
                };
                if rng.gen_bool(outbreak) {
                    pending.insert(pair(&src, &dst));
                    outbreaks += 1;
                    result
                        .relationships_added
                        .push(NewRelationship::new("at_war_with", src, dst).with_strength(0.5));
                }
            }
        }

        let peace = self.peace_chance.clamp(0.0, 1.0);
        for war in active_wars {
            if rng.gen_bool(peace) {
                result.relationships_ended.push(RelationshipKey {
                    kind: war.kind,
                    src: war.src,
                    dst: war.dst,
                });
            }
        }

        let declared = result.relationships_added.len();
        if declared > 0 {
            result
                .pressure_changes
                .insert("conflict".to_string(), self.conflict_per_war * declared as f64);
        }
        if !result.is_empty() {
            result.description = format!(
                "{declared} wars declared, {} ended",
                result.relationships_ended.len()
            );
        }
        Ok(result)
    }
}

/// Well-connected entities gain prominence; isolated ones fade.
pub struct ProminenceEvolution {
    spec: SystemSpec,
    promote_connections: usize,
    demote_connections: usize,
    change_chance: f64,
}

impl ProminenceEvolution {
    pub const ID: &'static str = "prominence_evolution";
    const KINDS: [&'static str; 3] = ["npc", "faction", "location"];

    pub fn new(catalog: &ComponentCatalog) -> Self {
        let spec = catalog.system(Self::ID);
        Self {
            promote_connections: spec.parameter("promote_connections", 5.0).max(0.0) as usize,
            demote_connections: spec.parameter("demote_connections", 1.0).max(0.0) as usize,
            change_chance: spec.parameter("change_chance", 0.15),
            spec,
        }
    }
}

impl SimulationSystem for ProminenceEvolution {
    fn id(&self) -> &str {
        Self::ID
    }

    system_spec_accessors!();

    fn apply(
        &self,
        graph: &WorldGraph,
        modifier: f64,
        rng: &mut SmallRng,
    ) -> Result<SystemResult, ComponentError> {
        let mut connections: BTreeMap<EntityId, usize> = BTreeMap::new();
        for relationship in graph.active_relationships() {
            *connections.entry(relationship.src).or_default() += 1;
            *connections.entry(relationship.dst).or_default() += 1;
        }
        let chance = (self.change_chance * modifier).clamp(0.0, 1.0);

        let mut result = SystemResult::default();
        let (mut promoted, mut demoted) = (0, 0);
        for entity in graph.entities() {
            if !Self::KINDS.iter().any(|kind| *kind == entity.kind) {
                continue;
            }
            let degree = connections.get(&entity.id).copied().unwrap_or(0);
            let next = if degree >= self.promote_connections {
                entity.prominence.promote()
            } else if degree <= self.demote_connections {
                entity.prominence.demote()
            } else {
                continue;
            };
            if next == entity.prominence || !rng.gen_bool(chance) {
                continue;
            }
            if next > entity.prominence {
                promoted += 1;
            } else {
                demoted += 1;
            }
            result.entities_modified.push((
                entity.id,
                EntityPatch {
                    prominence: Some(next),
                    ..Default::default()
                },
            ));
        }
        if !result.is_empty() {
            result.description = format!("{promoted} rose in prominence, {demoted} faded");
        }
        Ok(result)
    }
}

/// Living neighbours in the same settlement become friends.
pub struct FriendshipFormation {
    spec: SystemSpec,
    chance: f64,
    max_per_tick: usize,
}

impl FriendshipFormation {
    pub const ID: &'static str = "friendship_formation";

    pub fn new(catalog: &ComponentCatalog) -> Self {
        let spec = catalog.system(Self::ID);
        Self {
            chance: spec.parameter("friendship_chance", 0.1),
            max_per_tick: spec.parameter("max_per_tick", 6.0).max(0.0) as usize,
            spec,
        }
    }
}

impl SimulationSystem for FriendshipFormation {
    fn id(&self) -> &str {
        Self::ID
    }

    system_spec_accessors!();

    fn apply(
        &self,
        graph: &WorldGraph,
        modifier: f64,
        rng: &mut SmallRng,
    ) -> Result<SystemResult, ComponentError> {
        let alive: BTreeSet<EntityId> = graph
            .find_entities(&EntityFilter::kind("npc").with_status("alive"))
            .into_iter()
            .map(|npc| npc.id)
            .collect();
        let mut households: BTreeMap<EntityId, Vec<EntityId>> = BTreeMap::new();
        for relationship in graph.active_relationships() {
            if relationship.kind == "resident_of" && alive.contains(&relationship.src) {
                households
                    .entry(relationship.dst)
                    .or_default()
                    .push(relationship.src);
            }
        }
        let friends = links_of_kind(graph, "friend_of");
        let chance = (self.chance * modifier).clamp(0.0, 1.0);

        let mut result = SystemResult::default();
        'outer: for residents in households.values() {
            for (index, a) in residents.iter().enumerate() {
                for b in &residents[index + 1..] {
                    if result.relationships_added.len() >= self.max_per_tick {
                        break 'outer;
                    }
                    if a == b || linked(&friends, a, b) {
                        continue;
                    }
                    let Some((src, dst)) = free_direction(graph, "friend_of", a, b) else {
                        continue;
                    };
                    if rng.gen_bool(chance) {
                        let strength = rng.gen_range(0.3..0.7);
                        result
                            .relationships_added
                            .push(NewRelationship::new("friend_of", src, dst).with_strength(strength));
                    }
                }
            }
        }
        if !result.relationships_added.is_empty() {
            result.description = format!(
                "{} friendships formed between neighbours",
                result.relationships_added.len()
            );
        }
        Ok(result)
    }
}
