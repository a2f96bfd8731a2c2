//! Growth templates for the Reach. Each one reads the graph, picks what to
//! build around its target and returns drafts; names come from the injected
//! name generator.

use rand::rngs::SmallRng;
use rand::seq::SliceRandom;
use rand::Rng;
use world_core::{
    ComponentError, EntityDraft, EntityFilter, EntityRef, GrowthTemplate, RelationshipDraft,
    TemplateResult, WorldGraph,
};
use world_schema::{
    flag_tags, ComponentContract, EntityId, HardState, Point, Prominence, TemplateMetadata,
};

use crate::catalog::{ComponentCatalog, TemplateSpec};
use crate::CULTURES;

const MAP_EXTENT: f64 = 100.0;

fn random_point(rng: &mut SmallRng) -> Point {
    Point::new(
        rng.gen_range(0.0..MAP_EXTENT),
        rng.gen_range(0.0..MAP_EXTENT),
        0.0,
    )
}

/// A point between `min` and `max` away from `origin`, kept on the map.
pub(crate) fn near(origin: &Point, min: f64, max: f64, rng: &mut SmallRng) -> Point {
    let angle = rng.gen_range(0.0..std::f64::consts::TAU);
    let radius = rng.gen_range(min..max);
    Point::new(
        (origin.x + radius * angle.cos()).clamp(0.0, MAP_EXTENT),
        (origin.y + radius * angle.sin()).clamp(0.0, MAP_EXTENT),
        origin.z,
    )
}

fn random_culture(rng: &mut SmallRng) -> String {
    CULTURES
        .choose(rng)
        .copied()
        .unwrap_or(CULTURES[0])
        .to_string()
}

struct Sketch<'a> {
    kind: &'a str,
    subtype: &'a str,
    status: &'a str,
    prominence: Prominence,
    culture: Option<&'a str>,
    tags: Vec<&'a str>,
    at: Point,
    description: String,
}

impl Sketch<'_> {
    fn into_draft(self) -> EntityDraft {
        let mut tags = self.tags;
        if let Some(culture) = self.culture {
            tags.push(culture);
        }
        let mut draft = EntityDraft::new(self.kind, self.subtype);
        draft.status = self.status.to_string();
        draft.prominence = self.prominence;
        draft.culture = self.culture.map(str::to_string);
        draft.tags = flag_tags(tags);
        draft.coordinates = Some(self.at);
        draft.description = self.description;
        draft
    }
}

fn thriving_settlements(graph: &WorldGraph) -> Vec<HardState> {
    graph.find_entities(
        &EntityFilter::kind("location")
            .with_subtype("settlement")
            .with_status("thriving"),
    )
}

/// Living npcs whose `resident_of` points at `location`.
fn residents(graph: &WorldGraph, location: &EntityId) -> Vec<HardState> {
    graph
        .relationships_of(location)
        .into_iter()
        .filter(|relationship| relationship.kind == "resident_of" && &relationship.dst == location)
        .filter_map(|relationship| graph.entity(&relationship.src))
        .filter(|npc| npc.status == "alive")
        .collect()
}

fn leads_something(graph: &WorldGraph, npc: &EntityId) -> bool {
    graph
        .relationships_of(npc)
        .iter()
        .any(|relationship| relationship.kind == "leader_of" && &relationship.src == npc)
}

fn require_target<'a>(id: &str, target: Option<&'a HardState>) -> Result<&'a HardState, ComponentError> {
    target.ok_or_else(|| ComponentError::NoTarget {
        component: id.to_string(),
    })
}

/// Founds a settlement, optionally next to an existing one, with one or two
/// first residents.
pub struct SettlementFounding {
    spec: TemplateSpec,
}

impl SettlementFounding {
    pub const ID: &'static str = "settlement_founding";

    pub fn new(catalog: &ComponentCatalog) -> Self {
        Self {
            spec: catalog.template(Self::ID),
        }
    }
}

impl GrowthTemplate for SettlementFounding {
    fn id(&self) -> &str {
        Self::ID
    }

    fn name(&self) -> &str {
        self.spec.name.as_deref().unwrap_or(Self::ID)
    }

    fn metadata(&self) -> Option<&TemplateMetadata> {
        self.spec.metadata.as_ref()
    }

    fn contract(&self) -> Option<&ComponentContract> {
        self.spec.contract.as_ref()
    }

    fn can_apply(&self, _graph: &WorldGraph) -> bool {
        true
    }

    fn find_targets(&self, graph: &WorldGraph) -> Vec<HardState> {
        thriving_settlements(graph)
    }

    fn expand(
        &self,
        _graph: &WorldGraph,
        target: Option<&HardState>,
        rng: &mut SmallRng,
    ) -> Result<TemplateResult, ComponentError> {
        let culture = match target.and_then(|t| t.culture.clone()) {
            Some(culture) if rng.gen_bool(0.7) => culture,
            _ => random_culture(rng),
        };
        let center = match target {
            Some(origin) => near(&origin.coordinates, 8.0, 20.0, rng),
            None => random_point(rng),
        };
        let economies: &[&str] = match culture.as_str() {
            "coastal" => &["port", "trade", "fortified"],
            "highland" => &["fortified", "trade", "farming"],
            _ => &["farming", "trade"],
        };
        let economy = economies.choose(rng).copied().unwrap_or("farming");

        let mut result = TemplateResult::default();
        result.entities.push(
            Sketch {
                kind: "location",
                subtype: "settlement",
                status: "thriving",
                prominence: Prominence::Marginal,
                culture: Some(culture.as_str()),
                tags: vec!["settlement", economy],
                at: center,
                description: format!("A {economy} settlement of the {culture} folk."),
            }
            .into_draft(),
        );

        let founders = rng.gen_range(1..=2);
        for index in 1..=founders {
            let mut tags = vec!["person", "common", "founder"];
            if rng.gen_bool(0.3) {
                tags.push("peaceful");
            }
            result.entities.push(
                Sketch {
                    kind: "npc",
                    subtype: "commoner",
                    status: "alive",
                    prominence: Prominence::Marginal,
                    culture: Some(culture.as_str()),
                    tags,
                    at: near(&center, 0.8, 3.0, rng),
                    description: "One of the first to settle here.".to_string(),
                }
                .into_draft(),
            );
            result.relationships.push(
                RelationshipDraft::new("resident_of", EntityRef::Draft(index), EntityRef::Draft(0))
                    .with_strength(0.8),
            );
        }

        if let Some(origin) = target {
            let distance = (center.distance(&origin.coordinates) / MAP_EXTENT).clamp(0.0, 1.0);
            result.relationships.push(
                RelationshipDraft::new("adjacent_to", EntityRef::Draft(0), origin.id.clone())
                    .with_strength(0.5)
                    .with_distance(distance),
            );
            result.description = format!(
                "{culture} settlers found a {economy} settlement near {}",
                origin.name
            );
        } else {
            result.description = format!("{culture} settlers found a {economy} settlement");
        }
        Ok(result)
    }
}

/// A faction takes control of a settlement, led by one of its residents or by
/// a newcomer when nobody is free to lead.
pub struct FactionRise {
    spec: TemplateSpec,
}

impl FactionRise {
    pub const ID: &'static str = "faction_rise";

    pub fn new(catalog: &ComponentCatalog) -> Self {
        Self {
            spec: catalog.template(Self::ID),
        }
    }
}

impl GrowthTemplate for FactionRise {
    fn id(&self) -> &str {
        Self::ID
    }

    fn name(&self) -> &str {
        self.spec.name.as_deref().unwrap_or(Self::ID)
    }

    fn metadata(&self) -> Option<&TemplateMetadata> {
        self.spec.metadata.as_ref()
    }

    fn contract(&self) -> Option<&ComponentContract> {
        self.spec.contract.as_ref()
    }

    fn can_apply(&self, graph: &WorldGraph) -> bool {
        !thriving_settlements(graph).is_empty()
    }

    fn find_targets(&self, graph: &WorldGraph) -> Vec<HardState> {
        thriving_settlements(graph)
    }

    fn expand(
        &self,
        graph: &WorldGraph,
        target: Option<&HardState>,
        rng: &mut SmallRng,
    ) -> Result<TemplateResult, ComponentError> {
        let seat = require_target(Self::ID, target)?;
        let subtype = if seat.has_tag("trade") || seat.has_tag("port") {
            "company"
        } else if rng.gen_bool(0.3) {
            "cult"
        } else {
            "guild"
        };
        let temperament = match subtype {
            "company" => "mercantile",
            "cult" => *["devout", "secretive"].choose(rng).unwrap_or(&"devout"),
            _ => *["martial", "lawful"].choose(rng).unwrap_or(&"martial"),
        };
        let culture = seat.culture.as_deref();

        let mut result = TemplateResult::default();
        result.entities.push(
            Sketch {
                kind: "faction",
                subtype,
                status: "active",
                prominence: Prominence::Recognized,
                culture,
                tags: vec!["faction", temperament],
                at: near(&seat.coordinates, 1.0, 4.0, rng),
                description: format!("A {temperament} {subtype} based in {}.", seat.name),
            }
            .into_draft(),
        );
        result.relationships.push(
            RelationshipDraft::new("controls", EntityRef::Draft(0), seat.id.clone())
                .with_strength(0.7),
        );

        let mut free: Vec<HardState> = residents(graph, &seat.id)
            .into_iter()
            .filter(|npc| !leads_something(graph, &npc.id))
            .collect();
        free.shuffle(rng);
        if let Some(leader) = free.pop() {
            result.relationships.push(
                RelationshipDraft::new("leader_of", leader.id.clone(), EntityRef::Draft(0))
                    .with_strength(0.9),
            );
            for member in free.into_iter().take(2) {
                result.relationships.push(
                    RelationshipDraft::new("member_of", member.id, EntityRef::Draft(0))
                        .with_strength(0.6),
                );
            }
            result.description = format!("{} rises to lead a new {subtype} in {}", leader.name, seat.name);
        } else {
            result.entities.push(
                Sketch {
                    kind: "npc",
                    subtype: "merchant",
                    status: "alive",
                    prominence: Prominence::Marginal,
                    culture,
                    tags: vec!["person", "mercantile"],
                    at: near(&seat.coordinates, 0.8, 3.0, rng),
                    description: format!("An outsider who came to {} with ambitions.", seat.name),
                }
                .into_draft(),
            );
            result.relationships.push(
                RelationshipDraft::new("resident_of", EntityRef::Draft(1), seat.id.clone())
                    .with_strength(0.5),
            );
            result.relationships.push(
                RelationshipDraft::new("leader_of", EntityRef::Draft(1), EntityRef::Draft(0))
                    .with_strength(0.9),
            );
            result.description = format!("a newcomer founds a {subtype} in {}", seat.name);
        }
        Ok(result)
    }
}

/// A hero appears in a settlement when conflict runs high, sometimes with a
/// rival among the existing heroes.
pub struct HeroEmergence {
    spec: TemplateSpec,
}

impl HeroEmergence {
    pub const ID: &'static str = "hero_emergence";

    pub fn new(catalog: &ComponentCatalog) -> Self {
        Self {
            spec: catalog.template(Self::ID),
        }
    }
}

impl GrowthTemplate for HeroEmergence {
    fn id(&self) -> &str {
        Self::ID
    }

    fn name(&self) -> &str {
        self.spec.name.as_deref().unwrap_or(Self::ID)
    }

    fn metadata(&self) -> Option<&TemplateMetadata> {
        self.spec.metadata.as_ref()
    }

    fn contract(&self) -> Option<&ComponentContract> {
        self.spec.contract.as_ref()
    }

    fn can_apply(&self, graph: &WorldGraph) -> bool {
        !thriving_settlements(graph).is_empty()
    }

    fn find_targets(&self, graph: &WorldGraph) -> Vec<HardState> {
        thriving_settlements(graph)
    }

    fn expand(
        &self,
        graph: &WorldGraph,
        target: Option<&HardState>,
        rng: &mut SmallRng,
    ) -> Result<TemplateResult, ComponentError> {
        let home = require_target(Self::ID, target)?;
        let temperament = if rng.gen_bool(0.7) { "martial" } else { "peaceful" };

        let mut result = TemplateResult::default();
        result.entities.push(
            Sketch {
                kind: "npc",
                subtype: "hero",
                status: "alive",
                prominence: Prominence::Recognized,
                culture: home.culture.as_deref(),
                tags: vec!["person", "heroic", temperament],
                at: near(&home.coordinates, 0.8, 3.0, rng),
                description: format!("A {temperament} champion of {}.", home.name),
            }
            .into_draft(),
        );
        result.relationships.push(
            RelationshipDraft::new("resident_of", EntityRef::Draft(0), home.id.clone())
                .with_strength(0.9),
        );

        let heroes = graph.find_entities(
            &EntityFilter::kind("npc")
                .with_subtype("hero")
                .with_status("alive"),
        );
        result.description = format!("a hero rises in {}", home.name);
        if let Some(rival) = heroes.choose(rng) {
            if rng.gen_bool(0.5) {
                result.relationships.push(
                    RelationshipDraft::new("rival_of", EntityRef::Draft(0), rival.id.clone())
                        .with_strength(0.6),
                );
                result.description = format!("a hero rises in {} to challenge {}", home.name, rival.name);
            }
        }
        Ok(result)
    }
}

/// An npc discovers a new art. Mystics and arcane-touched people tend toward
/// magic, everyone else toward techniques.
pub struct AbilityDiscovery {
    spec: TemplateSpec,
}

impl AbilityDiscovery {
    pub const ID: &'static str = "ability_discovery";

    pub fn new(catalog: &ComponentCatalog) -> Self {
        Self {
            spec: catalog.template(Self::ID),
        }
    }
}

impl GrowthTemplate for AbilityDiscovery {
    fn id(&self) -> &str {
        Self::ID
    }

    fn name(&self) -> &str {
        self.spec.name.as_deref().unwrap_or(Self::ID)
    }

    fn metadata(&self) -> Option<&TemplateMetadata> {
        self.spec.metadata.as_ref()
    }

    fn contract(&self) -> Option<&ComponentContract> {
        self.spec.contract.as_ref()
    }

    fn can_apply(&self, graph: &WorldGraph) -> bool {
        graph.count_entities(&EntityFilter::kind("npc").with_status("alive")) > 0
    }

    fn find_targets(&self, graph: &WorldGraph) -> Vec<HardState> {
        graph.find_entities(&EntityFilter::kind("npc").with_status("alive"))
    }

    fn expand(
        &self,
        _graph: &WorldGraph,
        target: Option<&HardState>,
        rng: &mut SmallRng,
    ) -> Result<TemplateResult, ComponentError> {
        let discoverer = require_target(Self::ID, target)?;
        let inclined = discoverer.subtype == "mystic" || discoverer.has_tag("arcane");
        let magic = rng.gen_bool(if inclined { 0.85 } else { 0.3 });
        let (subtype, flavour) = if magic {
            ("magic", "arcane")
        } else {
            ("technique", "martial")
        };

        let mut result = TemplateResult::default();
        result.entities.push(
            Sketch {
                kind: "ability",
                subtype,
                status: "known",
                prominence: Prominence::Marginal,
                culture: discoverer.culture.as_deref(),
                tags: vec!["lore", flavour],
                at: near(&discoverer.coordinates, 0.6, 2.0, rng),
                description: format!("First practised by {}.", discoverer.name),
            }
            .into_draft(),
        );
        result.relationships.push(
            RelationshipDraft::new("practitioner_of", discoverer.id.clone(), EntityRef::Draft(0))
                .with_strength(0.6),
        );
        result.description = format!("{} discovers a new {subtype}", discoverer.name);
        Ok(result)
    }
}

/// A faction writes down a law or custom and applies it in a settlement it
/// controls.
pub struct RuleCodification {
    spec: TemplateSpec,
}

impl RuleCodification {
    pub const ID: &'static str = "rule_codification";

    pub fn new(catalog: &ComponentCatalog) -> Self {
        Self {
            spec: catalog.template(Self::ID),
        }
    }
}

impl GrowthTemplate for RuleCodification {
    fn id(&self) -> &str {
        Self::ID
    }

    fn name(&self) -> &str {
        self.spec.name.as_deref().unwrap_or(Self::ID)
    }

    fn metadata(&self) -> Option<&TemplateMetadata> {
        self.spec.metadata.as_ref()
    }

    fn contract(&self) -> Option<&ComponentContract> {
        self.spec.contract.as_ref()
    }

    fn can_apply(&self, graph: &WorldGraph) -> bool {
        graph.count_entities(&EntityFilter::kind("faction").with_status("active")) > 0
    }

    fn find_targets(&self, graph: &WorldGraph) -> Vec<HardState> {
        graph.find_entities(&EntityFilter::kind("faction").with_status("active"))
    }

    fn expand(
        &self,
        graph: &WorldGraph,
        target: Option<&HardState>,
        rng: &mut SmallRng,
    ) -> Result<TemplateResult, ComponentError> {
        let faction = require_target(Self::ID, target)?;
        let strict = faction.has_tag("lawful") || faction.has_tag("martial");
        let subtype = if strict || rng.gen_bool(0.4) { "law" } else { "custom" };

        let mut result = TemplateResult::default();
        result.entities.push(
            Sketch {
                kind: "rule",
                subtype,
                status: "enacted",
                prominence: Prominence::Marginal,
                culture: faction.culture.as_deref(),
                tags: vec!["codified", "lawful"],
                at: near(&faction.coordinates, 0.6, 2.0, rng),
                description: format!("A {subtype} upheld by {}.", faction.name),
            }
            .into_draft(),
        );
        result.relationships.push(
            RelationshipDraft::new("enforced_by", EntityRef::Draft(0), faction.id.clone())
                .with_strength(0.8),
        );

        let domains: Vec<EntityId> = graph
            .relationships_of(&faction.id)
            .into_iter()
            .filter(|relationship| relationship.kind == "controls" && relationship.src == faction.id)
            .map(|relationship| relationship.dst)
            .collect();
        if let Some(location) = domains.choose(rng) {
            result.relationships.push(
                RelationshipDraft::new("applies_in", EntityRef::Draft(0), location.clone())
                    .with_strength(0.5),
            );
        }
        result.description = format!("{} codifies a new {subtype}", faction.name);
        Ok(result)
    }
}
