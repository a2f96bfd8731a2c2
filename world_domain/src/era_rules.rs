use rand::rngs::SmallRng;
use world_core::{ComponentError, EntityFilter, EntityPatch, EraRule, WorldGraph};
use world_schema::EntityId;

/// During the reckoning, settlements with no living residents are abandoned
/// and any faction control over them lapses.
pub struct SettlementAbandonment {
    era_id: String,
}

impl SettlementAbandonment {
    pub fn new(era_id: impl Into<String>) -> Self {
        Self {
            era_id: era_id.into(),
        }
    }
}

impl Default for SettlementAbandonment {
    fn default() -> Self {
        Self::new("reckoning")
    }
}

impl EraRule for SettlementAbandonment {
    fn era_id(&self) -> &str {
        &self.era_id
    }

    fn apply(
        &self,
        graph: &mut WorldGraph,
        _rng: &mut SmallRng,
    ) -> Result<Option<String>, ComponentError> {
        let settlements = graph.find_entities(
            &EntityFilter::kind("location")
                .with_subtype("settlement")
                .with_status("thriving"),
        );
        let mut abandoned: Vec<String> = Vec::new();
        for settlement in settlements {
            let relationships = graph.relationships_of(&settlement.id);
            let inhabited = relationships.iter().any(|relationship| {
                relationship.kind == "resident_of"
                    && relationship.dst == settlement.id
                    && graph
                        .entity(&relationship.src)
                        .is_some_and(|npc| npc.status == "alive")
            });
            if inhabited {
                continue;
            }
            graph.update_entity(
                &settlement.id,
                EntityPatch {
                    status: Some("abandoned".to_string()),
                    ..Default::default()
                },
            );
            let controllers: Vec<EntityId> = relationships
                .into_iter()
                .filter(|relationship| {
                    relationship.kind == "controls" && relationship.dst == settlement.id
                })
                .map(|relationship| relationship.src)
                .collect();
            for faction in controllers {
                graph.archive_relationship("controls", &faction, &settlement.id);
            }
            abandoned.push(settlement.name);
        }

        if abandoned.is_empty() {
            return Ok(None);
        }
        tracing::info!(
            target: "worldgen::domain",
            count = abandoned.len(),
            "era_rule.settlements_abandoned"
        );
        Ok(Some(format!("{} abandoned", abandoned.join(", "))))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use world_core::{EntityDraft, GraphSettings, NewRelationship};
    use world_schema::Point;

    fn add(graph: &mut WorldGraph, kind: &str, subtype: &str, status: &str, name: &str, x: f64) -> EntityId {
        let mut draft = EntityDraft::new(kind, subtype);
        draft.name = Some(name.to_string());
        draft.status = status.to_string();
        draft.coordinates = Some(Point::new(x, 0.0, 0.0));
        graph.create_entity(draft).unwrap()
    }

    #[test]
    fn empty_settlements_are_abandoned_and_released() {
        let mut graph = WorldGraph::new(GraphSettings::default(), None);
        let lived_in = add(&mut graph, "location", "settlement", "thriving", "Fenford", 0.0);
        let empty = add(&mut graph, "location", "settlement", "thriving", "Ashby", 10.0);
        let npc = add(&mut graph, "npc", "commoner", "alive", "Ada", 1.0);
        let ghost = add(&mut graph, "npc", "commoner", "dead", "Bex", 11.0);
        let guild = add(&mut graph, "faction", "guild", "active", "Wardens", 20.0);
        graph.add_relationship(NewRelationship::new("resident_of", npc, lived_in.clone()));
        graph.add_relationship(NewRelationship::new("resident_of", ghost, empty.clone()));
        graph.add_relationship(NewRelationship::new("controls", guild.clone(), empty.clone()));

        let rule = SettlementAbandonment::default();
        let mut rng = SmallRng::seed_from_u64(0);
        let outcome = rule.apply(&mut graph, &mut rng).unwrap();

        assert_eq!(outcome.as_deref(), Some("Ashby abandoned"));
        assert_eq!(graph.entity(&empty).unwrap().status, "abandoned");
        assert_eq!(graph.entity(&lived_in).unwrap().status, "thriving");
        assert!(!graph.has_active_link_between("controls", &guild, &empty));
        assert!(graph.has_relationship("controls", &guild, &empty));

        assert_eq!(rule.apply(&mut graph, &mut rng).unwrap(), None);
    }
}
