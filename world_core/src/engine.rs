//! Epoch/tick scheduler. Each epoch runs a growth phase, a block of
//! simulation ticks, the era rule, the pressure update, pruning and
//! statistics, in that order, against one shared [`WorldGraph`].

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use rand::{rngs::SmallRng, Rng, SeedableRng};
use tracing::{debug, info, warn};
use world_schema::{
    EntityId, Era, HistoryEvent, HistoryEventKind, Prominence, RelationshipKey,
};

use crate::component::{EntityRef, EraRule, GrowthTemplate, SimulationSystem, SystemResult};
use crate::config::{EngineConfig, WorldDefinition};
use crate::contracts::ContractEnforcer;
use crate::distribution::{DeviationReport, DistributionTracker};
use crate::emitter::{LogLevel, NullEmitter, SimulationEmitter, SimulationEvent};
use crate::enrichment::{
    EnrichmentQueue, EnrichmentService, EnrichmentSubject, ImageGenerationService,
};
use crate::error::{ComponentError, EngineError, GraphError};
use crate::export::{ExportMetadata, ExportedWorld};
use crate::graph::{EntityFilter, EntityPatch, GraphSettings, NewRelationship, WorldGraph};
use crate::homeostasis::{
    DynamicWeightCalculator, FeedbackAnalyzer, LoopHealth, LoopStatus, PopulationReport,
    PopulationTracker,
};
use crate::naming::NameGenerator;
use crate::pressure::{compile_pressures, PressureInterpreter};
use crate::selection::{diversity_penalty, weighted_pick, SystemSelector, TemplateSelector};
use crate::stats::{EngineWarning, EpochStats, RunStatistics, TerminationReason};
use crate::validator::FrameworkValidator;

/// Everything needed to build a [`WorldEngine`].
pub struct EngineSetup {
    pub config: Arc<EngineConfig>,
    pub definition: WorldDefinition,
    pub templates: Vec<Box<dyn GrowthTemplate>>,
    pub systems: Vec<Box<dyn SimulationSystem>>,
    pub era_rules: Vec<Box<dyn EraRule>>,
    pub name_generator: Option<Box<dyn NameGenerator>>,
    pub lore: Option<Arc<dyn EnrichmentService>>,
    pub images: Option<Arc<dyn ImageGenerationService>>,
    pub emitter: Box<dyn SimulationEmitter>,
}

impl EngineSetup {
    pub fn new(config: Arc<EngineConfig>, definition: WorldDefinition) -> Self {
        Self {
            config,
            definition,
            templates: Vec::new(),
            systems: Vec::new(),
            era_rules: Vec::new(),
            name_generator: None,
            lore: None,
            images: None,
            emitter: Box::new(NullEmitter),
        }
    }

    pub fn with_template(mut self, template: impl GrowthTemplate + 'static) -> Self {
        self.templates.push(Box::new(template));
        self
    }

    pub fn with_system(mut self, system: impl SimulationSystem + 'static) -> Self {
        self.systems.push(Box::new(system));
        self
    }

    pub fn with_era_rule(mut self, rule: impl EraRule + 'static) -> Self {
        self.era_rules.push(Box::new(rule));
        self
    }

    pub fn with_name_generator(mut self, namer: impl NameGenerator + 'static) -> Self {
        self.name_generator = Some(Box::new(namer));
        self
    }

    pub fn with_lore_service(mut self, service: Arc<dyn EnrichmentService>) -> Self {
        self.lore = Some(service);
        self
    }

    pub fn with_image_service(mut self, service: Arc<dyn ImageGenerationService>) -> Self {
        self.images = Some(service);
        self
    }

    pub fn with_emitter(mut self, emitter: impl SimulationEmitter + 'static) -> Self {
        self.emitter = Box::new(emitter);
        self
    }
}

#[derive(Debug, Default)]
struct GrowthSummary {
    attempts: usize,
    entities_created: usize,
    relationships_created: usize,
    templates_used: Vec<String>,
}

pub struct WorldEngine {
    config: Arc<EngineConfig>,
    definition: WorldDefinition,
    templates: Vec<Box<dyn GrowthTemplate>>,
    systems: Vec<Box<dyn SimulationSystem>>,
    era_rules: Vec<Box<dyn EraRule>>,
    emitter: Box<dyn SimulationEmitter>,
    graph: WorldGraph,
    rng: SmallRng,
    tracker: DistributionTracker,
    pressures: PressureInterpreter,
    enforcer: ContractEnforcer,
    template_selector: TemplateSelector,
    system_selector: SystemSelector,
    population: PopulationTracker,
    weights: DynamicWeightCalculator,
    feedback: FeedbackAnalyzer,
    enrichment: EnrichmentQueue,
    stats: RunStatistics,
    total_target: usize,
    era_index: usize,
    epochs_in_era: u32,
    epochs_run: u32,
    last_deviation: DeviationReport,
    loop_statuses: Vec<LoopStatus>,
    termination: Option<TerminationReason>,
}

impl WorldEngine {
    pub fn new(setup: EngineSetup) -> Result<Self, EngineError> {
        let EngineSetup {
            config,
            definition,
            templates,
            systems,
            era_rules,
            name_generator,
            lore,
            images,
            emitter,
        } = setup;

        let report = FrameworkValidator::new(&definition, &templates, &systems)
            .with_min_growth_scaling(config.pressure.min_growth_scaling)
            .validate();
        for warning in &report.warnings {
            warn!(target: "worldgen::validator", warning = %warning, "validation.warning");
        }
        emitter.emit(SimulationEvent::Validation {
            valid: report.valid(),
            report: report.clone(),
        });
        if !report.valid() {
            tracing::error!(
                target: "worldgen::validator",
                errors = report.errors.len(),
                "validation.failed"
            );
            emitter.emit(SimulationEvent::Error {
                message: report.to_string(),
            });
            return Err(EngineError::Validation(report));
        }

        let compiled = compile_pressures(&definition.pressures)?;
        let categories: BTreeMap<String, String> = definition
            .domain
            .relationship_kinds
            .iter()
            .filter(|kind| !kind.category.is_empty())
            .map(|kind| (kind.kind.clone(), kind.category.clone()))
            .collect();
        let mut graph = WorldGraph::new(
            GraphSettings {
                coordinate_overlap_radius: config.coordinate_overlap_radius,
            },
            name_generator,
        )
        .with_relationship_categories(categories);

        for entity in definition.seed.entities.iter().cloned() {
            graph.insert_seed_entity(entity).map_err(EngineError::Seed)?;
        }
        for seed in &definition.seed.relationships {
            let mut relationship = NewRelationship::new(
                &seed.kind,
                EntityId::new(&seed.src),
                EntityId::new(&seed.dst),
            );
            relationship.strength = seed.strength;
            relationship.distance = seed.distance;
            if !graph.add_relationship(relationship) {
                return Err(EngineError::SeedRelationship {
                    kind: seed.kind.clone(),
                    src: seed.src.clone(),
                    dst: seed.dst.clone(),
                });
            }
        }

        if let Some(era) = definition.eras.first() {
            graph.set_era(&era.id);
            let event = history_event(
                &graph,
                HistoryEventKind::EraTransition,
                format!("{} begins", era_label(era)),
            );
            graph.record_event(event);
        }

        let pressures = PressureInterpreter::new(compiled, config.pressure.clone());
        pressures.initialize(&mut graph);

        let total_target = config.scaled(definition.targets.global.total_entities.target as f64);
        let kind_targets: BTreeMap<String, f64> = definition
            .targets
            .global
            .entity_kind_distribution
            .targets
            .iter()
            .map(|(kind, ratio)| (kind.clone(), ratio * total_target as f64))
            .collect();
        let subtype_targets: BTreeMap<(String, String), f64> = definition
            .registries
            .iter()
            .filter_map(|registry| {
                let subtype = registry.subtype.clone()?;
                let count = registry.expected_distribution.target_count?;
                Some((
                    (registry.kind.clone(), subtype),
                    config.scaled(count as f64) as f64,
                ))
            })
            .collect();
        let mut population = PopulationTracker::new(kind_targets, subtype_targets);
        population.update(&graph);

        info!(
            target: "worldgen::engine",
            seed = config.seed,
            templates = templates.len(),
            systems = systems.len(),
            eras = definition.eras.len(),
            total_target,
            "engine.initialized"
        );

        Ok(Self {
            tracker: DistributionTracker::new(
                definition.targets.clone(),
                config.clustering.strength_threshold,
            ),
            enforcer: ContractEnforcer::new(definition.registries.clone(), definition.tags.clone())
                .with_scale_factor(config.scale_factor),
            template_selector: TemplateSelector::new(definition.targets.tuning.clone()),
            system_selector: SystemSelector,
            feedback: FeedbackAnalyzer::new(definition.feedback_loops.clone()),
            enrichment: EnrichmentQueue::new(lore, images, config.enrichment.batch_size),
            rng: SmallRng::seed_from_u64(config.seed),
            weights: DynamicWeightCalculator::default(),
            stats: RunStatistics::default(),
            last_deviation: DeviationReport::default(),
            loop_statuses: Vec::new(),
            termination: None,
            era_index: 0,
            epochs_in_era: 0,
            epochs_run: 0,
            total_target,
            population,
            pressures,
            graph,
            config,
            definition,
            templates,
            systems,
            era_rules,
            emitter,
        })
    }

    pub fn graph(&self) -> &WorldGraph {
        &self.graph
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn statistics(&self) -> &RunStatistics {
        &self.stats
    }

    pub fn warnings(&self) -> &[EngineWarning] {
        &self.stats.warnings
    }

    pub fn last_deviation(&self) -> &DeviationReport {
        &self.last_deviation
    }

    pub fn population_report(&self) -> &PopulationReport {
        self.population.report()
    }

    pub fn feedback_loops(&self) -> &[LoopStatus] {
        &self.loop_statuses
    }

    pub fn termination(&self) -> Option<TerminationReason> {
        self.termination
    }

    pub fn is_finished(&self) -> bool {
        self.termination.is_some()
    }

    pub fn epochs_run(&self) -> u32 {
        self.epochs_run
    }

    pub fn total_epochs(&self) -> u32 {
        self.definition
            .eras
            .iter()
            .map(|era| self.era_epochs(era))
            .sum()
    }

    /// Scaled total entity target the growth phase steers toward.
    pub fn total_target(&self) -> usize {
        self.total_target
    }

    /// Run epochs until a termination condition is reached.
    pub fn run(&mut self) -> TerminationReason {
        while self.step() {}
        self.termination.unwrap_or(TerminationReason::Stopped)
    }

    /// Run exactly one epoch. Returns whether another epoch may follow.
    pub fn step(&mut self) -> bool {
        if self.termination.is_some() {
            return false;
        }
        if let Some(reason) = self.check_termination() {
            self.finish(reason);
            return false;
        }
        self.run_epoch();
        if let Some(reason) = self.check_termination() {
            self.finish(reason);
            return false;
        }
        true
    }

    /// Drive queued enrichment requests to completion.
    pub async fn flush_enrichment(&mut self) -> usize {
        self.enrichment.flush().await
    }

    /// Join pending enrichment and produce the final export. Finishes the run
    /// first when the host stops early.
    pub async fn finalize(&mut self) -> ExportedWorld {
        if self.termination.is_none() {
            self.finish(TerminationReason::Stopped);
        }
        self.enrichment.flush().await;
        let enrichment = self.enrichment.take_results();
        let (state, deviation) = self.tracker.analyze(&self.graph);
        let (relationships, historical_relationships) =
            ExportedWorld::partition_relationships(self.graph.relationships());
        ExportedWorld {
            metadata: ExportMetadata {
                seed: self.config.seed,
                tick: self.graph.tick(),
                epoch: self.graph.epoch(),
                era: self.graph.era_id().to_string(),
                entity_count: self.graph.entity_count(),
                relationship_count: relationships.len(),
                historical_relationship_count: historical_relationships.len(),
                termination: self.termination,
            },
            entities: self.graph.entities(),
            relationships,
            historical_relationships,
            history: self.graph.history(),
            pressures: self.graph.pressures(),
            distribution: state,
            deviation,
            template_usage: self.stats.template_usage.clone(),
            feedback_loops: self.loop_statuses.clone(),
            lore: enrichment.lore,
            images: enrichment.images,
            warnings: self.stats.warnings.clone(),
        }
    }

    /// Entities to create this epoch: the summed per-kind deficit spread over
    /// the remaining epochs, jittered, then clamped to the scaled bounds.
    pub fn calculate_growth_target(&mut self) -> usize {
        let era_id = self.graph.era_id().to_string();
        let targets = self.definition.targets.for_era(Some(&era_id));
        let total = self.total_target as f64;
        let deficit: f64 = targets
            .entity_kind_distribution
            .targets
            .iter()
            .map(|(kind, ratio)| {
                let current = self.graph.count_entities(&EntityFilter::kind(kind.as_str()));
                (ratio * total - current as f64).max(0.0)
            })
            .sum();
        let remaining = self.remaining_epochs().max(1) as f64;
        let base = (deficit / remaining).ceil();
        let jitter = self.config.growth.jitter.abs();
        let factor = if jitter > 0.0 {
            1.0 + self.rng.gen_range(-jitter..=jitter)
        } else {
            1.0
        };
        let min = self.config.scaled(self.config.growth.min_per_epoch);
        let max = self.config.scaled(self.config.growth.max_per_epoch).max(min);
        ((base * factor).round().max(0.0) as usize).clamp(min, max)
    }

    fn check_termination(&mut self) -> Option<TerminationReason> {
        if self.graph.tick() >= self.config.max_ticks {
            return Some(TerminationReason::MaxTicks);
        }
        if self.era_index >= self.definition.eras.len() {
            return Some(TerminationReason::ErasComplete);
        }
        let limit = (self.config.growth.excessive_growth_factor * self.total_target as f64).ceil()
            as usize;
        let entities = self.graph.entity_count();
        if entities >= limit {
            self.stats
                .warn(EngineWarning::ExcessiveGrowth { entities, limit });
            return Some(TerminationReason::ExcessiveGrowth);
        }
        None
    }

    fn run_epoch(&mut self) {
        let era = self.definition.eras[self.era_index].clone();
        let epoch = self.epochs_run + 1;
        self.graph.set_epoch(epoch);
        info!(
            target: "worldgen::engine",
            epoch,
            era = %era.id,
            tick = self.graph.tick(),
            "epoch.started"
        );
        self.emitter.emit(SimulationEvent::EpochStart {
            epoch,
            era: era.id.clone(),
            tick: self.graph.tick(),
        });

        let (_, report) = self.tracker.analyze(&self.graph);
        let target = self.calculate_growth_target();
        let growth = self.run_growth_phase(target, &era, &report);
        self.emitter.emit(SimulationEvent::GrowthPhase {
            epoch,
            target,
            attempts: growth.attempts,
            entities_created: growth.entities_created,
            templates_used: growth.templates_used.clone(),
        });

        let simulated = self.run_simulation_phase(&era, &report);
        self.apply_era_rules(&era);

        let (_, report) = self.tracker.analyze(&self.graph);
        self.pressures
            .update(&mut self.graph, Some(&era), report.overall);

        self.prune();
        self.record_epoch_stats(epoch, &era, target, &growth, simulated);
        self.advance_era();
        self.epochs_run += 1;

        self.emitter.emit(SimulationEvent::Progress {
            epoch: self.epochs_run,
            total_epochs: self.total_epochs(),
            tick: self.graph.tick(),
            entities: self.graph.entity_count(),
            relationships: self.graph.relationship_count(),
        });
    }

    fn run_growth_phase(
        &mut self,
        target: usize,
        era: &Era,
        report: &DeviationReport,
    ) -> GrowthSummary {
        let mut summary = GrowthSummary::default();
        let max_attempts = self
            .config
            .scaled(target as f64 * self.config.growth.attempts_per_target);
        let run_cap = self.config.scaled(self.config.template_run_cap as f64) as u32;
        let base_weights = self.template_selector.adjusted_weights(
            self.templates
                .iter()
                .map(|template| (template.id(), template.metadata())),
            era,
            report,
        );

        while summary.entities_created < target && summary.attempts < max_attempts {
            summary.attempts += 1;
            let mut candidates: Vec<(usize, f64)> = Vec::new();
            for (index, template) in self.templates.iter().enumerate() {
                let id = template.id();
                let runs = self.stats.template_runs(id);
                if runs >= run_cap {
                    continue;
                }
                if let Err(block) = self.enforcer.check_enabled(template.contract(), &self.graph) {
                    debug!(
                        target: "worldgen::selection",
                        template = id,
                        ?block,
                        "template.blocked"
                    );
                    continue;
                }
                if let Some(kind) = self
                    .enforcer
                    .saturated_output(&self.graph, template.metadata())
                {
                    debug!(
                        target: "worldgen::selection",
                        template = id,
                        kind = %kind,
                        "template.saturated"
                    );
                    continue;
                }
                if !template.can_apply(&self.graph) {
                    continue;
                }
                let weight = base_weights.get(id).copied().unwrap_or(0.0)
                    * self
                        .weights
                        .multiplier(template.metadata(), self.population.report())
                    * diversity_penalty(runs);
                candidates.push((index, weight));
            }
            if candidates.is_empty() {
                info!(
                    target: "worldgen::selection",
                    created = summary.entities_created,
                    target,
                    "growth.no_eligible_templates"
                );
                break;
            }
            let weights: Vec<f64> = candidates.iter().map(|(_, weight)| *weight).collect();
            let Some(pick) = weighted_pick(&weights, &mut self.rng) else {
                break;
            };
            let index = candidates[pick].0;
            let template_id = self.templates[index].id().to_string();
            match self.execute_template(index) {
                Ok((created, relationships)) => {
                    self.stats.record_template_success(
                        &template_id,
                        created.len(),
                        relationships.len(),
                    );
                    summary.entities_created += created.len();
                    summary.relationships_created += relationships.len();
                    summary.templates_used.push(template_id);
                    if !created.is_empty() {
                        self.population.refresh(&self.graph);
                    }
                }
                Err(err) => {
                    warn!(
                        target: "worldgen::engine",
                        template = %template_id,
                        error = %err,
                        "template.failed"
                    );
                    self.stats.record_template_failure(&template_id);
                }
            }
        }
        summary
    }

    fn execute_template(
        &mut self,
        index: usize,
    ) -> Result<(Vec<EntityId>, Vec<RelationshipKey>), ComponentError> {
        let template = &self.templates[index];
        let template_id = template.id().to_string();
        let mut targets = template.find_targets(&self.graph);
        let target = if targets.is_empty() {
            None
        } else {
            let pick = self.rng.gen_range(0..targets.len());
            Some(targets.swap_remove(pick))
        };
        let result = template.expand(&self.graph, target.as_ref(), &mut self.rng)?;

        // Reject the whole batch up front so a bad draft never leaves half a
        // result in the graph.
        let can_name = self.graph.has_name_generator();
        for draft in &result.entities {
            if draft.coordinates.is_none() {
                return Err(GraphError::MissingCoordinates {
                    kind: draft.kind.clone(),
                }
                .into());
            }
            let named = draft
                .name
                .as_deref()
                .is_some_and(|name| !name.trim().is_empty());
            if !named && !can_name {
                return Err(GraphError::NameUnavailable {
                    kind: draft.kind.clone(),
                }
                .into());
            }
        }

        let mut created = Vec::with_capacity(result.entities.len());
        for draft in result.entities {
            created.push(self.graph.create_entity(draft)?);
        }

        let mut relationships = Vec::new();
        for draft in result.relationships {
            let (Some(src), Some(dst)) = (
                resolve_ref(&draft.src, &created),
                resolve_ref(&draft.dst, &created),
            ) else {
                warn!(
                    target: "worldgen::engine",
                    template = %template_id,
                    kind = %draft.kind,
                    "template.dangling_relationship"
                );
                continue;
            };
            let mut relationship = NewRelationship::new(&draft.kind, src.clone(), dst.clone());
            relationship.strength = draft.strength;
            relationship.distance = draft.distance;
            if self.graph.add_relationship(relationship) {
                relationships.push(RelationshipKey {
                    kind: draft.kind,
                    src,
                    dst,
                });
            }
        }
        relationships.extend(
            self.enforcer
                .apply_lineage(&mut self.graph, &created, &mut self.rng),
        );

        for id in &created {
            if let Some(entity) = self.graph.entity_ref(id) {
                for warning in self.enforcer.check_tags(entity) {
                    self.stats.warn(warning);
                }
            }
        }
        self.enqueue_enrichment(&created);

        let description = if result.description.is_empty() {
            format!("{template_id} created {} entities", created.len())
        } else {
            result.description
        };
        let mut event = history_event(&self.graph, HistoryEventKind::Growth, description);
        event.entities_created = created.clone();
        event.relationships_created = relationships.clone();
        self.graph.record_event(event);
        Ok((created, relationships))
    }

    fn enqueue_enrichment(&mut self, created: &[EntityId]) {
        let settings = &self.config.enrichment;
        if !settings.enabled || !self.enrichment.is_enabled() {
            return;
        }
        let subjects: Vec<EnrichmentSubject> = created
            .iter()
            .filter_map(|id| self.graph.entity_ref(id))
            .filter(|entity| entity.prominence >= settings.min_prominence)
            .map(EnrichmentSubject::from_entity)
            .collect();
        if settings.images {
            for subject in &subjects {
                self.enrichment.enqueue_image(subject.clone());
            }
        }
        self.enrichment.enqueue_lore(subjects);
    }

    /// Returns the number of relationships added across all ticks.
    fn run_simulation_phase(&mut self, era: &Era, report: &DeviationReport) -> usize {
        let mut added = 0;
        for _ in 0..self.config.simulation_ticks_per_growth {
            if self.graph.tick() >= self.config.max_ticks {
                break;
            }
            let mut budget = self.config.relationship_budget.max_per_simulation_tick;
            for index in 0..self.systems.len() {
                let system = &self.systems[index];
                let system_id = system.id().to_string();
                let modifier = self.system_selector.modifier(&system_id, era, report);
                if modifier == 0.0 {
                    continue;
                }
                if self
                    .enforcer
                    .check_enabled(system.contract(), &self.graph)
                    .is_err()
                {
                    continue;
                }
                match system.apply(&self.graph, modifier, &mut self.rng) {
                    Ok(result) => {
                        added += self.apply_system_result(&system_id, result, &mut budget);
                    }
                    Err(err) => {
                        warn!(
                            target: "worldgen::engine",
                            system = %system_id,
                            error = %err,
                            "system.failed"
                        );
                        self.stats.record_system_failure(&system_id, err.to_string());
                    }
                }
            }
            self.graph.advance_tick();
        }
        added
    }

    fn apply_system_result(
        &mut self,
        system_id: &str,
        result: SystemResult,
        budget: &mut usize,
    ) -> usize {
        let tick = self.graph.tick();
        let mut added = Vec::new();
        let mut exhausted = false;
        for relationship in result.relationships_added {
            if *budget == 0 {
                exhausted = true;
                break;
            }
            let key = RelationshipKey {
                kind: relationship.kind.clone(),
                src: relationship.src.clone(),
                dst: relationship.dst.clone(),
            };
            if self.graph.add_relationship(relationship) {
                *budget -= 1;
                added.push(key);
            }
        }
        if exhausted {
            self.stats.warn(EngineWarning::RelationshipBudget {
                tick,
                system: system_id.to_string(),
                limit: self.config.relationship_budget.max_per_simulation_tick,
            });
        }
        let threshold = self.config.aggressive_system_threshold;
        if added.len() > threshold {
            self.stats.warn(EngineWarning::AggressiveSystem {
                system: system_id.to_string(),
                relationships: added.len(),
                threshold,
            });
        }

        let mut ended = 0;
        for key in &result.relationships_ended {
            if self.graph.archive_relationship(&key.kind, &key.src, &key.dst) {
                ended += 1;
            }
        }
        let mut modified = Vec::new();
        for (id, patch) in result.entities_modified {
            if self.graph.update_entity(&id, patch) {
                modified.push(id);
            }
        }
        for (pressure, delta) in &result.pressure_changes {
            self.graph.adjust_pressure(pressure, *delta);
        }
        self.stats
            .record_system_run(system_id, added.len(), modified.len());

        if !added.is_empty() || !modified.is_empty() || ended > 0 {
            let description = if result.description.is_empty() {
                format!("{system_id} reshaped the world")
            } else {
                result.description
            };
            let mut event = history_event(&self.graph, HistoryEventKind::Simulation, description);
            event.relationships_created = added.clone();
            event.entities_modified = modified;
            self.graph.record_event(event);
        }
        added.len()
    }

    fn apply_era_rules(&mut self, era: &Era) {
        for rule in self.era_rules.iter().filter(|rule| rule.era_id() == era.id) {
            match rule.apply(&mut self.graph, &mut self.rng) {
                Ok(Some(description)) => {
                    let event = history_event(&self.graph, HistoryEventKind::Special, description);
                    self.graph.record_event(event);
                }
                Ok(None) => {}
                Err(err) => {
                    warn!(
                        target: "worldgen::engine",
                        era = %era.id,
                        error = %err,
                        "era_rule.failed"
                    );
                }
            }
        }
    }

    fn prune(&mut self) {
        let config = Arc::clone(&self.config);
        let prune = &config.prune;
        let death_chance = prune.death_chance.clamp(0.0, 1.0);
        let tick = self.graph.tick();
        let mut modified = BTreeSet::new();
        for entity in self.graph.entities() {
            let age = entity.age(tick);
            if age > prune.forgotten_age
                && entity.prominence != Prominence::Forgotten
                && self.graph.connection_count(&entity.id) < prune.min_relationships
            {
                self.graph.update_entity(
                    &entity.id,
                    EntityPatch {
                        prominence: Some(Prominence::Forgotten),
                        ..Default::default()
                    },
                );
                modified.insert(entity.id.clone());
            }
            if entity.kind == prune.mortal_kind
                && entity.status == prune.alive_status
                && age > prune.death_age
                && self.rng.gen_bool(death_chance)
            {
                self.graph.update_entity(
                    &entity.id,
                    EntityPatch {
                        status: Some(prune.dead_status.clone()),
                        end_tick: Some(tick),
                        ..Default::default()
                    },
                );
                for relationship in self.graph.relationships_of(&entity.id) {
                    self.graph.archive_relationship(
                        &relationship.kind,
                        &relationship.src,
                        &relationship.dst,
                    );
                }
                debug!(target: "worldgen::engine", entity = %entity.id, age, "entity.died");
                modified.insert(entity.id.clone());
            }
        }
        if modified.is_empty() {
            return;
        }
        let mut event = history_event(
            &self.graph,
            HistoryEventKind::Consolidation,
            format!("{} entities faded or passed away", modified.len()),
        );
        event.entities_modified = modified.into_iter().collect();
        self.graph.record_event(event);
    }

    fn record_epoch_stats(
        &mut self,
        epoch: u32,
        era: &Era,
        target: usize,
        growth: &GrowthSummary,
        simulated: usize,
    ) {
        let (state, report) = self.tracker.analyze(&self.graph);
        if growth.entities_created as f64 > target as f64 * self.config.growth.high_growth_factor {
            self.stats.warn(EngineWarning::HighGrowthRate {
                epoch,
                created: growth.entities_created,
                target,
            });
        }
        let stats = EpochStats {
            epoch,
            era: era.id.clone(),
            tick: self.graph.tick(),
            entities: state.total_entities,
            relationships: state.total_relationships,
            growth_target: target,
            entities_created: growth.entities_created,
            relationships_created: growth.relationships_created + simulated,
            pressures: self.graph.pressures(),
            entity_kind_counts: state.entity_kind_counts,
            deviation: report.clone(),
            graph: state.graph,
        };
        info!(
            target: "worldgen::engine",
            epoch,
            entities = stats.entities,
            relationships = stats.relationships,
            deviation = report.overall,
            "epoch.completed"
        );
        self.stats.epochs.push(stats.clone());
        self.emitter.emit(SimulationEvent::EpochStats { stats });

        self.population.update(&self.graph);
        let interval = self.config.feedback_validation_interval;
        if interval > 0 && epoch % interval == 0 {
            self.loop_statuses = self.feedback.validate(self.population.history());
            for status in &self.loop_statuses {
                if status.health == LoopHealth::Broken {
                    warn!(
                        target: "worldgen::homeostasis",
                        feedback_loop = %status.id,
                        correlation = ?status.correlation,
                        "feedback_loop.broken"
                    );
                }
            }
            self.emitter.emit(SimulationEvent::PopulationReport {
                report: self.population.report().clone(),
                feedback_loops: self.loop_statuses.clone(),
            });
            self.emitter.emit(SimulationEvent::TagHealth {
                report: self.enforcer.tag_health(&self.graph),
            });
        }
        self.last_deviation = report;
    }

    fn advance_era(&mut self) {
        self.epochs_in_era += 1;
        let current = &self.definition.eras[self.era_index];
        if self.epochs_in_era < self.era_epochs(current) {
            return;
        }
        let previous = current.id.clone();
        self.era_index += 1;
        self.epochs_in_era = 0;
        let Some(next) = self.definition.eras.get(self.era_index) else {
            info!(target: "worldgen::engine", era = %previous, "era.completed");
            return;
        };
        let next_id = next.id.clone();
        let description = format!("{} begins", era_label(next));
        self.graph.set_era(&next_id);
        info!(
            target: "worldgen::engine",
            from = %previous,
            to = %next_id,
            tick = self.graph.tick(),
            "era.transition"
        );
        let event = history_event(
            &self.graph,
            HistoryEventKind::EraTransition,
            description.clone(),
        );
        self.graph.record_event(event);
        self.emitter.emit(SimulationEvent::Log {
            level: LogLevel::Info,
            message: description,
        });
    }

    fn finish(&mut self, reason: TerminationReason) {
        self.termination = Some(reason);
        info!(
            target: "worldgen::engine",
            reason = %reason,
            tick = self.graph.tick(),
            epochs = self.epochs_run,
            entities = self.graph.entity_count(),
            relationships = self.graph.relationship_count(),
            "engine.finished"
        );
        self.emitter.emit(SimulationEvent::TemplateUsage {
            usage: self.stats.template_usage.clone(),
        });
        self.emitter.emit(SimulationEvent::SystemHealth {
            health: self.stats.system_health.clone(),
        });
        self.emitter.emit(SimulationEvent::TagHealth {
            report: self.enforcer.tag_health(&self.graph),
        });
        self.emitter.emit(SimulationEvent::Complete {
            reason,
            tick: self.graph.tick(),
            epoch: self.graph.epoch(),
            entities: self.graph.entity_count(),
            relationships: self.graph.relationship_count(),
            warnings: self.stats.warnings.clone(),
        });
    }

    fn era_epochs(&self, era: &Era) -> u32 {
        era.epochs.unwrap_or(self.config.epochs_per_era).max(1)
    }

    fn remaining_epochs(&self) -> u32 {
        self.definition
            .eras
            .iter()
            .skip(self.era_index)
            .map(|era| self.era_epochs(era))
            .sum::<u32>()
            .saturating_sub(self.epochs_in_era)
    }
}

fn resolve_ref(reference: &EntityRef, created: &[EntityId]) -> Option<EntityId> {
    match reference {
        EntityRef::Draft(index) => created.get(*index).cloned(),
        EntityRef::Existing(id) => Some(id.clone()),
    }
}

fn era_label(era: &Era) -> &str {
    if era.name.is_empty() {
        &era.id
    } else {
        &era.name
    }
}

fn history_event(graph: &WorldGraph, kind: HistoryEventKind, description: String) -> HistoryEvent {
    HistoryEvent {
        tick: graph.tick(),
        epoch: graph.epoch(),
        era: graph.era_id().to_string(),
        kind,
        description,
        entities_created: Vec::new(),
        relationships_created: Vec::new(),
        entities_modified: Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::component::{RelationshipDraft, TemplateResult};
    use crate::emitter::ChannelEmitter;
    use crate::graph::EntityDraft;
    use futures::executor::block_on;
    use world_schema::{
        CreatorRef, DistributionTargets, DomainSchema, EntityKindDefinition,
        EntityOperatorRegistry, HardState, Point, RelationshipKindDefinition,
    };

    struct Wanderers;

    impl GrowthTemplate for Wanderers {
        fn id(&self) -> &str {
            "wanderers"
        }

        fn can_apply(&self, _graph: &WorldGraph) -> bool {
            true
        }

        fn find_targets(&self, graph: &WorldGraph) -> Vec<HardState> {
            graph.find_entities(&EntityFilter::kind("npc"))
        }

        fn expand(
            &self,
            graph: &WorldGraph,
            target: Option<&HardState>,
            rng: &mut SmallRng,
        ) -> Result<TemplateResult, ComponentError> {
            let mut draft = EntityDraft::new("npc", "wanderer");
            draft.name = Some(format!("Wanderer {}", graph.entity_count()));
            draft.status = "alive".to_string();
            draft.coordinates = Some(Point::new(
                rng.gen_range(0.0..100.0),
                rng.gen_range(0.0..100.0),
                0.0,
            ));
            let mut result = TemplateResult {
                entities: vec![draft],
                ..Default::default()
            };
            if let Some(target) = target {
                result.relationships.push(
                    RelationshipDraft::new("knows", EntityRef::Draft(0), target.id.clone())
                        .with_strength(0.8),
                );
            }
            Ok(result)
        }
    }

    struct Collapsing;

    impl GrowthTemplate for Collapsing {
        fn id(&self) -> &str {
            "collapsing"
        }

        fn can_apply(&self, _graph: &WorldGraph) -> bool {
            true
        }

        fn find_targets(&self, _graph: &WorldGraph) -> Vec<HardState> {
            Vec::new()
        }

        fn expand(
            &self,
            _graph: &WorldGraph,
            _target: Option<&HardState>,
            _rng: &mut SmallRng,
        ) -> Result<TemplateResult, ComponentError> {
            Err(ComponentError::failed("collapsing", "always fails"))
        }
    }

    struct Crashing;

    impl SimulationSystem for Crashing {
        fn id(&self) -> &str {
            "crashing"
        }

        fn apply(
            &self,
            _graph: &WorldGraph,
            _modifier: f64,
            _rng: &mut SmallRng,
        ) -> Result<SystemResult, ComponentError> {
            Err(ComponentError::failed("crashing", "boom"))
        }
    }

    fn definition(eras: &[(&str, u32)]) -> WorldDefinition {
        let mut targets = DistributionTargets::default();
        targets.global.total_entities.target = 40;
        targets
            .global
            .entity_kind_distribution
            .targets
            .insert("npc".to_string(), 1.0);
        WorldDefinition {
            domain: DomainSchema {
                entity_kinds: vec![EntityKindDefinition {
                    kind: "npc".to_string(),
                    ..Default::default()
                }],
                relationship_kinds: vec![RelationshipKindDefinition {
                    kind: "knows".to_string(),
                    category: "social".to_string(),
                    ..Default::default()
                }],
                ..Default::default()
            },
            eras: eras
                .iter()
                .map(|(id, epochs)| Era {
                    id: id.to_string(),
                    epochs: Some(*epochs),
                    ..Default::default()
                })
                .collect(),
            targets,
            registries: vec![EntityOperatorRegistry {
                kind: "npc".to_string(),
                creators: vec![CreatorRef {
                    template_id: "wanderers".to_string(),
                    primary: true,
                    target_count: 10,
                }],
                ..Default::default()
            }],
            ..Default::default()
        }
    }

    fn config(seed: u64) -> Arc<EngineConfig> {
        Arc::new(EngineConfig {
            seed,
            ..Default::default()
        })
    }

    fn engine(seed: u64, eras: &[(&str, u32)]) -> WorldEngine {
        let setup = EngineSetup::new(config(seed), definition(eras)).with_template(Wanderers);
        WorldEngine::new(setup).expect("valid setup")
    }

    #[test]
    fn growth_target_stays_within_scaled_bounds() {
        let mut engine = engine(7, &[("dawn", 3)]);
        for _ in 0..200 {
            let target = engine.calculate_growth_target();
            assert!((3..=25).contains(&target), "target {target}");
        }

        let config = Arc::new(EngineConfig {
            scale_factor: 0.5,
            ..Default::default()
        });
        let setup = EngineSetup::new(config, definition(&[("dawn", 3)])).with_template(Wanderers);
        let mut scaled = WorldEngine::new(setup).expect("valid setup");
        for _ in 0..200 {
            let target = scaled.calculate_growth_target();
            assert!((2..=13).contains(&target), "target {target}");
        }
    }

    #[test]
    fn failing_components_are_counted_and_skipped() {
        let setup = EngineSetup::new(config(11), definition(&[("dawn", 2)]))
            .with_template(Wanderers)
            .with_template(Collapsing)
            .with_system(Crashing);
        let mut engine = WorldEngine::new(setup).expect("valid setup");
        assert_eq!(engine.run(), TerminationReason::ErasComplete);

        let stats = engine.statistics();
        assert!(stats.template_usage["collapsing"].failures > 0);
        assert_eq!(stats.template_usage["collapsing"].runs, 0);
        assert!(stats.template_usage["wanderers"].runs > 0);
        let crashing = &stats.system_health["crashing"];
        assert_eq!(crashing.failures, crashing.runs);
        assert_eq!(crashing.last_error.as_deref(), Some("crashing: boom"));
        assert!(engine.graph().entity_count() > 0);
    }

    #[test]
    fn same_seed_builds_the_same_world() {
        let build = |seed| {
            let mut engine = engine(seed, &[("dawn", 2), ("dusk", 2)]);
            engine.run();
            serde_json::to_string(&(engine.graph().entities(), engine.graph().relationships()))
                .expect("serialize")
        };
        assert_eq!(build(42), build(42));
    }

    #[test]
    fn invalid_definition_is_rejected_with_report() {
        let (emitter, events) = ChannelEmitter::unbounded();
        let setup = EngineSetup::new(config(1), definition(&[]))
            .with_template(Wanderers)
            .with_emitter(emitter);
        match WorldEngine::new(setup) {
            Err(EngineError::Validation(report)) => {
                assert!(report.errors.contains(&"no eras configured".to_string()));
            }
            Err(other) => panic!("unexpected error {other}"),
            Ok(_) => panic!("definition without eras must be rejected"),
        }
        let labels: Vec<_> = events.try_iter().map(|event| event.label()).collect();
        assert_eq!(labels, vec!["validation", "error"]);
    }

    #[test]
    fn eras_advance_and_are_recorded() {
        let mut engine = engine(3, &[("dawn", 2), ("dusk", 1)]);
        assert!(engine.step());
        assert_eq!(engine.graph().era_id(), "dawn");
        assert!(engine.step());
        assert_eq!(engine.graph().era_id(), "dusk");
        assert!(!engine.step());
        assert_eq!(engine.termination(), Some(TerminationReason::ErasComplete));
        assert_eq!(engine.epochs_run(), 3);

        let transitions: Vec<_> = engine
            .graph()
            .history()
            .into_iter()
            .filter(|event| event.kind == HistoryEventKind::EraTransition)
            .map(|event| event.era)
            .collect();
        assert_eq!(transitions, vec!["dawn", "dusk"]);
    }

    #[test]
    fn max_ticks_is_a_hard_stop() {
        let config = Arc::new(EngineConfig {
            max_ticks: 15,
            ..Default::default()
        });
        let setup = EngineSetup::new(config, definition(&[("dawn", 10)])).with_template(Wanderers);
        let mut engine = WorldEngine::new(setup).expect("valid setup");
        assert_eq!(engine.run(), TerminationReason::MaxTicks);
        assert_eq!(engine.epochs_run(), 2);
        assert_eq!(engine.graph().tick(), 15);
    }

    struct Aging {
        engine: WorldEngine,
        elder: EntityId,
        friend: EntityId,
        hub: EntityId,
        loner: EntityId,
    }

    /// Elder and loner are 90 ticks old with one link each, the hub is as old
    /// but well connected, and the friend is exactly 50 ticks old.
    fn aging_world(death_chance: f64) -> Aging {
        let config = Arc::new(EngineConfig {
            prune: crate::config::PruneConfig {
                death_chance,
                ..Default::default()
            },
            ..Default::default()
        });
        let setup = EngineSetup::new(config, definition(&[("dawn", 3)])).with_template(Wanderers);
        let mut engine = WorldEngine::new(setup).expect("valid setup");
        let spawn = |graph: &mut WorldGraph, kind: &str, name: &str, x: f64| {
            let mut draft = EntityDraft::new(kind, "commoner");
            draft.name = Some(name.to_string());
            draft.status = "alive".to_string();
            draft.coordinates = Some(Point::new(x, 0.0, 0.0));
            graph.create_entity(draft).expect("create")
        };
        let graph = &mut engine.graph;
        let elder = spawn(graph, "npc", "Elder", 0.0);
        let hub = spawn(graph, "location", "Hub", 10.0);
        let loner = spawn(graph, "location", "Loner", 20.0);
        for _ in 0..40 {
            graph.advance_tick();
        }
        let friend = spawn(graph, "npc", "Friend", 30.0);
        for (src, dst) in [(&elder, &friend), (&hub, &friend), (&hub, &loner)] {
            assert!(graph.add_relationship(NewRelationship::new("knows", src.clone(), dst.clone())));
        }
        for _ in 0..50 {
            graph.advance_tick();
        }
        Aging {
            engine,
            elder,
            friend,
            hub,
            loner,
        }
    }

    fn consolidations(engine: &WorldEngine) -> Vec<HistoryEvent> {
        engine
            .graph()
            .history()
            .into_iter()
            .filter(|event| event.kind == HistoryEventKind::Consolidation)
            .collect()
    }

    #[test]
    fn prune_forgets_isolated_elders_and_buries_the_dead() {
        let Aging {
            mut engine,
            elder,
            friend,
            hub,
            loner,
        } = aging_world(1.0);
        engine.prune();
        let graph = engine.graph();

        let dead = graph.entity(&elder).expect("elder");
        assert_eq!(dead.prominence, Prominence::Forgotten);
        assert_eq!(dead.status, "dead");
        assert_eq!(dead.temporal.and_then(|range| range.end_tick), Some(90));
        assert_eq!(graph.connection_count(&elder), 0);
        assert!(graph.has_relationship("knows", &elder, &friend));
        assert!(!graph.has_active_link_between("knows", &elder, &friend));

        let forgotten = graph.entity(&loner).expect("loner");
        assert_eq!(forgotten.prominence, Prominence::Forgotten);
        assert_eq!(forgotten.status, "alive");
        for id in [&hub, &friend] {
            let entity = graph.entity(id).expect("entity");
            assert_eq!(entity.prominence, Prominence::Marginal);
            assert_eq!(entity.status, "alive");
        }

        let events = consolidations(&engine);
        assert_eq!(events.len(), 1);
        let mut expected = vec![elder, loner];
        expected.sort();
        assert_eq!(events[0].entities_modified, expected);
    }

    #[test]
    fn prune_without_death_chance_only_forgets() {
        let Aging {
            mut engine,
            elder,
            friend,
            loner,
            ..
        } = aging_world(0.0);
        engine.prune();
        let graph = engine.graph();

        let elder_state = graph.entity(&elder).expect("elder");
        assert_eq!(elder_state.prominence, Prominence::Forgotten);
        assert_eq!(elder_state.status, "alive");
        assert_eq!(elder_state.temporal.and_then(|range| range.end_tick), None);
        assert!(graph.has_active_link_between("knows", &elder, &friend));

        let events = consolidations(&engine);
        assert_eq!(events.len(), 1);
        let mut expected = vec![elder, loner];
        expected.sort();
        assert_eq!(events[0].entities_modified, expected);
    }

    #[test]
    fn growth_sees_its_own_output_before_the_epoch_ends() {
        let mut engine = engine(21, &[("dawn", 3)]);
        assert_eq!(engine.population_report().deviation("npc", None), Some(-1.0));
        let era = engine.definition.eras[0].clone();
        let report = DeviationReport::default();
        let summary = engine.run_growth_phase(8, &era, &report);
        assert!(summary.entities_created > 0);

        let npcs = engine.graph().count_entities(&EntityFilter::kind("npc"));
        let expected = (npcs as f64 - 40.0) / 40.0;
        assert_eq!(engine.population_report().deviation("npc", None), Some(expected));
        assert_eq!(engine.population.history().len(), 1);
    }

    #[test]
    fn finalize_exports_and_emits_complete() {
        let (emitter, events) = ChannelEmitter::unbounded();
        let setup = EngineSetup::new(config(5), definition(&[("dawn", 1)]))
            .with_template(Wanderers)
            .with_emitter(emitter);
        let mut engine = WorldEngine::new(setup).expect("valid setup");
        engine.run();
        let export = block_on(engine.finalize());
        assert_eq!(export.metadata.entity_count, engine.graph().entity_count());
        assert_eq!(export.entities.len(), export.metadata.entity_count);
        assert_eq!(export.metadata.termination, Some(TerminationReason::ErasComplete));
        assert!(export
            .relationships
            .iter()
            .all(|relationship| relationship.category.as_deref() == Some("social")));

        let labels: Vec<_> = events.try_iter().map(|event| event.label()).collect();
        assert_eq!(labels.first(), Some(&"validation"));
        assert_eq!(labels.last(), Some(&"complete"));
        assert_eq!(labels.iter().filter(|label| **label == "complete").count(), 1);
    }
}
