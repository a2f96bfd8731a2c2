//! Run diagnostics: per-epoch statistics, component usage and health, and the
//! persistent warning list.

use std::collections::BTreeMap;
use std::fmt;

use serde::Serialize;
use world_schema::EntityId;

use crate::distribution::{DeviationReport, GraphMetrics};

/// Informational warnings kept for end-of-run diagnostics. None of these stop
/// the simulation.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EngineWarning {
    RelationshipBudget {
        tick: u64,
        system: String,
        limit: usize,
    },
    AggressiveSystem {
        system: String,
        relationships: usize,
        threshold: usize,
    },
    HighGrowthRate {
        epoch: u32,
        created: usize,
        target: usize,
    },
    ExcessiveGrowth {
        entities: usize,
        limit: usize,
    },
    TagCoverage {
        entity: EntityId,
        tags: usize,
    },
    TagConflict {
        entity: EntityId,
        left: String,
        right: String,
    },
}

impl fmt::Display for EngineWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EngineWarning::RelationshipBudget {
                tick,
                system,
                limit,
            } => write!(
                f,
                "tick {tick}: relationship budget of {limit} reached before {system} finished"
            ),
            EngineWarning::AggressiveSystem {
                system,
                relationships,
                threshold,
            } => write!(
                f,
                "{system} created {relationships} relationships in one tick (threshold {threshold})"
            ),
            EngineWarning::HighGrowthRate {
                epoch,
                created,
                target,
            } => write!(
                f,
                "epoch {epoch}: created {created} entities against a target of {target}"
            ),
            EngineWarning::ExcessiveGrowth { entities, limit } => {
                write!(f, "{entities} entities exceeds the growth guard of {limit}")
            }
            EngineWarning::TagCoverage { entity, tags } => {
                write!(f, "{entity} carries {tags} tags, outside the 3-5 band")
            }
            EngineWarning::TagConflict {
                entity,
                left,
                right,
            } => write!(f, "{entity} carries conflicting tags {left} and {right}"),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TemplateUsage {
    pub runs: u32,
    pub failures: u32,
    pub entities_created: usize,
    pub relationships_created: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SystemHealth {
    pub runs: u32,
    pub failures: u32,
    pub relationships_added: usize,
    pub entities_modified: usize,
    pub last_error: Option<String>,
}

impl SystemHealth {
    pub fn failure_rate(&self) -> f64 {
        if self.runs == 0 {
            0.0
        } else {
            self.failures as f64 / self.runs as f64
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct EpochStats {
    pub epoch: u32,
    pub era: String,
    pub tick: u64,
    pub entities: usize,
    pub relationships: usize,
    pub growth_target: usize,
    pub entities_created: usize,
    pub relationships_created: usize,
    pub pressures: BTreeMap<String, f64>,
    pub entity_kind_counts: BTreeMap<String, usize>,
    pub deviation: DeviationReport,
    pub graph: GraphMetrics,
}

/// Why a run stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TerminationReason {
    MaxTicks,
    ErasComplete,
    ExcessiveGrowth,
    /// The host finalized before any other condition was reached.
    Stopped,
}

impl fmt::Display for TerminationReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            TerminationReason::MaxTicks => "max_ticks",
            TerminationReason::ErasComplete => "eras_complete",
            TerminationReason::ExcessiveGrowth => "excessive_growth",
            TerminationReason::Stopped => "stopped",
        };
        f.write_str(label)
    }
}

/// Aggregated counters for one run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RunStatistics {
    pub epochs: Vec<EpochStats>,
    pub template_usage: BTreeMap<String, TemplateUsage>,
    pub system_health: BTreeMap<String, SystemHealth>,
    pub warnings: Vec<EngineWarning>,
}

impl RunStatistics {
    pub fn template_runs(&self, template_id: &str) -> u32 {
        self.template_usage
            .get(template_id)
            .map_or(0, |usage| usage.runs)
    }

    pub fn record_template_success(
        &mut self,
        template_id: &str,
        entities_created: usize,
        relationships_created: usize,
    ) {
        let usage = self
            .template_usage
            .entry(template_id.to_string())
            .or_default();
        usage.runs += 1;
        usage.entities_created += entities_created;
        usage.relationships_created += relationships_created;
    }

    pub fn record_template_failure(&mut self, template_id: &str) {
        self.template_usage
            .entry(template_id.to_string())
            .or_default()
            .failures += 1;
    }

    pub fn record_system_run(
        &mut self,
        system_id: &str,
        relationships_added: usize,
        entities_modified: usize,
    ) {
        let health = self.system_health.entry(system_id.to_string()).or_default();
        health.runs += 1;
        health.relationships_added += relationships_added;
        health.entities_modified += entities_modified;
    }

    pub fn record_system_failure(&mut self, system_id: &str, message: String) {
        let health = self.system_health.entry(system_id.to_string()).or_default();
        health.runs += 1;
        health.failures += 1;
        health.last_error = Some(message);
    }

    pub fn warn(&mut self, warning: EngineWarning) {
        tracing::warn!(target: "worldgen::engine", warning = %warning, "engine.warning");
        self.warnings.push(warning);
    }
}
