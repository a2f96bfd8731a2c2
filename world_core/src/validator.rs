//! Startup consistency checks over a world definition and its components.

use std::collections::BTreeSet;
use std::fmt;

use serde::Serialize;
use world_schema::ComponentContract;

use crate::component::{GrowthTemplate, SimulationSystem};
use crate::config::WorldDefinition;
use crate::pressure::{predicted_equilibrium, PRESSURE_MAX, PRESSURE_MIN};

const PROMINENCE_SUM_TOLERANCE: f64 = 0.01;
/// Pressure flows may name the implicit decay term.
const DECAY_COMPONENT: &str = "decay";

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ValidationReport {
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl ValidationReport {
    pub fn valid(&self) -> bool {
        self.errors.is_empty()
    }
}

impl fmt::Display for ValidationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for error in &self.errors {
            writeln!(f, "  error: {error}")?;
        }
        for warning in &self.warnings {
            writeln!(f, "  warning: {warning}")?;
        }
        Ok(())
    }
}

pub struct FrameworkValidator<'a> {
    definition: &'a WorldDefinition,
    templates: &'a [Box<dyn GrowthTemplate>],
    systems: &'a [Box<dyn SimulationSystem>],
    min_growth_scaling: f64,
}

impl<'a> FrameworkValidator<'a> {
    pub fn new(
        definition: &'a WorldDefinition,
        templates: &'a [Box<dyn GrowthTemplate>],
        systems: &'a [Box<dyn SimulationSystem>],
    ) -> Self {
        Self {
            definition,
            templates,
            systems,
            min_growth_scaling: 0.1,
        }
    }

    pub fn with_min_growth_scaling(mut self, min_growth_scaling: f64) -> Self {
        self.min_growth_scaling = min_growth_scaling;
        self
    }

    pub fn validate(&self) -> ValidationReport {
        let mut report = ValidationReport::default();
        let names = Names::collect(self);
        self.check_creators(&names, &mut report);
        self.check_pressures(&names, &mut report);
        self.check_registries(&names, &mut report);
        self.check_component_contracts(&names, &mut report);
        self.check_eras(&names, &mut report);
        report
    }

    fn check_creators(&self, names: &Names, report: &mut ValidationReport) {
        for kind in &self.definition.domain.entity_kinds {
            let creators = self
                .definition
                .registries
                .iter()
                .filter(|registry| registry.kind == kind.kind)
                .map(|registry| registry.creators.len())
                .sum::<usize>();
            if creators == 0 {
                report
                    .errors
                    .push(format!("entity kind {} has no creators", kind.kind));
            }
        }
        for registry in &self.definition.registries {
            for creator in &registry.creators {
                if !names.templates.contains(creator.template_id.as_str()) {
                    report.errors.push(format!(
                        "registry {} names unknown creator template {}",
                        registry.label(),
                        creator.template_id
                    ));
                }
            }
        }
    }

    fn check_pressures(&self, names: &Names, report: &mut ValidationReport) {
        for pressure in &self.definition.pressures {
            let id = &pressure.id;
            let Some(contract) = &pressure.contract else {
                report
                    .errors
                    .push(format!("pressure {id} declares no sources or sinks"));
                continue;
            };
            if contract.sources.is_empty() {
                report.errors.push(format!("pressure {id} has no sources"));
            }
            if contract.sinks.is_empty() {
                report
                    .errors
                    .push(format!("pressure {id} has no sinks and would saturate"));
            }
            for flow in contract.sources.iter().chain(&contract.sinks) {
                let component = flow.component.as_str();
                if component != DECAY_COMPONENT && !names.any_component(component) {
                    report.errors.push(format!(
                        "pressure {id} references unknown component {component}"
                    ));
                }
            }
            if let Some(equilibrium) = &contract.equilibrium {
                let (low, high) = equilibrium.expected_range;
                let in_bounds = |value: f64| (PRESSURE_MIN..=PRESSURE_MAX).contains(&value);
                if !in_bounds(low) || !in_bounds(high) {
                    report.errors.push(format!(
                        "pressure {id} equilibrium range [{low}, {high}] outside [0, 100]"
                    ));
                } else if low > high {
                    report.errors.push(format!(
                        "pressure {id} equilibrium range [{low}, {high}] is inverted"
                    ));
                } else {
                    let predicted = predicted_equilibrium(pressure, self.min_growth_scaling);
                    if predicted < low * 0.8 || predicted > high * 1.2 {
                        report.warnings.push(format!(
                            "pressure {id} predicted equilibrium {predicted:.1} diverges from declared range [{low}, {high}]"
                        ));
                    }
                }
            }
        }
    }

    fn check_registries(&self, names: &Names, report: &mut ValidationReport) {
        for registry in &self.definition.registries {
            let label = registry.label();
            if !names.entity_kinds.contains(registry.kind.as_str()) {
                report
                    .errors
                    .push(format!("registry {label} names unknown entity kind"));
            }
            let prominence = &registry.expected_distribution.prominence_distribution;
            if !prominence.is_empty() {
                let sum: f64 = prominence.values().sum();
                if (sum - 1.0).abs() > PROMINENCE_SUM_TOLERANCE {
                    report.errors.push(format!(
                        "registry {label} prominence distribution sums to {sum:.3}, expected 1.0"
                    ));
                }
            }
            for modifier in &registry.modifiers {
                if !names.systems.contains(modifier.system_id.as_str()) {
                    report.errors.push(format!(
                        "registry {label} names unknown modifier system {}",
                        modifier.system_id
                    ));
                }
            }
            if let Some(lineage) = &registry.lineage {
                if !names.relationship_kinds.contains(lineage.relationship_kind.as_str()) {
                    report.errors.push(format!(
                        "registry {label} lineage uses unknown relationship kind {}",
                        lineage.relationship_kind
                    ));
                }
                if !names.entity_kinds.contains(lineage.ancestor.kind.as_str()) {
                    report.errors.push(format!(
                        "registry {label} lineage selects unknown entity kind {}",
                        lineage.ancestor.kind
                    ));
                }
            }
            if let Some(target) = registry.expected_distribution.target_count {
                let capacity = registry.estimated_capacity();
                if (capacity as f64) < target as f64 / 2.0 {
                    report.warnings.push(format!(
                        "registry {label} creation capacity {capacity} is under half of target {target}"
                    ));
                }
            }
        }
    }

    fn check_component_contracts(&self, names: &Names, report: &mut ValidationReport) {
        for template in self.templates {
            let id = template.id();
            match template.contract() {
                Some(contract) => check_contract("template", id, contract, names, report),
                None => report
                    .warnings
                    .push(format!("template {id} has no contract")),
            }
            if let Some(metadata) = template.metadata() {
                for produced in &metadata.produces.entity_kinds {
                    if !names.entity_kinds.contains(produced.kind.as_str()) {
                        report.errors.push(format!(
                            "template {id} produces unknown entity kind {}",
                            produced.kind
                        ));
                    }
                }
            }
        }
        for system in self.systems {
            let id = system.id();
            match system.contract() {
                Some(contract) => check_contract("system", id, contract, names, report),
                None => report.warnings.push(format!("system {id} has no contract")),
            }
        }
    }

    fn check_eras(&self, names: &Names, report: &mut ValidationReport) {
        if self.definition.eras.is_empty() {
            report.errors.push("no eras configured".to_string());
        }
        for era in &self.definition.eras {
            for template in era.template_weights.keys() {
                if !names.templates.contains(template.as_str()) {
                    report.warnings.push(format!(
                        "era {} weights unknown template {template}",
                        era.id
                    ));
                }
            }
            for system in era.system_modifiers.keys() {
                if !names.systems.contains(system.as_str()) {
                    report
                        .warnings
                        .push(format!("era {} modifies unknown system {system}", era.id));
                }
            }
            for pressure in era.pressure_modifiers.keys() {
                if !names.pressures.contains(pressure.as_str()) {
                    report.warnings.push(format!(
                        "era {} modifies unknown pressure {pressure}",
                        era.id
                    ));
                }
            }
        }
    }
}

fn check_contract(
    role: &str,
    id: &str,
    contract: &ComponentContract,
    names: &Names,
    report: &mut ValidationReport,
) {
    if let Some(enabled_by) = &contract.enabled_by {
        for threshold in &enabled_by.pressures {
            if !names.pressures.contains(threshold.pressure_id.as_str()) {
                report.errors.push(format!(
                    "{role} {id} is enabled by unknown pressure {}",
                    threshold.pressure_id
                ));
            }
        }
        for condition in &enabled_by.entity_counts {
            if !names.entity_kinds.contains(condition.kind.as_str()) {
                report.errors.push(format!(
                    "{role} {id} is enabled by unknown entity kind {}",
                    condition.kind
                ));
            }
        }
    }
    for effect in &contract.affects.entities {
        if !names.entity_kinds.contains(effect.kind.as_str()) {
            report.errors.push(format!(
                "{role} {id} affects unknown entity kind {}",
                effect.kind
            ));
        }
    }
    for effect in &contract.affects.relationships {
        if !names.relationship_kinds.contains(effect.kind.as_str()) {
            report.errors.push(format!(
                "{role} {id} affects unknown relationship kind {}",
                effect.kind
            ));
        }
    }
    for effect in &contract.affects.pressures {
        if !names.pressures.contains(effect.pressure_id.as_str()) {
            report.errors.push(format!(
                "{role} {id} affects unknown pressure {}",
                effect.pressure_id
            ));
        }
    }
}

struct Names<'a> {
    templates: BTreeSet<&'a str>,
    systems: BTreeSet<&'a str>,
    pressures: BTreeSet<&'a str>,
    entity_kinds: BTreeSet<&'a str>,
    relationship_kinds: BTreeSet<&'a str>,
}

impl<'a> Names<'a> {
    fn collect(validator: &FrameworkValidator<'a>) -> Self {
        let definition = validator.definition;
        Self {
            templates: validator.templates.iter().map(|template| template.id()).collect(),
            systems: validator.systems.iter().map(|system| system.id()).collect(),
            pressures: definition
                .pressures
                .iter()
                .map(|pressure| pressure.id.as_str())
                .collect(),
            entity_kinds: definition.domain.kind_names().collect(),
            relationship_kinds: definition
                .domain
                .relationship_kinds
                .iter()
                .map(|kind| kind.kind.as_str())
                .collect(),
        }
    }

    fn any_component(&self, id: &str) -> bool {
        self.templates.contains(id) || self.systems.contains(id) || self.pressures.contains(id)
    }
}
