//! Typed event stream consumed by hosts.

use std::collections::BTreeMap;

use crossbeam_channel::{unbounded, Receiver, Sender};
use serde::Serialize;

use crate::contracts::TagHealthReport;
use crate::homeostasis::{LoopStatus, PopulationReport};
use crate::stats::{EngineWarning, EpochStats, SystemHealth, TemplateUsage, TerminationReason};
use crate::validator::ValidationReport;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SimulationEvent {
    Progress {
        epoch: u32,
        total_epochs: u32,
        tick: u64,
        entities: usize,
        relationships: usize,
    },
    Log {
        level: LogLevel,
        message: String,
    },
    Validation {
        valid: bool,
        report: ValidationReport,
    },
    EpochStart {
        epoch: u32,
        era: String,
        tick: u64,
    },
    EpochStats {
        stats: EpochStats,
    },
    GrowthPhase {
        epoch: u32,
        target: usize,
        attempts: usize,
        entities_created: usize,
        templates_used: Vec<String>,
    },
    PopulationReport {
        report: PopulationReport,
        feedback_loops: Vec<LoopStatus>,
    },
    TemplateUsage {
        usage: BTreeMap<String, TemplateUsage>,
    },
    TagHealth {
        report: TagHealthReport,
    },
    SystemHealth {
        health: BTreeMap<String, SystemHealth>,
    },
    Complete {
        reason: TerminationReason,
        tick: u64,
        epoch: u32,
        entities: usize,
        relationships: usize,
        warnings: Vec<EngineWarning>,
    },
    Error {
        message: String,
    },
}

impl SimulationEvent {
    pub fn label(&self) -> &'static str {
        match self {
            SimulationEvent::Progress { .. } => "progress",
            SimulationEvent::Log { .. } => "log",
            SimulationEvent::Validation { .. } => "validation",
            SimulationEvent::EpochStart { .. } => "epoch_start",
            SimulationEvent::EpochStats { .. } => "epoch_stats",
            SimulationEvent::GrowthPhase { .. } => "growth_phase",
            SimulationEvent::PopulationReport { .. } => "population_report",
            SimulationEvent::TemplateUsage { .. } => "template_usage",
            SimulationEvent::TagHealth { .. } => "tag_health",
            SimulationEvent::SystemHealth { .. } => "system_health",
            SimulationEvent::Complete { .. } => "complete",
            SimulationEvent::Error { .. } => "error",
        }
    }
}

pub trait SimulationEmitter {
    fn emit(&self, event: SimulationEvent);
}

#[derive(Debug, Clone, Default)]
pub struct NullEmitter;

impl SimulationEmitter for NullEmitter {
    fn emit(&self, _event: SimulationEvent) {}
}

/// Forwards events onto a crossbeam channel. A disconnected receiver is
/// ignored.
#[derive(Debug, Clone)]
pub struct ChannelEmitter {
    sender: Sender<SimulationEvent>,
}

impl ChannelEmitter {
    pub fn new(sender: Sender<SimulationEvent>) -> Self {
        Self { sender }
    }

    pub fn unbounded() -> (Self, Receiver<SimulationEvent>) {
        let (sender, receiver) = unbounded();
        (Self { sender }, receiver)
    }
}

impl SimulationEmitter for ChannelEmitter {
    fn emit(&self, event: SimulationEvent) {
        let _ = self.sender.send(event);
    }
}

/// Writes every event as a structured tracing record.
#[derive(Debug, Clone, Default)]
pub struct TracingEmitter;

impl SimulationEmitter for TracingEmitter {
    fn emit(&self, event: SimulationEvent) {
        let kind = event.label();
        match &event {
            SimulationEvent::Log { level, message } => match level {
                LogLevel::Debug => tracing::debug!(target: "worldgen::events", "{message}"),
                LogLevel::Info => tracing::info!(target: "worldgen::events", "{message}"),
                LogLevel::Warn => tracing::warn!(target: "worldgen::events", "{message}"),
                LogLevel::Error => tracing::error!(target: "worldgen::events", "{message}"),
            },
            SimulationEvent::Error { message } => {
                tracing::error!(target: "worldgen::events", error = %message, "event.error");
            }
            _ => {
                let payload = serde_json::to_string(&event).unwrap_or_default();
                tracing::info!(target: "worldgen::events", kind, payload = %payload, "event.emitted");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn channel_emitter_delivers_in_order() {
        let (emitter, receiver) = ChannelEmitter::unbounded();
        emitter.emit(SimulationEvent::EpochStart {
            epoch: 1,
            era: "dawn".to_string(),
            tick: 0,
        });
        emitter.emit(SimulationEvent::Error {
            message: "boom".to_string(),
        });
        let labels: Vec<_> = receiver.try_iter().map(|event| event.label()).collect();
        assert_eq!(labels, vec!["epoch_start", "error"]);
    }

    #[test]
    fn events_serialize_with_type_tag() {
        let event = SimulationEvent::Log {
            level: LogLevel::Warn,
            message: "budget".to_string(),
        };
        insta::assert_snapshot!(
            serde_json::to_string(&event).expect("serialize"),
            @r#"{"type":"log","level":"warn","message":"budget"}"#
        );
    }

    #[test]
    fn dropped_receiver_is_ignored() {
        let (emitter, receiver) = ChannelEmitter::unbounded();
        drop(receiver);
        emitter.emit(SimulationEvent::Error {
            message: "nobody listening".to_string(),
        });
    }
}
