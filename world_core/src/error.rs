use thiserror::Error;
use world_schema::EntityId;

use crate::pressure::PressureLoadError;
use crate::validator::ValidationReport;

/// Invalid graph operations that cannot be expressed as a plain `false`.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum GraphError {
    #[error("cannot create {kind} without coordinates")]
    MissingCoordinates { kind: String },
    #[error("no name supplied for {kind} and no name generator is configured")]
    NameUnavailable { kind: String },
    #[error("duplicate entity id {id}")]
    DuplicateEntity { id: EntityId },
}

/// Failure raised by a growth template, simulation system or era rule.
#[derive(Debug, Error)]
pub enum ComponentError {
    #[error("{component}: no valid target")]
    NoTarget { component: String },
    #[error("{component}: {message}")]
    Failed { component: String, message: String },
    #[error(transparent)]
    Graph(#[from] GraphError),
}

impl ComponentError {
    pub fn failed(component: impl Into<String>, message: impl Into<String>) -> Self {
        ComponentError::Failed {
            component: component.into(),
            message: message.into(),
        }
    }
}

/// Fatal errors surfaced to the host before or while building the engine.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("framework validation failed:\n{0}")]
    Validation(ValidationReport),
    #[error(transparent)]
    Pressure(#[from] PressureLoadError),
    #[error("failed to load world seed: {0}")]
    Seed(#[source] GraphError),
    #[error("seed relationship {kind} {src} -> {dst} references a missing or duplicate entity")]
    SeedRelationship {
        kind: String,
        src: String,
        dst: String,
    },
}
