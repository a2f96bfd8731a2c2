use thiserror::Error;
use world_schema::{Prominence, Tags};

/// Everything a name generator may use to pick a name.
#[derive(Debug, Clone, Copy)]
pub struct NameRequest<'a> {
    pub kind: &'a str,
    pub subtype: &'a str,
    pub prominence: Prominence,
    pub tags: &'a Tags,
    pub culture: Option<&'a str>,
    pub context: Option<&'a str>,
}

/// Injected naming service. The graph calls it whenever an entity is
/// created without an explicit name.
pub trait NameGenerator {
    fn generate(&self, request: &NameRequest<'_>) -> Result<String, NamingError>;
}

#[derive(Debug, Error)]
pub enum NamingError {
    #[error("no naming profile for culture {culture}")]
    UnknownCulture { culture: String },
    #[error("name generation failed: {0}")]
    Failed(String),
}
