//! Offline enrichment services. They compose text from the entity snapshot
//! instead of calling out to a model, which keeps runs reproducible.

use async_trait::async_trait;
use world_core::{
    EnrichmentError, EnrichmentService, EnrichmentSubject, ImageGenerationService, ImageRecord,
    LoreRecord,
};
use world_schema::Prominence;

#[derive(Debug, Clone, Default)]
pub struct ChronicleLore;

impl ChronicleLore {
    fn describe(subject: &EnrichmentSubject) -> String {
        let standing = match subject.prominence {
            Prominence::Forgotten => "half-forgotten",
            Prominence::Marginal => "little-known",
            Prominence::Recognized => "well-known",
            Prominence::Renowned => "renowned",
            Prominence::Mythic => "legendary",
        };
        let people = subject
            .culture
            .as_deref()
            .map(|culture| format!(" of the {culture} folk"))
            .unwrap_or_default();
        let mut text = format!(
            "{} is a {standing} {} {}{people}.",
            subject.name, subject.subtype, subject.kind
        );
        let traits: Vec<&str> = subject
            .tags
            .iter()
            .map(String::as_str)
            .filter(|tag| !matches!(*tag, "highland" | "coastal" | "riverside"))
            .collect();
        if !traits.is_empty() {
            text.push_str(&format!(" Chroniclers call it {}.", traits.join(", ")));
        }
        if let Some(first) = subject.relationships.first() {
            text.push_str(&format!(" It is bound by {first}"));
            if subject.relationships.len() > 1 {
                text.push_str(&format!(" and {} other ties", subject.relationships.len() - 1));
            }
            text.push('.');
        }
        text
    }
}

#[async_trait]
impl EnrichmentService for ChronicleLore {
    async fn enrich(
        &self,
        batch: Vec<EnrichmentSubject>,
    ) -> Result<Vec<LoreRecord>, EnrichmentError> {
        Ok(batch
            .into_iter()
            .map(|subject| LoreRecord {
                text: Self::describe(&subject),
                entity: subject.id,
                name: subject.name,
            })
            .collect())
    }
}

/// Produces image prompts and a relative path where a renderer would write
/// the picture.
#[derive(Debug, Clone)]
pub struct PromptImages {
    root: String,
}

impl PromptImages {
    pub fn new(root: impl Into<String>) -> Self {
        Self { root: root.into() }
    }
}

impl Default for PromptImages {
    fn default() -> Self {
        Self::new("images")
    }
}

#[async_trait]
impl ImageGenerationService for PromptImages {
    async fn generate(&self, subject: EnrichmentSubject) -> Result<ImageRecord, EnrichmentError> {
        if subject.name.trim().is_empty() {
            return Err(EnrichmentError::Failed {
                entity: subject.id,
                message: "cannot illustrate an unnamed entity".to_string(),
            });
        }
        let style = match subject.kind.as_str() {
            "npc" => "portrait",
            "location" => "landscape",
            _ => "emblem",
        };
        Ok(ImageRecord {
            prompt: format!(
                "{style} of {}, a {} {}, {}",
                subject.name,
                subject.prominence,
                subject.subtype,
                subject.tags.join(", ")
            ),
            uri: format!("{}/{}.png", self.root, subject.id),
            entity: subject.id,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::executor::block_on;
    use world_schema::EntityId;

    fn subject() -> EnrichmentSubject {
        EnrichmentSubject {
            id: EntityId::new("npc_3"),
            kind: "npc".to_string(),
            subtype: "hero".to_string(),
            name: "Brai Stonebrow".to_string(),
            prominence: Prominence::Renowned,
            culture: Some("highland".to_string()),
            tags: vec!["heroic".to_string(), "highland".to_string()],
            relationships: vec!["resident_of location_0".to_string()],
        }
    }

    #[test]
    fn lore_is_composed_from_the_snapshot() {
        let records = block_on(ChronicleLore.enrich(vec![subject()])).unwrap();
        insta::assert_snapshot!(records[0].text, @"Brai Stonebrow is a renowned hero npc of the highland folk. Chroniclers call it heroic. It is bound by resident_of location_0.");
    }

    #[test]
    fn image_paths_use_entity_ids() {
        let record = block_on(PromptImages::default().generate(subject())).unwrap();
        assert_eq!(record.uri, "images/npc_3.png");
        assert!(record.prompt.starts_with("portrait of Brai Stonebrow"));
    }
}
