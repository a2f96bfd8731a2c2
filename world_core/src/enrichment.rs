//! Optional lore and image enrichment, queued as futures and driven only at
//! an explicit join barrier.

use std::sync::Arc;

use async_trait::async_trait;
use futures::future::{join_all, BoxFuture};
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, warn};
use world_schema::{EntityId, HardState, Prominence};

/// Snapshot of an entity taken when enrichment is requested.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EnrichmentSubject {
    pub id: EntityId,
    pub kind: String,
    pub subtype: String,
    pub name: String,
    pub prominence: Prominence,
    pub culture: Option<String>,
    pub tags: Vec<String>,
    pub relationships: Vec<String>,
}

impl EnrichmentSubject {
    pub fn from_entity(entity: &HardState) -> Self {
        Self {
            id: entity.id.clone(),
            kind: entity.kind.clone(),
            subtype: entity.subtype.clone(),
            name: entity.name.clone(),
            prominence: entity.prominence,
            culture: entity.culture.clone(),
            tags: entity.tags.keys().cloned().collect(),
            relationships: entity
                .links
                .iter()
                .filter(|link| link.is_active())
                .map(|link| format!("{} {}", link.kind, link.dst))
                .collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LoreRecord {
    pub entity: EntityId,
    pub name: String,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ImageRecord {
    pub entity: EntityId,
    pub prompt: String,
    pub uri: String,
}

#[derive(Debug, Error)]
pub enum EnrichmentError {
    #[error("enrichment service unavailable: {0}")]
    Unavailable(String),
    #[error("enrichment failed for {entity}: {message}")]
    Failed { entity: EntityId, message: String },
}

#[async_trait]
pub trait EnrichmentService: Send + Sync {
    async fn enrich(&self, batch: Vec<EnrichmentSubject>) -> Result<Vec<LoreRecord>, EnrichmentError>;
}

#[async_trait]
pub trait ImageGenerationService: Send + Sync {
    async fn generate(&self, subject: EnrichmentSubject) -> Result<ImageRecord, EnrichmentError>;
}

enum EnrichmentOutcome {
    Lore(Result<Vec<LoreRecord>, EnrichmentError>),
    Image(Result<ImageRecord, EnrichmentError>),
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct EnrichmentResults {
    pub lore: Vec<LoreRecord>,
    pub images: Vec<ImageRecord>,
    pub failures: usize,
}

pub struct EnrichmentQueue {
    lore: Option<Arc<dyn EnrichmentService>>,
    images: Option<Arc<dyn ImageGenerationService>>,
    batch_size: usize,
    pending: Vec<BoxFuture<'static, EnrichmentOutcome>>,
    results: EnrichmentResults,
}

impl Default for EnrichmentQueue {
    fn default() -> Self {
        Self::new(None, None, 8)
    }
}

impl EnrichmentQueue {
    pub fn new(
        lore: Option<Arc<dyn EnrichmentService>>,
        images: Option<Arc<dyn ImageGenerationService>>,
        batch_size: usize,
    ) -> Self {
        Self {
            lore,
            images,
            batch_size: batch_size.max(1),
            pending: Vec::new(),
            results: EnrichmentResults::default(),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.lore.is_some() || self.images.is_some()
    }

    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    /// Queue lore requests in batches. Nothing runs until [`flush`].
    ///
    /// [`flush`]: EnrichmentQueue::flush
    pub fn enqueue_lore(&mut self, subjects: Vec<EnrichmentSubject>) {
        let Some(service) = &self.lore else {
            return;
        };
        for batch in subjects.chunks(self.batch_size) {
            let service = Arc::clone(service);
            let batch = batch.to_vec();
            self.pending.push(Box::pin(async move {
                EnrichmentOutcome::Lore(service.enrich(batch).await)
            }));
        }
    }

    pub fn enqueue_image(&mut self, subject: EnrichmentSubject) {
        let Some(service) = &self.images else {
            return;
        };
        let service = Arc::clone(service);
        self.pending.push(Box::pin(async move {
            EnrichmentOutcome::Image(service.generate(subject).await)
        }));
    }

    /// Join barrier: drive every queued request to completion. Failures are
    /// logged and counted, never propagated.
    pub async fn flush(&mut self) -> usize {
        let pending = std::mem::take(&mut self.pending);
        let count = pending.len();
        for outcome in join_all(pending).await {
            match outcome {
                EnrichmentOutcome::Lore(Ok(records)) => self.results.lore.extend(records),
                EnrichmentOutcome::Image(Ok(record)) => self.results.images.push(record),
                EnrichmentOutcome::Lore(Err(err)) | EnrichmentOutcome::Image(Err(err)) => {
                    self.results.failures += 1;
                    warn!(target: "worldgen::enrichment", error = %err, "enrichment.failed");
                }
            }
        }
        debug!(target: "worldgen::enrichment", requests = count, "enrichment.flushed");
        count
    }

    pub fn results(&self) -> &EnrichmentResults {
        &self.results
    }

    pub fn take_results(&mut self) -> EnrichmentResults {
        std::mem::take(&mut self.results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::executor::block_on;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct CountingLore {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl EnrichmentService for CountingLore {
        async fn enrich(
            &self,
            batch: Vec<EnrichmentSubject>,
        ) -> Result<Vec<LoreRecord>, EnrichmentError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(batch
                .into_iter()
                .map(|subject| LoreRecord {
                    text: format!("{} endures", subject.name),
                    entity: subject.id,
                    name: subject.name,
                })
                .collect())
        }
    }

    struct OfflineImages;

    #[async_trait]
    impl ImageGenerationService for OfflineImages {
        async fn generate(&self, subject: EnrichmentSubject) -> Result<ImageRecord, EnrichmentError> {
            Err(EnrichmentError::Failed {
                entity: subject.id,
                message: "offline".to_string(),
            })
        }
    }

    fn subject(name: &str) -> EnrichmentSubject {
        EnrichmentSubject {
            id: EntityId::new(format!("npc_{name}")),
            kind: "npc".to_string(),
            subtype: "hero".to_string(),
            name: name.to_string(),
            prominence: Prominence::Renowned,
            culture: None,
            tags: Vec::new(),
            relationships: Vec::new(),
        }
    }

    #[test]
    fn nothing_runs_before_flush() {
        let lore = Arc::new(CountingLore::default());
        let mut queue = EnrichmentQueue::new(Some(lore.clone() as Arc<dyn EnrichmentService>), None, 2);
        queue.enqueue_lore(vec![subject("Ada"), subject("Bex"), subject("Cyr")]);
        assert_eq!(queue.pending(), 2);
        assert_eq!(lore.calls.load(Ordering::SeqCst), 0);

        assert_eq!(block_on(queue.flush()), 2);
        assert_eq!(lore.calls.load(Ordering::SeqCst), 2);
        assert_eq!(queue.pending(), 0);
        let names: Vec<_> = queue.results().lore.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, vec!["Ada", "Bex", "Cyr"]);
    }

    #[test]
    fn failures_are_counted_not_raised() {
        let images: Arc<dyn ImageGenerationService> = Arc::new(OfflineImages);
        let mut queue = EnrichmentQueue::new(None, Some(images), 4);
        queue.enqueue_image(subject("Ada"));
        block_on(queue.flush());
        let results = queue.take_results();
        assert_eq!(results.failures, 1);
        assert!(results.images.is_empty());
    }

    #[test]
    fn disabled_queue_ignores_requests() {
        let mut queue = EnrichmentQueue::default();
        assert!(!queue.is_enabled());
        queue.enqueue_lore(vec![subject("Ada")]);
        queue.enqueue_image(subject("Ada"));
        assert_eq!(queue.pending(), 0);
    }
}
