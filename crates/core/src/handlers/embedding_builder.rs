use crate::attributes::string_attr;
use crate::chunking::ChunkingConfig;
use crate::error::PipelineError;
use crate::events::{StreamBatch, StreamRecord};
use crate::ingest::{build_index, upload_artifacts};
use crate::models::{DocumentId, DocumentStatus, FILE_PARTITION};
use crate::repository::{parse_record, DocumentRepository};
use crate::traits::{EmbeddingModel, ObjectStore};
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info};

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct BatchReport {
    pub processed: Vec<String>,
    pub skipped: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BuildSummary {
    pub document_id: String,
    pub pages: usize,
    pub chunks: usize,
    pub artifacts: Vec<String>,
    pub source_sha256: String,
}

/// Turns a freshly recorded document into vector index artifacts. The status
/// is left alone: the finalizer moves it once `faiss.index` lands.
pub struct EmbeddingBuilder {
    store: Arc<dyn ObjectStore>,
    repository: DocumentRepository,
    embedder: Arc<dyn EmbeddingModel>,
    chunking: ChunkingConfig,
}

impl EmbeddingBuilder {
    pub fn new(
        store: Arc<dyn ObjectStore>,
        repository: DocumentRepository,
        embedder: Arc<dyn EmbeddingModel>,
        chunking: ChunkingConfig,
    ) -> Self {
        Self {
            store,
            repository,
            embedder,
            chunking,
        }
    }

    /// Only inserts of `FILE` records waiting for embeddings qualify.
    pub fn qualifies(record: &StreamRecord) -> Result<Option<DocumentId>, PipelineError> {
        if !record.is_insert() {
            return Ok(None);
        }
        let Some(image) = record.new_image()? else {
            return Ok(None);
        };
        if string_attr(&image, "pk") != Some(FILE_PARTITION)
            || string_attr(&image, "status") != Some(DocumentStatus::PendingEmbeddings.as_str())
        {
            return Ok(None);
        }

        let document = parse_record(image)?;
        document.id().map(Some).map_err(PipelineError::MalformedRecord)
    }

    /// Records run one after another; the first failure aborts the batch.
    pub async fn handle_batch(&self, batch: &StreamBatch) -> Result<BatchReport, PipelineError> {
        let mut report = BatchReport::default();
        for record in &batch.records {
            match Self::qualifies(record)? {
                Some(id) => {
                    self.build(&id).await?;
                    report.processed.push(id.to_string());
                }
                None => {
                    debug!(event_name = %record.event_name, "stream record skipped");
                    report.skipped += 1;
                }
            }
        }
        Ok(report)
    }

    pub async fn build(&self, id: &DocumentId) -> Result<BuildSummary, PipelineError> {
        let started = Instant::now();
        let key = id.source_object_key();
        let pdf = self
            .store
            .get_object(&key)
            .await?
            .filter(|body| !body.is_empty())
            .ok_or_else(|| PipelineError::EmptyObject { key: key.clone() })?;

        let build = build_index(id, pdf, self.embedder.as_ref(), self.chunking).await?;
        let artifacts = upload_artifacts(self.store.as_ref(), id, &build.index).await?;

        info!(
            document_id = %id,
            pages = build.page_count,
            chunks = build.index.len(),
            text_chars = build.text_chars,
            model = %self.embedder.model_id(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "embeddings built"
        );
        Ok(BuildSummary {
            document_id: id.to_string(),
            pages: build.page_count,
            chunks: build.index.len(),
            artifacts,
            source_sha256: build.source_sha256,
        })
    }

    /// Manual rerun for a document stuck at `PENDING_EMBEDDINGS`.
    pub async fn reprocess(&self, id: &DocumentId) -> Result<BuildSummary, PipelineError> {
        let record = self
            .repository
            .get(id)
            .await?
            .ok_or_else(|| PipelineError::DocumentNotFound(id.to_string()))?;
        if record.status != DocumentStatus::PendingEmbeddings {
            return Err(PipelineError::InvalidTransition {
                from: record.status,
                to: DocumentStatus::PendingEmbeddings,
            });
        }
        info!(document_id = %id, "reprocessing document");
        self.build(id).await
    }
}
