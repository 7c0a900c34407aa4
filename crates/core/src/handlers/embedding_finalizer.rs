use crate::error::PipelineError;
use crate::events::{KeyPattern, StorageEvent, VECTOR_INDEX_KEY_PATTERN};
use crate::models::{DocumentId, DocumentStatus};
use crate::repository::DocumentRepository;
use serde::Serialize;
use tracing::info;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum FinalizeOutcome {
    Ready { document_id: String, changed: bool },
    Skipped { key: String },
}

/// Marks a document READY once its vector index is stored. The update is
/// keyed: an unknown id fails with `DocumentNotFound`.
pub struct EmbeddingFinalizer {
    repository: DocumentRepository,
    pattern: KeyPattern,
}

impl EmbeddingFinalizer {
    pub fn new(repository: DocumentRepository) -> Result<Self, PipelineError> {
        Ok(Self {
            repository,
            pattern: KeyPattern::new(VECTOR_INDEX_KEY_PATTERN)?,
        })
    }

    pub async fn handle(&self, event: &StorageEvent) -> Result<FinalizeOutcome, PipelineError> {
        let key = event.object()?.object.key;
        if !self.pattern.matches(&key) {
            return Ok(FinalizeOutcome::Skipped { key });
        }

        let id = DocumentId::from_object_key(&key).map_err(PipelineError::MalformedKey)?;
        let transition = self.repository.transition(&id, DocumentStatus::Ready).await?;
        info!(document_id = %id, changed = transition.changed(), "document ready");

        Ok(FinalizeOutcome::Ready {
            document_id: id.to_string(),
            changed: transition.changed(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::DocumentRecord;
    use crate::stores::MemoryDocumentTable;
    use crate::traits::PutCondition;
    use std::sync::Arc;

    async fn repository_with(id: &DocumentId, status: DocumentStatus) -> DocumentRepository {
        let repository = DocumentRepository::new(Arc::new(MemoryDocumentTable::default()));
        let record = DocumentRecord::new(id, id.source_object_key(), "report.pdf", status);
        repository
            .create(&record, PutCondition::Overwrite)
            .await
            .expect("create");
        repository
    }

    fn index_event(key: &str) -> StorageEvent {
        StorageEvent::object_created("pdf-bucket", key, 64)
    }

    #[tokio::test]
    async fn index_upload_marks_document_ready() {
        let id = DocumentId::parse("doc-1").expect("id");
        let repository = repository_with(&id, DocumentStatus::PendingEmbeddings).await;
        let finalizer = EmbeddingFinalizer::new(repository.clone()).expect("finalizer");

        let outcome = finalizer
            .handle(&index_event("doc-1/vector/faiss.index"))
            .await
            .expect("ready");
        assert_eq!(
            outcome,
            FinalizeOutcome::Ready {
                document_id: "doc-1".to_string(),
                changed: true
            }
        );
        let stored = repository.get(&id).await.expect("get").expect("exists");
        assert_eq!(stored.status, DocumentStatus::Ready);

        let again = finalizer
            .handle(&index_event("doc-1/vector/faiss.index"))
            .await
            .expect("redelivery");
        assert!(matches!(again, FinalizeOutcome::Ready { changed: false, .. }));
    }

    #[tokio::test]
    async fn unknown_document_fails_explicitly() {
        let repository = DocumentRepository::new(Arc::new(MemoryDocumentTable::default()));
        let finalizer = EmbeddingFinalizer::new(repository.clone()).expect("finalizer");

        let error = finalizer
            .handle(&index_event("ghost/vector/faiss.index"))
            .await
            .expect_err("unknown id");
        assert!(matches!(error, PipelineError::DocumentNotFound(ref id) if id == "ghost"));
        assert!(repository.list().await.expect("list").is_empty());
    }

    #[tokio::test]
    async fn pending_document_cannot_jump_to_ready() {
        let id = DocumentId::parse("doc-2").expect("id");
        let repository = repository_with(&id, DocumentStatus::Pending).await;
        let finalizer = EmbeddingFinalizer::new(repository).expect("finalizer");
        assert!(matches!(
            finalizer.handle(&index_event("doc-2/vector/faiss.index")).await,
            Err(PipelineError::InvalidTransition { .. })
        ));
    }

    #[tokio::test]
    async fn other_artifacts_are_skipped() {
        let repository = DocumentRepository::new(Arc::new(MemoryDocumentTable::default()));
        let finalizer = EmbeddingFinalizer::new(repository).expect("finalizer");
        let outcome = finalizer
            .handle(&index_event("doc-1/vector/docstore.json"))
            .await
            .expect("skipped");
        assert!(matches!(outcome, FinalizeOutcome::Skipped { .. }));
    }
}
