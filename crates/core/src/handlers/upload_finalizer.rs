use crate::error::PipelineError;
use crate::events::{KeyPattern, StorageEvent, UPLOAD_KEY_PATTERN};
use crate::models::{DocumentId, DocumentRecord, DocumentStatus};
use crate::presign::{META_DOCUMENT_ID, META_IDEMPOTENCY_KEY, META_NAME, META_SIZE};
use crate::repository::{DocumentRepository, IdempotencyClaim};
use crate::traits::{ObjectStore, PutCondition};
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum UploadOutcome {
    Recorded {
        document_id: String,
        status: DocumentStatus,
        overwritten: bool,
    },
    Duplicate {
        document_id: String,
        original: String,
    },
    Skipped {
        key: String,
    },
}

/// Records a document once its PDF lands in the bucket.
pub struct UploadFinalizer {
    store: Arc<dyn ObjectStore>,
    repository: DocumentRepository,
    pattern: KeyPattern,
    dedupe: bool,
}

impl UploadFinalizer {
    pub fn new(
        store: Arc<dyn ObjectStore>,
        repository: DocumentRepository,
        dedupe: bool,
    ) -> Result<Self, PipelineError> {
        Ok(Self {
            store,
            repository,
            pattern: KeyPattern::new(UPLOAD_KEY_PATTERN)?,
            dedupe,
        })
    }

    pub async fn handle(&self, event: &StorageEvent) -> Result<UploadOutcome, PipelineError> {
        let detail = event.object()?;
        let key = detail.object.key;
        if !self.pattern.matches(&key) {
            return Ok(UploadOutcome::Skipped { key });
        }
        if detail.bucket.name != self.store.bucket() {
            return Err(PipelineError::MalformedEvent(format!(
                "event for bucket {}, expected {}",
                detail.bucket.name,
                self.store.bucket()
            )));
        }

        let head = self
            .store
            .head_object(&key)
            .await?
            .ok_or_else(|| PipelineError::MalformedEvent(format!("object {key} does not exist")))?;
        let meta = |name: &str| {
            head.metadata
                .get(name)
                .map(|value| value.trim())
                .filter(|value| !value.is_empty())
                .ok_or_else(|| {
                    PipelineError::MalformedEvent(format!("object {key} has no {name} metadata"))
                })
        };

        let key_id = DocumentId::from_object_key(&key).map_err(PipelineError::MalformedKey)?;
        let meta_id =
            DocumentId::parse(meta(META_DOCUMENT_ID)?).map_err(PipelineError::MalformedEvent)?;
        if meta_id != key_id {
            return Err(PipelineError::MalformedEvent(format!(
                "metadata id {meta_id} does not match key {key}"
            )));
        }
        let name = meta(META_NAME)?.to_string();
        let size: u64 = meta(META_SIZE)?
            .parse()
            .map_err(|_| {
                PipelineError::MalformedEvent(format!("object {key} has a non-numeric size"))
            })?;
        if size != head.content_length {
            return Err(PipelineError::MalformedEvent(format!(
                "object {key} is {} bytes, metadata says {size}",
                head.content_length
            )));
        }

        if self.dedupe {
            if let Some(idempotency_key) = head.metadata.get(META_IDEMPOTENCY_KEY) {
                let claim = self
                    .repository
                    .claim_idempotency_key(idempotency_key, &key_id)
                    .await?;
                if let IdempotencyClaim::Duplicate { original } = claim {
                    warn!(document_id = %key_id, %original, "duplicate upload dropped");
                    return Ok(UploadOutcome::Duplicate {
                        document_id: key_id.to_string(),
                        original,
                    });
                }
            }
        }

        let condition = if self.dedupe {
            PutCondition::IfAbsent
        } else {
            PutCondition::Overwrite
        };
        let record =
            DocumentRecord::new(&key_id, key.as_str(), name, DocumentStatus::PendingEmbeddings);
        let written = self.repository.create(&record, condition).await?;
        if written.from.is_some() {
            warn!(document_id = %key_id, "upload notification re-delivered, record overwritten");
        }
        info!(document_id = %key_id, %key, size, "upload recorded");

        Ok(UploadOutcome::Recorded {
            document_id: key_id.to_string(),
            status: record.status,
            overwritten: written.from.is_some(),
        })
    }
}
