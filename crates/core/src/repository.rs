use crate::attributes::{string_attr, Item};
use crate::error::PipelineError;
use crate::models::{
    DocumentId, DocumentRecord, DocumentStatus, DocumentSummary, FILE_PARTITION, FILE_SORT_PREFIX,
    UPLOAD_KEY_PARTITION, UPLOAD_KEY_SORT_PREFIX,
};
use crate::traits::{DocumentTable, PutCondition, UpdateOutcome};
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, info};

const MAX_CREATE_ATTEMPTS: u32 = 3;

/// Result of a status write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub from: Option<DocumentStatus>,
    pub to: DocumentStatus,
}

impl Transition {
    pub fn changed(&self) -> bool {
        self.from != Some(self.to)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IdempotencyClaim {
    Claimed,
    /// The key already belongs to this document (re-delivered event).
    SameDocument,
    Duplicate { original: String },
}

/// Typed access to document records on top of a [`DocumentTable`]. All status
/// writes are checked against [`DocumentStatus::can_transition_to`].
#[derive(Clone)]
pub struct DocumentRepository {
    table: Arc<dyn DocumentTable>,
}

impl DocumentRepository {
    pub fn new(table: Arc<dyn DocumentTable>) -> Self {
        Self { table }
    }

    pub async fn get(&self, id: &DocumentId) -> Result<Option<DocumentRecord>, PipelineError> {
        self.table
            .get_item(FILE_PARTITION, &id.sort_key())
            .await?
            .map(parse_record)
            .transpose()
    }

    /// Insert (or overwrite) a record. A stored record that is already further
    /// along than `record.status` is never moved back.
    pub async fn create(
        &self,
        record: &DocumentRecord,
        condition: PutCondition,
    ) -> Result<Transition, PipelineError> {
        if !record.status.is_initial() {
            return Err(PipelineError::InvalidTransition {
                from: record.status,
                to: record.status,
            });
        }
        let id = record.id().map_err(PipelineError::MalformedRecord)?;
        let item = record_item(record)?;

        let mut attempts = 0;
        loop {
            attempts += 1;
            let previous = self.get(&id).await?.map(|existing| existing.status);
            let guarded = match previous {
                Some(_) if condition == PutCondition::IfAbsent => {
                    return Err(PipelineError::AlreadyExists(record.sk.clone()));
                }
                Some(from) if !from.can_transition_to(record.status) => {
                    return Err(PipelineError::InvalidTransition {
                        from,
                        to: record.status,
                    });
                }
                // The write only lands if nobody moved the record since the read.
                Some(from) => PutCondition::IfStatus(from.as_str()),
                None => PutCondition::IfAbsent,
            };

            match self.table.put_item(item.clone(), guarded).await {
                Ok(()) => {
                    info!(
                        document_id = %id,
                        from = ?previous.map(DocumentStatus::as_str),
                        to = %record.status,
                        "document record written"
                    );
                    return Ok(Transition {
                        from: previous,
                        to: record.status,
                    });
                }
                Err(PipelineError::AlreadyExists(_)) if attempts < MAX_CREATE_ATTEMPTS => {
                    debug!(document_id = %id, attempts, "record changed during write, re-reading");
                }
                Err(PipelineError::AlreadyExists(sort_key)) => {
                    return match previous {
                        Some(from) => Err(PipelineError::InvalidTransition {
                            from,
                            to: record.status,
                        }),
                        None => Err(PipelineError::AlreadyExists(sort_key)),
                    };
                }
                Err(error) => return Err(error),
            }
        }
    }

    /// Conditional status update keyed on the currently stored status.
    pub async fn transition(
        &self,
        id: &DocumentId,
        next: DocumentStatus,
    ) -> Result<Transition, PipelineError> {
        let current = self
            .get(id)
            .await?
            .ok_or_else(|| PipelineError::DocumentNotFound(id.to_string()))?;
        let from = current.status;

        if !from.can_transition_to(next) {
            return Err(PipelineError::InvalidTransition { from, to: next });
        }
        if from == next {
            debug!(document_id = %id, status = %next, "status already set");
            return Ok(Transition {
                from: Some(from),
                to: next,
            });
        }

        let outcome = self
            .table
            .update_attribute(
                FILE_PARTITION,
                &id.sort_key(),
                "status",
                from.as_str(),
                next.as_str(),
            )
            .await?;
        match outcome {
            UpdateOutcome::Updated => {
                info!(document_id = %id, from = %from, to = %next, "document status changed");
                Ok(Transition {
                    from: Some(from),
                    to: next,
                })
            }
            UpdateOutcome::Missing => Err(PipelineError::DocumentNotFound(id.to_string())),
            UpdateOutcome::Conflict { current } => {
                let observed = current
                    .as_deref()
                    .and_then(|raw| raw.parse::<DocumentStatus>().ok())
                    .unwrap_or(from);
                Err(PipelineError::InvalidTransition {
                    from: observed,
                    to: next,
                })
            }
        }
    }

    /// Every document in key order. One malformed record fails the whole call.
    pub async fn list(&self) -> Result<Vec<DocumentSummary>, PipelineError> {
        let items = self.table.query_prefix(FILE_PARTITION, FILE_SORT_PREFIX).await?;
        let mut summaries = Vec::with_capacity(items.len());
        let mut failures = Vec::new();

        for item in items {
            match parse_record(item).and_then(|record| {
                record.summary().map_err(PipelineError::MalformedRecord)
            }) {
                Ok(summary) => summaries.push(summary),
                Err(error) => failures.push(error.to_string()),
            }
        }

        if !failures.is_empty() {
            return Err(PipelineError::MalformedRecord(failures.join("; ")));
        }
        Ok(summaries)
    }

    /// Reserve an upload idempotency key for `id`.
    pub async fn claim_idempotency_key(
        &self,
        key: &str,
        id: &DocumentId,
    ) -> Result<IdempotencyClaim, PipelineError> {
        let sort_key = format!("{UPLOAD_KEY_SORT_PREFIX}{key}");
        let mut guard = Item::new();
        guard.insert("pk".to_string(), Value::String(UPLOAD_KEY_PARTITION.to_string()));
        guard.insert("sk".to_string(), Value::String(sort_key.clone()));
        guard.insert("document_id".to_string(), Value::String(id.to_string()));

        match self.table.put_item(guard, PutCondition::IfAbsent).await {
            Ok(()) => Ok(IdempotencyClaim::Claimed),
            Err(PipelineError::AlreadyExists(_)) => {
                let existing = self
                    .table
                    .get_item(UPLOAD_KEY_PARTITION, &sort_key)
                    .await?
                    .ok_or_else(|| PipelineError::Table(format!("guard {sort_key} vanished")))?;
                let original = string_attr(&existing, "document_id")
                    .ok_or_else(|| {
                        let message = format!("guard {sort_key} has no document_id");
                        PipelineError::MalformedRecord(message)
                    })?
                    .to_string();
                if original == id.as_str() {
                    Ok(IdempotencyClaim::SameDocument)
                } else {
                    Ok(IdempotencyClaim::Duplicate { original })
                }
            }
            Err(error) => Err(error),
        }
    }
}

pub fn record_item(record: &DocumentRecord) -> Result<Item, PipelineError> {
    match serde_json::to_value(record)? {
        Value::Object(item) => Ok(item),
        other => Err(PipelineError::MalformedRecord(format!("record is not an object: {other}"))),
    }
}

/// Shape check for a stored document item.
pub fn parse_record(item: Item) -> Result<DocumentRecord, PipelineError> {
    let sort_key = string_attr(&item, "sk").unwrap_or("<missing>").to_string();
    let record: DocumentRecord = serde_json::from_value(Value::Object(item))
        .map_err(|error| PipelineError::MalformedRecord(format!("{sort_key}: {error}")))?;

    if record.pk != FILE_PARTITION {
        return Err(PipelineError::MalformedRecord(format!(
            "{sort_key}: partition is {}",
            record.pk
        )));
    }
    record.id().map_err(PipelineError::MalformedRecord)?;
    Ok(record)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stores::MemoryDocumentTable;
    use serde_json::json;

    fn repository() -> (DocumentRepository, Arc<MemoryDocumentTable>) {
        let table = Arc::new(MemoryDocumentTable::default());
        (DocumentRepository::new(table.clone()), table)
    }

    fn record(id: &DocumentId, status: DocumentStatus) -> DocumentRecord {
        DocumentRecord::new(id, id.source_object_key(), "file.pdf", status)
    }

    #[tokio::test]
    async fn records_move_forward_only() {
        let (repository, _) = repository();
        let id = DocumentId::parse("doc-1").expect("id");

        let written = repository
            .create(&record(&id, DocumentStatus::PendingEmbeddings), PutCondition::Overwrite)
            .await
            .expect("created");
        assert_eq!(written.from, None);

        let ready = repository.transition(&id, DocumentStatus::Ready).await.expect("ready");
        assert!(ready.changed());

        let again = repository.transition(&id, DocumentStatus::Ready).await.expect("no-op");
        assert!(!again.changed());

        let error = repository
            .create(&record(&id, DocumentStatus::PendingEmbeddings), PutCondition::Overwrite)
            .await
            .expect_err("backward");
        assert!(matches!(
            error,
            PipelineError::InvalidTransition {
                from: DocumentStatus::Ready,
                to: DocumentStatus::PendingEmbeddings
            }
        ));
    }

    #[tokio::test]
    async fn pending_cannot_skip_to_ready() {
        let (repository, _) = repository();
        let id = DocumentId::parse("doc-2").expect("id");
        repository
            .create(&record(&id, DocumentStatus::Pending), PutCondition::Overwrite)
            .await
            .expect("created");

        assert!(matches!(
            repository.transition(&id, DocumentStatus::Ready).await,
            Err(PipelineError::InvalidTransition { .. })
        ));
    }

    #[tokio::test]
    async fn transition_of_unknown_document_fails() {
        let (repository, _) = repository();
        let id = DocumentId::parse("ghost").expect("id");
        assert!(matches!(
            repository.transition(&id, DocumentStatus::Ready).await,
            Err(PipelineError::DocumentNotFound(_))
        ));
    }

    #[tokio::test]
    async fn if_absent_rejects_second_insert() {
        let (repository, _) = repository();
        let id = DocumentId::parse("doc-3").expect("id");
        let first = record(&id, DocumentStatus::PendingEmbeddings);
        repository.create(&first, PutCondition::IfAbsent).await.expect("first");
        assert!(matches!(
            repository.create(&first, PutCondition::IfAbsent).await,
            Err(PipelineError::AlreadyExists(_))
        ));
    }

    #[tokio::test]
    async fn malformed_record_fails_the_listing() {
        let (repository, table) = repository();
        let id = DocumentId::parse("good").expect("id");
        repository
            .create(&record(&id, DocumentStatus::PendingEmbeddings), PutCondition::Overwrite)
            .await
            .expect("created");

        let broken: Item = serde_json::from_value(json!({
            "pk": "FILE",
            "sk": "FILE#broken",
            "name": "broken.pdf",
            "status": "UPLOADING"
        }))
        .expect("object");
        table.put_item(broken, PutCondition::Overwrite).await.expect("raw put");

        let error = repository.list().await.expect_err("malformed");
        assert_eq!(error.status_code(), 500);
        assert!(error.to_string().contains("FILE#broken"));
    }

    #[tokio::test]
    async fn idempotency_keys_are_claimed_once() {
        let (repository, _) = repository();
        let first = DocumentId::parse("first").expect("id");
        let second = DocumentId::parse("second").expect("id");

        assert_eq!(
            repository.claim_idempotency_key("k1", &first).await.expect("claim"),
            IdempotencyClaim::Claimed
        );
        assert_eq!(
            repository.claim_idempotency_key("k1", &first).await.expect("again"),
            IdempotencyClaim::SameDocument
        );
        assert_eq!(
            repository.claim_idempotency_key("k1", &second).await.expect("dup"),
            IdempotencyClaim::Duplicate {
                original: "first".to_string()
            }
        );
    }

    /// Moves the record to READY right after the first read, as a concurrent
    /// Embedding Finalizer would.
    struct FinalizeAfterRead {
        inner: Arc<MemoryDocumentTable>,
        fired: std::sync::atomic::AtomicBool,
    }

    #[async_trait::async_trait]
    impl DocumentTable for FinalizeAfterRead {
        async fn put_item(&self, item: Item, condition: PutCondition) -> Result<(), PipelineError> {
            self.inner.put_item(item, condition).await
        }

        async fn get_item(&self, pk: &str, sk: &str) -> Result<Option<Item>, PipelineError> {
            let item = self.inner.get_item(pk, sk).await?;
            if !self.fired.swap(true, std::sync::atomic::Ordering::SeqCst) {
                self.inner
                    .update_attribute(pk, sk, "status", "PENDING_EMBEDDINGS", "READY")
                    .await?;
            }
            Ok(item)
        }

        async fn update_attribute(
            &self,
            pk: &str,
            sk: &str,
            attribute: &str,
            expected: &str,
            next: &str,
        ) -> Result<UpdateOutcome, PipelineError> {
            self.inner.update_attribute(pk, sk, attribute, expected, next).await
        }

        async fn query_prefix(
            &self,
            pk: &str,
            sort_prefix: &str,
        ) -> Result<Vec<Item>, PipelineError> {
            self.inner.query_prefix(pk, sort_prefix).await
        }
    }

    #[tokio::test]
    async fn overwrite_does_not_undo_a_concurrent_ready() {
        let inner = Arc::new(MemoryDocumentTable::default());
        let id = DocumentId::parse("doc-race").expect("id");
        DocumentRepository::new(inner.clone())
            .create(&record(&id, DocumentStatus::PendingEmbeddings), PutCondition::Overwrite)
            .await
            .expect("created");

        let racing = DocumentRepository::new(Arc::new(FinalizeAfterRead {
            inner: inner.clone(),
            fired: Default::default(),
        }));
        let error = racing
            .create(&record(&id, DocumentStatus::PendingEmbeddings), PutCondition::Overwrite)
            .await
            .expect_err("stale overwrite");
        assert!(matches!(
            error,
            PipelineError::InvalidTransition {
                from: DocumentStatus::Ready,
                to: DocumentStatus::PendingEmbeddings
            }
        ));

        let stored = DocumentRepository::new(inner).get(&id).await.expect("get").expect("record");
        assert_eq!(stored.status, DocumentStatus::Ready);
    }
}
