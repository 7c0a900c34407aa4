//! Storage notifications, change-stream batches and the router that hands
//! them to the lifecycle handlers.

use crate::attributes::{marshal_item, unmarshal_item, Item};
use crate::error::PipelineError;
use crate::handlers::embedding_builder::{BatchReport, EmbeddingBuilder};
use crate::handlers::embedding_finalizer::{EmbeddingFinalizer, FinalizeOutcome};
use crate::handlers::upload_finalizer::{UploadFinalizer, UploadOutcome};
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use serde_with::skip_serializing_none;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

pub const OBJECT_CREATED: &str = "Object Created";
pub const STORAGE_SOURCE: &str = "aws.s3";

pub const UPLOAD_KEY_PATTERN: &str = "*/data/*.pdf";
pub const VECTOR_INDEX_KEY_PATTERN: &str = "*/vector/faiss.index";

/// EventBridge-shaped storage notification.
#[skip_serializing_none]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StorageEvent {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(rename = "detail-type")]
    pub detail_type: String,
    pub source: String,
    #[serde(default)]
    pub time: Option<String>,
    #[serde(default)]
    pub detail: Value,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ObjectCreatedDetail {
    pub bucket: BucketRef,
    pub object: ObjectRef,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct BucketRef {
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ObjectRef {
    pub key: String,
    #[serde(default)]
    pub size: Option<u64>,
}

impl StorageEvent {
    pub fn object_created(bucket: &str, key: &str, size: u64) -> Self {
        Self {
            id: Some(uuid::Uuid::now_v7().to_string()),
            detail_type: OBJECT_CREATED.to_string(),
            source: STORAGE_SOURCE.to_string(),
            time: Some(chrono::Utc::now().to_rfc3339()),
            detail: json!({
                "bucket": { "name": bucket },
                "object": { "key": key, "size": size },
            }),
        }
    }

    pub fn object(&self) -> Result<ObjectCreatedDetail, PipelineError> {
        serde_json::from_value(self.detail.clone())
            .map_err(|error| {
                PipelineError::MalformedEvent(format!("storage event detail: {error}"))
            })
    }
}

/// Batch delivered by the table change stream.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct StreamBatch {
    #[serde(rename = "Records", default)]
    pub records: Vec<StreamRecord>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamRecord {
    #[serde(rename = "eventName")]
    pub event_name: String,
    pub dynamodb: StreamChange,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct StreamChange {
    #[serde(rename = "NewImage", default, skip_serializing_if = "Option::is_none")]
    pub new_image: Option<Value>,
    #[serde(rename = "OldImage", default, skip_serializing_if = "Option::is_none")]
    pub old_image: Option<Value>,
}

impl StreamRecord {
    pub fn insert(item: &Item) -> Self {
        Self::change("INSERT", None, item)
    }

    pub fn modify(old: &Item, new: &Item) -> Self {
        Self::change("MODIFY", Some(old), new)
    }

    fn change(event_name: &str, old: Option<&Item>, new: &Item) -> Self {
        Self {
            event_name: event_name.to_string(),
            dynamodb: StreamChange {
                new_image: Some(marshal_item(new)),
                old_image: old.map(marshal_item),
            },
        }
    }

    pub fn is_insert(&self) -> bool {
        self.event_name == "INSERT"
    }

    pub fn new_image(&self) -> Result<Option<Item>, PipelineError> {
        self.dynamodb
            .new_image
            .as_ref()
            .map(|image| unmarshal_item(image).map_err(PipelineError::MalformedEvent))
            .transpose()
    }
}

/// EventBridge wildcard: `*` matches any run of characters, `/` included.
#[derive(Debug, Clone)]
pub struct KeyPattern {
    raw: String,
    regex: Regex,
}

impl KeyPattern {
    pub fn new(pattern: &str) -> Result<Self, PipelineError> {
        let body = pattern
            .split('*')
            .map(regex::escape)
            .collect::<Vec<_>>()
            .join(".*");
        let regex = Regex::new(&format!("^{body}$"))
            .map_err(|error| PipelineError::MalformedEvent(format!("pattern {pattern}: {error}")))?;
        Ok(Self {
            raw: pattern.to_string(),
            regex,
        })
    }

    pub fn matches(&self, key: &str) -> bool {
        self.regex.is_match(key)
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum EventOutcome {
    Upload(UploadOutcome),
    Embeddings(BatchReport),
    Finalized(FinalizeOutcome),
    Ignored { ignored: String },
}

/// Dispatches events to the handler whose key pattern matches. No retries:
/// a failed event is reported to the caller and dropped.
pub struct EventRouter {
    upload_pattern: KeyPattern,
    vector_pattern: KeyPattern,
    upload_finalizer: Arc<UploadFinalizer>,
    embedding_builder: Arc<EmbeddingBuilder>,
    embedding_finalizer: Arc<EmbeddingFinalizer>,
}

impl EventRouter {
    pub fn new(
        upload_finalizer: Arc<UploadFinalizer>,
        embedding_builder: Arc<EmbeddingBuilder>,
        embedding_finalizer: Arc<EmbeddingFinalizer>,
    ) -> Result<Self, PipelineError> {
        Ok(Self {
            upload_pattern: KeyPattern::new(UPLOAD_KEY_PATTERN)?,
            vector_pattern: KeyPattern::new(VECTOR_INDEX_KEY_PATTERN)?,
            upload_finalizer,
            embedding_builder,
            embedding_finalizer,
        })
    }

    pub fn embedding_builder(&self) -> &Arc<EmbeddingBuilder> {
        &self.embedding_builder
    }

    pub async fn route_storage(&self, event: &StorageEvent) -> Result<EventOutcome, PipelineError> {
        if event.detail_type != OBJECT_CREATED {
            debug!(detail_type = %event.detail_type, "ignoring storage event");
            return Ok(EventOutcome::Ignored {
                ignored: event.detail_type.clone(),
            });
        }
        let key = event.object()?.object.key;

        if self.upload_pattern.matches(&key) {
            self.upload_finalizer.handle(event).await.map(EventOutcome::Upload)
        } else if self.vector_pattern.matches(&key) {
            self.embedding_finalizer.handle(event).await.map(EventOutcome::Finalized)
        } else {
            debug!(%key, "no handler for object key");
            Ok(EventOutcome::Ignored { ignored: key })
        }
    }

    pub async fn route_stream(&self, batch: &StreamBatch) -> Result<EventOutcome, PipelineError> {
        self.embedding_builder
            .handle_batch(batch)
            .await
            .map(EventOutcome::Embeddings)
    }

    pub async fn dispatch(&self, event: &LocalEvent) -> Result<EventOutcome, PipelineError> {
        match event {
            LocalEvent::Storage(storage) => self.route_storage(storage).await,
            LocalEvent::Stream(record) => {
                let batch = StreamBatch {
                    records: vec![record.clone()],
                };
                self.route_stream(&batch).await
            }
        }
    }
}

/// Notifications emitted by the in-memory backends.
#[derive(Debug, Clone, PartialEq)]
pub enum LocalEvent {
    Storage(StorageEvent),
    Stream(StreamRecord),
}

pub type LocalEventSender = mpsc::UnboundedSender<LocalEvent>;

pub fn local_event_channel() -> (LocalEventSender, mpsc::UnboundedReceiver<LocalEvent>) {
    mpsc::unbounded_channel()
}

/// Feeds locally emitted events into the router, one at a time, at most once.
pub struct LocalEventBus {
    receiver: mpsc::UnboundedReceiver<LocalEvent>,
    router: Arc<EventRouter>,
}

impl LocalEventBus {
    pub fn new(receiver: mpsc::UnboundedReceiver<LocalEvent>, router: Arc<EventRouter>) -> Self {
        Self { receiver, router }
    }

    pub async fn run(mut self) {
        info!("local event bus started");
        while let Some(event) = self.receiver.recv().await {
            self.deliver(event).await;
        }
        info!("local event bus stopped");
    }

    /// Deliver everything queued so far, including events emitted while
    /// draining. Returns the number of events delivered.
    pub async fn drain(&mut self) -> usize {
        let mut delivered = 0;
        while let Ok(event) = self.receiver.try_recv() {
            self.deliver(event).await;
            delivered += 1;
        }
        delivered
    }

    async fn deliver(&self, event: LocalEvent) {
        match self.router.dispatch(&event).await {
            Ok(outcome) => debug!(?outcome, "event handled"),
            Err(failure) if failure.is_client_error() => {
                warn!(error = %failure, ?event, "event rejected, dropping");
            }
            Err(failure) => error!(error = %failure, ?event, "event failed, dropping"),
        }
    }
}
