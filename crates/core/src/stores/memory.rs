use crate::attributes::{string_attr, Item};
use crate::error::PipelineError;
use crate::events::{LocalEvent, LocalEventSender, StorageEvent, StreamRecord};
use crate::traits::{DocumentTable, ObjectHead, ObjectStore, PutCondition, UpdateOutcome};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};
use tracing::warn;

fn lock<'a, T>(mutex: &'a Mutex<T>, what: &str) -> Result<MutexGuard<'a, T>, PipelineError> {
    mutex
        .lock()
        .map_err(|_| PipelineError::Storage(format!("{what} lock poisoned")))
}

fn emit(sender: &Option<LocalEventSender>, event: LocalEvent) {
    if let Some(sender) = sender {
        if sender.send(event).is_err() {
            warn!("local event channel closed, notification dropped");
        }
    }
}

#[derive(Debug, Clone)]
struct StoredObject {
    body: Vec<u8>,
    metadata: BTreeMap<String, String>,
}

/// Bucket held in memory. Emits an "Object Created" event per put when
/// wired to a local event channel.
#[derive(Debug)]
pub struct MemoryObjectStore {
    bucket: String,
    objects: Mutex<BTreeMap<String, StoredObject>>,
    events: Option<LocalEventSender>,
}

impl MemoryObjectStore {
    pub fn new(bucket: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            objects: Mutex::new(BTreeMap::new()),
            events: None,
        }
    }

    pub fn with_events(mut self, sender: LocalEventSender) -> Self {
        self.events = Some(sender);
        self
    }

    pub fn keys(&self) -> Result<Vec<String>, PipelineError> {
        Ok(lock(&self.objects, "object store")?.keys().cloned().collect())
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    fn bucket(&self) -> &str {
        &self.bucket
    }

    async fn get_object(&self, key: &str) -> Result<Option<Vec<u8>>, PipelineError> {
        Ok(lock(&self.objects, "object store")?
            .get(key)
            .map(|object| object.body.clone()))
    }

    async fn head_object(&self, key: &str) -> Result<Option<ObjectHead>, PipelineError> {
        Ok(lock(&self.objects, "object store")?.get(key).map(|object| ObjectHead {
            content_length: object.body.len() as u64,
            metadata: object.metadata.clone(),
        }))
    }

    async fn put_object(
        &self,
        key: &str,
        body: Vec<u8>,
        metadata: BTreeMap<String, String>,
    ) -> Result<(), PipelineError> {
        let size = body.len() as u64;
        lock(&self.objects, "object store")?
            .insert(key.to_string(), StoredObject { body, metadata });
        emit(
            &self.events,
            LocalEvent::Storage(StorageEvent::object_created(&self.bucket, key, size)),
        );
        Ok(())
    }
}

/// Table held in memory, ordered by `(pk, sk)`. Emits change-stream records
/// (`INSERT` / `MODIFY`) when wired to a local event channel.
#[derive(Debug, Default)]
pub struct MemoryDocumentTable {
    items: Mutex<BTreeMap<(String, String), Item>>,
    events: Option<LocalEventSender>,
}

impl MemoryDocumentTable {
    pub fn with_events(mut self, sender: LocalEventSender) -> Self {
        self.events = Some(sender);
        self
    }

    pub fn len(&self) -> Result<usize, PipelineError> {
        Ok(lock(&self.items, "table")?.len())
    }
}

fn item_key(item: &Item) -> Result<(String, String), PipelineError> {
    let pk = string_attr(item, "pk")
        .ok_or_else(|| PipelineError::Table("item has no pk".to_string()))?;
    let sk = string_attr(item, "sk")
        .ok_or_else(|| PipelineError::Table("item has no sk".to_string()))?;
    Ok((pk.to_string(), sk.to_string()))
}

#[async_trait]
impl DocumentTable for MemoryDocumentTable {
    async fn put_item(&self, item: Item, condition: PutCondition) -> Result<(), PipelineError> {
        let key = item_key(&item)?;
        let record = {
            let mut items = lock(&self.items, "table")?;
            let previous = items.get(&key).cloned();
            if let Some(old) = &previous {
                let allowed = match condition {
                    PutCondition::Overwrite => true,
                    PutCondition::IfAbsent => false,
                    PutCondition::IfStatus(expected) => {
                        string_attr(old, "status") == Some(expected)
                    }
                };
                if !allowed {
                    return Err(PipelineError::AlreadyExists(key.1));
                }
            }
            items.insert(key, item.clone());
            match previous {
                Some(old) => StreamRecord::modify(&old, &item),
                None => StreamRecord::insert(&item),
            }
        };
        emit(&self.events, LocalEvent::Stream(record));
        Ok(())
    }

    async fn get_item(&self, pk: &str, sk: &str) -> Result<Option<Item>, PipelineError> {
        Ok(lock(&self.items, "table")?
            .get(&(pk.to_string(), sk.to_string()))
            .cloned())
    }

    async fn update_attribute(
        &self,
        pk: &str,
        sk: &str,
        attribute: &str,
        expected: &str,
        next: &str,
    ) -> Result<UpdateOutcome, PipelineError> {
        let record = {
            let mut items = lock(&self.items, "table")?;
            let Some(item) = items.get_mut(&(pk.to_string(), sk.to_string())) else {
                return Ok(UpdateOutcome::Missing);
            };
            let current = string_attr(item, attribute).map(str::to_string);
            if current.as_deref() != Some(expected) {
                return Ok(UpdateOutcome::Conflict { current });
            }
            let old = item.clone();
            item.insert(attribute.to_string(), Value::String(next.to_string()));
            StreamRecord::modify(&old, item)
        };
        emit(&self.events, LocalEvent::Stream(record));
        Ok(UpdateOutcome::Updated)
    }

    async fn query_prefix(&self, pk: &str, sort_prefix: &str) -> Result<Vec<Item>, PipelineError> {
        Ok(lock(&self.items, "table")?
            .iter()
            .filter(|((item_pk, item_sk), _)| item_pk == pk && item_sk.starts_with(sort_prefix))
            .map(|(_, item)| item.clone())
            .collect())
    }
}
