use crate::attributes::Item;
use crate::error::PipelineError;
use async_trait::async_trait;
use std::collections::BTreeMap;

/// Size and user metadata (`x-amz-meta-*`, prefix stripped) of a stored object.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ObjectHead {
    pub content_length: u64,
    pub metadata: BTreeMap<String, String>,
}

#[async_trait]
pub trait ObjectStore: Send + Sync {
    fn bucket(&self) -> &str;

    /// `Ok(None)` when the object does not exist.
    async fn get_object(&self, key: &str) -> Result<Option<Vec<u8>>, PipelineError>;

    async fn head_object(&self, key: &str) -> Result<Option<ObjectHead>, PipelineError>;

    async fn put_object(
        &self,
        key: &str,
        body: Vec<u8>,
        metadata: BTreeMap<String, String>,
    ) -> Result<(), PipelineError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PutCondition {
    Overwrite,
    /// Fails with `AlreadyExists` when an item with the same key exists.
    IfAbsent,
    /// Writes only when the key is absent or its stored `status` still equals
    /// the given value. Fails with `AlreadyExists` otherwise.
    IfStatus(&'static str),
}

#[derive(Debug, Clone, PartialEq)]
pub enum UpdateOutcome {
    Updated,
    Missing,
    /// The stored attribute did not hold the expected value.
    Conflict { current: Option<String> },
}

/// Key-value table with composite `pk`/`sk` keys and per-key atomic writes.
#[async_trait]
pub trait DocumentTable: Send + Sync {
    async fn put_item(&self, item: Item, condition: PutCondition) -> Result<(), PipelineError>;

    async fn get_item(&self, pk: &str, sk: &str) -> Result<Option<Item>, PipelineError>;

    /// Set `attribute` to `next` only if it currently equals `expected`.
    async fn update_attribute(
        &self,
        pk: &str,
        sk: &str,
        attribute: &str,
        expected: &str,
        next: &str,
    ) -> Result<UpdateOutcome, PipelineError>;

    /// All items in `pk` whose sort key starts with `sort_prefix`, in key order.
    async fn query_prefix(&self, pk: &str, sort_prefix: &str) -> Result<Vec<Item>, PipelineError>;
}

#[async_trait]
pub trait EmbeddingModel: Send + Sync {
    fn model_id(&self) -> &str;

    async fn embed_documents(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, PipelineError>;

    async fn embed_query(&self, text: &str) -> Result<Vec<f32>, PipelineError>;
}

#[async_trait]
pub trait LanguageModel: Send + Sync {
    fn model_id(&self) -> &str;

    /// Single-turn completion of a fully rendered prompt.
    async fn complete(&self, prompt: &str) -> Result<String, PipelineError>;
}
