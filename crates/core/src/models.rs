use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use uuid::Uuid;

pub const FILE_PARTITION: &str = "FILE";
pub const FILE_SORT_PREFIX: &str = "FILE#";
pub const UPLOAD_KEY_PARTITION: &str = "UPLOAD_KEY";
pub const UPLOAD_KEY_SORT_PREFIX: &str = "UPLOAD_KEY#";

pub const SOURCE_OBJECT_NAME: &str = "file.pdf";
pub const VECTOR_INDEX_FILE: &str = "faiss.index";
pub const DOCSTORE_FILE: &str = "docstore.json";

/// Sortable document identifier, assigned when an upload link is issued.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DocumentId(String);

impl DocumentId {
    /// UUIDv7 ids sort lexicographically in creation order.
    pub fn generate() -> Self {
        Self(Uuid::now_v7().to_string())
    }

    pub fn parse(raw: &str) -> Result<Self, String> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err("document id is empty".to_string());
        }
        if trimmed.contains('/') || trimmed.contains('#') {
            return Err(format!("document id contains a reserved character: {trimmed}"));
        }
        Ok(Self(trimmed.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// `{id}/data/file.pdf`
    pub fn source_object_key(&self) -> String {
        format!("{}/data/{SOURCE_OBJECT_NAME}", self.0)
    }

    /// `{id}/vector/`
    pub fn vector_prefix(&self) -> String {
        format!("{}/vector/", self.0)
    }

    pub fn vector_object_key(&self, file_name: &str) -> String {
        format!("{}{file_name}", self.vector_prefix())
    }

    pub fn sort_key(&self) -> String {
        format!("{FILE_SORT_PREFIX}{}", self.0)
    }

    /// First path segment of an object key.
    pub fn from_object_key(key: &str) -> Result<Self, String> {
        match key.split_once('/') {
            Some((first, _)) if !first.is_empty() => Self::parse(first),
            _ => Err(format!("object key has no id segment: {key}")),
        }
    }
}

impl fmt::Display for DocumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for DocumentId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DocumentStatus {
    Pending,
    PendingEmbeddings,
    Ready,
}

impl DocumentStatus {
    pub const ALL: [DocumentStatus; 3] = [
        DocumentStatus::Pending,
        DocumentStatus::PendingEmbeddings,
        DocumentStatus::Ready,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::PendingEmbeddings => "PENDING_EMBEDDINGS",
            Self::Ready => "READY",
        }
    }

    /// Statuses a record may be created with.
    pub fn is_initial(self) -> bool {
        matches!(self, Self::Pending | Self::PendingEmbeddings)
    }

    /// Forward-only transition table. A self-transition is a no-op.
    pub fn can_transition_to(self, next: DocumentStatus) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::Pending)
                | (Self::Pending, Self::PendingEmbeddings)
                | (Self::PendingEmbeddings, Self::PendingEmbeddings)
                | (Self::PendingEmbeddings, Self::Ready)
                | (Self::Ready, Self::Ready)
        )
    }
}

impl fmt::Display for DocumentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DocumentStatus {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|status| status.as_str() == value)
            .ok_or_else(|| format!("unknown document status: {value}"))
    }
}

/// Persisted table item for one document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentRecord {
    pub pk: String,
    pub sk: String,
    pub key: String,
    pub name: String,
    pub status: DocumentStatus,
}

impl DocumentRecord {
    pub fn new(
        id: &DocumentId,
        key: impl Into<String>,
        name: impl Into<String>,
        status: DocumentStatus,
    ) -> Self {
        Self {
            pk: FILE_PARTITION.to_string(),
            sk: id.sort_key(),
            key: key.into(),
            name: name.into(),
            status,
        }
    }

    pub fn id(&self) -> Result<DocumentId, String> {
        let raw = self
            .sk
            .strip_prefix(FILE_SORT_PREFIX)
            .ok_or_else(|| {
                format!("sort key does not start with {FILE_SORT_PREFIX}: {}", self.sk)
            })?;
        DocumentId::parse(raw)
    }

    pub fn summary(&self) -> Result<DocumentSummary, String> {
        Ok(DocumentSummary {
            id: self.id()?.to_string(),
            name: self.name.clone(),
            status: self.status,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentSummary {
    pub id: String,
    pub name: String,
    pub status: DocumentStatus,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentListing {
    pub items: Vec<DocumentSummary>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadLinkRequest {
    pub name: String,
    pub size: u64,
    #[serde(default)]
    pub idempotency_key: Option<String>,
}

/// Presigned form upload: POST `fields` plus the file to `url`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadAuthorization {
    pub url: String,
    pub fields: BTreeMap<String, String>,
    pub id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatRequest {
    pub prompt: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatAnswer {
    pub response: String,
}

#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub upload_link_ttl: Duration,
    pub max_upload_bytes: u64,
    pub retrieval_top_k: usize,
    pub chunk_max_chars: usize,
    pub chunk_overlap_chars: usize,
    pub dedupe_uploads: bool,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            upload_link_ttl: Duration::from_secs(600),
            max_upload_bytes: 50 * 1024 * 1024,
            retrieval_top_k: 4,
            chunk_max_chars: 1_200,
            chunk_overlap_chars: 120,
            dedupe_uploads: false,
        }
    }
}
