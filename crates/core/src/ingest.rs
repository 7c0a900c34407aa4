//! PDF bytes -> text -> chunks -> embeddings -> vector index artifacts, and
//! the way back from stored artifacts to a searchable index.

use crate::chunking::{build_chunks, ChunkingConfig};
use crate::error::{IngestError, PipelineError};
use crate::extractor::{document_text, LopdfExtractor, PdfExtractor};
use crate::models::{DocumentId, DOCSTORE_FILE, VECTOR_INDEX_FILE};
use crate::presign::META_DOCUMENT_ID;
use crate::traits::{EmbeddingModel, ObjectStore};
use crate::vector_index::VectorIndex;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info};
use walkdir::WalkDir;

pub struct IndexBuild {
    pub index: VectorIndex,
    pub page_count: usize,
    pub text_chars: usize,
    pub source_sha256: String,
}

pub fn digest_bytes(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

/// Extract, chunk and embed one PDF. Extraction runs on the blocking pool.
pub async fn build_index(
    document_id: &DocumentId,
    pdf: Vec<u8>,
    embedder: &dyn EmbeddingModel,
    config: ChunkingConfig,
) -> Result<IndexBuild, PipelineError> {
    let source_sha256 = digest_bytes(&pdf);
    let pages = tokio::task::spawn_blocking(move || LopdfExtractor.extract_pages(&pdf))
        .await
        .map_err(|error| IngestError::PdfParse(format!("extraction task failed: {error}")))??;

    let text = document_text(&pages);
    if text.trim().is_empty() {
        return Err(IngestError::EmptyText.into());
    }

    let chunks = build_chunks(document_id.as_str(), &text, config)?;
    let texts: Vec<String> = chunks.iter().map(|chunk| chunk.text.clone()).collect();
    debug!(
        document_id = %document_id,
        pages = pages.len(),
        chunks = chunks.len(),
        "embedding chunks"
    );

    let embeddings = embedder.embed_documents(&texts).await?;
    let index = VectorIndex::from_embeddings(embedder.model_id(), chunks, embeddings)?;

    Ok(IndexBuild {
        index,
        page_count: pages.len(),
        text_chars: text.chars().count(),
        source_sha256,
    })
}

/// Files under `dir` in upload order: sorted, with the vector index last so
/// its storage event fires only after the docstore is in place.
pub fn artifact_files(dir: &Path) -> Vec<PathBuf> {
    let mut files: Vec<PathBuf> = WalkDir::new(dir)
        .into_iter()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_file())
        .map(|entry| entry.path().to_path_buf())
        .collect();

    files.sort_by_key(|path| {
        let is_index = path
            .file_name()
            .and_then(|name| name.to_str())
            .is_some_and(|name| name == VECTOR_INDEX_FILE);
        (is_index, path.clone())
    });
    files
}

/// Serialize into a scratch directory and upload every file under
/// `{id}/vector/`. Returns the uploaded keys in order.
pub async fn upload_artifacts(
    store: &dyn ObjectStore,
    document_id: &DocumentId,
    index: &VectorIndex,
) -> Result<Vec<String>, PipelineError> {
    let scratch = tempfile::tempdir().map_err(IngestError::from)?;
    index.save(scratch.path()).await?;

    let mut metadata = BTreeMap::new();
    metadata.insert(META_DOCUMENT_ID.to_string(), document_id.to_string());

    let mut keys = Vec::new();
    for path in artifact_files(scratch.path()) {
        let relative = path
            .strip_prefix(scratch.path())
            .map_err(|error| IngestError::InvalidIndex(error.to_string()))?
            .to_string_lossy()
            .replace('\\', "/");
        let key = document_id.vector_object_key(&relative);
        let body = tokio::fs::read(&path).await.map_err(IngestError::from)?;
        let size = body.len();

        store.put_object(&key, body, metadata.clone()).await?;
        info!(document_id = %document_id, %key, size, "vector artifact uploaded");
        keys.push(key);
    }
    Ok(keys)
}

/// Fetch both artifacts into a scratch directory and load them.
pub async fn download_index(
    store: &dyn ObjectStore,
    document_id: &DocumentId,
) -> Result<VectorIndex, PipelineError> {
    let scratch = tempfile::tempdir().map_err(IngestError::from)?;

    for file_name in [DOCSTORE_FILE, VECTOR_INDEX_FILE] {
        let key = document_id.vector_object_key(file_name);
        let body = store
            .get_object(&key)
            .await?
            .filter(|body| !body.is_empty())
            .ok_or_else(|| PipelineError::UnreadableObject { key: key.clone() })?;
        tokio::fs::write(scratch.path().join(file_name), body)
            .await
            .map_err(IngestError::from)?;
    }

    Ok(VectorIndex::load(scratch.path()).await?)
}
