pub mod attributes;
pub mod chunking;
pub mod embeddings;
pub mod error;
pub mod events;
pub mod extractor;
pub mod handlers;
pub mod ingest;
pub mod models;
pub mod presign;
pub mod repository;
pub mod retrieval;
pub mod signing;
pub mod stores;
pub mod traits;
pub mod validation;
pub mod vector_index;

pub use chunking::{build_chunks, normalize_whitespace, ChunkingConfig, TextChunk};
pub use embeddings::{CharacterNgramEmbedder, DEFAULT_EMBEDDING_DIMENSIONS};
pub use error::{IngestError, PipelineError, SigningError, ValidationIssue};
pub use events::{
    local_event_channel, EventOutcome, EventRouter, LocalEvent, LocalEventBus, LocalEventSender,
    StorageEvent, StreamBatch, StreamRecord,
};
pub use extractor::{extract_document_text, LopdfExtractor, PdfExtractor};
pub use handlers::{
    BatchReport, BuildSummary, ChatResponder, DocumentLister, EmbeddingBuilder, EmbeddingFinalizer,
    FinalizeOutcome, UploadFinalizer, UploadLinkIssuer, UploadOutcome,
};
pub use models::{
    ChatAnswer, ChatRequest, DocumentId, DocumentListing, DocumentRecord, DocumentStatus,
    DocumentSummary, PipelineSettings, UploadAuthorization, UploadLinkRequest,
};
pub use presign::{PostPolicy, PostPresigner};
pub use repository::DocumentRepository;
pub use retrieval::{ExtractiveModel, RetrievalQa, FALLBACK_ANSWER};
pub use signing::{AwsCredentials, SigV4Signer};
pub use stores::{
    BedrockEmbeddings, BedrockRuntime, BedrockTextModel, DynamoDbTable, MemoryDocumentTable,
    MemoryObjectStore, S3ObjectStore,
};
pub use traits::{DocumentTable, EmbeddingModel, LanguageModel, ObjectStore};
pub use vector_index::VectorIndex;
