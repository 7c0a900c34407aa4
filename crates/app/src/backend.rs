//! Wiring of the lifecycle components onto AWS or in-memory backends.

use crate::config::Settings;
use anyhow::Context;
use pdf_prompt_core::{
    local_event_channel, AwsCredentials, BedrockEmbeddings, BedrockRuntime, BedrockTextModel,
    CharacterNgramEmbedder, ChatResponder, ChunkingConfig, DocumentLister, DocumentRepository,
    DocumentTable, DynamoDbTable, EmbeddingBuilder, EmbeddingFinalizer, EmbeddingModel, EventRouter,
    ExtractiveModel, LanguageModel, LocalEventBus, MemoryDocumentTable, MemoryObjectStore,
    ObjectStore, PipelineSettings, PostPresigner, RetrievalQa, S3ObjectStore, SigV4Signer,
    UploadFinalizer, UploadLinkIssuer,
};
use std::sync::Arc;
use tracing::info;

const LOCAL_BUCKET: &str = "pdf-prompt-local";

/// Everything the HTTP surface and the CLI commands call into.
pub struct Services {
    pub settings: PipelineSettings,
    pub upload_links: Arc<UploadLinkIssuer>,
    pub lister: Arc<DocumentLister>,
    pub chat: Arc<ChatResponder>,
    pub router: Arc<EventRouter>,
    /// Present in local mode: the bucket behind `POST /local-bucket`.
    pub local_store: Option<Arc<MemoryObjectStore>>,
}

struct Backends {
    store: Arc<dyn ObjectStore>,
    table: Arc<dyn DocumentTable>,
    embedder: Arc<dyn EmbeddingModel>,
    model: Arc<dyn LanguageModel>,
    presigner: PostPresigner,
}

impl Services {
    /// S3, DynamoDB and Bedrock through signed requests.
    pub fn aws(settings: &Settings) -> anyhow::Result<Self> {
        let bucket = settings
            .bucket_name
            .clone()
            .context("PDF_BUCKET_NAME is required outside local mode")?;
        let table_name = settings
            .table_name
            .clone()
            .context("PDF_DATA_TABLE_NAME is required outside local mode")?;
        let credentials = AwsCredentials::from_env()?;
        let signer = |service: &str| {
            SigV4Signer::new(credentials.clone(), settings.region.clone(), service)
        };
        let endpoint = &settings.endpoint_url;

        let store = S3ObjectStore::new(signer("s3"), bucket.clone(), endpoint.clone());
        let presigner = PostPresigner::new(signer("s3"), bucket.clone(), store.form_upload_url());
        let table = DynamoDbTable::new(signer("dynamodb"), table_name.clone(), endpoint.clone())?;
        let runtime = Arc::new(BedrockRuntime::new(signer("bedrock"), endpoint.clone()));
        let embedder = BedrockEmbeddings::new(runtime.clone(), settings.embedding_model_id.clone());

        info!(%bucket, table = %table_name, region = %settings.region, "using aws backends");
        Self::assemble(
            settings,
            Backends {
                store: Arc::new(store),
                table: Arc::new(table),
                embedder: Arc::new(embedder),
                model: Arc::new(BedrockTextModel::new(runtime, settings.chat_model_id.clone())),
                presigner,
            },
        )
    }

    /// In-memory bucket and table whose notifications feed the returned bus.
    /// Uploads are form-POSTed to `{public_url}/local-bucket`.
    pub fn local(settings: &Settings, public_url: &str) -> anyhow::Result<(Self, LocalEventBus)> {
        let bucket = settings.bucket_name.clone().unwrap_or_else(|| LOCAL_BUCKET.to_string());
        let (sender, receiver) = local_event_channel();
        let store = Arc::new(MemoryObjectStore::new(bucket.clone()).with_events(sender.clone()));
        let table = Arc::new(MemoryDocumentTable::default().with_events(sender));

        let credentials = AwsCredentials::from_env()
            .unwrap_or_else(|_| AwsCredentials::new("local", "local-secret", None));
        let presigner = PostPresigner::new(
            SigV4Signer::new(credentials, settings.region.clone(), "s3"),
            bucket.clone(),
            format!("{}/local-bucket", public_url.trim_end_matches('/')),
        );

        info!(%bucket, "using in-memory backends");
        let mut services = Self::assemble(
            settings,
            Backends {
                store: store.clone(),
                table,
                embedder: Arc::new(CharacterNgramEmbedder::default()),
                model: Arc::new(ExtractiveModel),
                presigner,
            },
        )?;
        services.local_store = Some(store);

        let bus = LocalEventBus::new(receiver, services.router.clone());
        Ok((services, bus))
    }

    fn assemble(settings: &Settings, backends: Backends) -> anyhow::Result<Self> {
        let pipeline = settings.pipeline();
        let repository = DocumentRepository::new(backends.table);

        let upload_finalizer = UploadFinalizer::new(
            backends.store.clone(),
            repository.clone(),
            pipeline.dedupe_uploads,
        )?;
        let embedding_builder = EmbeddingBuilder::new(
            backends.store.clone(),
            repository.clone(),
            backends.embedder.clone(),
            ChunkingConfig::from(&pipeline),
        );
        let embedding_finalizer = EmbeddingFinalizer::new(repository.clone())?;
        let router = EventRouter::new(
            Arc::new(upload_finalizer),
            Arc::new(embedding_builder),
            Arc::new(embedding_finalizer),
        )?;

        let qa = RetrievalQa::new(backends.embedder, backends.model, pipeline.retrieval_top_k);
        Ok(Self {
            upload_links: Arc::new(UploadLinkIssuer::new(backends.presigner, &pipeline)),
            lister: Arc::new(DocumentLister::new(repository)),
            chat: Arc::new(ChatResponder::new(backends.store, qa)),
            router: Arc::new(router),
            local_store: None,
            settings: pipeline,
        })
    }
}
