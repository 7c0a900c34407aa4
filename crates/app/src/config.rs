use clap::{Args, Parser, Subcommand};
use pdf_prompt_core::stores::bedrock::{DEFAULT_CHAT_MODEL, DEFAULT_EMBEDDING_MODEL};
use pdf_prompt_core::PipelineSettings;
use std::time::Duration;

#[derive(Debug, Parser)]
#[command(name = "pdf-prompt", version, about = "Upload PDFs and chat with them")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    #[command(flatten)]
    pub settings: Settings,

    /// Emit logs as JSON lines.
    #[arg(long, global = true, env = "LOG_JSON", default_value_t = false)]
    pub log_json: bool,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run the HTTP server.
    Serve {
        #[arg(long, env = "BIND_ADDR", default_value = "0.0.0.0:3000")]
        bind: String,

        /// Base URL browsers use to reach this server (local form uploads).
        #[arg(long, env = "PUBLIC_BASE_URL", default_value = "http://localhost:3000")]
        public_url: String,
    },
    /// Print every known document with its status.
    List,
    /// Rebuild the vector index of a document stuck at PENDING_EMBEDDINGS.
    Reprocess {
        id: String,
    },
}

#[derive(Debug, Clone, Args)]
pub struct Settings {
    #[arg(long, global = true, env = "PDF_BUCKET_NAME")]
    pub bucket_name: Option<String>,

    #[arg(long, global = true, env = "PDF_DATA_TABLE_NAME")]
    pub table_name: Option<String>,

    #[arg(long, global = true, env = "AWS_REGION", default_value = "eu-central-1")]
    pub region: String,

    /// Endpoint override for S3, DynamoDB and Bedrock.
    #[arg(long, global = true, env = "AWS_ENDPOINT_URL")]
    pub endpoint_url: Option<String>,

    #[arg(long, global = true, env = "EMBEDDING_MODEL_ID", default_value = DEFAULT_EMBEDDING_MODEL)]
    pub embedding_model_id: String,

    #[arg(long, global = true, env = "CHAT_MODEL_ID", default_value = DEFAULT_CHAT_MODEL)]
    pub chat_model_id: String,

    #[arg(long, global = true, env = "MAX_UPLOAD_BYTES", default_value_t = 50 * 1024 * 1024)]
    pub max_upload_bytes: u64,

    #[arg(long, global = true, env = "UPLOAD_LINK_TTL_SECS", default_value_t = 600)]
    pub upload_link_ttl_secs: u64,

    #[arg(long, global = true, env = "RETRIEVAL_TOP_K", default_value_t = 4)]
    pub retrieval_top_k: usize,

    /// Reject re-delivered uploads and duplicate idempotency keys.
    #[arg(long, global = true, env = "DEDUPE_UPLOADS", default_value_t = false)]
    pub dedupe_uploads: bool,

    /// In-memory storage, table and event bus with offline models.
    #[arg(long = "local", global = true, env = "LOCAL_MODE", default_value_t = false)]
    pub local_mode: bool,
}

impl Default for Settings {
    fn default() -> Self {
        let pipeline = PipelineSettings::default();
        Self {
            bucket_name: None,
            table_name: None,
            region: "eu-central-1".to_string(),
            endpoint_url: None,
            embedding_model_id: DEFAULT_EMBEDDING_MODEL.to_string(),
            chat_model_id: DEFAULT_CHAT_MODEL.to_string(),
            max_upload_bytes: pipeline.max_upload_bytes,
            upload_link_ttl_secs: pipeline.upload_link_ttl.as_secs(),
            retrieval_top_k: pipeline.retrieval_top_k,
            dedupe_uploads: pipeline.dedupe_uploads,
            local_mode: true,
        }
    }
}

impl Settings {
    pub fn pipeline(&self) -> PipelineSettings {
        PipelineSettings {
            upload_link_ttl: Duration::from_secs(self.upload_link_ttl_secs),
            max_upload_bytes: self.max_upload_bytes,
            retrieval_top_k: self.retrieval_top_k,
            dedupe_uploads: self.dedupe_uploads,
            ..PipelineSettings::default()
        }
    }
}
