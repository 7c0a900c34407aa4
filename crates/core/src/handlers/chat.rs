use crate::error::PipelineError;
use crate::ingest::download_index;
use crate::models::{ChatAnswer, ChatRequest, DocumentId};
use crate::retrieval::RetrievalQa;
use crate::traits::ObjectStore;
use crate::validation::{parse_body, parse_document_id, ValidationLimits};
use std::sync::Arc;
use tracing::info;

/// Answers one question about one document. Nothing is kept between calls.
pub struct ChatResponder {
    store: Arc<dyn ObjectStore>,
    qa: RetrievalQa,
}

impl ChatResponder {
    pub fn new(store: Arc<dyn ObjectStore>, qa: RetrievalQa) -> Self {
        Self { store, qa }
    }

    pub async fn handle(&self, raw_id: &str, body: &[u8]) -> Result<ChatAnswer, PipelineError> {
        let id = parse_document_id(raw_id)?;
        let request: ChatRequest = parse_body(body, &ValidationLimits::default())?;
        self.answer(&id, &request.prompt).await
    }

    pub async fn answer(&self, id: &DocumentId, prompt: &str) -> Result<ChatAnswer, PipelineError> {
        let index = download_index(self.store.as_ref(), id).await?;
        let response = self.qa.answer(&index, prompt).await?;
        info!(
            document_id = %id,
            chunks = index.len(),
            answer_chars = response.len(),
            "chat answered"
        );
        Ok(ChatAnswer { response })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunking::ChunkingConfig;
    use crate::embeddings::CharacterNgramEmbedder;
    use crate::extractor::fixtures::pdf_with_pages;
    use crate::ingest::{build_index, upload_artifacts};
    use crate::retrieval::stubs::ContextEchoModel;
    use crate::retrieval::FALLBACK_ANSWER;
    use crate::stores::MemoryObjectStore;

    async fn responder_with_document(id: &DocumentId) -> ChatResponder {
        let store = Arc::new(MemoryObjectStore::new("pdf-bucket"));
        let embedder = Arc::new(CharacterNgramEmbedder::default());
        let pdf = pdf_with_pages(&["The total is 42 EUR", "Payment is due in March"]);
        let build = build_index(
            id,
            pdf,
            embedder.as_ref(),
            ChunkingConfig {
                max_chars: 1_200,
                overlap_chars: 120,
            },
        )
        .await
        .expect("index");
        upload_artifacts(store.as_ref(), id, &build.index).await.expect("upload");

        let qa = RetrievalQa::new(embedder, Arc::new(ContextEchoModel::default()), 4);
        ChatResponder::new(store, qa)
    }

    #[tokio::test]
    async fn answers_questions_about_the_document() {
        let id = DocumentId::parse("doc-1").expect("id");
        let responder = responder_with_document(&id).await;

        let answer = responder
            .handle("doc-1", br#"{"prompt":"What is the total?"}"#)
            .await
            .expect("answer");
        assert!(!answer.response.is_empty());
        assert!(answer.response.contains("42 EUR"));

        let unrelated = responder
            .handle("doc-1", br#"{"prompt":"Who painted the Mona Lisa?"}"#)
            .await
            .expect("fallback");
        assert!(unrelated.response.contains(FALLBACK_ANSWER));
    }

    #[tokio::test]
    async fn request_is_validated_before_any_download() {
        let id = DocumentId::parse("doc-1").expect("id");
        let responder = responder_with_document(&id).await;

        let error = responder.handle("doc-1", br#"{"prompt":"  "}"#).await.expect_err("blank");
        assert_eq!(error.status_code(), 400);
        let error = responder.handle("a/b", br#"{"prompt":"hi"}"#).await.expect_err("bad id");
        assert_eq!(error.issues()[0].path, "id");
    }

    #[tokio::test]
    async fn missing_index_is_a_server_error() {
        let store = Arc::new(MemoryObjectStore::new("pdf-bucket"));
        let embedder = Arc::new(CharacterNgramEmbedder::default());
        let qa = RetrievalQa::new(embedder, Arc::new(ContextEchoModel::default()), 4);
        let responder = ChatResponder::new(store, qa);

        let error = responder
            .handle("ghost", br#"{"prompt":"What is the total?"}"#)
            .await
            .expect_err("no index");
        assert!(matches!(error, PipelineError::UnreadableObject { .. }));
        assert_eq!(error.status_code(), 500);
    }
}
