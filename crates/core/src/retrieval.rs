use crate::error::PipelineError;
use crate::traits::{EmbeddingModel, LanguageModel};
use crate::vector_index::{ScoredChunk, VectorIndex};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;

pub const FALLBACK_ANSWER: &str = "I do not know";

const INSTRUCTION: &str = "You are given text. Answer the question solely based on the text provided. Be very brief. If you do not know something, feel free to reply with \"I do not know\".";

/// `Assistant:{instruction}\n\n{context}\n\nHuman:{question}\n\nAssistant:`
pub fn render_prompt(context: &str, question: &str) -> String {
    format!("Assistant:{INSTRUCTION}\n\n{context}\n\nHuman:{question}\n\nAssistant:")
}

pub fn join_context(hits: &[ScoredChunk]) -> String {
    hits.iter()
        .map(|hit| hit.chunk.text.as_str())
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// Stateless retrieval-augmented answering over one document index.
#[derive(Clone)]
pub struct RetrievalQa {
    embedder: Arc<dyn EmbeddingModel>,
    model: Arc<dyn LanguageModel>,
    top_k: usize,
}

impl RetrievalQa {
    pub fn new(
        embedder: Arc<dyn EmbeddingModel>,
        model: Arc<dyn LanguageModel>,
        top_k: usize,
    ) -> Self {
        Self {
            embedder,
            model,
            top_k: top_k.max(1),
        }
    }

    pub async fn answer(
        &self,
        index: &VectorIndex,
        question: &str,
    ) -> Result<String, PipelineError> {
        let built_with = index.docstore().model_id.as_str();
        if built_with != self.embedder.model_id() {
            return Err(PipelineError::Model(format!(
                "index was built with {built_with}, queries use {}",
                self.embedder.model_id()
            )));
        }

        let query = self.embedder.embed_query(question).await?;
        let hits = index.similarity_search(&query, self.top_k)?;
        debug!(
            hits = hits.len(),
            best = hits.first().map(|hit| hit.score),
            "retrieved context"
        );

        let prompt = render_prompt(&join_context(&hits), question);
        let completion = self.model.complete(&prompt).await?;
        let answer = completion.trim();
        if answer.is_empty() {
            return Ok(FALLBACK_ANSWER.to_string());
        }
        Ok(answer.to_string())
    }
}

/// Offline model for local mode: replies with the first context sentence
/// sharing a keyword with the question, else the fallback phrase.
#[derive(Debug, Clone, Copy, Default)]
pub struct ExtractiveModel;

impl ExtractiveModel {
    pub fn extract(prompt: &str) -> String {
        let context = prompt
            .split_once(".\n\n")
            .and_then(|(_, rest)| rest.rsplit_once("\n\nHuman:"))
            .map(|(context, _)| context)
            .unwrap_or_default();
        let question = prompt
            .rsplit_once("Human:")
            .map(|(_, rest)| rest.trim_end_matches("\n\nAssistant:"))
            .unwrap_or_default()
            .to_lowercase();
        let keywords: Vec<&str> = question
            .split(|c: char| !c.is_alphanumeric())
            .filter(|word| word.len() > 3)
            .collect();

        context
            .split("\n\n")
            .flat_map(|block| block.split(". "))
            .find(|sentence| {
                let lowered = sentence.to_lowercase();
                keywords.iter().any(|word| lowered.contains(word))
            })
            .map(|sentence| format!(" {sentence} "))
            .unwrap_or_else(|| format!(" {FALLBACK_ANSWER}."))
    }
}

#[async_trait]
impl LanguageModel for ExtractiveModel {
    fn model_id(&self) -> &str {
        "local/extractive"
    }

    async fn complete(&self, prompt: &str) -> Result<String, PipelineError> {
        Ok(Self::extract(prompt))
    }
}
