use crate::error::PipelineError;
use crate::models::DocumentListing;
use crate::repository::DocumentRepository;
use tracing::debug;

pub struct DocumentLister {
    repository: DocumentRepository,
}

impl DocumentLister {
    pub fn new(repository: DocumentRepository) -> Self {
        Self { repository }
    }

    pub async fn list(&self) -> Result<DocumentListing, PipelineError> {
        let items = self.repository.list().await?;
        debug!(count = items.len(), "documents listed");
        Ok(DocumentListing { items })
    }
}
