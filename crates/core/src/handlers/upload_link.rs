use crate::error::PipelineError;
use crate::models::{DocumentId, PipelineSettings, UploadAuthorization, UploadLinkRequest};
use crate::presign::PostPresigner;
use crate::validation::{parse_body, Validate, ValidationLimits};
use chrono::{DateTime, Utc};
use std::time::Duration;
use tracing::info;

/// Issues presigned upload forms. Writes nothing: the document record only
/// appears once the upload lands.
pub struct UploadLinkIssuer {
    presigner: PostPresigner,
    limits: ValidationLimits,
    ttl: Duration,
}

impl UploadLinkIssuer {
    pub fn new(presigner: PostPresigner, settings: &PipelineSettings) -> Self {
        Self {
            presigner,
            limits: ValidationLimits {
                max_upload_bytes: settings.max_upload_bytes,
            },
            ttl: settings.upload_link_ttl,
        }
    }

    pub fn presigner(&self) -> &PostPresigner {
        &self.presigner
    }

    pub fn handle(&self, body: &[u8]) -> Result<UploadAuthorization, PipelineError> {
        let request: UploadLinkRequest = parse_body(body, &self.limits)?;
        self.issue(&request)
    }

    pub fn issue(&self, request: &UploadLinkRequest) -> Result<UploadAuthorization, PipelineError> {
        self.issue_at(request, DocumentId::generate(), Utc::now())
    }

    pub fn issue_at(
        &self,
        request: &UploadLinkRequest,
        id: DocumentId,
        now: DateTime<Utc>,
    ) -> Result<UploadAuthorization, PipelineError> {
        let issues = request.validate(&self.limits);
        if !issues.is_empty() {
            return Err(PipelineError::validation("Malformed Payload", issues));
        }

        let authorization = self.presigner.presign(&id, request, self.ttl, now)?;
        info!(
            document_id = %id,
            name = %request.name.trim(),
            size = request.size,
            "upload link issued"
        );
        Ok(authorization)
    }
}
