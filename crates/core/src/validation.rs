//! Request schema checks.
//!
//! Bodies are decoded in two steps: serde shape first, then the semantic rules
//! of [`Validate`]. Both steps report [`ValidationIssue`]s so that a caller
//! receives every problem with a 400 instead of a bare parse error.

use serde::de::DeserializeOwned;

use crate::error::{PipelineError, ValidationIssue};
use crate::models::{ChatRequest, DocumentId, UploadLinkRequest};

const MAX_IDEMPOTENCY_KEY_LEN: usize = 128;

pub trait Validate {
    fn validate(&self, limits: &ValidationLimits) -> Vec<ValidationIssue>;
}

#[derive(Debug, Clone, Copy)]
pub struct ValidationLimits {
    pub max_upload_bytes: u64,
}

impl Default for ValidationLimits {
    fn default() -> Self {
        Self {
            max_upload_bytes: 50 * 1024 * 1024,
        }
    }
}

impl Validate for UploadLinkRequest {
    fn validate(&self, limits: &ValidationLimits) -> Vec<ValidationIssue> {
        let mut issues = Vec::new();
        if self.name.trim().is_empty() {
            issues.push(ValidationIssue::new("name", "must not be empty"));
        }
        if self.size == 0 {
            issues.push(ValidationIssue::new("size", "must be a positive integer"));
        } else if self.size > limits.max_upload_bytes {
            issues.push(ValidationIssue::new(
                "size",
                format!("must not exceed {} bytes", limits.max_upload_bytes),
            ));
        }
        if let Some(key) = &self.idempotency_key {
            if key.trim().is_empty() {
                issues.push(ValidationIssue::new("idempotency_key", "must not be empty"));
            } else if key.len() > MAX_IDEMPOTENCY_KEY_LEN {
                issues.push(ValidationIssue::new(
                    "idempotency_key",
                    format!("must be at most {MAX_IDEMPOTENCY_KEY_LEN} characters"),
                ));
            }
        }
        issues
    }
}

impl Validate for ChatRequest {
    fn validate(&self, _limits: &ValidationLimits) -> Vec<ValidationIssue> {
        if self.prompt.trim().is_empty() {
            vec![ValidationIssue::new("prompt", "must not be empty")]
        } else {
            Vec::new()
        }
    }
}

/// Decode and validate a JSON body. An absent body is treated as `{}`.
pub fn parse_body<T>(body: &[u8], limits: &ValidationLimits) -> Result<T, PipelineError>
where
    T: DeserializeOwned + Validate,
{
    let raw = if body.iter().all(u8::is_ascii_whitespace) {
        b"{}".as_slice()
    } else {
        body
    };

    let parsed: T = serde_json::from_slice(raw).map_err(|error| {
        PipelineError::validation(
            "Malformed Payload",
            vec![ValidationIssue::new("body", error.to_string())],
        )
    })?;

    let issues = parsed.validate(limits);
    if issues.is_empty() {
        Ok(parsed)
    } else {
        Err(PipelineError::validation("Malformed Payload", issues))
    }
}

pub fn parse_document_id(raw: &str) -> Result<DocumentId, PipelineError> {
    DocumentId::parse(raw).map_err(|message| {
        PipelineError::validation(
            "Malformed path parameters",
            vec![ValidationIssue::new("id", message)],
        )
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn upload_request_requires_name_and_positive_size() {
        let limits = ValidationLimits::default();
        let error = parse_body::<UploadLinkRequest>(br#"{"name": " ", "size": 0}"#, &limits)
            .expect_err("invalid request");

        let paths: Vec<_> = error.issues().iter().map(|issue| issue.path.as_str()).collect();
        assert_eq!(paths, vec!["name", "size"]);
        assert_eq!(error.status_code(), 400);
    }

    #[test]
    fn upload_request_rejects_wrong_types() {
        let limits = ValidationLimits::default();
        let error = parse_body::<UploadLinkRequest>(br#"{"name": "a.pdf", "size": -3}"#, &limits)
            .expect_err("negative size");
        assert_eq!(error.issues()[0].path, "body");

        let error = parse_body::<UploadLinkRequest>(b"", &limits).expect_err("missing fields");
        assert!(error.issues()[0].message.contains("missing field"));
    }

    #[test]
    fn upload_request_respects_size_limit() {
        let limits = ValidationLimits { max_upload_bytes: 10 };
        let error = parse_body::<UploadLinkRequest>(br#"{"name": "a.pdf", "size": 11}"#, &limits)
            .expect_err("too large");
        assert_eq!(error.issues()[0].path, "size");

        let ok = parse_body::<UploadLinkRequest>(br#"{"name": "a.pdf", "size": 10}"#, &limits)
            .expect("at the limit");
        assert_eq!(ok.size, 10);
        assert_eq!(ok.idempotency_key, None);
    }

    #[test]
    fn chat_request_requires_prompt() {
        let limits = ValidationLimits::default();
        assert!(parse_body::<ChatRequest>(br#"{"prompt": ""}"#, &limits).is_err());
        let request = parse_body::<ChatRequest>(br#"{"prompt": "What is the total?"}"#, &limits)
            .expect("valid prompt");
        assert_eq!(request.prompt, "What is the total?");
    }

    #[test]
    fn path_id_is_validated() {
        assert!(parse_document_id("abc").is_ok());
        let error = parse_document_id("a/b").expect_err("slash rejected");
        assert_eq!(error.issues()[0].path, "id");
    }
}
