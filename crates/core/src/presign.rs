//! Browser form uploads (S3 presigned POST): policy documents, signing and
//! the checks a bucket applies before accepting an upload.

use crate::error::{PipelineError, SigningError, ValidationIssue};
use crate::models::{DocumentId, UploadAuthorization, UploadLinkRequest};
use crate::signing::{SigV4Signer, ALGORITHM};
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use chrono::{DateTime, Duration, NaiveDateTime, Utc};
use serde_json::{json, Value};
use std::collections::BTreeMap;

pub const META_PREFIX: &str = "x-amz-meta-";
pub const META_DOCUMENT_ID: &str = "document-id";
pub const META_NAME: &str = "name";
pub const META_SIZE: &str = "size";
pub const META_IDEMPOTENCY_KEY: &str = "idempotency-key";

const EXPIRATION_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.3fZ";

/// Form fields that are never listed in a policy.
const UNCONDITIONED_FIELDS: [&str; 3] = ["policy", "x-amz-signature", "file"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PolicyCondition {
    /// `{"field": "value"}` or `["eq", "$field", "value"]`
    Equals { field: String, value: String },
    /// `["starts-with", "$field", "prefix"]`
    StartsWith { field: String, prefix: String },
    /// `["content-length-range", min, max]`
    ContentLengthRange { min: u64, max: u64 },
}

impl PolicyCondition {
    pub fn equals(field: &str, value: impl Into<String>) -> Self {
        Self::Equals {
            field: field.to_ascii_lowercase(),
            value: value.into(),
        }
    }

    pub fn starts_with(field: &str, prefix: impl Into<String>) -> Self {
        Self::StartsWith {
            field: field.to_ascii_lowercase(),
            prefix: prefix.into(),
        }
    }

    fn to_json(&self) -> Value {
        match self {
            Self::Equals { field, value } => {
                let mut map = serde_json::Map::new();
                map.insert(field.clone(), Value::String(value.clone()));
                Value::Object(map)
            }
            Self::StartsWith { field, prefix } => {
                json!(["starts-with", format!("${field}"), prefix])
            }
            Self::ContentLengthRange { min, max } => json!(["content-length-range", min, max]),
        }
    }

    fn from_json(value: &Value) -> Result<Self, SigningError> {
        if let Some(map) = value.as_object() {
            let (field, expected) = map
                .iter()
                .next()
                .filter(|_| map.len() == 1)
                .ok_or_else(|| {
                    SigningError::Policy(format!("condition must have one field: {value}"))
                })?;
            let expected = expected
                .as_str()
                .ok_or_else(|| {
                    SigningError::Policy(format!("condition value is not a string: {value}"))
                })?;
            return Ok(Self::equals(field, expected));
        }

        let parts = value
            .as_array()
            .ok_or_else(|| SigningError::Policy(format!("unsupported condition: {value}")))?;
        match parts.as_slice() {
            [op, min, max] if op.as_str() == Some("content-length-range") => {
                let min = min
                    .as_u64()
                    .ok_or_else(|| SigningError::Policy("content-length-range min".to_string()))?;
                let max = max
                    .as_u64()
                    .ok_or_else(|| SigningError::Policy("content-length-range max".to_string()))?;
                Ok(Self::ContentLengthRange { min, max })
            }
            [op, field, operand] => {
                let field = field
                    .as_str()
                    .and_then(|raw| raw.strip_prefix('$'))
                    .ok_or_else(|| {
                        SigningError::Policy(format!("condition field must start with $: {value}"))
                    })?;
                let operand = operand
                    .as_str()
                    .ok_or_else(|| {
                        SigningError::Policy(format!("condition operand is not a string: {value}"))
                    })?;
                match op.as_str() {
                    Some("eq") => Ok(Self::equals(field, operand)),
                    Some("starts-with") => Ok(Self::starts_with(field, operand)),
                    _ => Err(SigningError::Policy(format!("unknown condition operator: {value}"))),
                }
            }
            _ => Err(SigningError::Policy(format!("unsupported condition: {value}"))),
        }
    }

    fn field(&self) -> Option<&str> {
        match self {
            Self::Equals { field, .. } | Self::StartsWith { field, .. } => Some(field),
            Self::ContentLengthRange { .. } => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PostPolicy {
    pub expiration: DateTime<Utc>,
    pub conditions: Vec<PolicyCondition>,
}

impl PostPolicy {
    pub fn to_json(&self) -> Value {
        json!({
            "expiration": self.expiration.format(EXPIRATION_FORMAT).to_string(),
            "conditions": self.conditions.iter().map(PolicyCondition::to_json).collect::<Vec<_>>(),
        })
    }

    pub fn from_json(value: &Value) -> Result<Self, SigningError> {
        let raw_expiration = value
            .get("expiration")
            .and_then(Value::as_str)
            .ok_or_else(|| SigningError::Policy("policy has no expiration".to_string()))?;
        let expiration = NaiveDateTime::parse_from_str(raw_expiration, EXPIRATION_FORMAT)
            .map_err(|error| {
                SigningError::Policy(format!("bad expiration {raw_expiration}: {error}"))
            })?
            .and_utc();
        let conditions = value
            .get("conditions")
            .and_then(Value::as_array)
            .ok_or_else(|| SigningError::Policy("policy has no conditions".to_string()))?
            .iter()
            .map(PolicyCondition::from_json)
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            expiration,
            conditions,
        })
    }

    /// Base64 of the policy JSON, the string that gets signed.
    pub fn encode(&self) -> String {
        STANDARD.encode(self.to_json().to_string())
    }

    pub fn decode(encoded: &str) -> Result<Self, SigningError> {
        let bytes = STANDARD
            .decode(encoded.trim())
            .map_err(|error| SigningError::Policy(format!("policy is not base64: {error}")))?;
        let value: Value = serde_json::from_slice(&bytes)
            .map_err(|error| SigningError::Policy(format!("policy is not json: {error}")))?;
        Self::from_json(&value)
    }

    /// The exact size window, if the policy declares one.
    pub fn content_length_range(&self) -> Option<(u64, u64)> {
        self.conditions.iter().find_map(|condition| match condition {
            PolicyCondition::ContentLengthRange { min, max } => Some((*min, *max)),
            _ => None,
        })
    }

    /// Check an upload against this policy. Field names compare
    /// case-insensitively; an empty result means the upload is accepted.
    pub fn evaluate(
        &self,
        bucket: &str,
        fields: &BTreeMap<String, String>,
        content_length: u64,
        now: DateTime<Utc>,
    ) -> Vec<ValidationIssue> {
        let mut issues = Vec::new();
        if now >= self.expiration {
            issues.push(ValidationIssue::new("expiration", "policy expired"));
        }

        let mut form: BTreeMap<String, &str> = fields
            .iter()
            .map(|(name, value)| (name.to_ascii_lowercase(), value.as_str()))
            .collect();
        form.insert("bucket".to_string(), bucket);

        for condition in &self.conditions {
            match condition {
                PolicyCondition::Equals { field, value } => {
                    if form.get(field).copied() != Some(value.as_str()) {
                        issues.push(ValidationIssue::new(
                            field.clone(),
                            format!("must equal {value}"),
                        ));
                    }
                }
                PolicyCondition::StartsWith { field, prefix } => {
                    let matches = form
                        .get(field)
                        .map(|actual| actual.starts_with(prefix.as_str()))
                        .unwrap_or(false);
                    if !matches {
                        issues.push(ValidationIssue::new(
                            field.clone(),
                            format!("must start with {prefix}"),
                        ));
                    }
                }
                PolicyCondition::ContentLengthRange { min, max } => {
                    if content_length < *min || content_length > *max {
                        issues.push(ValidationIssue::new(
                            "content-length",
                            format!("{content_length} is outside [{min}, {max}]"),
                        ));
                    }
                }
            }
        }

        for name in form.keys() {
            let exempt =
                UNCONDITIONED_FIELDS.contains(&name.as_str()) || name.starts_with("x-ignore-");
            let covered = self
                .conditions
                .iter()
                .any(|condition| condition.field() == Some(name.as_str()));
            if !exempt && !covered {
                issues.push(ValidationIssue::new(
                    name.clone(),
                    "field is not allowed by the policy",
                ));
            }
        }

        issues
    }
}

/// Issues and verifies presigned POST forms for one bucket.
#[derive(Debug, Clone)]
pub struct PostPresigner {
    signer: SigV4Signer,
    bucket: String,
    upload_url: String,
}

impl PostPresigner {
    pub fn new(
        signer: SigV4Signer,
        bucket: impl Into<String>,
        upload_url: impl Into<String>,
    ) -> Self {
        Self {
            signer,
            bucket: bucket.into(),
            upload_url: upload_url.into(),
        }
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    pub fn upload_url(&self) -> &str {
        &self.upload_url
    }

    pub fn policy_for(
        &self,
        id: &DocumentId,
        request: &UploadLinkRequest,
        amz_date: &str,
        credential: &str,
        expiration: DateTime<Utc>,
    ) -> PostPolicy {
        let key = id.source_object_key();
        let mut conditions = vec![
            PolicyCondition::equals("bucket", &self.bucket),
            PolicyCondition::starts_with("key", id.as_str()),
            PolicyCondition::equals("key", key),
            PolicyCondition::ContentLengthRange {
                min: request.size,
                max: request.size,
            },
            PolicyCondition::equals(&format!("{META_PREFIX}{META_DOCUMENT_ID}"), id.as_str()),
            PolicyCondition::equals(&format!("{META_PREFIX}{META_NAME}"), request.name.trim()),
            PolicyCondition::equals(&format!("{META_PREFIX}{META_SIZE}"), request.size.to_string()),
            PolicyCondition::equals("x-amz-algorithm", ALGORITHM),
            PolicyCondition::equals("x-amz-credential", credential),
            PolicyCondition::equals("x-amz-date", amz_date),
        ];
        if let Some(ref token) = self.signer.credentials().session_token {
            conditions.push(PolicyCondition::equals("x-amz-security-token", token.clone()));
        }
        if let Some(ref idempotency_key) = request.idempotency_key {
            conditions.push(PolicyCondition::equals(
                &format!("{META_PREFIX}{META_IDEMPOTENCY_KEY}"),
                idempotency_key.clone(),
            ));
        }

        PostPolicy {
            expiration,
            conditions,
        }
    }

    pub fn presign(
        &self,
        id: &DocumentId,
        request: &UploadLinkRequest,
        ttl: std::time::Duration,
        now: DateTime<Utc>,
    ) -> Result<UploadAuthorization, SigningError> {
        let date_stamp = now.format("%Y%m%d").to_string();
        let amz_date = now.format("%Y%m%dT%H%M%SZ").to_string();
        let credential = self.signer.credential(&date_stamp);
        let ttl = Duration::from_std(ttl).map_err(|error| SigningError::Policy(error.to_string()))?;

        let policy = self.policy_for(id, request, &amz_date, &credential, now + ttl);
        let encoded = policy.encode();
        let signature = self.signer.sign_string(&date_stamp, &encoded)?;

        let mut fields = BTreeMap::new();
        fields.insert("bucket".to_string(), self.bucket.clone());
        fields.insert("key".to_string(), id.source_object_key());
        fields.insert("Policy".to_string(), encoded);
        fields.insert("X-Amz-Algorithm".to_string(), ALGORITHM.to_string());
        fields.insert("X-Amz-Credential".to_string(), credential);
        fields.insert("X-Amz-Date".to_string(), amz_date);
        fields.insert("X-Amz-Signature".to_string(), signature);
        if let Some(ref token) = self.signer.credentials().session_token {
            fields.insert("X-Amz-Security-Token".to_string(), token.clone());
        }
        fields.insert(format!("{META_PREFIX}{META_DOCUMENT_ID}"), id.to_string());
        fields.insert(format!("{META_PREFIX}{META_NAME}"), request.name.trim().to_string());
        fields.insert(format!("{META_PREFIX}{META_SIZE}"), request.size.to_string());
        if let Some(ref idempotency_key) = request.idempotency_key {
            fields.insert(format!("{META_PREFIX}{META_IDEMPOTENCY_KEY}"), idempotency_key.clone());
        }

        Ok(UploadAuthorization {
            url: self.upload_url.clone(),
            fields,
            id: id.to_string(),
        })
    }

    /// Signature, credential, expiry and every policy condition.
    pub fn verify(
        &self,
        fields: &BTreeMap<String, String>,
        content_length: u64,
        now: DateTime<Utc>,
    ) -> Result<PostPolicy, PipelineError> {
        let field = |name: &str| {
            fields
                .iter()
                .find(|(key, _)| key.eq_ignore_ascii_case(name))
                .map(|(_, value)| value.as_str())
        };
        let rejected =
            |issues: Vec<ValidationIssue>| PipelineError::validation("Upload rejected", issues);

        let encoded = field("policy")
            .ok_or_else(|| rejected(vec![ValidationIssue::new("policy", "missing")]))?;
        let signature = field("x-amz-signature")
            .ok_or_else(|| rejected(vec![ValidationIssue::new("x-amz-signature", "missing")]))?;
        let amz_date = field("x-amz-date")
            .filter(|date| date.len() >= 8 && date.is_char_boundary(8))
            .ok_or_else(|| rejected(vec![ValidationIssue::new("x-amz-date", "missing")]))?;
        let date_stamp = &amz_date[..8];

        if field("x-amz-credential") != Some(self.signer.credential(date_stamp).as_str()) {
            return Err(rejected(vec![ValidationIssue::new(
                "x-amz-credential",
                "credential does not match this bucket",
            )]));
        }
        if !self.signer.verify_string(date_stamp, encoded, signature)? {
            return Err(rejected(vec![ValidationIssue::new(
                "x-amz-signature",
                "signature does not match",
            )]));
        }

        let policy = PostPolicy::decode(encoded)?;
        let issues = policy.evaluate(&self.bucket, fields, content_length, now);
        if !issues.is_empty() {
            return Err(rejected(issues));
        }
        Ok(policy)
    }
}

/// Strip `x-amz-meta-` from form fields or response headers.
pub fn user_metadata<'a>(
    entries: impl IntoIterator<Item = (&'a str, &'a str)>,
) -> BTreeMap<String, String> {
    entries
        .into_iter()
        .filter_map(|(name, value)| {
            let lowered = name.to_ascii_lowercase();
            lowered
                .strip_prefix(META_PREFIX)
                .map(|stripped| (stripped.to_string(), value.to_string()))
        })
        .collect()
}
