use crate::error::PipelineError;
use crate::presign::{user_metadata, META_PREFIX};
use crate::signing::{uri_encode, SigV4Signer};
use crate::traits::{ObjectHead, ObjectStore};
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use chrono::Utc;
use reqwest::{Client, Method, StatusCode};
use std::collections::BTreeMap;
use tracing::debug;
use url::Url;

/// S3 bucket over signed REST calls. With an endpoint override (LocalStack,
/// MinIO, test mocks) objects are addressed path-style.
pub struct S3ObjectStore {
    client: Client,
    signer: SigV4Signer,
    bucket: String,
    endpoint: Option<String>,
}

impl S3ObjectStore {
    pub fn new(signer: SigV4Signer, bucket: impl Into<String>, endpoint: Option<String>) -> Self {
        Self {
            client: Client::new(),
            signer,
            bucket: bucket.into(),
            endpoint: endpoint.map(|raw| raw.trim_end_matches('/').to_string()),
        }
    }

    /// Where browsers POST presigned forms.
    pub fn form_upload_url(&self) -> String {
        match self.endpoint {
            Some(ref endpoint) => format!("{endpoint}/{}", self.bucket),
            None => format!("https://{}.s3.{}.amazonaws.com/", self.bucket, self.signer.region()),
        }
    }

    fn object_url(&self, key: &str) -> Result<Url, PipelineError> {
        let encoded_key = key.split('/').map(uri_encode).collect::<Vec<_>>().join("/");
        let raw = match self.endpoint {
            Some(ref endpoint) => format!("{endpoint}/{}/{encoded_key}", self.bucket),
            None => format!(
                "https://{}.s3.{}.amazonaws.com/{encoded_key}",
                self.bucket,
                self.signer.region()
            ),
        };
        Url::parse(&raw).map_err(|error| PipelineError::Signing(error.into()))
    }

    async fn send(
        &self,
        method: Method,
        key: &str,
        extra_headers: &[(&str, &str)],
        body: Vec<u8>,
    ) -> Result<reqwest::Response, PipelineError> {
        let url = self.object_url(key)?;
        let headers = self
            .signer
            .sign(method.as_str(), &url, extra_headers, &body, Utc::now())?;

        let mut request = self.client.request(method.clone(), url);
        for (name, value) in headers {
            request = request.header(name, value);
        }
        if method == Method::PUT {
            request = request.body(body);
        }

        let response = request.send().await?;
        debug!(%method, %key, status = %response.status(), "s3 request");
        Ok(response)
    }
}

fn failure(operation: &str, key: &str, status: StatusCode) -> PipelineError {
    PipelineError::Storage(format!("S3 {operation} failed (HTTP {status}) for key '{key}'"))
}

#[async_trait]
impl ObjectStore for S3ObjectStore {
    fn bucket(&self) -> &str {
        &self.bucket
    }

    async fn get_object(&self, key: &str) -> Result<Option<Vec<u8>>, PipelineError> {
        let response = self.send(Method::GET, key, &[], Vec::new()).await?;
        match response.status() {
            StatusCode::NOT_FOUND => Ok(None),
            status if status.is_success() => Ok(Some(response.bytes().await?.to_vec())),
            status => Err(failure("GetObject", key, status)),
        }
    }

    async fn head_object(&self, key: &str) -> Result<Option<ObjectHead>, PipelineError> {
        let response = self.send(Method::HEAD, key, &[], Vec::new()).await?;
        match response.status() {
            StatusCode::NOT_FOUND => Ok(None),
            status if status.is_success() => {
                let headers = response.headers();
                let content_length = headers
                    .get(reqwest::header::CONTENT_LENGTH)
                    .and_then(|value| value.to_str().ok())
                    .and_then(|value| value.parse::<u64>().ok())
                    .unwrap_or(0);
                let decoded: Vec<(&str, String)> = headers
                    .iter()
                    .map(|(name, value)| (name.as_str(), decode_metadata_value(value.as_bytes())))
                    .collect();
                let metadata = user_metadata(
                    decoded.iter().map(|(name, value)| (*name, value.as_str())),
                );
                Ok(Some(ObjectHead {
                    content_length,
                    metadata,
                }))
            }
            status => Err(failure("HeadObject", key, status)),
        }
    }

    async fn put_object(
        &self,
        key: &str,
        body: Vec<u8>,
        metadata: BTreeMap<String, String>,
    ) -> Result<(), PipelineError> {
        let meta_headers: Vec<(String, String)> = metadata
            .iter()
            .map(|(name, value)| (format!("{META_PREFIX}{name}"), encode_metadata_value(value)))
            .collect();
        let extra: Vec<(&str, &str)> = meta_headers
            .iter()
            .map(|(name, value)| (name.as_str(), value.as_str()))
            .collect();

        let response = self.send(Method::PUT, key, &extra, body).await?;
        if !response.status().is_success() {
            return Err(failure("PutObject", key, response.status()));
        }
        Ok(())
    }
}

/// S3 hands back non-ASCII user metadata as RFC 2047 encoded words
/// (`=?UTF-8?B?...?=` or `=?UTF-8?Q?...?=`). Anything else is taken as is.
fn decode_metadata_value(raw: &[u8]) -> String {
    let text = String::from_utf8_lossy(raw);
    decode_encoded_words(&text).unwrap_or_else(|| text.into_owned())
}

fn decode_encoded_words(text: &str) -> Option<String> {
    let mut decoded = String::new();
    for word in text.split_whitespace() {
        decoded.push_str(&decode_encoded_word(word)?);
    }
    (!decoded.is_empty()).then_some(decoded)
}

fn decode_encoded_word(word: &str) -> Option<String> {
    let inner = word.strip_prefix("=?")?.strip_suffix("?=")?;
    let mut parts = inner.splitn(3, '?');
    let charset = parts.next()?;
    let encoding = parts.next()?;
    let payload = parts.next()?;
    if !charset.eq_ignore_ascii_case("utf-8") {
        return None;
    }

    let bytes = match encoding {
        "B" | "b" => STANDARD.decode(payload).ok()?,
        "Q" | "q" => {
            let mut bytes = Vec::with_capacity(payload.len());
            let mut rest = payload.as_bytes();
            while let Some((&byte, tail)) = rest.split_first() {
                match byte {
                    b'_' => {
                        bytes.push(b' ');
                        rest = tail;
                    }
                    b'=' if tail.len() >= 2 => {
                        bytes.extend(hex::decode(&tail[..2]).ok()?);
                        rest = &tail[2..];
                    }
                    _ => {
                        bytes.push(byte);
                        rest = tail;
                    }
                }
            }
            bytes
        }
        _ => return None,
    };
    String::from_utf8(bytes).ok()
}

/// Header values must be visible ASCII; wrap anything else the way S3 does.
fn encode_metadata_value(value: &str) -> String {
    if value.bytes().all(|byte| (0x20..0x7f).contains(&byte)) {
        value.to_string()
    } else {
        format!("=?UTF-8?B?{}?=", STANDARD.encode(value))
    }
}
