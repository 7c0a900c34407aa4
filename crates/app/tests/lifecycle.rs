use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use axum::Router;
use lopdf::content::{Content, Operation};
use lopdf::{dictionary, Document, Object, Stream};
use pdf_prompt_app::{server, Services, Settings};
use pdf_prompt_core::{LocalEventBus, PostPolicy, StorageEvent, FALLBACK_ANSWER};
use serde_json::{json, Value};
use std::sync::Arc;
use tower::ServiceExt;

const BOUNDARY: &str = "pdf-prompt-boundary";

/// Two text pages padded with an unreferenced string object to `target` bytes.
fn report_pdf(target: usize) -> Vec<u8> {
    let mut pad = 1usize;
    for _ in 0..6 {
        let bytes = build_pdf(&["Invoice total 42 EUR", "Payment is due in March"], pad);
        if bytes.len() == target {
            return bytes;
        }
        pad = (pad as i64 + target as i64 - bytes.len() as i64).max(1) as usize;
    }
    panic!("could not pad pdf to {target} bytes");
}

fn build_pdf(pages: &[&str], pad: usize) -> Vec<u8> {
    let mut doc = Document::with_version("1.5");
    let pages_id = doc.new_object_id();
    let font_id = doc.add_object(dictionary! {
        "Type" => "Font",
        "Subtype" => "Type1",
        "BaseFont" => "Courier",
    });
    let resources_id = doc.add_object(dictionary! {
        "Font" => dictionary! { "F1" => font_id },
    });

    let mut kids: Vec<Object> = Vec::new();
    for text in pages {
        let content = Content {
            operations: vec![
                Operation::new("BT", vec![]),
                Operation::new("Tf", vec!["F1".into(), 12.into()]),
                Operation::new("Td", vec![72.into(), 720.into()]),
                Operation::new("Tj", vec![Object::string_literal(*text)]),
                Operation::new("ET", vec![]),
            ],
        };
        let stream = Stream::new(dictionary! {}, content.encode().expect("encode"));
        let content_id = doc.add_object(stream);
        let page_id = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "Contents" => content_id,
        });
        kids.push(page_id.into());
    }

    let count = kids.len() as i64;
    doc.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => kids,
            "Count" => count,
            "Resources" => resources_id,
            "MediaBox" => vec![0.into(), 0.into(), 612.into(), 792.into()],
        }),
    );
    doc.add_object(Object::string_literal(vec![b'x'; pad]));
    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    doc.trailer.set("Root", catalog_id);

    let mut bytes = Vec::new();
    doc.save_to(&mut bytes).expect("save pdf");
    bytes
}

struct Harness {
    app: Router,
    bus: LocalEventBus,
}

impl Harness {
    fn new() -> Self {
        let (services, bus) =
            Services::local(&Settings::default(), "http://localhost:3000").expect("services");
        Self {
            app: server::router(Arc::new(services)),
            bus,
        }
    }

    async fn send(&self, request: Request<Body>) -> (StatusCode, Value) {
        let response = self.app.clone().oneshot(request).await.expect("response");
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("body");
        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).expect("json body")
        };
        (status, body)
    }

    async fn json(&self, method: &str, uri: &str, body: Value) -> (StatusCode, Value) {
        let request = Request::builder()
            .method(method)
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .expect("request");
        self.send(request).await
    }

    async fn list(&self) -> Value {
        let request = Request::builder()
            .uri("/list-uploaded-files")
            .body(Body::empty())
            .expect("request");
        let (status, body) = self.send(request).await;
        assert_eq!(status, StatusCode::OK);
        body["items"].clone()
    }

    async fn upload(&self, fields: &Value, file: &[u8]) -> (StatusCode, Value) {
        let mut body = Vec::new();
        for (name, value) in fields.as_object().expect("fields") {
            let value = value.as_str().expect("string field");
            let part = format!(
                "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"{name}\"\r\n\r\n{value}\r\n"
            );
            body.extend_from_slice(part.as_bytes());
        }
        body.extend_from_slice(
            format!(
                "--{BOUNDARY}\r\n\
                 Content-Disposition: form-data; name=\"file\"; filename=\"report.pdf\"\r\n\
                 Content-Type: application/pdf\r\n\r\n"
            )
            .as_bytes(),
        );
        body.extend_from_slice(file);
        body.extend_from_slice(format!("\r\n--{BOUNDARY}--\r\n").as_bytes());

        let request = Request::builder()
            .method("POST")
            .uri("/local-bucket")
            .header(header::CONTENT_TYPE, format!("multipart/form-data; boundary={BOUNDARY}"))
            .body(Body::from(body))
            .expect("request");
        self.send(request).await
    }

    async fn upload_link(&self, size: usize) -> Value {
        let (status, authorization) = self
            .json("POST", "/generate-upload-link", json!({ "name": "report.pdf", "size": size }))
            .await;
        assert_eq!(status, StatusCode::OK);
        authorization
    }
}

#[tokio::test]
async fn document_moves_through_every_state_on_simulated_events() {
    let harness = Harness::new();
    let pdf = report_pdf(1024);
    assert_eq!(pdf.len(), 1024);

    let authorization = harness.upload_link(1024).await;
    let id = authorization["id"].as_str().expect("id").to_string();
    let encoded = authorization["fields"]["Policy"].as_str().expect("policy");
    let policy = PostPolicy::decode(encoded).expect("decode");
    assert_eq!(policy.content_length_range(), Some((1024, 1024)));
    assert!(harness.list().await.as_array().expect("items").is_empty());

    let (status, _) = harness.upload(&authorization["fields"], &pdf).await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let upload_event = serde_json::to_value(StorageEvent::object_created(
        "pdf-prompt-local",
        &format!("{id}/data/file.pdf"),
        1024,
    ))
    .expect("event");
    let (status, body) = harness.json("POST", "/events/storage", upload_event.clone()).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["outcome"]["outcome"], "recorded");
    assert_eq!(
        harness.list().await,
        json!([{ "id": id, "name": "report.pdf", "status": "PENDING_EMBEDDINGS" }])
    );

    // Re-delivery overwrites instead of being rejected.
    let (status, body) = harness.json("POST", "/events/storage", upload_event).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["outcome"]["overwritten"], true);
    assert_eq!(harness.list().await.as_array().expect("items").len(), 1);

    let index_event = serde_json::to_value(StorageEvent::object_created(
        "pdf-prompt-local",
        &format!("{id}/vector/faiss.index"),
        64,
    ))
    .expect("event");
    let (status, body) = harness.json("POST", "/events/storage", index_event).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["outcome"]["outcome"], "ready");
    assert_eq!(
        harness.list().await,
        json!([{ "id": id, "name": "report.pdf", "status": "READY" }])
    );
}

#[tokio::test]
async fn local_event_bus_drives_upload_to_chat() {
    let mut harness = Harness::new();
    let pdf = report_pdf(1024);
    let authorization = harness.upload_link(pdf.len()).await;
    let id = authorization["id"].as_str().expect("id").to_string();

    let (status, _) = harness.upload(&authorization["fields"], &pdf).await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let delivered = harness.bus.drain().await;
    assert!(delivered >= 4, "upload, insert, artifacts and ready: {delivered}");
    assert_eq!(harness.list().await[0]["status"], "READY");

    let (status, answer) = harness
        .json("POST", &format!("/{id}/chat"), json!({ "prompt": "What is the total?" }))
        .await;
    assert_eq!(status, StatusCode::OK);
    let response = answer["response"].as_str().expect("response");
    assert!(!response.is_empty());
    assert!(response.contains("42 EUR"));

    let (status, answer) = harness
        .json("POST", &format!("/{id}/chat"), json!({ "prompt": "Who painted the Mona Lisa?" }))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert!(answer["response"].as_str().expect("response").contains(FALLBACK_ANSWER));
}

#[tokio::test]
async fn local_bucket_enforces_the_signed_policy() {
    let mut harness = Harness::new();
    let authorization = harness.upload_link(1024).await;

    let (status, body) = harness.upload(&authorization["fields"], &report_pdf(1100)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["issues"][0]["path"], "content-length");

    let mut tampered = authorization["fields"].clone();
    tampered["x-amz-meta-name"] = json!("other.pdf");
    let (status, body) = harness.upload(&tampered, &report_pdf(1024)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["message"], "Upload rejected");

    assert_eq!(harness.bus.drain().await, 0);
    assert!(harness.list().await.as_array().expect("items").is_empty());
}
