use axum::body::{to_bytes, Body};
use axum::http::{header, Request, StatusCode};
use serde_json::{json, Value};
use std::sync::Arc;
use tower::ServiceExt;

use doc_extractor::config::Settings;
use doc_extractor::engines::regex_ner::RegexNerEngine;
use doc_extractor::engines::{Engine, EngineInput};
use doc_extractor::error::EngineError;
use doc_extractor::orchestrator::{Orchestrator, OrchestratorOptions};
use doc_extractor::registry::{EngineDescriptor, EngineRegistry, InputMode};
use doc_extractor::schema::{EngineKind, EngineOutput, Locality, OcrOutput};
use doc_extractor::server::{router, AppState};

const BOUNDARY: &str = "XBOUNDARYX";
const PNG_MAGIC: &[u8] = &[0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A, 0, 0, 0, 0];

const INVOICE_TEXT: &str = "Invoice No: INV-2024-001 dated 2024-03-15";

struct FixedOcr {
    name: &'static str,
    text: &'static str,
}

#[async_trait::async_trait]
impl Engine for FixedOcr {
    fn name(&self) -> &str {
        self.name
    }

    async fn extract(&self, input: EngineInput<'_>) -> Result<EngineOutput, EngineError> {
        input
            .page()
            .ok_or_else(|| EngineError::missing_input("needs a page"))?;
        Ok(EngineOutput::Text(OcrOutput::text_only(self.text)))
    }
}

fn app() -> axum::Router {
    app_with_ocr(&[("tesseract", INVOICE_TEXT)])
}

fn app_with_ocr(ocr: &[(&'static str, &'static str)]) -> axum::Router {
    let mut registry = EngineRegistry::new();
    for &(name, text) in ocr {
        registry
            .register(EngineDescriptor::shared(
                name,
                EngineKind::Ocr,
                Locality::Local,
                InputMode::Pages,
                Arc::new(FixedOcr { name, text }),
            ))
            .unwrap();
    }
    registry
        .register(EngineDescriptor::shared(
            "regex_ner",
            EngineKind::Ner,
            Locality::Local,
            InputMode::Text,
            Arc::new(RegexNerEngine::default()),
        ))
        .unwrap();

    let settings = Settings::from_lookup(|_| None).unwrap();
    let orchestrator = Orchestrator::new(
        Arc::new(registry),
        OrchestratorOptions::from_settings(&settings),
    );
    router(AppState {
        orchestrator: Arc::new(orchestrator),
        settings: Arc::new(settings),
    })
}

async fn body_json(response: axum::response::Response) -> Value {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

fn multipart(filename: &str, data: &[u8], fields: &[(&str, &str)]) -> Request<Body> {
    let mut body = Vec::new();
    for (name, value) in fields {
        body.extend_from_slice(
            format!(
                "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"{name}\"\r\n\r\n{value}\r\n"
            )
            .as_bytes(),
        );
    }
    body.extend_from_slice(
        format!(
            "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"file\"; filename=\"{filename}\"\r\n\
             Content-Type: application/octet-stream\r\n\r\n"
        )
        .as_bytes(),
    );
    body.extend_from_slice(data);
    body.extend_from_slice(format!("\r\n--{BOUNDARY}--\r\n").as_bytes());

    Request::builder()
        .method("POST")
        .uri("/process")
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={BOUNDARY}"),
        )
        .body(Body::from(body))
        .unwrap()
}

fn json_post(uri: &str, value: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(value.to_string()))
        .unwrap()
}

#[tokio::test]
async fn health_reports_engine_count() {
    let response = app()
        .oneshot(Request::get("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await, json!({"status": "healthy", "engines": 2}));
}

#[tokio::test]
async fn engines_are_listed_with_kind_and_locality() {
    let response = app()
        .oneshot(Request::get("/engines").body(Body::empty()).unwrap())
        .await
        .unwrap();
    let body = body_json(response).await;
    assert_eq!(
        body[0],
        json!({"name": "tesseract", "kind": "ocr", "locality": "local", "input": "pages"})
    );
    assert_eq!(body[1]["kind"], "ner");
}

#[tokio::test]
async fn process_runs_ocr_then_ner() {
    let response = app()
        .oneshot(multipart(
            "scan.png",
            PNG_MAGIC,
            &[("engines", "tesseract"), ("ner", "regex_ner")],
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = body_json(response).await;
    assert_eq!(body["filename"], "scan.png");
    let keys: Vec<_> = body["results"].as_object().unwrap().keys().cloned().collect();
    assert_eq!(keys, vec!["tesseract", "regex_ner"]);
    assert_eq!(
        body["results"]["regex_ner"]["entities"]["order_number"],
        json!(["INV-2024-001"])
    );
}

#[tokio::test]
async fn process_honours_ner_source_field() {
    let app = app_with_ocr(&[
        ("tesseract", INVOICE_TEXT),
        ("cloud_vision", "Reach us at sales@example.com"),
    ]);
    let fields = [
        ("engines", "tesseract, cloud_vision"),
        ("ner", "regex_ner"),
        ("ner_source", "cloud_vision"),
    ];

    let response = app
        .clone()
        .oneshot(multipart("scan.png", PNG_MAGIC, &fields))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let entities = &body_json(response).await["results"]["regex_ner"]["entities"];
    assert_eq!(entities["contact_info"], json!(["sales@example.com"]));
    assert!(entities.get("order_number").is_none());

    // Without the field the first OCR engine in request order feeds NER
    let response = app
        .oneshot(multipart("scan.png", PNG_MAGIC, &fields[..2]))
        .await
        .unwrap();
    let entities = &body_json(response).await["results"]["regex_ner"]["entities"];
    assert_eq!(entities["order_number"], json!(["INV-2024-001"]));
    assert!(entities.get("contact_info").is_none());
}

#[tokio::test]
async fn process_rejects_unknown_engines() {
    let response = app()
        .oneshot(multipart(
            "scan.png",
            PNG_MAGIC,
            &[("engines", "tesseract, nope, nada")],
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = body_json(response).await;
    assert_eq!(body["code"], "UNKNOWN_ENGINE");
    assert_eq!(body["error"], "Unknown engine(s): nope, nada");
}

#[tokio::test]
async fn process_rejects_unsupported_upload() {
    let response = app()
        .oneshot(multipart("notes.txt", b"hello", &[]))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_json(response).await["code"], "UNSUPPORTED_FORMAT");
}

#[tokio::test]
async fn process_reports_undecodable_image_as_load_error() {
    let response = app()
        .oneshot(multipart("scan.png", b"not an image", &[]))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body_json(response).await["code"], "LOAD_ERROR");
}

#[tokio::test]
async fn entities_over_plain_text() {
    let response = app()
        .oneshot(json_post(
            "/entities",
            json!({"text": "Contact sales@example.com", "engines": ["regex_ner"]}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(
        body["results"]["regex_ner"]["entities"]["contact_info"],
        json!(["sales@example.com"])
    );
}

#[tokio::test]
async fn entities_over_flattened_json() {
    let response = app()
        .oneshot(json_post(
            "/entities",
            json!({"json": {"invoice": {"date": "2024-03-15"}}}),
        ))
        .await
        .unwrap();
    let body = body_json(response).await;
    assert_eq!(
        body["results"]["regex_ner"]["entities"]["date"],
        json!(["2024-03-15"])
    );
}

#[tokio::test]
async fn entities_rejects_ocr_engine() {
    let response = app()
        .oneshot(json_post(
            "/entities",
            json!({"text": "hello", "engines": ["tesseract"]}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_json(response).await["code"], "ENGINE_KIND_MISMATCH");
}

#[tokio::test]
async fn entities_requires_input() {
    let response = app()
        .oneshot(json_post("/entities", json!({"engines": ["regex_ner"]})))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}
