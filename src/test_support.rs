//! Local JSON endpoint for exercising the HTTP engine adapters.

use axum::{http::StatusCode, routing::post, Json, Router};
use serde_json::Value;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Answers every POST to one path with a fixed status and JSON body,
/// recording the request bodies it received.
pub struct StubServer {
    pub base_url: String,
    requests: Arc<Mutex<Vec<Value>>>,
}

impl StubServer {
    pub async fn start(path: &str, status: u16, reply: Value) -> Self {
        Self::start_delayed(path, status, reply, Duration::ZERO).await
    }

    pub async fn start_delayed(path: &str, status: u16, reply: Value, delay: Duration) -> Self {
        let requests = Arc::new(Mutex::new(Vec::new()));
        let seen = requests.clone();
        let status = StatusCode::from_u16(status).unwrap();

        let app = Router::new().route(
            path,
            post(move |Json(body): Json<Value>| {
                let seen = seen.clone();
                let reply = reply.clone();
                async move {
                    seen.lock().unwrap().push(body);
                    tokio::time::sleep(delay).await;
                    (status, Json(reply))
                }
            }),
        );

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            base_url: format!("http://{}", addr),
            requests,
        }
    }

    pub fn requests(&self) -> Vec<Value> {
        self.requests.lock().unwrap().clone()
    }
}

/// An OpenAI-style completion whose first choice carries `content`.
pub fn completion(content: Value) -> Value {
    serde_json::json!({
        "choices": [{"message": {"role": "assistant", "content": content}}],
        "usage": {"prompt_tokens": 12, "completion_tokens": 4, "total_tokens": 16}
    })
}
