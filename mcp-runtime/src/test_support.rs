//! In-process stand-in for a ServiceNow instance.

use std::sync::{Arc, Mutex};

use axum::Router;
use axum::extract::State;
use axum::http::header::CONTENT_TYPE;
use axum::http::{HeaderMap, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use serde_json::{Value, json};
use tokio::task::JoinHandle;

use crate::config::Credentials;

#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub path: String,
    pub query: Vec<(String, String)>,
    pub headers: HeaderMap,
}

impl RecordedRequest {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }
}

#[derive(Clone)]
struct MockState {
    status: StatusCode,
    body: Arc<String>,
    requests: Arc<Mutex<Vec<RecordedRequest>>>,
}

pub struct MockServiceNow {
    base_url: String,
    requests: Arc<Mutex<Vec<RecordedRequest>>>,
    handle: JoinHandle<()>,
}

impl MockServiceNow {
    /// Answer every request with `status` and `body`.
    pub async fn start(status: StatusCode, body: impl Into<String>) -> Self {
        let requests = Arc::new(Mutex::new(Vec::new()));
        let state = MockState {
            status,
            body: Arc::new(body.into()),
            requests: requests.clone(),
        };
        let app = Router::new().fallback(record_and_reply).with_state(state);
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let handle = tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        Self {
            base_url: format!("http://{addr}"),
            requests,
            handle,
        }
    }

    /// Answer every request with `{"result": records}`.
    pub async fn with_records(records: Value) -> Self {
        Self::start(StatusCode::OK, json!({ "result": records }).to_string()).await
    }

    pub fn credentials(&self) -> Credentials {
        Credentials::new("admin", "secret", self.base_url.clone()).unwrap()
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.lock().unwrap().clone()
    }
}

impl Drop for MockServiceNow {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

async fn record_and_reply(State(state): State<MockState>, uri: Uri, headers: HeaderMap) -> Response {
    let query: Vec<(String, String)> = reqwest::Url::parse(&format!("http://mock{uri}"))
        .map(|url| url.query_pairs().into_owned().collect())
        .unwrap_or_default();
    state.requests.lock().unwrap().push(RecordedRequest {
        path: uri.path().to_string(),
        query,
        headers,
    });
    (
        state.status,
        [(CONTENT_TYPE, "application/json")],
        state.body.as_str().to_string(),
    )
        .into_response()
}
