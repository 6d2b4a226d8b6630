use std::time::Duration;

use reqwest::header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE};
use serde_json::Value;

use crate::config::{ConfigError, Credentials};
use crate::error::ToolError;

pub const SYSPARM_LIMIT: &str = "sysparm_limit";

/// Flat `key=value` query for the table API, sent in insertion order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueryParameters {
    pairs: Vec<(String, String)>,
}

impl QueryParameters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.pairs.push((key.into(), value.into()));
        self
    }

    /// Row cap, serialized as a decimal string.
    pub fn with_limit(self, limit: u32) -> Self {
        self.with(SYSPARM_LIMIT, limit.to_string())
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.pairs
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.pairs.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }
}

/// Single-attempt GET client for the ServiceNow table API.
#[derive(Debug, Clone)]
pub struct ApiClient {
    http: reqwest::Client,
}

impl ApiClient {
    pub fn new(timeout: Option<Duration>) -> Result<Self, ConfigError> {
        let mut builder = reqwest::Client::builder();
        if let Some(timeout) = timeout {
            builder = builder.timeout(timeout);
        }
        let http = builder
            .build()
            .map_err(|e| ConfigError::HttpClient(e.to_string()))?;
        Ok(Self { http })
    }

    /// GET `{base_url}{path}?{params}` and decode the JSON body as-is.
    ///
    /// `path` is always one of the fixed table paths, never caller input.
    pub async fn fetch_table(
        &self,
        path: &'static str,
        params: &QueryParameters,
        credentials: &Credentials,
    ) -> Result<Value, ToolError> {
        let mut url = reqwest::Url::parse(&format!("{}{}", credentials.base_url(), path))
            .map_err(|e| ToolError::Transport(format!("Invalid ServiceNow URL: {e}")))?;
        if !params.is_empty() {
            let mut qp = url.query_pairs_mut();
            for (k, v) in params.iter() {
                qp.append_pair(k, v);
            }
        }

        let response = self
            .http
            .get(url)
            .header(ACCEPT, "application/json")
            .header(CONTENT_TYPE, "application/json")
            .header(AUTHORIZATION, credentials.authorization_header())
            .send()
            .await
            .map_err(|e| transport_error(credentials.base_url(), &e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.bytes().await.ok();
            return Err(ToolError::RemoteApi {
                status: status.as_u16(),
                detail: body.as_deref().and_then(remote_error_detail),
            });
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| transport_error(credentials.base_url(), &e))?;
        serde_json::from_slice(&bytes).map_err(|e| {
            ToolError::MalformedResponse(format!("response body is not valid JSON: {e}"))
        })
    }
}

fn transport_error(base_url: &str, err: &reqwest::Error) -> ToolError {
    if err.is_timeout() {
        ToolError::Transport(format!("request to {base_url} timed out"))
    } else {
        ToolError::Transport(format!("{base_url}: {err}"))
    }
}

/// ServiceNow error bodies look like `{"error": {"message": ..., "detail": ...}}`.
fn remote_error_detail(bytes: &[u8]) -> Option<String> {
    let body: Value = serde_json::from_slice(bytes).ok()?;
    let error = body.get("error")?;
    error
        .get("message")
        .and_then(Value::as_str)
        .filter(|message| !message.is_empty())
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::MockServiceNow;
    use axum::http::StatusCode;
    use serde_json::json;

    #[test]
    fn query_parameters_keep_insertion_order() {
        let params = QueryParameters::new()
            .with("number", "INC0010001")
            .with_limit(1);
        let pairs: Vec<_> = params.iter().collect();
        assert_eq!(
            pairs,
            vec![("number", "INC0010001"), ("sysparm_limit", "1")]
        );
        assert_eq!(params.get(SYSPARM_LIMIT), Some("1"));
        assert_eq!(params.get("text"), None);
    }

    #[tokio::test]
    async fn fetch_table_sends_auth_headers_and_query() {
        let mock = MockServiceNow::with_records(json!([])).await;
        let client = ApiClient::new(None).unwrap();
        let params = QueryParameters::new().with("text", "vpn reset").with_limit(5);

        let body = client
            .fetch_table("/api/now/table/kb_knowledge", &params, &mock.credentials())
            .await
            .unwrap();
        assert_eq!(body, json!({ "result": [] }));

        let requests = mock.requests();
        assert_eq!(requests.len(), 1);
        let request = &requests[0];
        assert_eq!(request.path, "/api/now/table/kb_knowledge");
        assert_eq!(
            request.query,
            vec![
                ("text".to_string(), "vpn reset".to_string()),
                ("sysparm_limit".to_string(), "5".to_string()),
            ]
        );
        assert_eq!(request.header("accept"), Some("application/json"));
        assert_eq!(request.header("content-type"), Some("application/json"));
        // base64("admin:secret")
        assert_eq!(
            request.header("authorization"),
            Some("Basic YWRtaW46c2VjcmV0")
        );
    }

    #[tokio::test]
    async fn non_success_status_is_remote_api_error() {
        let mock = MockServiceNow::start(
            StatusCode::UNAUTHORIZED,
            json!({ "error": { "message": "User Not Authenticated", "detail": "Required to provide Auth information" }, "status": "failure" })
                .to_string(),
        )
        .await;
        let client = ApiClient::new(None).unwrap();

        let err = client
            .fetch_table(
                "/api/now/table/incident",
                &QueryParameters::new().with_limit(5),
                &mock.credentials(),
            )
            .await
            .unwrap_err();

        match err {
            ToolError::RemoteApi { status, detail } => {
                assert_eq!(status, 401);
                assert_eq!(detail.as_deref(), Some("User Not Authenticated"));
            }
            other => panic!("expected RemoteApi, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn error_status_survives_truncated_body() {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut request = [0_u8; 1024];
            let _ = socket.read(&mut request).await.unwrap();
            socket
                .write_all(b"HTTP/1.1 503 Service Unavailable\r\ncontent-length: 200\r\n\r\n{\"error\":")
                .await
                .unwrap();
        });

        let credentials = Credentials::new("admin", "secret", format!("http://{addr}")).unwrap();
        let client = ApiClient::new(Some(Duration::from_secs(5))).unwrap();
        let err = client
            .fetch_table("/api/now/table/incident", &QueryParameters::new(), &credentials)
            .await
            .unwrap_err();
        server.await.unwrap();

        assert!(matches!(
            err,
            ToolError::RemoteApi {
                status: 503,
                detail: None
            }
        ));
    }

    #[tokio::test]
    async fn success_with_invalid_json_is_malformed_response() {
        let mock = MockServiceNow::start(StatusCode::OK, "<html>login</html>").await;
        let client = ApiClient::new(None).unwrap();

        let err = client
            .fetch_table(
                "/api/now/table/incident",
                &QueryParameters::new(),
                &mock.credentials(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::MalformedResponse(_)));
    }

    #[tokio::test]
    async fn unreachable_instance_is_transport_error() {
        let credentials = Credentials::new("admin", "secret", "http://127.0.0.1:9").unwrap();
        let client = ApiClient::new(Some(Duration::from_secs(5))).unwrap();

        let err = client
            .fetch_table(
                "/api/now/table/incident",
                &QueryParameters::new().with_limit(5),
                &credentials,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::Transport(_)));
        assert_eq!(err.code(), "transport_error");
    }
}
