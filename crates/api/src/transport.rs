//! The network seam. The dispatcher only ever talks to [`HttpTransport`];
//! production wires in [`ReqwestTransport`], tests substitute doubles.

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::Client;
use reqwest::header::CONTENT_TYPE;

use crate::error::ApiError;
use crate::request::{ApiRequest, RequestBody};
use crate::response::{ApiResponse, ResponseBody};

#[async_trait]
pub trait HttpTransport: Send + Sync {
    async fn execute(&self, request: ApiRequest) -> Result<ApiResponse, ApiError>;
}

#[derive(Debug, Clone, Default)]
pub struct ReqwestTransport {
    client: Client,
}

impl ReqwestTransport {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn execute(&self, request: ApiRequest) -> Result<ApiResponse, ApiError> {
        let mut builder = self
            .client
            .request(request.method, request.url)
            .headers(request.headers);

        builder = match request.body {
            RequestBody::Json(value) => builder.json(&value),
            RequestBody::Text(text) => builder.body(text),
            RequestBody::Bytes(bytes) => builder.body(bytes),
            RequestBody::Empty => builder,
        };

        let response = builder.send().await?;
        let status = response.status();
        let headers = response.headers().clone();
        let content_type = headers
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_owned();
        let bytes = response.bytes().await?;

        Ok(ApiResponse {
            status,
            headers,
            body: classify_body(&content_type, bytes),
        })
    }
}

/// Preserve the body shape the server sent: JSON stays JSON, text stays text,
/// everything else is opaque bytes.
fn classify_body(content_type: &str, bytes: Bytes) -> ResponseBody {
    if bytes.is_empty() {
        return ResponseBody::Empty;
    }
    if content_type.contains("json")
        && let Ok(value) = serde_json::from_slice(&bytes)
    {
        return ResponseBody::Json(value);
    }
    if content_type.starts_with("text/")
        && let Ok(text) = std::str::from_utf8(&bytes)
    {
        return ResponseBody::Text(text.to_owned());
    }
    ResponseBody::Bytes(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn json_content_type_decodes() {
        let body = classify_body("application/json; charset=utf-8", Bytes::from_static(b"{\"a\":1}"));
        assert_eq!(body, ResponseBody::Json(json!({"a": 1})));
    }

    #[test]
    fn invalid_json_stays_opaque() {
        let body = classify_body("application/json", Bytes::from_static(b"{broken"));
        assert_eq!(body, ResponseBody::Bytes(Bytes::from_static(b"{broken")));
    }

    #[test]
    fn text_content_type_decodes() {
        let body = classify_body("text/plain", Bytes::from_static(b"hello"));
        assert_eq!(body, ResponseBody::Text("hello".into()));
    }

    #[test]
    fn empty_body_is_empty() {
        let body = classify_body("application/json", Bytes::new());
        assert_eq!(body, ResponseBody::Empty);
    }
}
