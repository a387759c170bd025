use bytes::Bytes;
use reqwest::StatusCode;
use reqwest::header::HeaderMap;
use serde_json::Value;

/// Response body as received from the transport. The pipeline inspects bodies
/// for reconciliation but hands them to the caller exactly as received.
#[derive(Debug, Clone, PartialEq)]
pub enum ResponseBody {
    Json(Value),
    Text(String),
    Bytes(Bytes),
    Empty,
}

#[derive(Debug, Clone)]
pub struct ApiResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: ResponseBody,
}

impl ApiResponse {
    pub fn new(status: StatusCode, body: ResponseBody) -> Self {
        Self {
            status,
            headers: HeaderMap::new(),
            body,
        }
    }

    pub fn is_unauthorized(&self) -> bool {
        self.status == StatusCode::UNAUTHORIZED
    }

    /// Decoded JSON view of the body, when it has one.
    pub fn json(&self) -> Option<Value> {
        decode_body(&self.body)
    }
}

/// Decode a body to JSON regardless of its transport shape: JSON bodies are
/// used directly, text and UTF-8 binary bodies are parsed. Returns `None` for
/// anything that does not decode; callers treat that as "nothing to inspect".
pub fn decode_body(body: &ResponseBody) -> Option<Value> {
    match body {
        ResponseBody::Json(value) => Some(value.clone()),
        ResponseBody::Text(text) => serde_json::from_str(text).ok(),
        ResponseBody::Bytes(bytes) => {
            let text = std::str::from_utf8(bytes).ok()?;
            serde_json::from_str(text).ok()
        }
        ResponseBody::Empty => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn decodes_json_body_directly() {
        let body = ResponseBody::Json(json!({"accountId": "a-1"}));
        assert_eq!(decode_body(&body), Some(json!({"accountId": "a-1"})));
    }

    #[test]
    fn decodes_text_body() {
        let body = ResponseBody::Text(r#"{"calories": 420}"#.into());
        assert_eq!(decode_body(&body), Some(json!({"calories": 420})));
    }

    #[test]
    fn decodes_binary_body_through_text() {
        let body = ResponseBody::Bytes(Bytes::from_static(br#"{"ok": true}"#));
        assert_eq!(decode_body(&body), Some(json!({"ok": true})));
    }

    #[test]
    fn undecodable_bodies_yield_none() {
        assert_eq!(decode_body(&ResponseBody::Empty), None);
        assert_eq!(decode_body(&ResponseBody::Text("not json".into())), None);
        assert_eq!(
            decode_body(&ResponseBody::Bytes(Bytes::from_static(&[0xff, 0xfe]))),
            None
        );
    }
}
