//! Request augmentation: the pure transformation applied to every request
//! bound for the backend before it hits the wire.

use reqwest::header::{AUTHORIZATION, HeaderName, HeaderValue};
use serde_json::Value;
use tracing::debug;
use url::Url;

use crate::config::ApiConfig;
use crate::account::ACCOUNT_ID_FIELD;
use crate::request::{ApiRequest, RequestBody};

pub const TIMEZONE_HEADER: &str = "x-timezone";

#[derive(Debug, Clone)]
pub struct RequestAugmenter {
    base_url: Url,
    assets_prefix: String,
    timezone: String,
}

impl RequestAugmenter {
    pub fn new(config: &ApiConfig) -> Self {
        Self {
            base_url: config.base_url.clone(),
            assets_prefix: config.assets_prefix.clone(),
            timezone: config.timezone.clone(),
        }
    }

    /// Requests outside the backend base URL, and static-asset fetches, pass
    /// through the pipeline untouched.
    pub fn should_augment(&self, url: &Url) -> bool {
        url.as_str().starts_with(self.base_url.as_str())
            && !url.path().starts_with(&self.assets_prefix)
    }

    /// Produce the request to actually send: timezone header, bearer token,
    /// and the account identifier merged into the body when one is known.
    pub fn augment(
        &self,
        mut request: ApiRequest,
        token: Option<&str>,
        account_id: Option<&str>,
    ) -> ApiRequest {
        match HeaderValue::from_str(&self.timezone) {
            Ok(value) => {
                request
                    .headers
                    .insert(HeaderName::from_static(TIMEZONE_HEADER), value);
            }
            Err(e) => debug!(error = %e, timezone = %self.timezone, "unusable timezone header"),
        }

        if let Some(token) = token {
            match HeaderValue::from_str(&format!("Bearer {token}")) {
                Ok(value) => {
                    request.headers.insert(AUTHORIZATION, value);
                }
                Err(e) => debug!(error = %e, "unusable bearer token"),
            }
        }

        if let Some(id) = account_id {
            request.body = merge_account_id(request.body, id);
        }

        request
    }
}

/// Merge the account identifier into a request body.
///
/// Object bodies gain the field directly. Text bodies are parsed, merged and
/// re-serialized; a body that does not parse to a JSON object is sent as-is.
/// An absent body becomes an object carrying just the identifier. Binary
/// bodies are never touched.
fn merge_account_id(body: RequestBody, id: &str) -> RequestBody {
    match body {
        RequestBody::Json(Value::Object(mut map)) => {
            map.insert(ACCOUNT_ID_FIELD.to_owned(), Value::String(id.to_owned()));
            RequestBody::Json(Value::Object(map))
        }
        RequestBody::Json(other) => RequestBody::Json(other),
        RequestBody::Text(text) => match serde_json::from_str::<Value>(&text) {
            Ok(Value::Object(mut map)) => {
                map.insert(ACCOUNT_ID_FIELD.to_owned(), Value::String(id.to_owned()));
                match serde_json::to_string(&Value::Object(map)) {
                    Ok(merged) => RequestBody::Text(merged),
                    Err(e) => {
                        debug!(error = %e, "failed to re-serialize merged body");
                        RequestBody::Text(text)
                    }
                }
            }
            Ok(_) | Err(_) => {
                debug!("text body is not a JSON object; sending unmodified");
                RequestBody::Text(text)
            }
        },
        RequestBody::Empty => {
            let mut map = serde_json::Map::new();
            map.insert(ACCOUNT_ID_FIELD.to_owned(), Value::String(id.to_owned()));
            RequestBody::Json(Value::Object(map))
        }
        bytes @ RequestBody::Bytes(_) => bytes,
    }
}
