//! `webhook`: outbound HTTP GET/POST calls.
//!
//! Transport failures are reported as a well-formed `success: false` result
//! rather than a fault, so a flaky endpoint does not abort the workflow.

use std::any::Any;
use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, CONTENT_TYPE};
use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::{Action, Component, ComponentError, Params, ResultMap, SharedContext};

pub const NAME: &str = "webhook";
pub const GET_ACTION: &str = "webhook.get";
pub const POST_ACTION: &str = "webhook.post";

/// Per-request bound applied by the HTTP client itself.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Default)]
pub struct Webhook;

impl Component for Webhook {
    fn name(&self) -> &str {
        NAME
    }

    fn setup(&mut self, _profile: &Params) -> Result<(), ComponentError> {
        Ok(())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Method {
    Get,
    Post,
}

/// `webhook.get` / `webhook.post`.
#[derive(Debug)]
pub struct RequestAction {
    method: Method,
    url: String,
    headers: BTreeMap<String, String>,
    body: Option<String>,
}

impl RequestAction {
    pub fn get(params: Params) -> Result<Self, ComponentError> {
        Self::from_params(Method::Get, params)
    }

    pub fn post(params: Params) -> Result<Self, ComponentError> {
        Self::from_params(Method::Post, params)
    }

    fn from_params(method: Method, params: Params) -> Result<Self, ComponentError> {
        let url = params
            .get("url")
            .and_then(Value::as_str)
            .filter(|u| !u.trim().is_empty())
            .ok_or_else(|| ComponentError::InvalidConfig("'url' is required".into()))?
            .to_owned();

        let mut headers = parse_headers(params.get("headers"));
        let body = match method {
            Method::Get => None,
            Method::Post => {
                if !headers.keys().any(|k| k.eq_ignore_ascii_case("content-type")) {
                    headers.insert("Content-Type".into(), "application/json".into());
                }
                Some(match params.get("data") {
                    None | Some(Value::Null) => String::new(),
                    Some(Value::String(s)) => s.clone(),
                    Some(other) => other.to_string(),
                })
            }
        };

        Ok(Self {
            method,
            url,
            headers,
            body,
        })
    }

    fn header_map(&self) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (name, value) in &self.headers {
            match (
                HeaderName::from_bytes(name.as_bytes()),
                HeaderValue::from_str(value),
            ) {
                (Ok(n), Ok(v)) => {
                    map.insert(n, v);
                }
                _ => warn!(header = %name, "skipping invalid header"),
            }
        }
        map
    }

    fn failure(&self, error: String) -> ResultMap {
        into_result(json!({
            "status_code": 0,
            "response_body": "",
            "headers": {},
            "success": false,
            "error": error,
        }))
    }
}

/// Headers may be given as a JSON object or as JSON text; anything
/// unparseable yields no headers.
fn parse_headers(raw: Option<&Value>) -> BTreeMap<String, String> {
    let object = match raw {
        Some(Value::Object(map)) => map.clone(),
        Some(Value::String(text)) if !text.trim().is_empty() => {
            match serde_json::from_str::<Value>(text) {
                Ok(Value::Object(map)) => map,
                _ => return BTreeMap::new(),
            }
        }
        _ => return BTreeMap::new(),
    };
    object
        .into_iter()
        .map(|(k, v)| {
            let v = match v {
                Value::String(s) => s,
                other => other.to_string(),
            };
            (k, v)
        })
        .collect()
}

fn into_result(value: Value) -> ResultMap {
    match value {
        Value::Object(map) => map,
        _ => ResultMap::new(),
    }
}

#[async_trait]
impl Action for RequestAction {
    async fn execute(&self, _ctx: &SharedContext) -> Result<ResultMap, ComponentError> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| ComponentError::Fault(format!("failed to build HTTP client: {e}")))?;

        let request = match self.method {
            Method::Get => client.get(&self.url),
            Method::Post => client
                .post(&self.url)
                .body(self.body.clone().unwrap_or_default()),
        }
        .headers(self.header_map());

        debug!(method = ?self.method, url = %self.url, "sending webhook request");
        let response = match request.send().await {
            Ok(r) => r,
            Err(e) => return Ok(self.failure(e.to_string())),
        };

        let status = response.status();
        let headers: serde_json::Map<String, Value> = response
            .headers()
            .iter()
            .filter_map(|(k, v)| {
                v.to_str()
                    .ok()
                    .map(|v| (k.as_str().to_owned(), Value::String(v.to_owned())))
            })
            .collect();
        let body = match response.text().await {
            Ok(body) => body,
            Err(e) => return Ok(self.failure(e.to_string())),
        };

        Ok(into_result(json!({
            "status_code": status.as_u16(),
            "response_body": body,
            "headers": headers,
            "success": true,
        })))
    }

    fn field_choices(&self, field_name: &str, _field_config: &Value) -> Vec<String> {
        match field_name {
            "headers" => vec![CONTENT_TYPE.as_str().to_owned()],
            _ => Vec::new(),
        }
    }
}
