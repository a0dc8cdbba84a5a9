use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::thread::sleep;
use std::time::Duration;

use serde_json::{Map, Value, json};

use crate::config::ClientConfig;
use crate::cookies::CookieStore;
use crate::error::{WikiError, WikiResult};
use crate::response::ApiResponse;
use crate::transport::{BodyKind, FilePart, HttpRequest, Method, Transport};

/// Error codes that mean "nothing to do": `(action, code, synthetic success payload)`.
const IDEMPOTENT_OUTCOMES: &[(&str, &str, &str)] =
    &[("upload", "fileexists-no-change", "no-change")];

/// One logical API call: action, ordered parameter bag, optional method
/// override and optional file payload.
#[derive(Debug, Clone)]
pub struct ApiRequest {
    action: String,
    method: Option<Method>,
    params: Vec<(String, String)>,
    file: Option<FilePart>,
}

impl ApiRequest {
    pub fn new(action: &str) -> Self {
        Self {
            action: action.to_string(),
            method: None,
            params: Vec::new(),
            file: None,
        }
    }

    pub fn param(mut self, key: &str, value: impl Into<String>) -> Self {
        let value = value.into();
        match self.params.iter_mut().find(|(name, _)| name == key) {
            Some(entry) => entry.1 = value,
            None => self.params.push((key.to_string(), value)),
        }
        self
    }

    pub fn param_opt(self, key: &str, value: Option<impl Into<String>>) -> Self {
        match value {
            Some(value) => self.param(key, value),
            None => self,
        }
    }

    /// Adds `key=1` when `enabled`; MediaWiki treats presence as true.
    pub fn flag(self, key: &str, enabled: bool) -> Self {
        if enabled { self.param(key, "1") } else { self }
    }

    pub fn method(mut self, method: Method) -> Self {
        self.method = Some(method);
        self
    }

    /// Attach a file payload bound to `filename`, sent as the `file` field.
    pub fn file(mut self, filename: &str, bytes: Vec<u8>) -> Self {
        self.file = Some(FilePart {
            field: "file".to_string(),
            filename: filename.to_string(),
            bytes,
        });
        self
    }

    pub fn action(&self) -> &str {
        &self.action
    }

    pub fn get_param(&self, key: &str) -> Option<&str> {
        self.params
            .iter()
            .find(|(name, _)| name == key)
            .map(|(_, value)| value.as_str())
    }

    pub fn resolve_method(&self) -> Method {
        if let Some(method) = self.method {
            return method;
        }
        match self.action.as_str() {
            "query" => Method::Get,
            "parse" if self.get_param("text").is_none() => Method::Get,
            _ => Method::Post,
        }
    }

    fn body_kind(&self) -> BodyKind {
        if self.action == "upload" {
            return BodyKind::Multipart;
        }
        match self.resolve_method() {
            Method::Get => BodyKind::Query,
            Method::Post => BodyKind::Form,
        }
    }

    fn wire_params(&self) -> Vec<(String, String)> {
        let mut pairs = Vec::with_capacity(self.params.len() + 3);
        pairs.push(("action".to_string(), self.action.clone()));
        for (key, value) in &self.params {
            if key != "action" && key != "format" && key != "utf8" {
                pairs.push((key.clone(), value.clone()));
            }
        }
        pairs.push(("format".to_string(), "json".to_string()));
        pairs.push(("utf8".to_string(), "1".to_string()));
        pairs
    }
}

/// Issues API calls with a flat retry budget and owns the session cookies.
pub struct RequestExecutor {
    transport: Box<dyn Transport>,
    cookies: Mutex<CookieStore>,
    api_url: String,
    user_agent: String,
    max_retry: usize,
    retry_delay: Duration,
    request_count: AtomicUsize,
}

impl RequestExecutor {
    pub fn new(config: &ClientConfig, transport: Box<dyn Transport>) -> Self {
        Self {
            transport,
            cookies: Mutex::new(CookieStore::new()),
            api_url: config.api_url.clone(),
            user_agent: config.user_agent.clone(),
            max_retry: config.max_retry,
            retry_delay: Duration::from_millis(config.retry_delay_ms),
            request_count: AtomicUsize::new(0),
        }
    }

    pub fn api_url(&self) -> &str {
        &self.api_url
    }

    pub fn request_count(&self) -> usize {
        self.request_count.load(Ordering::Relaxed)
    }

    pub fn has_cookie(&self, name: &str) -> bool {
        self.cookies().has(name)
    }

    pub fn has_cookie_suffix(&self, suffix: &str) -> bool {
        self.cookies().has_suffix(suffix)
    }

    pub fn cookie_header(&self) -> String {
        self.cookies().serialize()
    }

    /// Send `request`, retrying the identical call on non-200 statuses and
    /// transport failures up to `max_retry` times.
    pub fn execute(&self, request: &ApiRequest) -> WikiResult<ApiResponse> {
        self.request_count.fetch_add(1, Ordering::Relaxed);
        let body = request.body_kind();
        let params = request.wire_params();
        let attempts = self.max_retry.saturating_add(1);

        let mut last_error = None;
        for attempt in 1..=attempts {
            let http_request = HttpRequest {
                url: self.api_url.clone(),
                body,
                params: params.clone(),
                file: request.file.clone(),
                cookie: self.cookie_header(),
                user_agent: self.user_agent.clone(),
            };
            tracing::debug!(action = request.action(), attempt, "sending API request");

            match self.transport.send(&http_request) {
                Ok(response) if response.status == 200 => {
                    self.cookies().ingest(&response.set_cookie);
                    let value: Value = serde_json::from_str(&response.body)?;
                    return Ok(normalize(request.action(), ApiResponse::new(value)));
                }
                Ok(response) => {
                    tracing::warn!(
                        action = request.action(),
                        status = response.status,
                        attempt,
                        "API request returned non-200 status"
                    );
                    last_error = Some(WikiError::Transport {
                        status: response.status,
                        attempts: attempt,
                    });
                }
                Err(error) => {
                    tracing::warn!(
                        action = request.action(),
                        attempt,
                        error = %error,
                        "API request failed"
                    );
                    last_error = Some(error);
                }
            }

            if attempt < attempts && !self.retry_delay.is_zero() {
                sleep(self.retry_delay);
            }
        }

        Err(last_error.unwrap_or(WikiError::Transport {
            status: 0,
            attempts,
        }))
    }

    fn cookies(&self) -> MutexGuard<'_, CookieStore> {
        self.cookies
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Rewrite known idempotent error outcomes into their success payloads.
fn normalize(action: &str, response: ApiResponse) -> ApiResponse {
    let Some(code) = response.error_code() else {
        return response;
    };
    for (outcome_action, outcome_code, result) in IDEMPOTENT_OUTCOMES {
        if *outcome_action == action && *outcome_code == code {
            tracing::debug!(action, code, "treating idempotent error as success");
            let mut payload = Map::new();
            payload.insert(action.to_string(), json!({ "result": result }));
            return ApiResponse::new(Value::Object(payload));
        }
    }
    response
}
