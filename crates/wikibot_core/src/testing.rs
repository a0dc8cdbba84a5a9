//! Hand-written transports for unit tests.

use std::collections::VecDeque;
use std::sync::Mutex;

use serde_json::Value;

use crate::config::ClientConfig;
use crate::error::{WikiError, WikiResult};
use crate::transport::{HttpRequest, HttpResponse, Transport};

pub fn test_config() -> ClientConfig {
    let mut config = ClientConfig::new("https://test.example.org/api.php");
    config.user_agent = "wikibot-test/0.1".to_string();
    config.refresh_wait_ms = 10;
    config
}

pub fn ok(body: Value) -> HttpResponse {
    HttpResponse {
        status: 200,
        set_cookie: Vec::new(),
        body: body.to_string(),
    }
}

pub fn status(code: u16) -> HttpResponse {
    HttpResponse {
        status: code,
        set_cookie: Vec::new(),
        body: String::new(),
    }
}

/// Replays canned responses in order and records every request.
pub struct ScriptedTransport {
    responses: Mutex<VecDeque<WikiResult<HttpResponse>>>,
    requests: Mutex<Vec<HttpRequest>>,
}

impl ScriptedTransport {
    pub fn new(responses: Vec<HttpResponse>) -> Self {
        Self::with_results(responses.into_iter().map(Ok).collect())
    }

    /// Like `new`, but individual sends may fail before any response arrives.
    pub fn with_results(results: Vec<WikiResult<HttpResponse>>) -> Self {
        Self {
            responses: Mutex::new(results.into()),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn requests(&self) -> Vec<HttpRequest> {
        self.requests.lock().expect("requests lock").clone()
    }
}

impl Transport for ScriptedTransport {
    fn send(&self, request: &HttpRequest) -> WikiResult<HttpResponse> {
        self.requests
            .lock()
            .expect("requests lock")
            .push(request.clone());
        self.responses
            .lock()
            .expect("responses lock")
            .pop_front()
            .unwrap_or_else(|| {
                Err(WikiError::Config(
                    "scripted transport ran out of responses".to_string(),
                ))
            })
    }
}

/// Answers through a closure so tests can route by action and keep state.
pub struct RoutedTransport<F> {
    handler: F,
    requests: Mutex<Vec<HttpRequest>>,
}

impl<F> RoutedTransport<F>
where
    F: Fn(&HttpRequest) -> HttpResponse + Send + Sync,
{
    pub fn new(handler: F) -> Self {
        Self {
            handler,
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn requests(&self) -> Vec<HttpRequest> {
        self.requests.lock().expect("requests lock").clone()
    }

    pub fn actions(&self) -> Vec<String> {
        self.requests()
            .iter()
            .map(|request| request.action().to_string())
            .collect()
    }
}

impl<F> Transport for RoutedTransport<F>
where
    F: Fn(&HttpRequest) -> HttpResponse + Send + Sync,
{
    fn send(&self, request: &HttpRequest) -> WikiResult<HttpResponse> {
        self.requests
            .lock()
            .expect("requests lock")
            .push(request.clone());
        Ok((self.handler)(request))
    }
}
