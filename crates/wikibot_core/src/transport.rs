use std::sync::Arc;
use std::time::Duration;

use reqwest::blocking::{Client, multipart};
use reqwest::header::{COOKIE, SET_COOKIE, USER_AGENT};

use crate::error::WikiResult;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
}

/// How parameters travel on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyKind {
    Query,
    Form,
    Multipart,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilePart {
    pub field: String,
    pub filename: String,
    pub bytes: Vec<u8>,
}

#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub url: String,
    pub body: BodyKind,
    pub params: Vec<(String, String)>,
    pub file: Option<FilePart>,
    pub cookie: String,
    pub user_agent: String,
}

impl HttpRequest {
    pub fn param(&self, key: &str) -> Option<&str> {
        self.params
            .iter()
            .find(|(name, _)| name == key)
            .map(|(_, value)| value.as_str())
    }

    pub fn action(&self) -> &str {
        self.param("action").unwrap_or("")
    }
}

#[derive(Debug, Clone, Default)]
pub struct HttpResponse {
    pub status: u16,
    pub set_cookie: Vec<String>,
    pub body: String,
}

/// One HTTP round trip. Retries, cookies and decoding live above this seam.
pub trait Transport: Send + Sync {
    fn send(&self, request: &HttpRequest) -> WikiResult<HttpResponse>;
}

impl<T: Transport + ?Sized> Transport for Arc<T> {
    fn send(&self, request: &HttpRequest) -> WikiResult<HttpResponse> {
        (**self).send(request)
    }
}

pub struct ReqwestTransport {
    client: Client,
}

impl ReqwestTransport {
    pub fn new(timeout_ms: u64) -> WikiResult<Self> {
        // Cookies are owned by `CookieStore`, so reqwest's jar stays off.
        let client = Client::builder()
            .timeout(Duration::from_millis(timeout_ms))
            .build()?;
        Ok(Self { client })
    }
}

impl Transport for ReqwestTransport {
    fn send(&self, request: &HttpRequest) -> WikiResult<HttpResponse> {
        let builder = match request.body {
            BodyKind::Query => self.client.get(&request.url).query(&request.params),
            BodyKind::Form => self.client.post(&request.url).form(&request.params),
            BodyKind::Multipart => {
                let mut form = multipart::Form::new();
                for (key, value) in &request.params {
                    form = form.text(key.clone(), value.clone());
                }
                if let Some(file) = &request.file {
                    let part = multipart::Part::bytes(file.bytes.clone())
                        .file_name(file.filename.clone());
                    form = form.part(file.field.clone(), part);
                }
                self.client.post(&request.url).multipart(form)
            }
        };

        let mut builder = builder.header(USER_AGENT, request.user_agent.as_str());
        if !request.cookie.is_empty() {
            builder = builder.header(COOKIE, request.cookie.as_str());
        }

        let response = builder.send()?;
        let status = response.status().as_u16();
        let set_cookie = response
            .headers()
            .get_all(SET_COOKIE)
            .iter()
            .filter_map(|value| value.to_str().ok())
            .map(ToString::to_string)
            .collect();
        let body = response.text()?;
        Ok(HttpResponse {
            status,
            set_cookie,
            body,
        })
    }
}
