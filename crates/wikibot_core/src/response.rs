use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::error::{ApiError, WikiError, WikiResult};

pub const ERROR_BADTOKEN: &str = "badtoken";
pub const ERROR_CSRF_TOKEN_MISSING: &str = "csrf-token-missing";
pub const ERROR_NO_TITLE: &str = "no-title-or-id";
pub const ERROR_READFILE_FAILED: &str = "readfile-failed";

/// Uniform result of one API call: the decoded JSON body, which is either a
/// success payload or an `{error: {code, info}}` envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ApiResponse(Value);

impl ApiResponse {
    pub fn new(value: Value) -> Self {
        Self(value)
    }

    /// Synthetic error envelope produced locally, shaped like a server one.
    pub fn error_response(code: &str, info: impl Into<String>) -> Self {
        Self(json!({ "error": { "code": code, "info": info.into() } }))
    }

    pub fn error(&self) -> Option<ApiError> {
        let error = self.0.get("error")?;
        let code = error
            .get("code")
            .and_then(Value::as_str)
            .unwrap_or("unknown_error");
        let info = error.get("info").and_then(Value::as_str).unwrap_or("");
        Some(ApiError::new(code, info))
    }

    pub fn error_code(&self) -> Option<&str> {
        self.0
            .get("error")
            .and_then(|error| error.get("code"))
            .and_then(Value::as_str)
    }

    pub fn has_error_code(&self, code: &str) -> bool {
        self.error_code() == Some(code)
    }

    pub fn is_success(&self) -> bool {
        self.0.get("error").is_none()
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn value(&self) -> &Value {
        &self.0
    }

    pub fn into_value(self) -> Value {
        self.0
    }

    /// Decode into a typed payload, turning an error envelope into [`WikiError::Api`].
    pub fn decode<T: serde::de::DeserializeOwned>(self) -> WikiResult<T> {
        if let Some(error) = self.error() {
            return Err(WikiError::Api(error));
        }
        Ok(serde_json::from_value(self.0)?)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageRef {
    #[serde(default)]
    pub pageid: i64,
    pub ns: i32,
    pub title: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PageContent {
    pub title: String,
    pub namespace: i32,
    pub page_id: i64,
    pub revision_id: i64,
    pub timestamp: String,
    pub content: String,
}

#[derive(Debug, Deserialize, Default)]
pub(crate) struct TokenQueryResponse {
    #[serde(default)]
    pub query: TokenQueryPayload,
}

#[derive(Debug, Deserialize, Default)]
pub(crate) struct TokenQueryPayload {
    pub tokens: Option<TokenPayload>,
}

#[derive(Debug, Deserialize, Default)]
pub(crate) struct TokenPayload {
    pub logintoken: Option<String>,
    pub csrftoken: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
pub(crate) struct ClientLoginResponse {
    #[serde(default)]
    pub clientlogin: ClientLoginPayload,
}

#[derive(Debug, Deserialize, Default)]
pub(crate) struct ClientLoginPayload {
    pub status: Option<String>,
    pub username: Option<String>,
    pub message: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
pub(crate) struct LoginResponse {
    #[serde(default)]
    pub login: LoginPayload,
}

#[derive(Debug, Deserialize, Default)]
pub(crate) struct LoginPayload {
    pub result: Option<String>,
    pub token: Option<String>,
    pub lgusername: Option<String>,
    pub reason: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
pub(crate) struct QueryResponse {
    #[serde(default)]
    pub query: QueryPayload,
    #[serde(default, rename = "continue")]
    pub continuation: Option<ContinuationPayload>,
}

#[derive(Debug, Deserialize, Default)]
pub(crate) struct QueryPayload {
    #[serde(default)]
    pub allpages: Vec<PageRef>,
    #[serde(default)]
    pub categorymembers: Vec<PageRef>,
    #[serde(default)]
    pub pages: BTreeMap<String, PageQueryItem>,
}

#[derive(Debug, Deserialize, Default)]
pub(crate) struct ContinuationPayload {
    pub apcontinue: Option<String>,
    pub cmcontinue: Option<String>,
    pub gapcontinue: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct PageQueryItem {
    pub pageid: Option<i64>,
    #[serde(default)]
    pub ns: i32,
    pub title: String,
    pub missing: Option<Value>,
    pub invalid: Option<Value>,
    #[serde(default)]
    pub revisions: Vec<RevisionQueryItem>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct RevisionQueryItem {
    #[serde(default)]
    pub revid: i64,
    #[serde(default)]
    pub timestamp: String,
    pub slots: Option<RevisionSlotContainer>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct RevisionSlotContainer {
    pub main: Option<RevisionMainSlot>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct RevisionMainSlot {
    #[serde(rename = "*")]
    pub content: Option<String>,
}

impl PageQueryItem {
    pub fn is_missing(&self) -> bool {
        self.missing.is_some() || self.invalid.is_some()
    }

    pub fn into_content(self) -> Option<PageContent> {
        if self.is_missing() {
            return None;
        }
        let revision = self.revisions.into_iter().next()?;
        let content = revision.slots?.main?.content?;
        Some(PageContent {
            title: self.title,
            namespace: self.ns,
            page_id: self.pageid.unwrap_or_default(),
            revision_id: revision.revid,
            timestamp: revision.timestamp,
            content,
        })
    }
}

#[derive(Debug, Deserialize, Default)]
pub(crate) struct AskResponse {
    #[serde(default, rename = "query-continue-offset")]
    pub continue_offset: Option<u64>,
    #[serde(default)]
    pub query: AskPayload,
}

#[derive(Debug, Deserialize, Default)]
pub(crate) struct AskPayload {
    #[serde(default)]
    pub results: Vec<BTreeMap<String, AskResultItem>>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct AskResultItem {
    pub fulltext: String,
    #[serde(default)]
    pub namespace: i32,
}
