use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::thread::sleep;
use std::time::Duration;

use serde::Serialize;

use crate::config::ClientConfig;
use crate::error::{WikiError, WikiResult};
use crate::executor::{ApiRequest, RequestExecutor};
use crate::response::{
    ApiResponse, ClientLoginResponse, ERROR_BADTOKEN, ERROR_CSRF_TOKEN_MISSING, LoginResponse,
    TokenQueryResponse,
};

/// Token MediaWiki hands to anonymous sessions.
pub const ANONYMOUS_TOKEN: &str = "+\\";
const SESSION_COOKIE_SUFFIX: &str = "_session";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenState {
    Unset,
    Valid,
    Refreshing,
}

#[derive(Clone)]
struct Credentials {
    username: String,
    password: String,
}

#[derive(Default)]
struct SessionState {
    /// Empty means "fetch before use".
    csrf_token: String,
    username: String,
    credentials: Option<Credentials>,
    last_error: String,
}

enum LoginOutcome {
    Success { username: String },
    Failure { reason: String },
}

/// Resets the single-flight flag when the refresh finishes, even on error.
struct RefreshGuard<'a>(&'a AtomicBool);

impl Drop for RefreshGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Owns the CSRF token and the cached login for one client instance.
pub struct SessionManager {
    executor: RequestExecutor,
    state: Mutex<SessionState>,
    refreshing: AtomicBool,
    wiki_url: String,
    session_cookie: Option<String>,
    refresh_wait: Duration,
    max_token_attempts: usize,
}

impl SessionManager {
    pub fn new(config: &ClientConfig, executor: RequestExecutor) -> Self {
        Self {
            executor,
            state: Mutex::new(SessionState::default()),
            refreshing: AtomicBool::new(false),
            wiki_url: config.wiki_url.clone(),
            session_cookie: config.session_cookie.clone(),
            refresh_wait: Duration::from_millis(config.refresh_wait_ms),
            max_token_attempts: config.max_token_attempts.max(1),
        }
    }

    pub fn executor(&self) -> &RequestExecutor {
        &self.executor
    }

    /// Token-less call straight through the executor.
    pub fn execute(&self, request: &ApiRequest) -> WikiResult<ApiResponse> {
        self.executor.execute(request)
    }

    pub fn token_state(&self) -> TokenState {
        if self.refreshing.load(Ordering::Acquire) {
            TokenState::Refreshing
        } else if self.state().csrf_token.is_empty() {
            TokenState::Unset
        } else {
            TokenState::Valid
        }
    }

    /// Name reported by the server at the last successful login.
    pub fn user_name(&self) -> String {
        self.state().username.clone()
    }

    pub fn has_credentials(&self) -> bool {
        self.state().credentials.is_some()
    }

    pub fn last_error_message(&self) -> String {
        self.state().last_error.clone()
    }

    pub fn record_error(&self, message: impl Into<String>) {
        let message = message.into();
        tracing::error!("{message}");
        self.state().last_error = message;
    }

    /// Log in, picking `action=login` for bot passwords (`User@Bot`) and
    /// `action=clientlogin` otherwise. Returns `false` on a rejected login
    /// without touching the previous session.
    pub fn login(&self, username: &str, password: &str) -> WikiResult<bool> {
        let username = username.trim();
        let password = password.trim();
        let outcome = if username.contains('@') {
            self.legacy_login(username, password)?
        } else {
            self.client_login(username, password)?
        };

        match outcome {
            LoginOutcome::Success { username: name } => {
                tracing::info!(user = %name, "logged in");
                let mut state = self.state();
                state.username = name;
                state.credentials = Some(Credentials {
                    username: username.to_string(),
                    password: password.to_string(),
                });
                state.csrf_token.clear();
                Ok(true)
            }
            LoginOutcome::Failure { reason } => {
                tracing::warn!(user = %username, %reason, "login rejected");
                self.record_error(format!("login failed for {username}: {reason}"));
                Ok(false)
            }
        }
    }

    fn client_login(&self, username: &str, password: &str) -> WikiResult<LoginOutcome> {
        let mut primed = false;
        loop {
            let login_token = self.fetch_login_token()?;
            if !primed && !self.has_session_cookie() {
                // A throwaway attempt makes the server issue the session cookie.
                primed = true;
                tracing::debug!("no session cookie yet; priming session");
                self.executor.execute(
                    &self.client_login_request(username, password, ANONYMOUS_TOKEN),
                )?;
                continue;
            }

            let response = self
                .executor
                .execute(&self.client_login_request(username, password, &login_token))?;
            if let Some(error) = response.error() {
                return Ok(LoginOutcome::Failure {
                    reason: error.to_string(),
                });
            }
            let parsed: ClientLoginResponse = serde_json::from_value(response.into_value())?;
            let payload = parsed.clientlogin;
            return Ok(if payload.status.as_deref() == Some("PASS") {
                LoginOutcome::Success {
                    username: payload.username.unwrap_or_else(|| username.to_string()),
                }
            } else {
                LoginOutcome::Failure {
                    reason: payload
                        .message
                        .or(payload.status)
                        .unwrap_or_else(|| "unknown error".to_string()),
                }
            });
        }
    }

    fn client_login_request(&self, username: &str, password: &str, token: &str) -> ApiRequest {
        ApiRequest::new("clientlogin")
            .param("username", username)
            .param("password", password)
            .param("logintoken", token)
            .param("loginreturnurl", self.wiki_url.as_str())
            .param("rememberMe", "1")
    }

    fn legacy_login(&self, username: &str, password: &str) -> WikiResult<LoginOutcome> {
        let mut login_token: Option<String> = None;
        for _ in 0..2 {
            let request = ApiRequest::new("login")
                .param("lgname", username)
                .param("lgpassword", password)
                .param_opt("lgtoken", login_token.clone());
            let response = self.executor.execute(&request)?;
            if let Some(error) = response.error() {
                return Ok(LoginOutcome::Failure {
                    reason: error.to_string(),
                });
            }
            let parsed: LoginResponse = serde_json::from_value(response.into_value())?;
            let payload = parsed.login;
            match payload.result.as_deref() {
                Some("Success") => {
                    return Ok(LoginOutcome::Success {
                        username: payload.lgusername.unwrap_or_else(|| username.to_string()),
                    });
                }
                Some("NeedToken") if login_token.is_none() && payload.token.is_some() => {
                    login_token = payload.token;
                }
                other => {
                    let reason = payload
                        .reason
                        .or_else(|| other.map(ToString::to_string))
                        .unwrap_or_else(|| "unknown error".to_string());
                    return Ok(LoginOutcome::Failure { reason });
                }
            }
        }
        Ok(LoginOutcome::Failure {
            reason: "server kept asking for a login token".to_string(),
        })
    }

    fn fetch_login_token(&self) -> WikiResult<String> {
        let response = self.executor.execute(
            &ApiRequest::new("query")
                .param("meta", "tokens")
                .param("type", "login"),
        )?;
        let parsed: TokenQueryResponse = response.decode()?;
        Ok(parsed
            .query
            .tokens
            .and_then(|tokens| tokens.logintoken)
            .unwrap_or_default())
    }

    fn has_session_cookie(&self) -> bool {
        match &self.session_cookie {
            Some(name) => self.executor.has_cookie(name),
            None => self.executor.has_cookie_suffix(SESSION_COOKIE_SUFFIX),
        }
    }

    /// Cached CSRF token, fetching one when unset. Returns `""` when no
    /// token can be had; the reason is in [`Self::last_error_message`].
    pub fn get_csrf_token(&self) -> WikiResult<String> {
        loop {
            if let Some(token) = self.cached_token() {
                return Ok(token);
            }
            if let Some(_guard) = self.begin_refresh() {
                if let Some(token) = self.cached_token() {
                    return Ok(token);
                }
                return self.fetch_csrf_token();
            }
            sleep(self.refresh_wait);
        }
    }

    /// Drop the cached token so the next call fetches a fresh one.
    pub fn invalidate_token(&self) {
        self.state().csrf_token.clear();
    }

    /// Run `operation` with a valid CSRF token, refreshing and retrying when
    /// the server answers `badtoken`. Other results come back unchanged.
    pub fn request_with_token<F>(&self, mut operation: F) -> WikiResult<ApiResponse>
    where
        F: FnMut(&str) -> WikiResult<ApiResponse>,
    {
        for attempt in 1..=self.max_token_attempts {
            let token = self.get_csrf_token()?;
            if token.is_empty() {
                return Ok(missing_token_response());
            }

            let response = operation(&token)?;
            if !response.has_error_code(ERROR_BADTOKEN) {
                return Ok(response);
            }
            tracing::warn!(attempt, "csrf token rejected by server");

            match self.begin_refresh() {
                Some(_guard) => {
                    // No refetch when another caller already replaced the stale token.
                    if self.clear_token_if(&token) && self.fetch_csrf_token()?.is_empty() {
                        return Ok(missing_token_response());
                    }
                }
                None => sleep(self.refresh_wait),
            }
        }

        self.record_error(format!(
            "csrf token rejected {} times in a row",
            self.max_token_attempts
        ));
        Err(WikiError::TokenRetriesExhausted {
            attempts: self.max_token_attempts,
        })
    }

    /// Fetch a token from the server, re-logging in once with cached
    /// credentials when the session turned anonymous. Caller holds the guard.
    fn fetch_csrf_token(&self) -> WikiResult<String> {
        let mut relogged = false;
        loop {
            let token = self.query_csrf_token()?;
            if !token.is_empty() && token != ANONYMOUS_TOKEN {
                self.state().csrf_token = token.clone();
                return Ok(token);
            }
            self.invalidate_token();

            if relogged {
                self.record_error(
                    "failed to get csrf token: session is still anonymous after re-login",
                );
                return Ok(String::new());
            }
            let credentials = self.state().credentials.clone();
            let Some(credentials) = credentials else {
                self.record_error("failed to get csrf token: not logged in");
                return Ok(String::new());
            };

            tracing::info!(user = %credentials.username, "session expired; logging in again");
            if !self.login(&credentials.username, &credentials.password)? {
                self.state().credentials = None;
                self.record_error("failed to get csrf token: re-login failed");
                return Ok(String::new());
            }
            relogged = true;
        }
    }

    fn query_csrf_token(&self) -> WikiResult<String> {
        let response = self
            .executor
            .execute(&ApiRequest::new("query").param("meta", "tokens"))?;
        let parsed: TokenQueryResponse = response.decode()?;
        Ok(parsed
            .query
            .tokens
            .and_then(|tokens| tokens.csrftoken)
            .unwrap_or_default())
    }

    fn cached_token(&self) -> Option<String> {
        let state = self.state();
        (!state.csrf_token.is_empty()).then(|| state.csrf_token.clone())
    }

    fn clear_token_if(&self, stale: &str) -> bool {
        let mut state = self.state();
        if state.csrf_token == stale {
            state.csrf_token.clear();
            true
        } else {
            false
        }
    }

    fn begin_refresh(&self) -> Option<RefreshGuard<'_>> {
        self.refreshing
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| RefreshGuard(&self.refreshing))
    }

    fn state(&self) -> MutexGuard<'_, SessionState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn missing_token_response() -> ApiResponse {
    ApiResponse::error_response(
        ERROR_CSRF_TOKEN_MISSING,
        "could not obtain a csrf token; log in first",
    )
}
