use std::env;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};

pub const DEFAULT_USER_AGENT: &str = "wikibot/0.1";
pub const DEFAULT_API_URL_TEMPLATE: &str = "https://{site}.huijiwiki.com/api.php";
pub const DEFAULT_CONFIG_FILENAME: &str = "wikibot.toml";
pub const DEFAULT_CACHE_NAMESPACE: &str = "page_cache";
pub const DEFAULT_MAX_RETRY: usize = 3;
pub const DEFAULT_RETRY_DELAY_MS: u64 = 0;
pub const DEFAULT_TIMEOUT_MS: u64 = 30_000;
pub const DEFAULT_REFRESH_WAIT_MS: u64 = 1_000;
pub const DEFAULT_MAX_TOKEN_ATTEMPTS: usize = 5;

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct WikiConfig {
    #[serde(default)]
    pub wiki: WikiSection,
    #[serde(default)]
    pub http: HttpSection,
    #[serde(default)]
    pub session: SessionSection,
    #[serde(default)]
    pub cache: CacheSection,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct WikiSection {
    /// Site prefix substituted into `api_url_template`.
    pub site: Option<String>,
    pub api_url: Option<String>,
    pub api_url_template: Option<String>,
    pub user_agent: Option<String>,
    /// Name of the session cookie that must exist before `clientlogin`.
    /// Any `*_session` cookie is accepted when unset.
    pub session_cookie: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct HttpSection {
    pub max_retry: Option<usize>,
    pub retry_delay_ms: Option<u64>,
    pub timeout_ms: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct SessionSection {
    pub refresh_wait_ms: Option<u64>,
    pub max_token_attempts: Option<usize>,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct CacheSection {
    pub path: Option<PathBuf>,
    pub namespace: Option<String>,
}

impl WikiConfig {
    /// Resolve the site prefix: env WIKI_SITE > config.
    pub fn site(&self) -> Option<String> {
        env_string("WIKI_SITE").or_else(|| self.wiki.site.clone())
    }

    /// Resolve the API URL: env WIKI_API_URL > config api_url > template + site.
    pub fn api_url(&self) -> Option<String> {
        if let Some(value) = env_string("WIKI_API_URL") {
            return Some(value);
        }
        if let Some(url) = &self.wiki.api_url {
            return Some(url.clone());
        }
        let site = self.site()?;
        let template = self
            .wiki
            .api_url_template
            .as_deref()
            .unwrap_or(DEFAULT_API_URL_TEMPLATE);
        Some(api_url_for_site(template, &site))
    }

    /// Resolve user agent: env WIKI_USER_AGENT > config > DEFAULT_USER_AGENT.
    pub fn user_agent(&self) -> String {
        env_string("WIKI_USER_AGENT")
            .or_else(|| self.wiki.user_agent.clone())
            .unwrap_or_else(|| DEFAULT_USER_AGENT.to_string())
    }

    pub fn cache_path(&self) -> Option<PathBuf> {
        env_string("WIKI_CACHE_PATH")
            .map(PathBuf::from)
            .or_else(|| self.cache.path.clone())
    }

    pub fn cache_namespace(&self) -> String {
        env_string("WIKI_CACHE_NAMESPACE")
            .or_else(|| self.cache.namespace.clone())
            .unwrap_or_else(|| DEFAULT_CACHE_NAMESPACE.to_string())
    }
}

/// Fully resolved client settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    pub api_url: String,
    pub wiki_url: String,
    pub user_agent: String,
    pub session_cookie: Option<String>,
    pub max_retry: usize,
    pub retry_delay_ms: u64,
    pub timeout_ms: u64,
    pub refresh_wait_ms: u64,
    pub max_token_attempts: usize,
    pub cache_path: Option<PathBuf>,
    pub cache_namespace: String,
}

impl ClientConfig {
    /// Settings for an explicit API URL with every knob at its default.
    pub fn new(api_url: &str) -> Self {
        Self {
            api_url: api_url.to_string(),
            wiki_url: derive_wiki_url(api_url).unwrap_or_else(|| api_url.to_string()),
            user_agent: DEFAULT_USER_AGENT.to_string(),
            session_cookie: None,
            max_retry: DEFAULT_MAX_RETRY,
            retry_delay_ms: DEFAULT_RETRY_DELAY_MS,
            timeout_ms: DEFAULT_TIMEOUT_MS,
            refresh_wait_ms: DEFAULT_REFRESH_WAIT_MS,
            max_token_attempts: DEFAULT_MAX_TOKEN_ATTEMPTS,
            cache_path: None,
            cache_namespace: DEFAULT_CACHE_NAMESPACE.to_string(),
        }
    }

    pub fn for_site(site: &str) -> Self {
        Self::new(&api_url_for_site(DEFAULT_API_URL_TEMPLATE, site))
    }

    pub fn from_config(config: &WikiConfig) -> Result<Self> {
        let Some(api_url) = config.api_url() else {
            bail!("no wiki API endpoint configured: set [wiki].api_url, [wiki].site, WIKI_API_URL or WIKI_SITE");
        };
        let mut resolved = Self::new(&api_url);
        resolved.user_agent = config.user_agent();
        resolved.session_cookie = config.wiki.session_cookie.clone();
        resolved.max_retry = env_value_usize(
            "WIKI_HTTP_RETRIES",
            config.http.max_retry.unwrap_or(DEFAULT_MAX_RETRY),
        );
        resolved.retry_delay_ms = env_value_u64(
            "WIKI_HTTP_RETRY_DELAY_MS",
            config.http.retry_delay_ms.unwrap_or(DEFAULT_RETRY_DELAY_MS),
        );
        resolved.timeout_ms = env_value_u64(
            "WIKI_HTTP_TIMEOUT_MS",
            config.http.timeout_ms.unwrap_or(DEFAULT_TIMEOUT_MS),
        );
        resolved.refresh_wait_ms = env_value_u64(
            "WIKI_TOKEN_REFRESH_WAIT_MS",
            config
                .session
                .refresh_wait_ms
                .unwrap_or(DEFAULT_REFRESH_WAIT_MS),
        );
        resolved.max_token_attempts = env_value_usize(
            "WIKI_TOKEN_MAX_ATTEMPTS",
            config
                .session
                .max_token_attempts
                .unwrap_or(DEFAULT_MAX_TOKEN_ATTEMPTS),
        )
        .max(1);
        resolved.cache_path = config.cache_path();
        resolved.cache_namespace = config.cache_namespace();
        Ok(resolved)
    }
}

/// Read `wikibot.toml` (or whichever file the caller points at). An absent
/// file means "all defaults", anything unreadable or malformed is an error.
pub fn load_config(config_path: &Path) -> Result<WikiConfig> {
    let raw = match fs::read_to_string(config_path) {
        Ok(raw) => raw,
        Err(error) if error.kind() == io::ErrorKind::NotFound => return Ok(WikiConfig::default()),
        Err(error) => {
            return Err(error)
                .with_context(|| format!("failed to read {}", config_path.display()));
        }
    };
    toml::from_str(&raw).with_context(|| format!("failed to parse {}", config_path.display()))
}

pub fn api_url_for_site(template: &str, site: &str) -> String {
    template.replace("{site}", site.trim())
}

/// Site root used as `loginreturnurl`: the endpoint minus its `api.php` segment.
pub fn derive_wiki_url(api_url: &str) -> Option<String> {
    let endpoint = api_url.trim().trim_end_matches('/');
    let root = match endpoint.rsplit_once('/') {
        Some((root, "api.php")) => root,
        _ => endpoint,
    };
    let root = root.trim_end_matches('/');
    (!root.is_empty()).then(|| root.to_string())
}

fn env_string(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn env_value_u64(key: &str, default: u64) -> u64 {
    env::var(key)
        .ok()
        .and_then(|value| value.trim().parse::<u64>().ok())
        .unwrap_or(default)
}

fn env_value_usize(key: &str, default: usize) -> usize {
    env::var(key)
        .ok()
        .and_then(|value| value.trim().parse::<usize>().ok())
        .unwrap_or(default)
}
