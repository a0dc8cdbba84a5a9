use std::fs;
use std::path::Path;

use serde::Serialize;
use serde_json::{Value, json};

use crate::cache::{CacheBackend, PageCache};
use crate::config::ClientConfig;
use crate::error::WikiResult;
use crate::executor::{ApiRequest, RequestExecutor};
use crate::response::{
    ApiResponse, AskResponse, ERROR_NO_TITLE, ERROR_READFILE_FAILED, PageContent, PageRef,
    QueryResponse,
};
use crate::session::{SessionManager, TokenState};
use crate::transport::{ReqwestTransport, Transport};

pub const NS_MAIN: i32 = 0;
pub const NS_FILE: i32 = 6;
pub const NS_TEMPLATE: i32 = 10;
pub const NS_CATEGORY: i32 = 14;

const DEFAULT_LIST_LIMIT: usize = 500;
const CONTENT_BATCH_SIZE: usize = 50;

#[derive(Debug, Clone)]
pub struct EditOptions {
    pub summary: String,
    pub bot: bool,
    /// Skip the request when the cache already holds exactly this text.
    pub skip_unchanged: bool,
}

impl Default for EditOptions {
    fn default() -> Self {
        Self {
            summary: "Bot edit".to_string(),
            bot: true,
            skip_unchanged: false,
        }
    }
}

#[derive(Debug, Clone)]
pub struct MoveOptions {
    pub reason: String,
    pub move_talk: bool,
    pub move_subpages: bool,
    pub no_redirect: bool,
}

impl Default for MoveOptions {
    fn default() -> Self {
        Self {
            reason: String::new(),
            move_talk: true,
            move_subpages: false,
            no_redirect: false,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct UploadOptions {
    pub comment: String,
    pub text: String,
}

#[derive(Debug, Clone)]
pub struct ListOptions {
    pub limit: usize,
    /// Continuation token returned by the previous batch.
    pub continue_from: Option<String>,
}

impl Default for ListOptions {
    fn default() -> Self {
        Self {
            limit: DEFAULT_LIST_LIMIT,
            continue_from: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct PageBatch {
    pub pages: Vec<PageRef>,
    pub continuation: Option<String>,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ContentBatch {
    pub pages: Vec<PageContent>,
    pub missing: Vec<String>,
    pub continuation: Option<String>,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct SmwBatch {
    pub pages: Vec<PageRef>,
    pub next_offset: Option<u64>,
}

/// Bot-facing facade: session-mediated mutations that keep the page cache
/// in step with the wiki.
pub struct WikiClient {
    session: SessionManager,
    cache: Box<dyn PageCache>,
}

impl WikiClient {
    /// Production client: reqwest transport, cache backend from `config`.
    pub fn new(config: &ClientConfig) -> WikiResult<Self> {
        let transport = ReqwestTransport::new(config.timeout_ms)?;
        let backend = match &config.cache_path {
            Some(path) => CacheBackend::Sqlite {
                path: Some(path.clone()),
                namespace: config.cache_namespace.clone(),
            },
            None => CacheBackend::Memory,
        };
        Ok(Self::with_parts(config, Box::new(transport), backend.build()?))
    }

    pub fn with_parts(
        config: &ClientConfig,
        transport: Box<dyn Transport>,
        cache: Box<dyn PageCache>,
    ) -> Self {
        let executor = RequestExecutor::new(config, transport);
        Self {
            session: SessionManager::new(config, executor),
            cache,
        }
    }

    pub fn login(&self, username: &str, password: &str) -> WikiResult<bool> {
        self.session.login(username, password)
    }

    pub fn session(&self) -> &SessionManager {
        &self.session
    }

    pub fn cache(&self) -> &dyn PageCache {
        self.cache.as_ref()
    }

    pub fn user_name(&self) -> String {
        self.session.user_name()
    }

    pub fn token_state(&self) -> TokenState {
        self.session.token_state()
    }

    pub fn last_error_message(&self) -> String {
        self.session.last_error_message()
    }

    pub fn request_count(&self) -> usize {
        self.session.executor().request_count()
    }

    pub fn edit_page(
        &self,
        title: &str,
        text: &str,
        options: &EditOptions,
    ) -> WikiResult<ApiResponse> {
        if title.trim().is_empty() {
            return Ok(self.no_title("edit"));
        }
        if options.skip_unchanged && self.cached_copy_matches(title, text) {
            tracing::debug!(%title, "content matches cache; skipping edit");
            return Ok(ApiResponse::new(json!({
                "edit": { "result": "Success", "title": title, "nochange": "" }
            })));
        }

        let response = self.session.request_with_token(|token| {
            self.session.execute(
                &ApiRequest::new("edit")
                    .param("title", title)
                    .param("text", text)
                    .param("summary", options.summary.as_str())
                    .flag("bot", options.bot)
                    .param("token", token),
            )
        })?;
        if succeeded(&response, "edit") {
            self.mirror("edit", title, self.cache.set(title, text));
        }
        Ok(response)
    }

    pub fn delete_page(&self, title: &str, reason: &str) -> WikiResult<ApiResponse> {
        if title.trim().is_empty() {
            return Ok(self.no_title("delete"));
        }
        let response = self.session.request_with_token(|token| {
            self.session.execute(
                &ApiRequest::new("delete")
                    .param("title", title)
                    .param("reason", reason)
                    .param("token", token),
            )
        })?;
        if succeeded(&response, "delete") {
            self.mirror("delete", title, self.cache.delete(title));
        }
        Ok(response)
    }

    pub fn move_page(&self, from: &str, to: &str, options: &MoveOptions) -> WikiResult<ApiResponse> {
        if from.trim().is_empty() || to.trim().is_empty() {
            return Ok(self.no_title("move"));
        }
        let response = self.session.request_with_token(|token| {
            self.session.execute(
                &ApiRequest::new("move")
                    .param("from", from)
                    .param("to", to)
                    .param("reason", options.reason.as_str())
                    .flag("movetalk", options.move_talk)
                    .flag("movesubpages", options.move_subpages)
                    .flag("noredirect", options.no_redirect)
                    .param("token", token),
            )
        })?;
        if succeeded(&response, "move") {
            self.mirror("move", from, self.cache.rename(from, to));
        }
        Ok(response)
    }

    /// Restore a deleted page. The cache is left alone; the restored text is unknown.
    pub fn undelete_page(&self, title: &str, reason: &str) -> WikiResult<ApiResponse> {
        if title.trim().is_empty() {
            return Ok(self.no_title("undelete"));
        }
        self.session.request_with_token(|token| {
            self.session.execute(
                &ApiRequest::new("undelete")
                    .param("title", title)
                    .param("reason", reason)
                    .param("token", token),
            )
        })
    }

    pub fn purge_pages(&self, titles: &[String]) -> WikiResult<ApiResponse> {
        self.session
            .execute(&ApiRequest::new("purge").param("titles", titles.join("|")))
    }

    pub fn upload(
        &self,
        bytes: &[u8],
        filename: &str,
        options: &UploadOptions,
    ) -> WikiResult<ApiResponse> {
        self.session.request_with_token(|token| {
            self.session.execute(
                &ApiRequest::new("upload")
                    .param("filename", filename)
                    .param("token", token)
                    .flag("ignorewarnings", true)
                    .param("comment", options.comment.as_str())
                    .param("text", options.text.as_str())
                    .file(filename, bytes.to_vec()),
            )
        })
    }

    /// Upload a file from disk. An unreadable file yields a `readfile-failed`
    /// error response instead of a fault.
    pub fn upload_image(
        &self,
        path: &Path,
        filename: &str,
        options: &UploadOptions,
    ) -> WikiResult<ApiResponse> {
        let bytes = match fs::read(path) {
            Ok(bytes) => bytes,
            Err(error) => {
                let message = format!("failed to read {}: {error}", path.display());
                self.session.record_error(message.clone());
                return Ok(ApiResponse::error_response(ERROR_READFILE_FAILED, message));
            }
        };
        self.upload(&bytes, filename, options)
    }

    pub fn get_page_list_by_namespace(
        &self,
        namespace: i32,
        options: &ListOptions,
    ) -> WikiResult<PageBatch> {
        let request = ApiRequest::new("query")
            .param("list", "allpages")
            .param("apnamespace", namespace.to_string())
            .param("aplimit", options.limit.to_string())
            .param_opt("apcontinue", options.continue_from.clone());
        let parsed: QueryResponse = self.session.execute(&request)?.decode()?;
        Ok(PageBatch {
            pages: parsed.query.allpages,
            continuation: parsed.continuation.and_then(|cont| cont.apcontinue),
        })
    }

    pub fn get_page_list_by_category(
        &self,
        category: &str,
        options: &ListOptions,
    ) -> WikiResult<PageBatch> {
        let category_title = if category.starts_with("Category:") {
            category.to_string()
        } else {
            format!("Category:{category}")
        };
        let request = ApiRequest::new("query")
            .param("list", "categorymembers")
            .param("cmtitle", category_title)
            .param("cmlimit", options.limit.to_string())
            .param_opt("cmcontinue", options.continue_from.clone());
        let parsed: QueryResponse = self.session.execute(&request)?.decode()?;
        Ok(PageBatch {
            pages: parsed.query.categorymembers,
            continuation: parsed.continuation.and_then(|cont| cont.cmcontinue),
        })
    }

    /// Redirect pages, optionally restricted to one namespace.
    pub fn get_all_redirects(
        &self,
        namespace: Option<i32>,
        options: &ListOptions,
    ) -> WikiResult<PageBatch> {
        let request = ApiRequest::new("query")
            .param("list", "allpages")
            .param("apfilterredir", "redirects")
            .param_opt("apnamespace", namespace.map(|ns| ns.to_string()))
            .param("aplimit", options.limit.to_string())
            .param_opt("apcontinue", options.continue_from.clone());
        let parsed: QueryResponse = self.session.execute(&request)?.decode()?;
        Ok(PageBatch {
            pages: parsed.query.allpages,
            continuation: parsed.continuation.and_then(|cont| cont.apcontinue),
        })
    }

    /// Current wikitext of `titles`, fetched 50 at a time. Warms the cache.
    pub fn get_pages_content(&self, titles: &[String]) -> WikiResult<ContentBatch> {
        let mut batch = ContentBatch {
            pages: Vec::new(),
            missing: Vec::new(),
            continuation: None,
        };
        for chunk in titles.chunks(CONTENT_BATCH_SIZE) {
            let request = revision_request().param("titles", chunk.join("|"));
            let parsed: QueryResponse = self.session.execute(&request)?.decode()?;
            self.collect_contents(parsed, &mut batch);
        }
        Ok(batch)
    }

    /// One page of current wikitext for every page in `namespace`. Warms the cache.
    pub fn get_namespace_contents(
        &self,
        namespace: i32,
        options: &ListOptions,
    ) -> WikiResult<ContentBatch> {
        let request = revision_request()
            .param("generator", "allpages")
            .param("gapnamespace", namespace.to_string())
            .param("gaplimit", options.limit.min(CONTENT_BATCH_SIZE).to_string())
            .param_opt("gapcontinue", options.continue_from.clone());
        let parsed: QueryResponse = self.session.execute(&request)?.decode()?;
        let continuation = parsed
            .continuation
            .as_ref()
            .and_then(|cont| cont.gapcontinue.clone());
        let mut batch = ContentBatch {
            pages: Vec::new(),
            missing: Vec::new(),
            continuation,
        };
        self.collect_contents(parsed, &mut batch);
        Ok(batch)
    }

    /// Current wikitext of one page, `None` when it does not exist.
    pub fn get_page_raw_text(&self, title: &str) -> WikiResult<Option<PageContent>> {
        let batch = self.get_pages_content(&[title.to_string()])?;
        Ok(batch.pages.into_iter().next())
    }

    /// Semantic MediaWiki `action=ask`.
    pub fn ask(&self, query: &str) -> WikiResult<ApiResponse> {
        self.session.execute(
            &ApiRequest::new("ask")
                .param("query", query)
                .param("api_version", "3"),
        )
    }

    pub fn get_page_list_by_smw(
        &self,
        query: &str,
        limit: usize,
        offset: u64,
    ) -> WikiResult<SmwBatch> {
        let full_query = format!("{query}|limit={limit}|offset={offset}");
        let parsed: AskResponse = self.ask(&full_query)?.decode()?;
        let pages = parsed
            .query
            .results
            .into_iter()
            .flat_map(|entry| entry.into_values())
            .map(|item| PageRef {
                pageid: -1,
                ns: item.namespace,
                title: item.fulltext,
            })
            .collect();
        Ok(SmwBatch {
            pages,
            next_offset: parsed.continue_offset,
        })
    }

    fn collect_contents(&self, parsed: QueryResponse, batch: &mut ContentBatch) {
        for page in parsed.query.pages.into_values() {
            if page.is_missing() {
                batch.missing.push(page.title);
                continue;
            }
            if let Some(content) = page.into_content() {
                self.mirror(
                    "read",
                    &content.title,
                    self.cache.set(&content.title, &content.content),
                );
                batch.pages.push(content);
            }
        }
    }

    fn cached_copy_matches(&self, title: &str, text: &str) -> bool {
        self.cache.compare(title, text).unwrap_or_else(|error| {
            tracing::warn!(%title, error = %error, "page cache lookup failed");
            false
        })
    }

    /// Cache writes trail a remote result that already stands, so a cache
    /// failure is reported, not raised.
    fn mirror(&self, action: &str, title: &str, result: WikiResult<()>) {
        if let Err(error) = result {
            tracing::warn!(action, %title, error = %error, "page cache update failed");
            self.session.record_error(format!(
                "page cache update after {action} of {title} failed: {error}"
            ));
        }
    }

    fn no_title(&self, action: &str) -> ApiResponse {
        self.session
            .record_error(format!("{action} skipped: no title given"));
        ApiResponse::error_response(ERROR_NO_TITLE, "The title parameter must be set.")
    }
}

fn revision_request() -> ApiRequest {
    ApiRequest::new("query")
        .param("prop", "revisions")
        .param("rvprop", "content|ids|timestamp")
        .param("rvslots", "main")
}

/// No error envelope, the action's payload is present, and any `result`
/// field it carries says `Success`.
fn succeeded(response: &ApiResponse, action: &str) -> bool {
    response.is_success()
        && response.get(action).is_some_and(|payload| {
            payload
                .get("result")
                .and_then(Value::as_str)
                .is_none_or(|result| result == "Success")
        })
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use serde_json::json;
    use tempfile::tempdir;

    use super::*;
    use crate::cache::MemoryCache;
    use crate::sqlite_cache::SqliteCache;
    use crate::testing::{RoutedTransport, ok, test_config};
    use crate::transport::{BodyKind, HttpRequest, HttpResponse};

    fn token_or(request: &HttpRequest, other: impl Fn(&HttpRequest) -> HttpResponse) -> HttpResponse {
        if request.action() == "query" && request.param("meta") == Some("tokens") {
            ok(json!({ "query": { "tokens": { "csrftoken": "tok+\\" } } }))
        } else {
            other(request)
        }
    }

    fn client_with<F>(handler: F) -> (WikiClient, Arc<RoutedTransport<F>>)
    where
        F: Fn(&HttpRequest) -> HttpResponse + Send + Sync + 'static,
    {
        let transport = Arc::new(RoutedTransport::new(handler));
        let client = WikiClient::with_parts(
            &test_config(),
            Box::new(transport.clone()),
            Box::new(MemoryCache::new()),
        );
        (client, transport)
    }

    #[test]
    fn successful_edit_is_written_through_to_cache() {
        let (client, transport) = client_with(|request: &HttpRequest| {
            token_or(request, |_| {
                ok(json!({ "edit": { "result": "Success", "pageid": 1, "title": "Page" } }))
            })
        });
        let response = client
            .edit_page("Page", "text", &EditOptions::default())
            .expect("edit");
        assert!(response.is_success());
        assert!(client.cache().compare("Page", "text").expect("compare"));

        let requests = transport.requests();
        let edit = requests.last().expect("edit request");
        assert_eq!(edit.body, BodyKind::Form);
        assert_eq!(edit.param("token"), Some("tok+\\"));
        assert_eq!(edit.param("bot"), Some("1"));
        assert_eq!(edit.param("summary"), Some("Bot edit"));
    }

    #[test]
    fn failed_edit_leaves_cache_untouched() {
        let (client, _) = client_with(|request: &HttpRequest| {
            token_or(request, |_| {
                ok(json!({ "error": { "code": "protectedpage", "info": "protected" } }))
            })
        });
        let response = client
            .edit_page("Page", "text", &EditOptions::default())
            .expect("edit");
        assert!(response.has_error_code("protectedpage"));
        assert_eq!(client.cache().get("Page").expect("get"), None);
    }

    #[test]
    fn edit_result_failure_is_not_cached() {
        let (client, _) = client_with(|request: &HttpRequest| {
            token_or(request, |_| {
                ok(json!({ "edit": { "result": "Failure", "captcha": {} } }))
            })
        });
        client
            .edit_page("Page", "text", &EditOptions::default())
            .expect("edit");
        assert_eq!(client.cache().get("Page").expect("get"), None);
    }

    #[test]
    fn unchanged_edit_can_skip_the_network() {
        let (client, transport) = client_with(|request: &HttpRequest| {
            token_or(request, |_| ok(json!({ "edit": { "result": "Success" } })))
        });
        client.cache().set("Page", "same").expect("seed cache");
        let options = EditOptions {
            skip_unchanged: true,
            ..EditOptions::default()
        };
        let response = client.edit_page("Page", "same", &options).expect("edit");
        assert_eq!(response.value()["edit"]["nochange"], "");
        assert!(transport.requests().is_empty());
    }

    #[test]
    fn empty_title_yields_error_result_without_requests() {
        let (client, transport) = client_with(|request: &HttpRequest| token_or(request, |_| ok(json!({}))));
        let response = client
            .edit_page("  ", "text", &EditOptions::default())
            .expect("edit");
        assert!(response.has_error_code(ERROR_NO_TITLE));
        let response = client.delete_page("", "cleanup").expect("delete");
        assert!(response.has_error_code(ERROR_NO_TITLE));
        assert!(transport.requests().is_empty());
    }

    #[test]
    fn successful_delete_evicts_cache_entry() {
        let (client, _) = client_with(|request: &HttpRequest| {
            token_or(request, |request| match request.action() {
                "edit" => ok(json!({ "edit": { "result": "Success" } })),
                _ => ok(json!({ "delete": { "title": "Page", "reason": "cleanup", "logid": 7 } })),
            })
        });
        client
            .edit_page("Page", "text", &EditOptions::default())
            .expect("edit");
        let response = client.delete_page("Page", "cleanup").expect("delete");
        assert!(response.is_success());
        assert_eq!(client.cache().get("Page").expect("get"), None);
    }

    #[test]
    fn successful_move_renames_cache_entry() {
        let (client, transport) = client_with(|request: &HttpRequest| {
            token_or(request, |_| {
                ok(json!({ "move": { "from": "Old", "to": "New", "reason": "" } }))
            })
        });
        client.cache().set("Old", "body").expect("seed cache");
        let options = MoveOptions {
            no_redirect: true,
            ..MoveOptions::default()
        };
        client.move_page("Old", "New", &options).expect("move");

        assert_eq!(client.cache().get("New").expect("get").as_deref(), Some("body"));
        assert_eq!(client.cache().get("Old").expect("get"), None);
        let requests = transport.requests();
        let moved = requests.last().expect("move request");
        assert_eq!(moved.param("movetalk"), Some("1"));
        assert_eq!(moved.param("noredirect"), Some("1"));
        assert_eq!(moved.param("movesubpages"), None);
    }

    #[test]
    fn move_of_uncached_page_creates_no_entry() {
        let (client, _) = client_with(|request: &HttpRequest| {
            token_or(request, |_| ok(json!({ "move": { "from": "Old", "to": "New" } })))
        });
        client
            .move_page("Old", "New", &MoveOptions::default())
            .expect("move");
        assert_eq!(client.cache().get("New").expect("get"), None);
    }

    #[test]
    fn unreadable_upload_source_yields_readfile_failed() {
        let (client, transport) = client_with(|request: &HttpRequest| token_or(request, |_| ok(json!({}))));
        let response = client
            .upload_image(
                Path::new("/nonexistent/elysia.jpg"),
                "Elysia.jpg",
                &UploadOptions::default(),
            )
            .expect("upload");
        assert!(response.has_error_code(ERROR_READFILE_FAILED));
        assert!(client.last_error_message().contains("elysia.jpg"));
        assert!(transport.requests().is_empty());
    }

    #[test]
    fn upload_reads_file_and_sends_multipart() {
        let temp = tempdir().expect("tempdir");
        let path = temp.path().join("img.png");
        fs::write(&path, [0x89, b'P', b'N', b'G']).expect("write image");

        let (client, transport) = client_with(|request: &HttpRequest| {
            token_or(request, |_| {
                ok(json!({ "error": { "code": "fileexists-no-change", "info": "duplicate" } }))
            })
        });
        let options = UploadOptions {
            comment: "test".to_string(),
            text: String::new(),
        };
        let response = client
            .upload_image(&path, "Img.png", &options)
            .expect("upload");
        assert_eq!(response.value(), &json!({ "upload": { "result": "no-change" } }));

        let requests = transport.requests();
        let upload = requests.last().expect("upload request");
        assert_eq!(upload.body, BodyKind::Multipart);
        assert_eq!(upload.param("ignorewarnings"), Some("1"));
        assert_eq!(upload.param("filename"), Some("Img.png"));
        let file = upload.file.as_ref().expect("file part");
        assert_eq!(file.bytes, vec![0x89, b'P', b'N', b'G']);
        assert!(client.cache().get("Img.png").expect("get").is_none());
    }

    #[test]
    fn namespace_listing_returns_continuation() {
        let (client, transport) = client_with(|request: &HttpRequest| {
            if request.param("apcontinue").is_some() {
                ok(json!({ "batchcomplete": "", "query": { "allpages": [
                    { "pageid": 3, "ns": 10, "title": "Template:C" }
                ] } }))
            } else {
                ok(json!({
                    "continue": { "apcontinue": "C", "continue": "-||" },
                    "query": { "allpages": [
                        { "pageid": 1, "ns": 10, "title": "Template:A" },
                        { "pageid": 2, "ns": 10, "title": "Template:B" }
                    ] }
                }))
            }
        });

        let first = client
            .get_page_list_by_namespace(NS_TEMPLATE, &ListOptions::default())
            .expect("first batch");
        assert_eq!(first.pages.len(), 2);
        assert_eq!(first.continuation.as_deref(), Some("C"));

        let second = client
            .get_page_list_by_namespace(
                NS_TEMPLATE,
                &ListOptions {
                    limit: 2,
                    continue_from: first.continuation,
                },
            )
            .expect("second batch");
        assert_eq!(second.pages[0].title, "Template:C");
        assert_eq!(second.continuation, None);

        let requests = transport.requests();
        assert_eq!(requests[0].body, BodyKind::Query);
        assert_eq!(requests[0].param("aplimit"), Some("500"));
        assert_eq!(requests[1].param("aplimit"), Some("2"));
        assert_eq!(requests[1].param("apcontinue"), Some("C"));
    }

    #[test]
    fn category_listing_prefixes_category_namespace() {
        let (client, transport) = client_with(|_: &HttpRequest| {
            ok(json!({
                "continue": { "cmcontinue": "page|4b|12", "continue": "-||" },
                "query": { "categorymembers": [ { "pageid": 5, "ns": 0, "title": "Alpha" } ] }
            }))
        });
        let batch = client
            .get_page_list_by_category("Characters", &ListOptions::default())
            .expect("batch");
        assert_eq!(batch.pages[0].title, "Alpha");
        assert_eq!(batch.continuation.as_deref(), Some("page|4b|12"));
        assert_eq!(
            transport.requests()[0].param("cmtitle"),
            Some("Category:Characters")
        );
    }

    #[test]
    fn redirect_listing_filters_redirects() {
        let (client, transport) = client_with(|_: &HttpRequest| {
            ok(json!({ "query": { "allpages": [ { "pageid": 9, "ns": 0, "title": "Alias" } ] } }))
        });
        let batch = client
            .get_all_redirects(None, &ListOptions::default())
            .expect("batch");
        assert_eq!(batch.pages.len(), 1);
        let request = &transport.requests()[0];
        assert_eq!(request.param("apfilterredir"), Some("redirects"));
        assert_eq!(request.param("apnamespace"), None);
    }

    #[test]
    fn query_api_error_is_raised_for_typed_reads() {
        let (client, _) = client_with(|_: &HttpRequest| {
            ok(json!({ "error": { "code": "readapidenied", "info": "You need read permission." } }))
        });
        let error = client
            .get_page_list_by_namespace(NS_MAIN, &ListOptions::default())
            .expect_err("must fail");
        assert!(error.to_string().contains("readapidenied"));
    }

    #[test]
    fn content_query_warms_cache_and_reports_missing() {
        let (client, _) = client_with(|_: &HttpRequest| {
            ok(json!({ "query": { "pages": {
                "10": { "pageid": 10, "ns": 8, "title": "Gadget:WikiImporter.js",
                    "revisions": [{ "revid": 55, "timestamp": "2026-03-01T00:00:00Z",
                        "slots": { "main": { "contentmodel": "javascript", "*": "mw.hook();" } } }] },
                "-1": { "ns": 0, "title": "Nope", "missing": "" }
            } } }))
        });
        let batch = client
            .get_pages_content(&["Gadget:WikiImporter.js".to_string(), "Nope".to_string()])
            .expect("batch");
        assert_eq!(batch.pages.len(), 1);
        assert_eq!(batch.missing, vec!["Nope".to_string()]);
        assert!(
            client
                .cache()
                .compare("Gadget:WikiImporter.js", "mw.hook();")
                .expect("compare")
        );
    }

    #[test]
    fn raw_text_of_missing_page_is_none() {
        let (client, _) = client_with(|_: &HttpRequest| {
            ok(json!({ "query": { "pages": { "-1": { "ns": 0, "title": "Nope", "missing": "" } } } }))
        });
        assert_eq!(client.get_page_raw_text("Nope").expect("read"), None);
    }

    #[test]
    fn namespace_contents_follow_generator_continuation() {
        let (client, transport) = client_with(|_: &HttpRequest| {
            ok(json!({
                "continue": { "gapcontinue": "Beta", "continue": "gapcontinue||" },
                "query": { "pages": {
                    "1": { "pageid": 1, "ns": 0, "title": "Alpha",
                        "revisions": [{ "revid": 2, "timestamp": "2026-03-01T00:00:00Z",
                            "slots": { "main": { "*": "alpha text" } } }] }
                } }
            }))
        });
        let batch = client
            .get_namespace_contents(NS_MAIN, &ListOptions::default())
            .expect("batch");
        assert_eq!(batch.continuation.as_deref(), Some("Beta"));
        assert_eq!(batch.pages[0].content, "alpha text");
        assert!(client.cache().compare("Alpha", "alpha text").expect("compare"));
        assert_eq!(transport.requests()[0].param("gaplimit"), Some("50"));
    }

    #[test]
    fn smw_listing_flattens_results_and_offset() {
        let (client, transport) = client_with(|_: &HttpRequest| {
            ok(json!({
                "query-continue-offset": 2,
                "query": { "results": [
                    { "Alpha": { "fulltext": "Alpha", "namespace": 0, "printouts": {} } },
                    { "Beta#sub": { "fulltext": "Beta#sub", "namespace": 0, "printouts": {} } }
                ] }
            }))
        });
        let batch = client
            .get_page_list_by_smw("[[Category:Characters]]", 2, 0)
            .expect("batch");
        assert_eq!(batch.pages.len(), 2);
        assert_eq!(batch.pages[1].title, "Beta#sub");
        assert_eq!(batch.pages[0].pageid, -1);
        assert_eq!(batch.next_offset, Some(2));
        assert_eq!(
            transport.requests()[0].param("query"),
            Some("[[Category:Characters]]|limit=2|offset=0")
        );
    }

    #[test]
    fn persistent_cache_mirrors_mutations() {
        let temp = tempdir().expect("tempdir");
        let db_path = temp.path().join("cache").join("pages.sqlite");
        let transport = Arc::new(RoutedTransport::new(|request: &HttpRequest| {
            token_or(request, |request| match request.action() {
                "edit" => ok(json!({ "edit": { "result": "Success" } })),
                _ => ok(json!({ "delete": { "title": "Page" } })),
            })
        }));
        let cache = SqliteCache::new("danteng", Some(db_path.clone())).expect("cache");
        let client =
            WikiClient::with_parts(&test_config(), Box::new(transport), Box::new(cache));

        client
            .edit_page("Page", "text", &EditOptions::default())
            .expect("edit");
        client
            .edit_page("Other", "kept", &EditOptions::default())
            .expect("edit");
        client.delete_page("Page", "").expect("delete");
        drop(client);

        let reopened = SqliteCache::new("danteng", Some(db_path)).expect("reopen");
        assert_eq!(reopened.get("Page").expect("get"), None);
        assert!(reopened.compare("Other", "kept").expect("compare"));
    }

    #[test]
    fn cache_failure_after_accepted_edit_keeps_the_response() {
        let temp = tempdir().expect("tempdir");
        let blocker = temp.path().join("blocker");
        fs::write(&blocker, "not a directory").expect("write blocker");
        let transport = Arc::new(RoutedTransport::new(|request: &HttpRequest| {
            token_or(request, |request| match request.action() {
                "edit" => ok(json!({ "edit": { "result": "Success", "title": "Page" } })),
                _ => ok(json!({ "query": { "pages": {
                    "1": { "pageid": 1, "ns": 0, "title": "Page",
                        "revisions": [{ "revid": 3, "timestamp": "2026-03-01T00:00:00Z",
                            "slots": { "main": { "*": "text" } } }] }
                } } })),
            })
        }));
        let cache = SqliteCache::new("pages", Some(blocker.join("pages.sqlite"))).expect("cache");
        let client = WikiClient::with_parts(
            &test_config(),
            Box::new(transport.clone()),
            Box::new(cache),
        );

        let response = client
            .edit_page("Page", "text", &EditOptions::default())
            .expect("accepted edit is not a fault");
        assert!(response.is_success());
        assert_eq!(transport.actions(), vec!["query", "edit"]);
        assert!(client.last_error_message().contains("page cache update after edit"));

        let page = client.get_page_raw_text("Page").expect("read");
        assert_eq!(page.map(|page| page.content).as_deref(), Some("text"));
    }

    #[test]
    fn purge_needs_no_token() {
        let (client, transport) =
            client_with(|_: &HttpRequest| ok(json!({ "batchcomplete": "", "purge": [] })));
        client
            .purge_pages(&["A".to_string(), "B".to_string()])
            .expect("purge");
        let requests = transport.requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].param("titles"), Some("A|B"));
        assert_eq!(requests[0].body, BodyKind::Form);
    }
}
