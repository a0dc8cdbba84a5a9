pub mod cache;
pub mod client;
pub mod config;
pub mod cookies;
pub mod error;
pub mod executor;
pub mod response;
pub mod session;
pub mod sqlite_cache;
pub mod transport;

#[cfg(test)]
mod testing;

pub use cache::{CacheBackend, MemoryCache, PageCache};
pub use client::{
    ContentBatch, EditOptions, ListOptions, MoveOptions, PageBatch, SmwBatch, UploadOptions,
    WikiClient,
};
pub use config::{ClientConfig, WikiConfig, load_config};
pub use error::{ApiError, WikiError, WikiResult};
pub use executor::{ApiRequest, RequestExecutor};
pub use response::{ApiResponse, PageContent, PageRef};
pub use session::{SessionManager, TokenState};
pub use sqlite_cache::SqliteCache;
pub use transport::{ReqwestTransport, Transport};
