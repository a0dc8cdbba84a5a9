use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Mutex, MutexGuard};

use crate::error::WikiResult;
use crate::sqlite_cache::SqliteCache;

/// Local mirror of page title -> last known content.
pub trait PageCache: Send + Sync {
    fn get(&self, title: &str) -> WikiResult<Option<String>>;
    fn set(&self, title: &str, content: &str) -> WikiResult<()>;
    /// Move the entry for `old_title` to `new_title`; no-op when absent.
    fn rename(&self, old_title: &str, new_title: &str) -> WikiResult<()>;
    fn delete(&self, title: &str) -> WikiResult<()>;

    /// False when the title was never cached, else exact equality.
    fn compare(&self, title: &str, content: &str) -> WikiResult<bool> {
        Ok(self.get(title)?.as_deref() == Some(content))
    }
}

/// Which cache backend a client is built with.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum CacheBackend {
    #[default]
    Memory,
    /// SQLite file at `path` (in-memory database when `None`), one table per namespace.
    Sqlite {
        path: Option<PathBuf>,
        namespace: String,
    },
}

impl CacheBackend {
    pub fn build(&self) -> WikiResult<Box<dyn PageCache>> {
        match self {
            Self::Memory => Ok(Box::new(MemoryCache::new())),
            Self::Sqlite { path, namespace } => {
                Ok(Box::new(SqliteCache::new(namespace, path.clone())?))
            }
        }
    }
}

/// Volatile cache; contents die with the process.
#[derive(Debug, Default)]
pub struct MemoryCache {
    pages: Mutex<HashMap<String, String>>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.pages().len()
    }

    pub fn is_empty(&self) -> bool {
        self.pages().is_empty()
    }

    fn pages(&self) -> MutexGuard<'_, HashMap<String, String>> {
        self.pages
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl PageCache for MemoryCache {
    fn get(&self, title: &str) -> WikiResult<Option<String>> {
        Ok(self.pages().get(title).cloned())
    }

    fn set(&self, title: &str, content: &str) -> WikiResult<()> {
        self.pages()
            .insert(title.to_string(), content.to_string());
        Ok(())
    }

    fn rename(&self, old_title: &str, new_title: &str) -> WikiResult<()> {
        let mut pages = self.pages();
        if let Some(content) = pages.remove(old_title) {
            pages.insert(new_title.to_string(), content);
        }
        Ok(())
    }

    fn delete(&self, title: &str) -> WikiResult<()> {
        self.pages().remove(title);
        Ok(())
    }
}
