use std::fs;
use std::path::PathBuf;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use rusqlite::{Connection, OptionalExtension, params};

use crate::cache::PageCache;
use crate::error::{WikiError, WikiResult};

/// Persistent cache backed by SQLite. Each namespace gets its own table so
/// several caches can share one database file.
pub struct SqliteCache {
    namespace: String,
    path: Option<PathBuf>,
    connection: Mutex<Option<Connection>>,
}

impl SqliteCache {
    /// Nothing touches the disk until the first cache operation.
    pub fn new(namespace: &str, path: Option<PathBuf>) -> WikiResult<Self> {
        validate_namespace(namespace)?;
        Ok(Self {
            namespace: namespace.to_string(),
            path,
            connection: Mutex::new(None),
        })
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    fn with_connection<T>(
        &self,
        operation: impl FnOnce(&Connection, &str) -> rusqlite::Result<T>,
    ) -> WikiResult<T> {
        let mut guard = self.lock();
        if guard.is_none() {
            *guard = Some(self.open()?);
        }
        let connection = guard
            .as_ref()
            .ok_or_else(|| WikiError::Config("page cache connection unavailable".to_string()))?;
        Ok(operation(connection, &self.namespace)?)
    }

    fn open(&self) -> WikiResult<Connection> {
        let connection = match &self.path {
            None => Connection::open_in_memory()?,
            Some(path) => {
                if let Some(parent) = path.parent()
                    && !parent.as_os_str().is_empty()
                {
                    fs::create_dir_all(parent)?;
                }
                let connection = Connection::open(path)?;
                connection.busy_timeout(Duration::from_secs(5))?;
                connection
            }
        };
        connection.execute_batch(&format!(
            "CREATE TABLE IF NOT EXISTS \"{}\" (
                title VARCHAR(255) NOT NULL PRIMARY KEY CHECK (length(title) <= 255),
                content BLOB NOT NULL
            )",
            self.namespace
        ))?;
        tracing::debug!(namespace = %self.namespace, path = ?self.path, "opened page cache");
        Ok(connection)
    }

    fn lock(&self) -> MutexGuard<'_, Option<Connection>> {
        self.connection
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl PageCache for SqliteCache {
    fn get(&self, title: &str) -> WikiResult<Option<String>> {
        let bytes = self.with_connection(|connection, table| {
            connection
                .query_row(
                    &format!("SELECT content FROM \"{table}\" WHERE title = ?1"),
                    [title],
                    |row| row.get::<_, Vec<u8>>(0),
                )
                .optional()
        })?;
        Ok(bytes.map(|bytes| String::from_utf8_lossy(&bytes).into_owned()))
    }

    fn set(&self, title: &str, content: &str) -> WikiResult<()> {
        self.with_connection(|connection, table| {
            connection.execute(
                &format!("INSERT OR REPLACE INTO \"{table}\" (title, content) VALUES (?1, ?2)"),
                params![title, content.as_bytes()],
            )
        })?;
        Ok(())
    }

    fn rename(&self, old_title: &str, new_title: &str) -> WikiResult<()> {
        self.with_connection(|connection, table| {
            connection.execute(
                &format!("UPDATE OR REPLACE \"{table}\" SET title = ?1 WHERE title = ?2"),
                params![new_title, old_title],
            )
        })?;
        Ok(())
    }

    fn delete(&self, title: &str) -> WikiResult<()> {
        self.with_connection(|connection, table| {
            connection.execute(&format!("DELETE FROM \"{table}\" WHERE title = ?1"), [title])
        })?;
        Ok(())
    }
}

/// Namespaces become table names, so only identifier characters are allowed.
fn validate_namespace(namespace: &str) -> WikiResult<()> {
    let valid = !namespace.is_empty()
        && !namespace.starts_with(|ch: char| ch.is_ascii_digit())
        && namespace
            .chars()
            .all(|ch| ch.is_ascii_alphanumeric() || ch == '_');
    if valid {
        Ok(())
    } else {
        Err(WikiError::Config(format!(
            "invalid cache namespace {namespace:?}: use letters, digits and underscores"
        )))
    }
}
