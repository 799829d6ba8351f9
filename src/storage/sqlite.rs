//! SQLite-backed rate state table.
//!
//! Each storage instance owns one named table inside a database file, so
//! several logical stores can share a file. Rows hold the key as text and
//! the [`RateState`] serialized as JSON.

use std::path::{Path, PathBuf};
use std::str::FromStr;

use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use tracing::{debug, info};

use super::Storage;
use crate::error::{RatewardenError, Result};
use crate::ratelimit::{RateKey, RateState};

/// Table used when none is configured.
pub const DEFAULT_TABLE: &str = "storage";

/// Options for opening a [`SqliteStorage`].
#[derive(Debug, Clone)]
pub struct SqliteOptions {
    /// Database file; `None` keeps the database in memory
    pub path: Option<PathBuf>,
    /// Table holding this store's rows
    pub table: String,
    /// Drop and recreate the table on open
    pub overwrite: bool,
}

impl SqliteOptions {
    /// Options for a database file at `path`.
    pub fn file(path: impl Into<PathBuf>) -> Self {
        Self {
            path: Some(path.into()),
            ..Self::in_memory()
        }
    }

    /// Options for a private in-memory database.
    pub fn in_memory() -> Self {
        Self {
            path: None,
            table: DEFAULT_TABLE.to_string(),
            overwrite: false,
        }
    }

    pub fn table(mut self, table: impl Into<String>) -> Self {
        self.table = table.into();
        self
    }

    pub fn overwrite(mut self, overwrite: bool) -> Self {
        self.overwrite = overwrite;
        self
    }
}

#[derive(Debug)]
struct Statements {
    get: String,
    set: String,
    remove: String,
    clear: String,
    keys: String,
}

impl Statements {
    fn for_table(table: &str) -> Self {
        Self {
            get: format!(r#"SELECT value FROM "{table}" WHERE key = ?1"#),
            set: format!(
                r#"INSERT INTO "{table}" (key, value) VALUES (?1, ?2)
                   ON CONFLICT(key) DO UPDATE SET value = excluded.value"#
            ),
            remove: format!(r#"DELETE FROM "{table}" WHERE key = ?1"#),
            clear: format!(r#"DELETE FROM "{table}""#),
            keys: format!(r#"SELECT key FROM "{table}""#),
        }
    }
}

/// Rate state persisted in a SQLite table.
///
/// The pool holds a single connection, so writes from this instance are
/// serialized and every `set` is committed before it returns.
#[derive(Debug)]
pub struct SqliteStorage {
    pool: SqlitePool,
    table: String,
    statements: Statements,
}

impl SqliteStorage {
    /// Open (creating if needed) `table` inside the database file at `path`.
    pub async fn open(path: impl AsRef<Path>, table: &str, overwrite: bool) -> Result<Self> {
        Self::connect(
            SqliteOptions::file(path.as_ref())
                .table(table)
                .overwrite(overwrite),
        )
        .await
    }

    /// Open `table` in a fresh in-memory database.
    pub async fn open_in_memory(table: &str) -> Result<Self> {
        Self::connect(SqliteOptions::in_memory().table(table)).await
    }

    pub async fn connect(options: SqliteOptions) -> Result<Self> {
        validate_table_name(&options.table)?;

        let connect = match &options.path {
            Some(path) => {
                if let Some(parent) = path.parent() {
                    if !parent.as_os_str().is_empty() {
                        tokio::fs::create_dir_all(parent).await?;
                    }
                }
                SqliteConnectOptions::new()
                    .filename(path)
                    .create_if_missing(true)
            }
            None => SqliteConnectOptions::from_str("sqlite::memory:")?,
        };

        // An in-memory database lives only as long as its connection.
        let pool = SqlitePoolOptions::new()
            .min_connections(1)
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(connect)
            .await?;

        if options.overwrite {
            info!(table = %options.table, "Overwriting rate state table");
            sqlx::query(&format!(r#"DROP TABLE IF EXISTS "{}""#, options.table))
                .execute(&pool)
                .await?;
        }

        sqlx::query(&format!(
            r#"CREATE TABLE IF NOT EXISTS "{}" (key TEXT PRIMARY KEY, value TEXT NOT NULL)"#,
            options.table
        ))
        .execute(&pool)
        .await?;

        info!(
            path = ?options.path,
            table = %options.table,
            "Opened SQLite rate state storage"
        );

        Ok(Self {
            pool,
            statements: Statements::for_table(&options.table),
            table: options.table,
        })
    }

    /// The table this storage reads and writes.
    pub fn table(&self) -> &str {
        &self.table
    }

    /// Close the underlying connection.
    pub async fn close(&self) {
        debug!(table = %self.table, "Closing SQLite rate state storage");
        self.pool.close().await;
    }
}

/// Table names are spliced into SQL, so only plain identifiers are allowed.
fn validate_table_name(table: &str) -> Result<()> {
    let mut chars = table.chars();
    let valid = match chars.next() {
        Some(first) => {
            (first.is_ascii_alphabetic() || first == '_')
                && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        }
        None => false,
    };

    if valid {
        Ok(())
    } else {
        Err(RatewardenError::Config(format!(
            "invalid table name {table:?}: expected [A-Za-z_][A-Za-z0-9_]*"
        )))
    }
}

#[async_trait]
impl Storage for SqliteStorage {
    async fn get(&self, key: &RateKey) -> Result<Option<RateState>> {
        let value = sqlx::query_scalar::<_, String>(&self.statements.get)
            .bind(key.as_str())
            .fetch_optional(&self.pool)
            .await?;

        match value {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    async fn set(&self, key: &RateKey, state: RateState) -> Result<()> {
        let value = serde_json::to_string(&state)?;
        sqlx::query(&self.statements.set)
            .bind(key.as_str())
            .bind(value)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn remove(&self, key: &RateKey) -> Result<()> {
        sqlx::query(&self.statements.remove)
            .bind(key.as_str())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn clear(&self) -> Result<()> {
        sqlx::query(&self.statements.clear)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn keys(&self) -> Result<Vec<RateKey>> {
        let keys = sqlx::query_scalar::<_, String>(&self.statements.keys)
            .fetch_all(&self.pool)
            .await?;
        Ok(keys.into_iter().map(RateKey::from).collect())
    }
}
