use std::future::Future;
use std::path::Path;
use std::str::FromStr;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use snafu::ResultExt;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode};
use sqlx::{ConnectOptions, Connection, SqliteConnection};

use super::KeyValueStore;
use super::error::{
    CreateDirectorySnafu, InvariantViolationSnafu, SqliteConnectSnafu, SqliteQuerySnafu,
    SqliteRuntimeInitSnafu, SqliteThreadSpawnSnafu, StorageResult,
};

const CREATE_TABLE_SQL: &str = "CREATE TABLE IF NOT EXISTS kv_entries (\
    key TEXT PRIMARY KEY NOT NULL, \
    value TEXT NOT NULL, \
    updated_at INTEGER NOT NULL)";

/// SQLite-backed store keeping every key in one `kv_entries` table.
#[derive(Debug, Clone)]
pub struct SqliteStore {
    database_url: String,
}

impl SqliteStore {
    /// Opens (creating when missing) the database file and bootstraps the schema.
    pub async fn open(database_location: &str) -> StorageResult<Self> {
        ensure_database_directory(database_location)?;

        let database_url = normalize_database_url(database_location);
        let mut connection = SqliteConnectOptions::from_str(&database_url)
            .context(SqliteConnectSnafu {
                stage: "sqlite-open-parse-url",
                database_url: database_url.clone(),
            })?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_millis(5_000))
            .connect()
            .await
            .context(SqliteConnectSnafu {
                stage: "sqlite-open-connect",
                database_url: database_url.clone(),
            })?;

        sqlx::query(CREATE_TABLE_SQL)
            .execute(&mut connection)
            .await
            .context(SqliteQuerySnafu {
                stage: "sqlite-open-create-table",
            })?;

        connection.close().await.context(SqliteQuerySnafu {
            stage: "sqlite-open-close",
        })?;

        tracing::debug!(database_url = %database_url, "opened sqlite key-value store");
        Ok(Self { database_url })
    }

    pub fn database_url(&self) -> &str {
        &self.database_url
    }

    fn run_db_call<T, F>(&self, stage: &'static str, op: F) -> StorageResult<T>
    where
        T: Send + 'static,
        F: Future<Output = StorageResult<T>> + Send + 'static,
    {
        // Store calls are sync, so each one executes on a dedicated worker thread
        // with its own current-thread runtime to avoid nested-runtime blocking panics.
        let worker = std::thread::Builder::new()
            .name(format!("sqlite-store-{stage}"))
            .spawn(move || {
                let runtime = tokio::runtime::Builder::new_current_thread()
                    .enable_all()
                    .build()
                    .context(SqliteRuntimeInitSnafu {
                        stage: "sqlite-store-runtime-build",
                    })?;
                runtime.block_on(op)
            })
            .context(SqliteThreadSpawnSnafu {
                stage: "sqlite-store-spawn-worker",
            })?;

        match worker.join() {
            Ok(result) => result,
            Err(_) => InvariantViolationSnafu {
                stage,
                details: "sqlite storage worker thread panicked".to_string(),
            }
            .fail(),
        }
    }
}

impl KeyValueStore for SqliteStore {
    fn get(&self, key: &str) -> StorageResult<Option<String>> {
        let database_url = self.database_url.clone();
        let key = key.to_string();
        self.run_db_call("kv-get", async move {
            let mut connection = connect_store_connection(&database_url, "kv-get-connect").await?;
            sqlx::query_scalar::<_, String>("SELECT value FROM kv_entries WHERE key = ?")
                .bind(key)
                .fetch_optional(&mut connection)
                .await
                .context(SqliteQuerySnafu {
                    stage: "kv-get-query",
                })
        })
    }

    fn set(&self, key: &str, value: &str) -> StorageResult<()> {
        let database_url = self.database_url.clone();
        let key = key.to_string();
        let value = value.to_string();
        self.run_db_call("kv-set", async move {
            let mut connection = connect_store_connection(&database_url, "kv-set-connect").await?;
            sqlx::query(
                "INSERT INTO kv_entries (key, value, updated_at) VALUES (?, ?, ?) \
                 ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
            )
            .bind(key)
            .bind(value)
            .bind(unix_timestamp_seconds())
            .execute(&mut connection)
            .await
            .context(SqliteQuerySnafu {
                stage: "kv-set-upsert",
            })?;
            Ok(())
        })
    }

    fn remove(&self, key: &str) -> StorageResult<()> {
        let database_url = self.database_url.clone();
        let key = key.to_string();
        self.run_db_call("kv-remove", async move {
            let mut connection =
                connect_store_connection(&database_url, "kv-remove-connect").await?;
            sqlx::query("DELETE FROM kv_entries WHERE key = ?")
                .bind(key)
                .execute(&mut connection)
                .await
                .context(SqliteQuerySnafu {
                    stage: "kv-remove-delete",
                })?;
            Ok(())
        })
    }
}

async fn connect_store_connection(
    database_url: &str,
    stage: &'static str,
) -> StorageResult<SqliteConnection> {
    let mut connection =
        SqliteConnection::connect(database_url)
            .await
            .context(SqliteConnectSnafu {
                stage,
                database_url: database_url.to_string(),
            })?;

    sqlx::query("PRAGMA busy_timeout = 5000;")
        .execute(&mut connection)
        .await
        .context(SqliteQuerySnafu {
            stage: "sqlite-store-pragma-busy-timeout",
        })?;

    Ok(connection)
}

fn unix_timestamp_seconds() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |duration| duration.as_secs() as i64)
}

fn ensure_database_directory(database_location: &str) -> StorageResult<()> {
    if database_location.starts_with("sqlite:") {
        return Ok(());
    }

    let path = Path::new(database_location);
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent).context(CreateDirectorySnafu {
            stage: "sqlite-open-create-directory",
            path: parent.display().to_string(),
        })?;
    }

    Ok(())
}

fn normalize_database_url(database_location: &str) -> String {
    if database_location.starts_with("sqlite:") {
        return database_location.to_string();
    }

    format!("sqlite://{database_location}")
}
