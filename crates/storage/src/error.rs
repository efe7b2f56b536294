use snafu::Snafu;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum StorageError {
    #[snafu(display("persistent storage is unavailable: {details}"))]
    Unavailable {
        stage: &'static str,
        details: String,
    },
    #[snafu(display(
        "storage quota exceeded writing '{key}': {required} bytes needed, {quota} allowed"
    ))]
    QuotaExceeded {
        stage: &'static str,
        key: String,
        required: usize,
        quota: usize,
    },
    #[snafu(display("failed to serialize value for '{key}'"))]
    Serialize {
        stage: &'static str,
        key: String,
        source: serde_json::Error,
    },
    #[snafu(display("failed to deserialize value stored under '{key}'"))]
    Deserialize {
        stage: &'static str,
        key: String,
        source: serde_json::Error,
    },
    #[snafu(display("failed to create storage directory at {path}"))]
    CreateDirectory {
        stage: &'static str,
        path: String,
        source: std::io::Error,
    },
    #[snafu(display("failed to read storage file {path}"))]
    ReadFile {
        stage: &'static str,
        path: String,
        source: std::io::Error,
    },
    #[snafu(display("failed to write storage file {path}"))]
    WriteFile {
        stage: &'static str,
        path: String,
        source: std::io::Error,
    },
    #[snafu(display("failed to replace storage file {from} with {to}"))]
    RenameFile {
        stage: &'static str,
        from: String,
        to: String,
        source: std::io::Error,
    },
    #[snafu(display("failed to remove storage file {path}"))]
    RemoveFile {
        stage: &'static str,
        path: String,
        source: std::io::Error,
    },
    #[snafu(display("failed to connect sqlite database '{database_url}'"))]
    SqliteConnect {
        stage: &'static str,
        database_url: String,
        source: sqlx::Error,
    },
    #[snafu(display("sqlite query failed at {stage}: {source}"))]
    SqliteQuery {
        stage: &'static str,
        source: sqlx::Error,
    },
    #[snafu(display("failed to spawn sqlite worker thread"))]
    SqliteThreadSpawn {
        stage: &'static str,
        source: std::io::Error,
    },
    #[snafu(display("failed to initialize sqlite worker runtime"))]
    SqliteRuntimeInit {
        stage: &'static str,
        source: std::io::Error,
    },
    #[snafu(display("storage invariant violation: {details}"))]
    InvariantViolation {
        stage: &'static str,
        details: String,
    },
}

pub type StorageResult<T> = Result<T, StorageError>;
