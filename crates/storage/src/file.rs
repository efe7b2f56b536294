use std::fmt::Write as _;
use std::path::{Path, PathBuf};

use snafu::ResultExt;

use super::KeyValueStore;
use super::error::{
    CreateDirectorySnafu, ReadFileSnafu, RemoveFileSnafu, RenameFileSnafu, StorageResult,
    WriteFileSnafu,
};

const ENTRY_EXTENSION: &str = "json";

/// Directory-backed store with one file per key.
#[derive(Debug, Clone)]
pub struct FileStore {
    root: PathBuf,
}

impl FileStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn entry_path(&self, key: &str) -> PathBuf {
        self.root
            .join(format!("{}.{ENTRY_EXTENSION}", encode_key(key)))
    }

    fn ensure_root(&self) -> StorageResult<()> {
        std::fs::create_dir_all(&self.root).context(CreateDirectorySnafu {
            stage: "file-store-create-root",
            path: display_path(&self.root),
        })
    }
}

impl KeyValueStore for FileStore {
    fn get(&self, key: &str) -> StorageResult<Option<String>> {
        let path = self.entry_path(key);
        match std::fs::read_to_string(&path) {
            Ok(contents) => Ok(Some(contents)),
            Err(source) if source.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(source) => Err(source).context(ReadFileSnafu {
                stage: "file-store-read-entry",
                path: display_path(&path),
            }),
        }
    }

    fn set(&self, key: &str, value: &str) -> StorageResult<()> {
        self.ensure_root()?;

        let path = self.entry_path(key);
        let temp_path = path.with_extension(format!("{ENTRY_EXTENSION}.tmp"));
        std::fs::write(&temp_path, value).context(WriteFileSnafu {
            stage: "file-store-write-temporary-entry",
            path: display_path(&temp_path),
        })?;

        std::fs::rename(&temp_path, &path).context(RenameFileSnafu {
            stage: "file-store-rename-temporary-entry",
            from: display_path(&temp_path),
            to: display_path(&path),
        })
    }

    fn remove(&self, key: &str) -> StorageResult<()> {
        let path = self.entry_path(key);
        match std::fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(source) if source.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(source) => Err(source).context(RemoveFileSnafu {
                stage: "file-store-remove-entry",
                path: display_path(&path),
            }),
        }
    }
}

// Bytes outside [A-Za-z0-9-] become `%XX`, so distinct keys never share a file.
fn encode_key(key: &str) -> String {
    if key.is_empty() {
        return "%".to_string();
    }

    let mut encoded = String::with_capacity(key.len());
    for byte in key.bytes() {
        if byte.is_ascii_alphanumeric() || byte == b'-' {
            encoded.push(char::from(byte));
        } else {
            let _ = write!(encoded, "%{byte:02X}");
        }
    }
    encoded
}

fn display_path(path: &Path) -> String {
    path.display().to_string()
}
