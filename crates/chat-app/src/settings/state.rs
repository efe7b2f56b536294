use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use figment::{
    Figment,
    providers::{Env, Format, Json, Serialized},
};
use hiwar_llm::{MOCK_PROVIDER_ID, ProviderConfig};
use serde::{Deserialize, Serialize};
use snafu::{ResultExt, Snafu};

use crate::chat::session::SessionConfig;
use crate::chat::text::{DEFAULT_CONVERSATION_TITLE, TITLE_MAX_CHARS};

pub const SETTINGS_DIRECTORY_NAME: &str = "hiwar";
pub const SETTINGS_FILE_NAME: &str = "settings.json";
pub const ENV_PREFIX: &str = "HIWAR_";

pub const DEFAULT_MAX_MESSAGE_LENGTH: usize = 4_000;
pub const DEFAULT_SEARCH_DEBOUNCE_MS: u64 = 300;
pub const DEFAULT_RESPONSE_DELAY_MS: u64 = 2_000;
pub const DEFAULT_NAMESPACE: &str = "hiwar";
pub const DEFAULT_CONVERSATIONS_KEY: &str = "ai-chat-conversations";
pub const DEFAULT_SELECTION_KEY: &str = "ai-chat-current-conversation";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    Memory,
    #[default]
    File,
    Sqlite,
    /// Every read and write fails; the session runs purely in memory.
    None,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageSettings {
    #[serde(default)]
    pub backend: StorageBackend,
    /// Directory for the file backend, database file for sqlite.
    #[serde(default)]
    pub location: Option<PathBuf>,
    #[serde(default = "default_namespace")]
    pub namespace: String,
    #[serde(default = "default_conversations_key")]
    pub conversations_key: String,
    #[serde(default = "default_selection_key")]
    pub selection_key: String,
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            backend: StorageBackend::default(),
            location: None,
            namespace: default_namespace(),
            conversations_key: default_conversations_key(),
            selection_key: default_selection_key(),
        }
    }
}

impl StorageSettings {
    pub fn resolved_location(&self) -> PathBuf {
        if let Some(location) = &self.location {
            return location.clone();
        }

        let data_dir = dirs::data_dir()
            .map(|path| path.join(SETTINGS_DIRECTORY_NAME))
            .unwrap_or_else(|| PathBuf::from(".hiwar"));
        match self.backend {
            StorageBackend::Sqlite => data_dir.join("hiwar.db"),
            StorageBackend::Memory | StorageBackend::File | StorageBackend::None => {
                data_dir.join("store")
            }
        }
    }

    fn normalized(mut self) -> Self {
        self.namespace = self.namespace.trim().to_string();
        self.conversations_key = non_blank(self.conversations_key, default_conversations_key);
        self.selection_key = non_blank(self.selection_key, default_selection_key);
        self.location = self
            .location
            .filter(|location| !location.as_os_str().is_empty());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderSettings {
    #[serde(default = "default_provider_id")]
    pub provider_id: String,
    #[serde(default = "default_response_delay_ms")]
    pub response_delay_ms: u64,
    #[serde(default)]
    pub model: Option<String>,
}

impl Default for ProviderSettings {
    fn default() -> Self {
        Self {
            provider_id: default_provider_id(),
            response_delay_ms: default_response_delay_ms(),
            model: None,
        }
    }
}

impl ProviderSettings {
    pub fn to_provider_config(&self) -> ProviderConfig {
        let config = ProviderConfig::new(&self.provider_id, self.response_delay_ms);
        match &self.model {
            Some(model) => config.with_model(model),
            None => config,
        }
    }

    fn normalized(mut self) -> Self {
        self.provider_id = non_blank(self.provider_id, default_provider_id);
        self.model = self
            .model
            .map(|model| model.trim().to_string())
            .filter(|model| !model.is_empty());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatSettings {
    #[serde(default = "default_max_message_length")]
    pub max_message_length: usize,
    #[serde(default = "default_title_max_length")]
    pub title_max_length: usize,
    #[serde(default = "default_conversation_title")]
    pub default_conversation_title: String,
    /// Surface cancelled sends through the session error channel.
    #[serde(default)]
    pub report_cancellation: bool,
    #[serde(default = "default_search_debounce_ms")]
    pub search_debounce_ms: u64,
    #[serde(default)]
    pub storage: StorageSettings,
    #[serde(default)]
    pub provider: ProviderSettings,
}

impl Default for ChatSettings {
    fn default() -> Self {
        Self {
            max_message_length: default_max_message_length(),
            title_max_length: default_title_max_length(),
            default_conversation_title: default_conversation_title(),
            report_cancellation: false,
            search_debounce_ms: default_search_debounce_ms(),
            storage: StorageSettings::default(),
            provider: ProviderSettings::default(),
        }
    }
}

impl ChatSettings {
    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            max_message_length: self.max_message_length,
            title_max_chars: self.title_max_length,
            default_title: self.default_conversation_title.clone(),
            report_cancellation: self.report_cancellation,
        }
    }

    pub fn search_debounce(&self) -> Duration {
        Duration::from_millis(self.search_debounce_ms)
    }

    pub fn normalized(mut self) -> Self {
        if self.max_message_length == 0 {
            self.max_message_length = default_max_message_length();
        }
        if self.title_max_length == 0 {
            self.title_max_length = default_title_max_length();
        }
        self.default_conversation_title =
            non_blank(self.default_conversation_title, default_conversation_title);
        self.storage = self.storage.normalized();
        self.provider = self.provider.normalized();
        self
    }
}

/// Current settings plus the file they persist to.
///
/// Values are layered as defaults, then the JSON file, then `HIWAR_*`
/// environment variables (`__` separates nested keys).
pub struct SettingsStore {
    settings: Arc<ArcSwap<ChatSettings>>,
    config_path: PathBuf,
}

impl SettingsStore {
    pub fn default_config_dir() -> PathBuf {
        dirs::config_dir()
            .map(|path| path.join(SETTINGS_DIRECTORY_NAME))
            .unwrap_or_else(|| PathBuf::from(".hiwar"))
    }

    pub fn default_config_path() -> PathBuf {
        Self::default_config_dir().join(SETTINGS_FILE_NAME)
    }

    pub fn new(config_path: PathBuf) -> Self {
        let settings = Self::load_layered(&config_path);
        Self {
            settings: Arc::new(ArcSwap::from_pointee(settings)),
            config_path,
        }
    }

    pub fn load() -> Self {
        Self::new(Self::default_config_path())
    }

    pub fn config_path(&self) -> &Path {
        &self.config_path
    }

    pub fn settings(&self) -> Arc<ChatSettings> {
        self.settings.load_full()
    }

    pub fn update(&self, settings: ChatSettings) -> Result<(), SettingsError> {
        let normalized_settings = settings.normalized();
        self.persist(&normalized_settings)?;
        self.settings.store(Arc::new(normalized_settings));
        Ok(())
    }

    fn figment(path: &Path) -> Figment {
        Figment::from(Serialized::defaults(ChatSettings::default()))
            .merge(Json::file(path))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
    }

    fn load_layered(path: &Path) -> ChatSettings {
        if !path.exists() {
            tracing::info!(path = ?path, "settings file not found, using defaults");
        }

        match Self::figment(path).extract::<ChatSettings>() {
            Ok(settings) => settings.normalized(),
            Err(error) => {
                tracing::warn!(
                    path = ?path,
                    error = %error,
                    "failed to parse settings, using defaults"
                );
                ChatSettings::default()
            }
        }
    }

    fn persist(&self, settings: &ChatSettings) -> Result<(), SettingsError> {
        if let Some(parent) = self.config_path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).context(CreateDirSnafu {
                stage: "create-settings-directory",
                path: parent.to_path_buf(),
            })?;
        }

        let content = serde_json::to_string_pretty(settings).context(SerializeConfigSnafu {
            stage: "serialize-settings-json",
        })?;

        let temp_path = self.config_path.with_extension("json.tmp");
        std::fs::write(&temp_path, content).context(WriteFileSnafu {
            stage: "write-temporary-settings-file",
            path: temp_path.clone(),
        })?;

        std::fs::rename(&temp_path, &self.config_path).context(RenameTempFileSnafu {
            stage: "rename-temporary-settings-file",
            from: temp_path,
            to: self.config_path.clone(),
        })?;

        tracing::info!(path = ?self.config_path, "saved settings");
        Ok(())
    }
}

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum SettingsError {
    #[snafu(display("failed to create settings directory at {path:?} on `{stage}`: {source}"))]
    CreateDir {
        stage: &'static str,
        path: PathBuf,
        source: std::io::Error,
    },
    #[snafu(display("failed to serialize settings on `{stage}`: {source}"))]
    SerializeConfig {
        stage: &'static str,
        source: serde_json::Error,
    },
    #[snafu(display("failed to write settings file at {path:?} on `{stage}`: {source}"))]
    WriteFile {
        stage: &'static str,
        path: PathBuf,
        source: std::io::Error,
    },
    #[snafu(display(
        "failed to replace settings file from {from:?} to {to:?} on `{stage}`: {source}"
    ))]
    RenameTempFile {
        stage: &'static str,
        from: PathBuf,
        to: PathBuf,
        source: std::io::Error,
    },
}

fn non_blank(value: String, fallback: fn() -> String) -> String {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        fallback()
    } else {
        trimmed.to_string()
    }
}

fn default_max_message_length() -> usize {
    DEFAULT_MAX_MESSAGE_LENGTH
}

fn default_title_max_length() -> usize {
    TITLE_MAX_CHARS
}

fn default_conversation_title() -> String {
    DEFAULT_CONVERSATION_TITLE.to_string()
}

fn default_search_debounce_ms() -> u64 {
    DEFAULT_SEARCH_DEBOUNCE_MS
}

fn default_namespace() -> String {
    DEFAULT_NAMESPACE.to_string()
}

fn default_conversations_key() -> String {
    DEFAULT_CONVERSATIONS_KEY.to_string()
}

fn default_selection_key() -> String {
    DEFAULT_SELECTION_KEY.to_string()
}

fn default_provider_id() -> String {
    MOCK_PROVIDER_ID.to_string()
}

fn default_response_delay_ms() -> u64 {
    DEFAULT_RESPONSE_DELAY_MS
}
