pub mod state;

pub use state::{
    ChatSettings, ProviderSettings, SettingsError, SettingsStore, StorageBackend, StorageSettings,
};
