//! User preferences and their persistence.
//!
//! Settings live in an XDG-compliant JSON file and feed the engine handler
//! through change notifications.

pub mod settings;

pub use settings::{SettingsChange, SettingsError, SettingsManager, UserSettings, get_config_path};
