//! User preference management with XDG Base Directory compliance.
//!
//! Settings are persisted as pretty JSON and every applied update is
//! broadcast as a list of [`SettingsChange`] values, one per changed field,
//! to the subscribers registered with [`SettingsManager::subscribe`].

use std::{
    env::var,
    fs::{create_dir_all, read_to_string, write},
    io::Error as StdError,
    path::PathBuf,
};

use {
    async_channel::{Receiver, Sender, unbounded},
    parking_lot::{Mutex, RwLock, RwLockReadGuard},
    serde::{Deserialize, Serialize},
    serde_json::{Error as SerdeJsonError, from_str, to_string_pretty},
    thiserror::Error,
    tracing::debug,
};

use crate::{audio::engine::EngineConfig, error::ErrorReporter};

/// Upper bound for the buffer length and the about-to-finish lead time.
const MAX_ENGINE_MS: u64 = 60 * 60 * 1000;

/// Error type for settings operations.
#[derive(Error, Debug)]
pub enum SettingsError {
    /// Failed to read or write settings file.
    #[error("IO error: {0}")]
    IoError(#[from] StdError),
    /// Failed to serialize or deserialize settings.
    #[error("Serialization error: {0}")]
    SerializationError(#[from] SerdeJsonError),
    /// Invalid settings value.
    #[error("Invalid settings value: {reason}")]
    InvalidValue { reason: String },
}

/// Serializable user settings structure with default values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UserSettings {
    /// Output descriptor in `name|device` form; empty selects the first
    /// available backend.
    pub audio_output: String,
    /// Playback volume in `[0.0, 1.0]`.
    pub output_volume: f64,
    /// Milliseconds of audio decoded ahead of the output.
    pub buffer_length_ms: u64,
    /// Keep the output open between tracks of the same format.
    pub gapless_playback: bool,
    /// Lead time of the about-to-finish notification in milliseconds.
    pub track_about_to_finish_ms: u64,
}

impl Default for UserSettings {
    fn default() -> Self {
        let engine = EngineConfig::default();
        Self {
            audio_output: String::new(),
            output_volume: 1.0,
            buffer_length_ms: engine.buffer_length_ms,
            gapless_playback: engine.gapless_playback,
            track_about_to_finish_ms: engine.track_about_to_finish_ms,
        }
    }
}

impl UserSettings {
    /// Engine tunables derived from these settings.
    #[must_use]
    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            buffer_length_ms: self.buffer_length_ms,
            gapless_playback: self.gapless_playback,
            track_about_to_finish_ms: self.track_about_to_finish_ms,
        }
    }

    /// Checks value ranges.
    ///
    /// # Errors
    ///
    /// Returns `SettingsError::InvalidValue` for an out-of-range volume, a
    /// zero buffer length, or a buffer length or lead time above one hour.
    pub fn validate(&self) -> Result<(), SettingsError> {
        if !(0.0..=1.0).contains(&self.output_volume) {
            return Err(SettingsError::InvalidValue {
                reason: format!("output volume {} outside [0, 1]", self.output_volume),
            });
        }

        if self.buffer_length_ms == 0 {
            return Err(SettingsError::InvalidValue {
                reason: String::from("buffer length must be positive"),
            });
        }

        if self.buffer_length_ms > MAX_ENGINE_MS || self.track_about_to_finish_ms > MAX_ENGINE_MS {
            return Err(SettingsError::InvalidValue {
                reason: format!("buffer length and lead time must not exceed {MAX_ENGINE_MS} ms"),
            });
        }

        Ok(())
    }
}

/// A single changed setting.
#[derive(Debug, Clone, PartialEq)]
pub enum SettingsChange {
    /// The output descriptor changed.
    AudioOutput(String),
    /// The volume changed.
    OutputVolume(f64),
    /// One of the engine tunables changed.
    Engine(EngineConfig),
}

/// Handles loading, saving, and validation of user preferences.
#[derive(Debug)]
pub struct SettingsManager {
    /// Thread-safe user settings storage.
    settings: RwLock<UserSettings>,
    /// Path to the configuration file on disk.
    config_path: PathBuf,
    /// Change listeners.
    subscribers: Mutex<Vec<Sender<SettingsChange>>>,
}

impl SettingsManager {
    /// Creates a new settings manager with default config path.
    ///
    /// # Errors
    ///
    /// Returns `SettingsError` if settings cannot be loaded from disk.
    pub fn new() -> Result<Self, SettingsError> {
        Self::with_config_path(get_config_path())
    }

    /// Creates a new settings manager with a custom config path.
    ///
    /// # Arguments
    ///
    /// * `config_path` - Custom path for the settings file
    ///
    /// # Errors
    ///
    /// Returns `SettingsError` if settings cannot be loaded from disk.
    pub fn with_config_path(config_path: PathBuf) -> Result<Self, SettingsError> {
        if let Some(parent) = config_path.parent() {
            create_dir_all(parent)?;
        }

        let settings = if config_path.exists() {
            debug!("Loading settings from existing file: {:?}", config_path);
            let contents = read_to_string(&config_path)?;
            let loaded: UserSettings = from_str(&contents)?;
            match loaded.validate() {
                Ok(()) => loaded,
                Err(e) => {
                    ErrorReporter::warn(&e.into(), "Ignoring stored settings");
                    UserSettings::default()
                }
            }
        } else {
            debug!("Using default settings, no file at {:?}", config_path);
            UserSettings::default()
        };

        Ok(SettingsManager {
            settings: RwLock::new(settings),
            config_path,
            subscribers: Mutex::new(Vec::new()),
        })
    }

    /// Gets the current settings.
    pub fn get_settings(&self) -> RwLockReadGuard<'_, UserSettings> {
        self.settings.read()
    }

    /// Gets the configuration file path.
    pub fn get_config_path(&self) -> &PathBuf {
        &self.config_path
    }

    /// Registers a listener for setting changes.
    pub fn subscribe(&self) -> Receiver<SettingsChange> {
        let (sender, receiver) = unbounded();
        self.subscribers.lock().push(sender);
        receiver
    }

    /// Validates, applies and saves `new_settings`, then notifies
    /// subscribers of every changed field.
    ///
    /// # Arguments
    ///
    /// * `new_settings` - New settings to apply.
    ///
    /// # Errors
    ///
    /// Returns `SettingsError` if the settings are invalid or cannot be
    /// saved to disk. Invalid settings are not applied.
    pub fn update_settings(&self, new_settings: UserSettings) -> Result<(), SettingsError> {
        new_settings.validate()?;

        let mut settings_write = self.settings.write();
        let changes = diff(&settings_write, &new_settings);
        *settings_write = new_settings;
        drop(settings_write);

        self.save_settings()?;
        self.notify(changes);
        Ok(())
    }

    /// Sets the output descriptor.
    ///
    /// # Errors
    ///
    /// Returns `SettingsError` if settings cannot be saved to disk.
    pub fn set_audio_output(&self, descriptor: &str) -> Result<(), SettingsError> {
        let mut settings = self.settings.read().clone();
        settings.audio_output = descriptor.to_string();
        self.update_settings(settings)
    }

    /// Sets the output volume.
    ///
    /// # Errors
    ///
    /// Returns `SettingsError` if the volume is outside `[0.0, 1.0]` or
    /// settings cannot be saved to disk.
    pub fn set_output_volume(&self, volume: f64) -> Result<(), SettingsError> {
        let mut settings = self.settings.read().clone();
        settings.output_volume = volume;
        self.update_settings(settings)
    }

    fn save_settings(&self) -> Result<(), SettingsError> {
        debug!("Saving settings to file: {:?}", self.config_path);
        let contents = to_string_pretty(&*self.settings.read())?;
        write(&self.config_path, contents)?;
        Ok(())
    }

    fn notify(&self, changes: Vec<SettingsChange>) {
        if changes.is_empty() {
            return;
        }

        let mut subscribers = self.subscribers.lock();
        subscribers.retain(|sender| !sender.is_closed());
        for change in changes {
            for sender in subscribers.iter() {
                if let Err(e) = sender.try_send(change.clone()) {
                    debug!("Failed to deliver settings change: {e}");
                }
            }
        }
    }
}

fn diff(old: &UserSettings, new: &UserSettings) -> Vec<SettingsChange> {
    let mut changes = Vec::new();

    if old.audio_output != new.audio_output {
        changes.push(SettingsChange::AudioOutput(new.audio_output.clone()));
    }

    if old.output_volume != new.output_volume {
        changes.push(SettingsChange::OutputVolume(new.output_volume));
    }

    if old.engine_config() != new.engine_config() {
        changes.push(SettingsChange::Engine(new.engine_config()));
    }

    changes
}

/// Ensures proper XDG directory usage for the config file.
///
/// # Returns
///
/// The path to the configuration file.
#[must_use]
pub fn get_config_path() -> PathBuf {
    let mut config_dir = get_xdg_config_home();
    config_dir.push("sonance");
    config_dir.push("settings.json");
    config_dir
}

/// Gets the XDG config home directory following XDG Base Directory specification.
///
/// Uses `XDG_CONFIG_HOME` environment variable if set, otherwise defaults to $HOME/.config
fn get_xdg_config_home() -> PathBuf {
    if let Ok(config_home) = var("XDG_CONFIG_HOME")
        && !config_home.is_empty()
    {
        return PathBuf::from(config_home);
    }

    if let Ok(home) = var("HOME") {
        let mut path = PathBuf::from(home);
        path.push(".config");
        return path;
    }

    PathBuf::from(".")
}
