//! Name-keyed registry of output backends.

use std::collections::BTreeMap;

use tracing::debug;

use crate::audio::output::{AudioOutputBuilder, OutputCreator, OutputDevice};

/// Maps backend names to the factories that create them.
///
/// Entries are added once and never removed. Iteration is in name order so
/// "the first backend" is stable between runs.
#[derive(Default)]
pub struct OutputRegistry {
    outputs: BTreeMap<String, OutputCreator>,
}

impl OutputRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `output`.
    ///
    /// Returns `false` and leaves the existing entry untouched if the name is
    /// already taken.
    pub fn add(&mut self, output: AudioOutputBuilder) -> bool {
        if self.outputs.contains_key(&output.name) {
            debug!("Output ({}) already registered", output.name);
            return false;
        }

        self.outputs.insert(output.name, output.creator);
        true
    }

    /// Whether a backend called `name` exists.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.outputs.contains_key(name)
    }

    /// Whether nothing has been registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.outputs.is_empty()
    }

    /// The factory registered under `name`.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<OutputCreator> {
        self.outputs.get(name).cloned()
    }

    /// The first backend name in iteration order.
    #[must_use]
    pub fn first(&self) -> Option<&str> {
        self.outputs.keys().next().map(String::as_str)
    }

    /// All registered backend names.
    #[must_use]
    pub fn names(&self) -> Vec<String> {
        self.outputs.keys().cloned().collect()
    }

    /// Lists the devices of backend `name` using a throwaway instance.
    #[must_use]
    pub fn devices(&self, name: &str) -> Vec<OutputDevice> {
        let Some(creator) = self.outputs.get(name) else {
            debug!("Output not found: {name}");
            return Vec::new();
        };

        creator().get_all_devices()
    }
}
