//! Constructor registry for internal processors.
//!
//! Maps a uid string to a constructor so processors can be created by name
//! from configuration or the controller surface. Doubles as the
//! [`PluginLoader`] for the `"internal"` plugin format.

use dashmap::DashMap;

use crate::frontend::{PluginLoadError, PluginLoader};
use crate::processor::Processor;

use super::gain::{GainPlugin, GAIN_UID};
use super::passthrough::{PassthroughPlugin, PASSTHROUGH_UID};
use super::peak_meter::{PeakMeterPlugin, PEAK_METER_UID};

type Constructor = fn() -> Box<dyn Processor>;

pub struct InternalPluginRegistry {
    constructors: DashMap<String, Constructor>,
}

impl InternalPluginRegistry {
    pub fn new() -> Self {
        Self {
            constructors: DashMap::new(),
        }
    }

    /// Registry pre-populated with the built-in processors.
    pub fn with_defaults() -> Self {
        let registry = Self::new();
        registry.register(PASSTHROUGH_UID, || Box::new(PassthroughPlugin::new()));
        registry.register(GAIN_UID, || Box::new(GainPlugin::new()));
        registry.register(PEAK_METER_UID, || Box::new(PeakMeterPlugin::new()));
        registry
    }

    pub fn register(&self, uid: &str, constructor: Constructor) {
        self.constructors.insert(uid.to_owned(), constructor);
    }

    pub fn contains(&self, uid: &str) -> bool {
        self.constructors.contains_key(uid)
    }

    pub fn uids(&self) -> Vec<String> {
        self.constructors.iter().map(|e| e.key().clone()).collect()
    }

    pub fn create(&self, uid: &str, sample_rate: f32) -> Option<Box<dyn Processor>> {
        let constructor = *self.constructors.get(uid)?;
        let mut processor = constructor();
        processor.configure(sample_rate);
        Some(processor)
    }
}

impl Default for InternalPluginRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

impl PluginLoader for InternalPluginRegistry {
    fn load(
        &self,
        uid_or_path: &str,
        sample_rate: f32,
    ) -> std::result::Result<Box<dyn Processor>, PluginLoadError> {
        self.create(uid_or_path, sample_rate)
            .ok_or(PluginLoadError::NotFound)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_registered() {
        let registry = InternalPluginRegistry::with_defaults();
        assert!(registry.contains(GAIN_UID));
        assert!(registry.contains(PASSTHROUGH_UID));
        assert!(registry.contains(PEAK_METER_UID));
        assert!(!registry.contains("vivace.sampler"));
    }

    #[test]
    fn test_create_configures_sample_rate() {
        let registry = InternalPluginRegistry::with_defaults();
        let plugin = registry.create(GAIN_UID, 96000.0).unwrap();
        assert_eq!(plugin.data().sample_rate(), 96000.0);
    }

    #[test]
    fn test_loader_contract() {
        let registry = InternalPluginRegistry::with_defaults();
        assert!(registry.load(GAIN_UID, 48000.0).is_ok());
        assert!(matches!(
            registry.load("unknown.uid", 48000.0),
            Err(PluginLoadError::NotFound)
        ));
    }
}
