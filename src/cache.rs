/// In-memory registry of modules and sensors
///
/// Holds all of the process-local data, as opposed to what lives in the
/// database. Topology is fixed at construction; only sensor contents change.
use log::debug;
use std::collections::HashMap;
use time::OffsetDateTime;

use crate::error::ParameterError;
use crate::models::{Module, Sensor};

#[derive(Debug, Clone)]
pub struct Registry {
    modules: Vec<Module>,
    /// unique_tag -> (module index, sensor index)
    index: HashMap<String, (usize, usize)>,
    history_cap: usize,
}

impl Registry {
    pub fn new(modules: Vec<Module>, history_cap: usize) -> Result<Self, ParameterError> {
        let mut index = HashMap::new();

        for (module_idx, module) in modules.iter().enumerate() {
            for (sensor_idx, sensor) in module.sensors.iter().enumerate() {
                if index
                    .insert(sensor.unique_tag.clone(), (module_idx, sensor_idx))
                    .is_some()
                {
                    return Err(ParameterError::DuplicateSensor(sensor.unique_tag.clone()));
                }
            }
        }

        Ok(Registry {
            modules,
            index,
            history_cap,
        })
    }

    pub fn modules(&self) -> &[Module] {
        &self.modules
    }

    pub fn sensor_count(&self) -> usize {
        self.index.len()
    }

    pub fn sensor(&self, unique_tag: &str) -> Option<&Sensor> {
        let &(module_idx, sensor_idx) = self.index.get(unique_tag)?;
        Some(&self.modules[module_idx].sensors[sensor_idx])
    }

    fn sensor_mut(&mut self, unique_tag: &str) -> Option<&mut Sensor> {
        let &(module_idx, sensor_idx) = self.index.get(unique_tag)?;
        Some(&mut self.modules[module_idx].sensors[sensor_idx])
    }

    /// Record a reading for a sensor. Returns false for unknown tags.
    pub fn record(&mut self, unique_tag: &str, timestamp: OffsetDateTime, value: f64) -> bool {
        let cap = self.history_cap;
        match self.sensor_mut(unique_tag) {
            Some(sensor) => {
                sensor.record(timestamp, value, cap);
                true
            }
            None => {
                debug!("Ignoring reading for unknown sensor {}", unique_tag);
                false
            }
        }
    }

    /// Newest cached reading, or the sentinel when the sensor has none
    pub fn latest(&self, unique_tag: &str) -> Option<(OffsetDateTime, f64)> {
        self.sensor(unique_tag).map(Sensor::latest)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Bounds, SENTINEL_VALUE};
    use time::macros::datetime;

    fn module(tag: &str, sensors: &[&str]) -> Module {
        let bounds = Bounds {
            lower_critical: 0.0,
            lower: 1.0,
            upper: 2.0,
            upper_critical: 3.0,
        };
        Module {
            tag: tag.to_string(),
            label: tag.to_uppercase(),
            sensors: sensors
                .iter()
                .map(|s| Sensor::new(s, s, tag, &tag.to_uppercase(), bounds, "u"))
                .collect(),
        }
    }

    #[test]
    fn test_lookup_by_unique_tag() {
        let registry = Registry::new(
            vec![
                module("main_battery", &["voltage", "amperage"]),
                module("aux_battery", &["voltage"]),
            ],
            5,
        )
        .unwrap();

        assert_eq!(registry.sensor_count(), 3);
        assert_eq!(
            registry.sensor("aux_battery.voltage").unwrap().parent_tag,
            "aux_battery"
        );
        assert!(registry.sensor("aux_battery.amperage").is_none());
    }

    #[test]
    fn test_duplicate_unique_tag_rejected() {
        let err = Registry::new(
            vec![module("dht11", &["temperature"]), module("dht11", &["temperature"])],
            5,
        )
        .unwrap_err();
        assert!(matches!(err, ParameterError::DuplicateSensor(tag) if tag == "dht11.temperature"));
    }

    #[test]
    fn test_record_respects_cap() {
        let mut registry = Registry::new(vec![module("rfm95", &["rssi"])], 3).unwrap();
        let now = datetime!(2024-05-01 12:00 UTC);

        for i in 0..10 {
            assert!(registry.record("rfm95.rssi", now, -(i as f64)));
        }

        let sensor = registry.sensor("rfm95.rssi").unwrap();
        assert_eq!(sensor.history_len(), 3);
        assert_eq!(registry.latest("rfm95.rssi"), Some((now, -9.0)));
    }

    #[test]
    fn test_record_unknown_sensor() {
        let mut registry = Registry::new(vec![module("rfm95", &["rssi"])], 3).unwrap();
        assert!(!registry.record("rfm95.snr", datetime!(2024-05-01 12:00 UTC), 1.0));
    }

    #[test]
    fn test_latest_defaults_to_sentinel() {
        let registry = Registry::new(vec![module("rfm95", &["rssi"])], 3).unwrap();
        assert_eq!(registry.latest("rfm95.rssi").map(|(_, v)| v), Some(SENTINEL_VALUE));
        assert_eq!(registry.latest("missing.sensor"), None);
    }
}
