//! Node configuration as consumed by the duty cycle.
//!
//! The persistent store is an external collaborator reached through
//! [`ConfigStore`]. On a cold boot the cycle reads it once and mirrors the
//! result into retained memory as a [`CachedConfig`]; warm wakes reuse the
//! copy. A wake from the configuration button drops the copy, since the
//! operator may be about to change the settings.

use core::fmt;

use heapless::{String, Vec};

use crate::sensors::{SensorId, SensorType};
use crate::session::credentials::{CredentialError, JoinCredentials};
use crate::sleep::{RetainedState, WakeCause};

pub mod defaults;

/// Longest device or station id.
pub const NODE_ID_CAPACITY: usize = 15;
/// Longest key naming a sensor slot in the store.
pub const CONFIG_KEY_CAPACITY: usize = 7;
/// Sensors the store may enable, battery monitor excluded.
pub const MAX_CONFIGURED_SENSORS: usize = 15;
/// Text capacity of an EUI in comma-separated hex.
pub const EUI_TEXT_CAPACITY: usize = 23;
/// Text capacity of a key in comma-separated hex.
pub const KEY_TEXT_CAPACITY: usize = 47;

pub type NodeId = String<NODE_ID_CAPACITY>;
pub type ConfigKey = String<CONFIG_KEY_CAPACITY>;
pub type SensorTable = Vec<SensorConfig, MAX_CONFIGURED_SENSORS>;

/// Protocol category a sensor list is stored under.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SensorCategory {
    /// Digital sensors on the two-wire, SPI and one-wire buses.
    Normal,
    /// Field-bus slaves.
    FieldBus,
    /// ADC channels.
    Adc,
}

impl SensorCategory {
    pub const ALL: [SensorCategory; 3] = [
        SensorCategory::Normal,
        SensorCategory::FieldBus,
        SensorCategory::Adc,
    ];

    #[must_use]
    pub const fn to_raw(self) -> u8 {
        match self {
            SensorCategory::Normal => 0,
            SensorCategory::FieldBus => 1,
            SensorCategory::Adc => 2,
        }
    }

    #[must_use]
    pub const fn from_raw(raw: u8) -> Option<Self> {
        match raw {
            0 => Some(SensorCategory::Normal),
            1 => Some(SensorCategory::FieldBus),
            2 => Some(SensorCategory::Adc),
            _ => None,
        }
    }
}

/// One sensor slot from the store.
///
/// The type is kept as its raw code so that entries written by newer tooling
/// survive until registration decides whether this build can drive them.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SensorConfig {
    pub key: ConfigKey,
    pub id: SensorId,
    pub type_code: u16,
    pub category: SensorCategory,
    /// Slave address for field-bus sensors.
    pub address: Option<u8>,
    pub enabled: bool,
}

impl SensorConfig {
    #[must_use]
    pub fn sensor_type(&self) -> Option<SensorType> {
        SensorType::from_code(self.type_code)
    }
}

/// Join credentials in their stored text form.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct LoraConfig {
    pub join_eui: String<EUI_TEXT_CAPACITY>,
    pub dev_eui: String<EUI_TEXT_CAPACITY>,
    pub app_key: String<KEY_TEXT_CAPACITY>,
    pub nwk_key: String<KEY_TEXT_CAPACITY>,
    pub sub_band: u8,
}

/// Everything a cycle needs from the store, kept across deep sleep.
#[derive(Clone, Debug, PartialEq)]
pub struct CachedConfig {
    pub device_id: NodeId,
    pub station_id: NodeId,
    pub sleep_interval_s: u32,
    pub sensors: SensorTable,
    /// `None` when the stored credentials do not parse.
    pub credentials: Option<JoinCredentials>,
}

impl CachedConfig {
    /// Enabled sensor entries in store order.
    pub fn enabled_sensors(&self) -> impl Iterator<Item = &SensorConfig> {
        self.sensors.iter().filter(|sensor| sensor.enabled)
    }
}

/// Persistent configuration store.
pub trait ConfigStore {
    /// Returns `true` once defaults have been written.
    fn is_initialized(&mut self) -> bool;

    /// Writes the factory defaults and marks the store initialized.
    fn initialize_defaults(&mut self);

    fn device_id(&mut self) -> NodeId;

    fn station_id(&mut self) -> NodeId;

    fn sleep_interval_s(&mut self) -> u32;

    /// Sensor slots stored under `category`, enabled or not.
    fn sensors(&mut self, category: SensorCategory) -> SensorTable;

    fn lora_config(&mut self) -> LoraConfig;
}

/// The operator-facing configuration session.
pub trait ConfigMode {
    /// Polled after a cold boot to see whether the operator is asking for it.
    fn check_config_mode(&mut self) -> bool;

    /// Runs the session until the operator leaves it. Settings changed here
    /// are picked up from the store on the next boot.
    fn run_config_mode(&mut self);
}

/// Configuration mode that is never requested.
#[derive(Default)]
pub struct NeverConfigMode;

impl ConfigMode for NeverConfigMode {
    fn check_config_mode(&mut self) -> bool {
        false
    }

    fn run_config_mode(&mut self) {}
}

/// Where this cycle's configuration came from.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ConfigSource {
    /// Reused from retained memory; the store was not touched.
    Retained,
    /// Read from the store.
    Store,
    /// The store was empty; defaults were written and then read back.
    Defaults,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ConfigError {
    /// More sensors are enabled than a table can hold; the excess was dropped.
    TooManySensors,
    Credentials(CredentialError),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::TooManySensors => f.write_str("too many sensors configured"),
            ConfigError::Credentials(error) => write!(f, "credentials: {}", error),
        }
    }
}

/// Reads every setting the cycle needs from `store`.
///
/// Problems are reported alongside a usable configuration: a sensor table
/// that overflows keeps its first entries, and unparseable credentials leave
/// `credentials` empty so the join fails instead of the whole cycle.
pub fn read_config<S: ConfigStore>(store: &mut S) -> (CachedConfig, Option<ConfigError>) {
    let mut warning = None;
    let mut sensors = SensorTable::new();
    for category in SensorCategory::ALL {
        for entry in store.sensors(category) {
            if !entry.enabled {
                continue;
            }
            if sensors.push(entry).is_err() {
                warning = Some(ConfigError::TooManySensors);
            }
        }
    }

    let credentials = match JoinCredentials::from_config(&store.lora_config()) {
        Ok(credentials) => Some(credentials),
        Err(error) => {
            warning = Some(ConfigError::Credentials(error));
            None
        }
    };

    let config = CachedConfig {
        device_id: store.device_id(),
        station_id: store.station_id(),
        sleep_interval_s: store.sleep_interval_s(),
        sensors,
        credentials,
    };
    (config, warning)
}

/// Resolves this cycle's configuration, preferring the retained copy.
///
/// A configuration-button wake always invalidates the copy first. When the
/// store is read it is mirrored back into `retained`.
pub fn load_config<S: ConfigStore>(
    store: &mut S,
    retained: &mut RetainedState,
    wake: WakeCause,
) -> (ConfigSource, Option<ConfigError>) {
    if wake == WakeCause::ExternalPin {
        retained.config = None;
    }

    if retained.config.is_some() {
        return (ConfigSource::Retained, None);
    }

    let source = if store.is_initialized() {
        ConfigSource::Store
    } else {
        store.initialize_defaults();
        ConfigSource::Defaults
    };

    let (config, warning) = read_config(store);
    retained.config = Some(config);
    (source, warning)
}

/// Copies `text` into a fixed-capacity string, truncating at the capacity.
#[must_use]
pub fn bounded<const N: usize>(text: &str) -> String<N> {
    let mut out = String::new();
    for ch in text.chars() {
        if out.push(ch).is_err() {
            break;
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct CountingStore {
        initialized: bool,
        reads: u32,
        defaults_written: u32,
        broken_key: bool,
    }

    impl ConfigStore for CountingStore {
        fn is_initialized(&mut self) -> bool {
            self.initialized
        }

        fn initialize_defaults(&mut self) {
            self.initialized = true;
            self.defaults_written += 1;
        }

        fn device_id(&mut self) -> NodeId {
            self.reads += 1;
            bounded(defaults::DEVICE_ID)
        }

        fn station_id(&mut self) -> NodeId {
            self.reads += 1;
            bounded(defaults::STATION_ID)
        }

        fn sleep_interval_s(&mut self) -> u32 {
            self.reads += 1;
            defaults::SLEEP_INTERVAL_S
        }

        fn sensors(&mut self, category: SensorCategory) -> SensorTable {
            self.reads += 1;
            defaults::sensor_table(category)
        }

        fn lora_config(&mut self) -> LoraConfig {
            self.reads += 1;
            let mut config = defaults::lora_config();
            if self.broken_key {
                config.app_key = bounded("nope");
            }
            config
        }
    }

    #[test]
    fn cold_boot_writes_defaults_once() {
        let mut store = CountingStore::default();
        let mut retained = RetainedState::default();

        let (source, warning) = load_config(&mut store, &mut retained, WakeCause::Other);
        assert_eq!(source, ConfigSource::Defaults);
        assert_eq!(warning, None);
        assert_eq!(store.defaults_written, 1);

        let config = retained.config.as_ref().expect("config cached");
        assert_eq!(config.device_id.as_str(), "DEV01");
        assert_eq!(config.sleep_interval_s, 30);
        assert!(config.credentials.is_some());
        assert!(config.sensors.iter().all(|sensor| sensor.enabled));
    }

    #[test]
    fn warm_wake_reuses_retained_copy() {
        let mut store = CountingStore {
            initialized: true,
            ..CountingStore::default()
        };
        let mut retained = RetainedState::default();
        load_config(&mut store, &mut retained, WakeCause::Other);
        let reads = store.reads;

        let (source, _) = load_config(&mut store, &mut retained, WakeCause::Timer);
        assert_eq!(source, ConfigSource::Retained);
        assert_eq!(store.reads, reads);
    }

    #[test]
    fn config_button_forces_reread() {
        let mut store = CountingStore {
            initialized: true,
            ..CountingStore::default()
        };
        let mut retained = RetainedState::default();
        load_config(&mut store, &mut retained, WakeCause::Other);
        let reads = store.reads;

        let (source, _) = load_config(&mut store, &mut retained, WakeCause::ExternalPin);
        assert_eq!(source, ConfigSource::Store);
        assert!(store.reads > reads);
    }

    #[test]
    fn bad_credentials_are_reported_not_fatal() {
        let mut store = CountingStore {
            initialized: true,
            broken_key: true,
            ..CountingStore::default()
        };
        let (config, warning) = read_config(&mut store);
        assert!(config.credentials.is_none());
        assert!(matches!(warning, Some(ConfigError::Credentials(_))));
        assert_eq!(config.device_id.as_str(), "DEV01");
    }
}
