//! Factory defaults written to an empty configuration store.

use super::{LoraConfig, SensorCategory, SensorConfig, SensorTable, bounded};
use crate::sensors::{SensorType, sensor_id};
use crate::session::credentials::DEFAULT_SUB_BAND;

pub const DEVICE_ID: &str = "DEV01";
pub const STATION_ID: &str = "ST001";
/// Seconds between duty cycles.
pub const SLEEP_INTERVAL_S: u32 = 30;

pub const JOIN_EUI: &str = "00,00,00,00,00,00,00,00";
pub const DEV_EUI: &str = "1f,d4,e6,68,46,8c,e1,b7";
pub const APP_KEY: &str = "1d,fb,69,80,69,d6,a0,7e,5d,bf,29,ba,6b,37,d3,04";
pub const NWK_KEY: &str = "82,91,e9,55,19,ab,c0,6c,86,25,63,68,e7,f4,5a,89";

/// Default sensor slot.
#[derive(Copy, Clone, Debug)]
pub struct DefaultSensor {
    pub key: &'static str,
    pub id: &'static str,
    pub sensor_type: SensorType,
    pub address: Option<u8>,
    pub enabled: bool,
}

impl DefaultSensor {
    const fn new(key: &'static str, id: &'static str, sensor_type: SensorType, enabled: bool) -> Self {
        Self {
            key,
            id,
            sensor_type,
            address: None,
            enabled,
        }
    }

    const fn slave(id: &'static str, sensor_type: SensorType, address: u8, enabled: bool) -> Self {
        Self {
            key: "",
            id,
            sensor_type,
            address: Some(address),
            enabled,
        }
    }

    fn to_config(self, category: SensorCategory) -> SensorConfig {
        SensorConfig {
            key: bounded(self.key),
            id: sensor_id(self.id),
            type_code: self.sensor_type.code(),
            category,
            address: self.address,
            enabled: self.enabled,
        }
    }
}

pub const NORMAL_SENSORS: [DefaultSensor; 8] = [
    DefaultSensor::new("B6", "BM6_1", SensorType::Bme680, true),
    DefaultSensor::new("C", "CO2_1", SensorType::Co2, false),
    DefaultSensor::new("B2", "BM2_1", SensorType::Bme280, true),
    DefaultSensor::new("L", "LUX1", SensorType::Veml7700, false),
    DefaultSensor::new("SH4", "SH4_1", SensorType::Sht40, true),
    DefaultSensor::new("R", "RTD_1", SensorType::Rtd, true),
    DefaultSensor::new("D", "DS_1", SensorType::Ds18b20, false),
    DefaultSensor::new("SH3", "SH3_1", SensorType::Sht30, false),
];

pub const FIELD_BUS_SENSORS: [DefaultSensor; 1] =
    [DefaultSensor::slave("ModbusEnv1", SensorType::Env4, 1, false)];

pub const ADC_SENSORS: [DefaultSensor; 7] = [
    DefaultSensor::new("0", "NTC1", SensorType::Ntc100k, true),
    DefaultSensor::new("1", "NTC2", SensorType::Ntc100k, true),
    DefaultSensor::new("2", "NTC3", SensorType::Ntc10k, false),
    DefaultSensor::new("3", "HDS10", SensorType::Hds10, false),
    DefaultSensor::new("4", "COND", SensorType::Conductivity, false),
    DefaultSensor::new("5", "SM1", SensorType::SoilHumidity, false),
    DefaultSensor::new("8", "PH", SensorType::Ph, false),
];

/// Default slots stored under `category`.
#[must_use]
pub fn sensors(category: SensorCategory) -> &'static [DefaultSensor] {
    match category {
        SensorCategory::Normal => &NORMAL_SENSORS,
        SensorCategory::FieldBus => &FIELD_BUS_SENSORS,
        SensorCategory::Adc => &ADC_SENSORS,
    }
}

/// Default slots for `category` as store entries.
#[must_use]
pub fn sensor_table(category: SensorCategory) -> SensorTable {
    let mut table = SensorTable::new();
    for sensor in sensors(category) {
        // Every default table is smaller than the table capacity.
        let _ = table.push(sensor.to_config(category));
    }
    table
}

#[must_use]
pub fn lora_config() -> LoraConfig {
    LoraConfig {
        join_eui: bounded(JOIN_EUI),
        dev_eui: bounded(DEV_EUI),
        app_key: bounded(APP_KEY),
        nwk_key: bounded(NWK_KEY),
        sub_band: DEFAULT_SUB_BAND,
    }
}
