//! Uplink text record.
//!
//! `station|device|battery|timestamp|id,type,v0[,v1...]|...`
//!
//! Every value carries exactly three decimals. A sensor block lists the
//! sub-values, or the primary value alone for scalar sensors. Missing
//! measurements render as `nan` so the record keeps its shape.

use core::fmt::{self, Write};

use heapless::String;

use crate::sensors::{Reading, SensorType};

/// Radio payload ceiling for one uplink.
pub const MAX_PAYLOAD_LEN: usize = 200;

pub const FIELD_SEPARATOR: char = '|';
pub const VALUE_SEPARATOR: char = ',';

/// Encoded uplink text.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct EncodedPayload {
    pub text: String<MAX_PAYLOAD_LEN>,
    /// Set when the record did not fit and was cut at the ceiling.
    pub truncated: bool,
}

impl EncodedPayload {
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        self.text.as_bytes()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.text.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.text.is_empty()
    }
}

/// Builds the uplink record for `readings` in their given order.
///
/// The battery field is the primary value of the first battery reading, or
/// `nan` when none is present.
#[must_use]
pub fn encode_payload(
    station_id: &str,
    device_id: &str,
    timestamp: u32,
    readings: &[Reading],
) -> EncodedPayload {
    let battery = readings
        .iter()
        .find(|reading| reading.sensor_type == SensorType::Battery)
        .map_or(f32::NAN, |reading| reading.value);

    let mut writer = Truncating::default();
    // `Truncating` never reports an error; it records the overflow instead.
    let _ = write_record(&mut writer, station_id, device_id, battery, timestamp, readings);

    EncodedPayload {
        text: writer.text,
        truncated: writer.overflowed,
    }
}

fn write_record<W: Write>(
    out: &mut W,
    station_id: &str,
    device_id: &str,
    battery: f32,
    timestamp: u32,
    readings: &[Reading],
) -> fmt::Result {
    write!(
        out,
        "{station_id}{FIELD_SEPARATOR}{device_id}{FIELD_SEPARATOR}{}{FIELD_SEPARATOR}{timestamp}",
        Decimal3(battery)
    )?;
    for reading in readings {
        write!(
            out,
            "{FIELD_SEPARATOR}{}{VALUE_SEPARATOR}{}",
            reading.sensor_id,
            reading.sensor_type.code()
        )?;
        for value in reading.wire_values() {
            write!(out, "{VALUE_SEPARATOR}{}", Decimal3(value))?;
        }
    }
    Ok(())
}

/// A value rendered with exactly three decimals.
struct Decimal3(f32);

impl fmt::Display for Decimal3 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let value = self.0;
        if value.is_nan() {
            f.write_str("nan")
        } else if value.is_infinite() {
            f.write_str(if value.is_sign_negative() { "-inf" } else { "inf" })
        } else {
            write!(f, "{value:.3}")
        }
    }
}

/// Fixed-capacity writer that keeps what fits and remembers the rest was cut.
#[derive(Default)]
struct Truncating {
    text: String<MAX_PAYLOAD_LEN>,
    overflowed: bool,
}

impl Write for Truncating {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        if self.overflowed {
            return Ok(());
        }
        for ch in s.chars() {
            if self.text.push(ch).is_err() {
                self.overflowed = true;
                break;
            }
        }
        Ok(())
    }
}
