//! Four-in-one environmental probe on the field bus.
//!
//! The probe exposes humidity, temperature, pressure and illuminance as four
//! IEEE-754 floats in eight consecutive holding registers, high word first.

use crate::bus::{FieldBusTransport, RegisterReader};

use super::{Measurement, SensorDriver};

/// First register of the measurement block.
pub const START_REGISTER: u16 = 500;
/// Registers covering the four floats.
pub const REGISTER_COUNT: u16 = 8;

/// Decodes the register block. Fewer than [`REGISTER_COUNT`] registers yield
/// four NaN sub-values.
#[must_use]
pub fn decode_registers(registers: &[u16]) -> Measurement {
    if registers.len() < usize::from(REGISTER_COUNT) {
        return Measurement::multi(&[f32::NAN; 4]);
    }

    let mut values = [f32::NAN; 4];
    for (value, pair) in values.iter_mut().zip(registers.chunks_exact(2)) {
        let bits = (u32::from(pair[0]) << 16) | u32::from(pair[1]);
        *value = f32::from_bits(bits);
    }
    Measurement::multi(&values)
}

/// Driver for one probe at a fixed slave address.
pub struct Env4<T> {
    reader: RegisterReader<T>,
    address: u8,
}

impl<T> Env4<T>
where
    T: FieldBusTransport,
{
    pub fn new(transport: T, address: u8) -> Self {
        Self {
            reader: RegisterReader::new(transport),
            address,
        }
    }

    pub fn address(&self) -> u8 {
        self.address
    }
}

impl<T> SensorDriver for Env4<T>
where
    T: FieldBusTransport,
{
    fn begin(&mut self) -> bool {
        // The probe needs no setup; failures surface on the first read.
        true
    }

    fn read(&mut self) -> Measurement {
        match self
            .reader
            .read_holding(self.address, START_REGISTER, REGISTER_COUNT)
        {
            Ok(registers) => decode_registers(&registers),
            Err(_) => Measurement::unavailable(),
        }
    }
}

#[cfg(test)]
#[allow(clippy::float_cmp, clippy::cast_possible_truncation)]
mod tests {
    use super::*;

    fn words(value: f32) -> [u16; 2] {
        let bits = value.to_bits();
        [(bits >> 16) as u16, (bits & 0xFFFF) as u16]
    }

    #[test]
    fn decodes_high_word_first_floats() {
        let mut registers = [0u16; 8];
        for (index, value) in [55.5f32, 21.25, 101.3, 1200.0].iter().enumerate() {
            let [hi, lo] = words(*value);
            registers[index * 2] = hi;
            registers[index * 2 + 1] = lo;
        }

        let measurement = decode_registers(&registers);
        assert_eq!(measurement.value, 55.5);
        assert_eq!(measurement.sub_values.as_slice(), &[55.5, 21.25, 101.3, 1200.0]);
    }

    #[test]
    fn short_block_is_all_nan() {
        let measurement = decode_registers(&[0; 6]);
        assert_eq!(measurement.sub_values.len(), 4);
        assert!(measurement.value.is_nan());
        assert!(measurement.sub_values.iter().all(|value| value.is_nan()));
    }
}
