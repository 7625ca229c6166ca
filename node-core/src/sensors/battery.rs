//! Battery pack monitor sampled through a switched resistor divider.

use embedded_hal::delay::DelayNs;
use embedded_hal::digital::OutputPin;

use super::{Measurement, SensorDriver};

/// Id under which the battery monitor is always registered first.
pub const BATTERY_SENSOR_ID: &str = "BATT";

/// Divider leg from the ADC pin to ground.
pub const DIVIDER_LOW_OHMS: f32 = 100_000.0;
/// Divider leg from the pack to the ADC pin.
pub const DIVIDER_HIGH_OHMS: f32 = 390_000.0;
/// ADC reference; pin readings at or above it are saturated.
pub const ADC_FULL_SCALE_VOLTS: f32 = 3.3;
/// Wait between enabling the divider and sampling it.
pub const DIVIDER_SETTLE_MS: u32 = 10;

/// Converts the voltage at the ADC pin into the pack voltage.
///
/// Readings outside the open interval `(0, ADC_FULL_SCALE_VOLTS)` are not
/// trustworthy and map to NaN.
#[must_use]
pub fn pack_voltage(pin_volts: f32) -> f32 {
    if !(pin_volts > 0.0 && pin_volts < ADC_FULL_SCALE_VOLTS) {
        return f32::NAN;
    }
    pin_volts / (DIVIDER_LOW_OHMS / (DIVIDER_LOW_OHMS + DIVIDER_HIGH_OHMS))
}

/// Source of calibrated millivolt samples from the battery ADC channel.
pub trait BatteryAdc {
    fn read_millivolts(&mut self) -> Option<u16>;
}

/// Samples the pack through a divider whose ground leg is enabled by an
/// active-low control line.
pub struct BatteryMonitor<A, P, D> {
    adc: A,
    control: P,
    delay: D,
}

impl<A, P, D> BatteryMonitor<A, P, D>
where
    A: BatteryAdc,
    P: OutputPin,
    D: DelayNs,
{
    pub fn new(adc: A, control: P, delay: D) -> Self {
        Self {
            adc,
            control,
            delay,
        }
    }
}

impl<A, P, D> SensorDriver for BatteryMonitor<A, P, D>
where
    A: BatteryAdc,
    P: OutputPin,
    D: DelayNs,
{
    fn begin(&mut self) -> bool {
        self.control.set_high().is_ok()
    }

    fn read(&mut self) -> Measurement {
        if self.control.set_low().is_err() {
            return Measurement::unavailable();
        }
        self.delay.delay_ms(DIVIDER_SETTLE_MS);
        let sample = self.adc.read_millivolts();
        let _ = self.control.set_high();

        match sample {
            Some(millivolts) => Measurement::scalar(pack_voltage(f32::from(millivolts) / 1000.0)),
            None => Measurement::unavailable(),
        }
    }
}
