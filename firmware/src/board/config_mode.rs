use embassy_stm32::gpio::{Input, Output};
use embassy_time::Delay;
use embedded_hal::delay::DelayNs;
use node_core::config::ConfigMode;

/// The button must read low for this long to count as held.
const HOLD_DEBOUNCE_MS: u32 = 50;
const RELEASE_POLL_MS: u32 = 20;

/// Operator entry through the configuration button, shown on the config LED.
///
/// Editing happens in the external configuration tool; on the node the
/// session lasts until the button is let go.
pub struct ButtonConfigMode {
    button: Input<'static>,
    led: Output<'static>,
    delay: Delay,
}

impl ButtonConfigMode {
    pub fn new(button: Input<'static>, led: Output<'static>, delay: Delay) -> Self {
        Self { button, led, delay }
    }
}

impl ConfigMode for ButtonConfigMode {
    fn check_config_mode(&mut self) -> bool {
        if self.button.is_high() {
            return false;
        }
        self.delay.delay_ms(HOLD_DEBOUNCE_MS);
        self.button.is_low()
    }

    fn run_config_mode(&mut self) {
        defmt::info!("config mode: release the button to leave");
        self.led.set_high();
        while self.button.is_low() {
            self.delay.delay_ms(RELEASE_POLL_MS);
        }
        self.led.set_low();
    }
}
