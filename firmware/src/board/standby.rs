//! Standby entry and exit on the STM32G0.
//!
//! Pin state across standby is kept by the PWR pull configuration (APC), not
//! by the GPIO block, which loses power. SRAM survives when RRS is set, so the
//! retained image lives in an `.uninit` section that startup code leaves alone.

use core::mem::MaybeUninit;
use core::ptr;

use embassy_stm32::pac;
use embassy_stm32::pac::gpio::vals::{Moder, Odr, Pupdr};
use embassy_stm32::pac::pwr::vals::Lpms;
use node_core::sleep::pins::PinId;
use node_core::sleep::{RETAINED_IMAGE_LEN, RetainedImage, RetainedMemory, SleepPlatform, WakeFlags};

use super::pads::{BUTTON_WAKE_LINE, pad};

/// Longest interval the wakeup timer reaches with the 1 Hz clock and the
/// extra 2^16 offset enabled.
const MAX_WAKE_SECONDS: u32 = 0x1_FFFF;

/// 1 Hz `ck_spre`, counter as loaded.
const WUCKSEL_SPRE: u8 = 0b100;
/// 1 Hz `ck_spre`, 2^16 added to the counter.
const WUCKSEL_SPRE_EXTENDED: u8 = 0b110;

#[unsafe(link_section = ".uninit.RETAINED")]
static mut RETAINED: MaybeUninit<RetainedImage> = MaybeUninit::uninit();

/// Power controller and pad access around standby.
pub struct StandbyPlatform {
    _private: (),
}

impl StandbyPlatform {
    pub(super) fn new() -> Self {
        pac::RCC.apbenr1().modify(|w| w.set_pwren(true));
        Self { _private: () }
    }
}

impl SleepPlatform for StandbyPlatform {
    fn take_wake_flags(&mut self) -> WakeFlags {
        let status = pac::PWR.sr1().read();
        let flags = WakeFlags {
            from_standby: status.sbf(),
            timer: pac::RTC.sr().read().wutf(),
            wake_pin: status.wuf(BUTTON_WAKE_LINE),
        };

        pac::PWR.scr().write(|w| {
            w.set_csbf(true);
            for line in 0..6 {
                w.set_cwuf(line, true);
            }
        });
        pac::RTC.scr().write(|w| w.set_cwutf(true));
        flags
    }

    fn set_high_impedance(&mut self, pin: PinId) {
        let pad = pad(pin);
        let gpio = pad.registers();
        gpio.pupdr().modify(|w| w.set_pupdr(pad.index(), Pupdr::FLOATING));
        gpio.moder().modify(|w| w.set_moder(pad.index(), Moder::ANALOG));
        pac::PWR.pucr(pad.port_index()).modify(|w| w.set_pu(pad.index(), false));
        pac::PWR.pdcr(pad.port_index()).modify(|w| w.set_pd(pad.index(), false));
    }

    fn drive_high(&mut self, pin: PinId) {
        let pad = pad(pin);
        let gpio = pad.registers();
        gpio.bsrr().write(|w| w.set_bs(pad.index(), true));
        gpio.moder().modify(|w| w.set_moder(pad.index(), Moder::OUTPUT));
    }

    fn set_hold(&mut self, pin: PinId, hold: bool) {
        let pad = pad(pin);
        let high = pad.registers().odr().read().odr(pad.index()) == Odr::HIGH;
        pac::PWR
            .pucr(pad.port_index())
            .modify(|w| w.set_pu(pad.index(), hold && high));
        pac::PWR
            .pdcr(pad.port_index())
            .modify(|w| w.set_pd(pad.index(), hold && !high));
    }

    fn configure_wake_input(&mut self, pin: PinId) {
        let pad = pad(pin);
        let gpio = pad.registers();
        gpio.moder().modify(|w| w.set_moder(pad.index(), Moder::INPUT));
        gpio.pupdr().modify(|w| w.set_pupdr(pad.index(), Pupdr::PULLUP));
        pac::PWR.pucr(pad.port_index()).modify(|w| w.set_pu(pad.index(), true));
        pac::PWR.pdcr(pad.port_index()).modify(|w| w.set_pd(pad.index(), false));
    }

    fn flush_log(&mut self) {
        defmt::flush();
    }

    fn stop_short_range_radio(&mut self) {
        // This board carries no short-range radio.
    }

    #[allow(clippy::cast_possible_truncation)]
    fn arm_timer_wake(&mut self, seconds: u32) {
        let seconds = seconds.clamp(1, MAX_WAKE_SECONDS);
        let (select, count) = if seconds > 0x1_0000 {
            (WUCKSEL_SPRE_EXTENDED, seconds - 0x1_0001)
        } else {
            (WUCKSEL_SPRE, seconds - 1)
        };

        let rtc = pac::RTC;
        rtc.wpr().write(|w| w.set_key(0xCA));
        rtc.wpr().write(|w| w.set_key(0x53));
        rtc.cr().modify(|w| w.set_wute(false));
        while !rtc.icsr().read().wutwf() {}
        rtc.wutr().write(|w| w.set_wut(count as u16));
        rtc.cr().modify(|w| {
            w.set_wucksel(select.into());
            w.set_wutie(true);
            w.set_wute(true);
        });
        rtc.wpr().write(|w| w.set_key(0xFF));

        // The wakeup timer reaches standby through the internal wake line.
        pac::PWR.cr3().modify(|w| w.set_eiwul(true));
    }

    fn arm_pin_wake(&mut self, pin: PinId) {
        debug_assert_eq!(pin, PinId::ConfigButton);
        // Falling edge: the button pulls the line low.
        pac::PWR.cr4().modify(|w| w.set_wp(BUTTON_WAKE_LINE, true));
        pac::PWR.scr().write(|w| w.set_cwuf(BUTTON_WAKE_LINE, true));
        pac::PWR.cr3().modify(|w| w.set_ewup(BUTTON_WAKE_LINE, true));
    }

    fn enter_deep_sleep(&mut self) {
        pac::PWR.cr3().modify(|w| {
            w.set_apc(true);
            w.set_rrs(true);
        });
        pac::PWR.cr1().modify(|w| w.set_lpms(Lpms::STANDBY));
        pac::PWR.scr().write(|w| w.set_csbf(true));

        // SAFETY: nothing else owns the core peripherals once the cycle ends.
        let mut core = unsafe { cortex_m::Peripherals::steal() };
        core.SCB.set_sleepdeep();
        loop {
            cortex_m::asm::dsb();
            cortex_m::asm::wfi();
        }
    }
}

/// SRAM region that keeps its content through standby.
pub struct RetainedSram {
    _private: (),
}

impl RetainedSram {
    /// Only one handle may exist; `board::assemble` creates it.
    pub(super) fn new() -> Self {
        Self { _private: () }
    }
}

impl RetainedMemory for RetainedSram {
    fn read(&mut self, image: &mut RetainedImage) {
        // SAFETY: single handle, single core; the framing check rejects
        // whatever power-on left in the region.
        unsafe {
            ptr::copy_nonoverlapping(
                (&raw const RETAINED).cast::<u8>(),
                image.as_mut_ptr(),
                RETAINED_IMAGE_LEN,
            );
        }
    }

    fn write(&mut self, image: &RetainedImage) {
        // SAFETY: as for `read`.
        unsafe {
            ptr::copy_nonoverlapping(
                image.as_ptr(),
                (&raw mut RETAINED).cast::<u8>(),
                RETAINED_IMAGE_LEN,
            );
        }
    }
}
