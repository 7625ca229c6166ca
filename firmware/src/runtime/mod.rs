use cortex_m::interrupt;
use cortex_m::peripheral::SCB;
use cortex_m::register::primask;
use critical_section::{self, RawRestoreState};
use defmt_rtt as _;
use embassy_executor::Spawner;
use embassy_stm32 as hal;
use node_core::{CycleOutcome, DutyCycle};

use crate::board::{self, FieldNodeBoard};
use crate::telemetry::log_boot_banner;

critical_section::set_impl!(InterruptCriticalSection);

struct InterruptCriticalSection;

unsafe impl critical_section::Impl for InterruptCriticalSection {
    unsafe fn acquire() -> RawRestoreState {
        let primask = primask::read();
        interrupt::disable();
        primask.is_active()
    }

    unsafe fn release(restore_state: RawRestoreState) {
        if restore_state {
            unsafe {
                interrupt::enable();
            }
        }
    }
}

#[embassy_executor::main]
pub async fn main(_spawner: Spawner) {
    log_boot_banner();
    let peripherals = hal::init(board::hal_config());

    let parts = match board::assemble(peripherals) {
        Ok(parts) => parts,
        Err(err) => {
            defmt::error!("board bring-up failed: {}", err);
            SCB::sys_reset();
        }
    };

    // Every path except configuration mode ends in standby inside `run`.
    let report = DutyCycle::<FieldNodeBoard>::new(parts).run();
    match report.outcome {
        CycleOutcome::ConfigMode => defmt::info!("leaving config mode; restarting"),
        outcome => defmt::warn!(
            "cycle returned after {}; restarting",
            defmt::Debug2Format(&outcome)
        ),
    }
    SCB::sys_reset();
}
