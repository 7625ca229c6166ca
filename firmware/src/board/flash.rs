//! Nonce and configuration persistence in on-chip flash.
//!
//! Only the "defaults written" marker is stored for the configuration; the
//! values themselves are the compile-time defaults until a configuration tool
//! writes something else.

use core::cell::RefCell;

use embassy_stm32::flash::Flash;
use embassy_stm32::mode::Blocking;
use embassy_sync::blocking_mutex::Mutex;
use embassy_sync::blocking_mutex::raw::NoopRawMutex;
use node_core::config::{
    ConfigStore, LoraConfig, NodeId, SensorCategory, SensorTable, bounded, defaults,
};
use node_core::session::{NonceBlock, NonceStore};

use crate::nvm::{
    CONFIG_RECORD_LEN, NONCE_RECORD_LEN, config_marker, decode_nonces, encode_nonces,
    is_config_marker,
};

pub const PAGE_SIZE: u32 = 2 * 1024;
/// Second-to-last page of the 512 KiB array.
pub const NONCE_PAGE: u32 = 0x7_F000;
pub const CONFIG_PAGE: u32 = NONCE_PAGE + PAGE_SIZE;

pub type FlashCell = Mutex<NoopRawMutex, RefCell<Flash<'static, Blocking>>>;

fn rewrite_page(cell: &FlashCell, page: u32, record: &[u8]) -> bool {
    cell.lock(|flash| {
        let mut flash = flash.borrow_mut();
        flash.blocking_erase(page, page + PAGE_SIZE).is_ok()
            && flash.blocking_write(page, record).is_ok()
    })
}

fn read_record<const N: usize>(cell: &FlashCell, page: u32) -> Option<[u8; N]> {
    let mut record = [0u8; N];
    cell.lock(|flash| flash.borrow_mut().blocking_read(page, &mut record))
        .ok()
        .map(|()| record)
}

/// Join nonces kept in their own page.
pub struct FlashNonces {
    flash: &'static FlashCell,
}

impl FlashNonces {
    pub fn new(flash: &'static FlashCell) -> Self {
        Self { flash }
    }
}

impl NonceStore for FlashNonces {
    fn load_nonces(&mut self) -> Option<NonceBlock> {
        let record = read_record::<NONCE_RECORD_LEN>(self.flash, NONCE_PAGE)?;
        decode_nonces(&record)
    }

    fn store_nonces(&mut self, nonces: &NonceBlock) {
        if !rewrite_page(self.flash, NONCE_PAGE, &encode_nonces(nonces)) {
            defmt::error!("flash: nonce write failed");
        }
    }
}

/// Configuration store backed by the compile-time defaults.
pub struct FlashConfigStore {
    flash: &'static FlashCell,
}

impl FlashConfigStore {
    pub fn new(flash: &'static FlashCell) -> Self {
        Self { flash }
    }
}

impl ConfigStore for FlashConfigStore {
    fn is_initialized(&mut self) -> bool {
        read_record::<CONFIG_RECORD_LEN>(self.flash, CONFIG_PAGE)
            .is_some_and(|record| is_config_marker(&record))
    }

    fn initialize_defaults(&mut self) {
        if !rewrite_page(self.flash, CONFIG_PAGE, &config_marker()) {
            defmt::error!("flash: config marker write failed");
        }
    }

    fn device_id(&mut self) -> NodeId {
        bounded(defaults::DEVICE_ID)
    }

    fn station_id(&mut self) -> NodeId {
        bounded(defaults::STATION_ID)
    }

    fn sleep_interval_s(&mut self) -> u32 {
        defaults::SLEEP_INTERVAL_S
    }

    fn sensors(&mut self, category: SensorCategory) -> SensorTable {
        defaults::sensor_table(category)
    }

    fn lora_config(&mut self) -> LoraConfig {
        defaults::lora_config()
    }
}
