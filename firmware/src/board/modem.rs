use core::time::Duration;

use embassy_stm32::mode::Blocking;
use embassy_stm32::usart::{UartRx, UartTx};
use embassy_time::Instant;
use node_core::session::{LinkError, ModemLink};

use super::sensors::to_embassy;

/// Line rate of the LoRaWAN modem on Serial1.
pub const MODEM_BAUD: u32 = 115_200;

/// AT line transport over the Serial1 UART.
pub struct ModemUart {
    tx: UartTx<'static, Blocking>,
    rx: UartRx<'static, Blocking>,
}

impl ModemUart {
    pub fn new(tx: UartTx<'static, Blocking>, rx: UartRx<'static, Blocking>) -> Self {
        Self { tx, rx }
    }
}

impl ModemLink for ModemUart {
    fn write_line(&mut self, line: &str) -> Result<(), LinkError> {
        defmt::trace!("modem > {}", line);
        self.tx
            .blocking_write(line.as_bytes())
            .and_then(|()| self.tx.blocking_write(b"\r\n"))
            .and_then(|()| self.tx.blocking_flush())
            .map_err(|_| LinkError::Io)
    }

    fn read_line(&mut self, buffer: &mut [u8], timeout: Duration) -> Result<usize, LinkError> {
        let deadline = Instant::now() + to_embassy(timeout);
        let mut len = 0;
        loop {
            match self.rx.nb_read() {
                Ok(b'\n') => {
                    defmt::trace!("modem < {=[u8]:a}", &buffer[..len]);
                    return Ok(len);
                }
                Ok(b'\r') => {}
                Ok(byte) => {
                    let slot = buffer.get_mut(len).ok_or(LinkError::Overflow)?;
                    *slot = byte;
                    len += 1;
                }
                Err(_) => {
                    if Instant::now() >= deadline {
                        return Err(LinkError::Timeout);
                    }
                }
            }
        }
    }
}
