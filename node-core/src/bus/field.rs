//! Modbus RTU framing and the retrying holding-register reader.

use core::fmt;
use core::time::Duration;

use heapless::Vec;

use crate::checksum::{crc16, verify_trailing_crc};

/// Line rate of the field bus.
pub const FIELD_BUS_BAUD: u32 = 9_600;

/// Serial framing of the field bus (8N1).
pub const FIELD_BUS_FORMAT: FrameFormat = FrameFormat {
    data_bits: 8,
    parity: Parity::None,
    stop_bits: 1,
};

/// Time allowed for a slave to answer one request.
pub const RESPONSE_TIMEOUT: Duration = Duration::from_millis(300);

/// Attempts made per register read before giving up.
pub const MAX_ATTEMPTS: u8 = 3;

/// Largest register block a single request may ask for.
pub const MAX_REGISTERS: usize = 16;

/// Longest response frame: address, function, byte count, data, CRC.
pub const MAX_RESPONSE_LEN: usize = 3 + MAX_REGISTERS * 2 + 2;

const READ_HOLDING_REGISTERS: u8 = 0x03;
const EXCEPTION_FLAG: u8 = 0x80;

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Parity {
    None,
    Even,
    Odd,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct FrameFormat {
    pub data_bits: u8,
    pub parity: Parity,
    pub stop_bits: u8,
}

/// Failures of a single field-bus transaction.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum FieldBusError {
    /// No complete response inside [`RESPONSE_TIMEOUT`].
    Timeout,
    /// Response CRC did not match its contents.
    Crc,
    /// Response was malformed or answered a different request.
    Framing,
    /// Slave answered with a Modbus exception code.
    Exception(u8),
    /// Requested block exceeds [`MAX_REGISTERS`].
    TooManyRegisters,
}

impl fmt::Display for FieldBusError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// Half-duplex byte transport under the RTU framing.
pub trait FieldBusTransport {
    /// Sends `request` and collects one response frame into `response`,
    /// returning its length. Implementations return
    /// [`FieldBusError::Timeout`] when nothing complete arrives in `timeout`.
    fn transact(
        &mut self,
        request: &[u8],
        response: &mut [u8],
        timeout: Duration,
    ) -> Result<usize, FieldBusError>;
}

impl<T: FieldBusTransport + ?Sized> FieldBusTransport for &mut T {
    fn transact(
        &mut self,
        request: &[u8],
        response: &mut [u8],
        timeout: Duration,
    ) -> Result<usize, FieldBusError> {
        (**self).transact(request, response, timeout)
    }
}

/// Builds a read-holding-registers request frame.
#[must_use]
pub fn read_holding_request(address: u8, start: u16, count: u16) -> [u8; 8] {
    let [start_hi, start_lo] = start.to_be_bytes();
    let [count_hi, count_lo] = count.to_be_bytes();
    let mut frame = [
        address,
        READ_HOLDING_REGISTERS,
        start_hi,
        start_lo,
        count_hi,
        count_lo,
        0,
        0,
    ];
    let [crc_lo, crc_hi] = crc16(&frame[..6]).to_le_bytes();
    frame[6] = crc_lo;
    frame[7] = crc_hi;
    frame
}

/// Validates a read-holding-registers response and extracts the registers.
pub fn parse_holding_response(
    address: u8,
    count: u16,
    frame: &[u8],
) -> Result<Vec<u16, MAX_REGISTERS>, FieldBusError> {
    if frame.len() < 5 {
        return Err(FieldBusError::Framing);
    }
    if !verify_trailing_crc(frame) {
        return Err(FieldBusError::Crc);
    }
    if frame[0] != address {
        return Err(FieldBusError::Framing);
    }
    if frame[1] == READ_HOLDING_REGISTERS | EXCEPTION_FLAG {
        return Err(FieldBusError::Exception(frame[2]));
    }
    if frame[1] != READ_HOLDING_REGISTERS {
        return Err(FieldBusError::Framing);
    }

    let byte_count = usize::from(frame[2]);
    if byte_count != usize::from(count) * 2 || frame.len() != 3 + byte_count + 2 {
        return Err(FieldBusError::Framing);
    }

    let mut registers = Vec::new();
    for pair in frame[3..3 + byte_count].chunks_exact(2) {
        registers
            .push(u16::from_be_bytes([pair[0], pair[1]]))
            .map_err(|_| FieldBusError::TooManyRegisters)?;
    }
    Ok(registers)
}

/// Retrying holding-register reader sitting on a [`FieldBusTransport`].
///
/// A timed-out attempt ends the retries: a silent slave will not answer the
/// next request either. Corrupt or mismatched frames are retried up to
/// [`MAX_ATTEMPTS`].
pub struct RegisterReader<T> {
    transport: T,
    max_attempts: u8,
}

impl<T> RegisterReader<T>
where
    T: FieldBusTransport,
{
    pub fn new(transport: T) -> Self {
        Self {
            transport,
            max_attempts: MAX_ATTEMPTS,
        }
    }

    #[must_use]
    pub fn with_max_attempts(mut self, attempts: u8) -> Self {
        self.max_attempts = attempts.max(1);
        self
    }

    /// Reads `count` holding registers starting at `start` from slave `address`.
    pub fn read_holding(
        &mut self,
        address: u8,
        start: u16,
        count: u16,
    ) -> Result<Vec<u16, MAX_REGISTERS>, FieldBusError> {
        if usize::from(count) > MAX_REGISTERS {
            return Err(FieldBusError::TooManyRegisters);
        }

        let request = read_holding_request(address, start, count);
        let mut last_error = FieldBusError::Timeout;
        for _ in 0..self.max_attempts {
            let mut response = [0u8; MAX_RESPONSE_LEN];
            let outcome = self
                .transport
                .transact(&request, &mut response, RESPONSE_TIMEOUT)
                .and_then(|len| parse_holding_response(address, count, &response[..len]));

            match outcome {
                Ok(registers) => return Ok(registers),
                Err(FieldBusError::Timeout) => return Err(FieldBusError::Timeout),
                Err(error) => last_error = error,
            }
        }
        Err(last_error)
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    pub fn into_inner(self) -> T {
        self.transport
    }
}
