//! State carried across deep sleep in retained memory.
//!
//! The image lives in a RAM region that survives deep sleep but not a power
//! cycle. It is framed so a cold boot, whose region holds garbage, is told
//! apart from a warm wake:
//!
//! ```text
//! [magic u32 LE][version u8][body len u16 LE][body][crc16 LE over everything before]
//! ```

use core::fmt;

use heapless::String;

use crate::checksum::crc16;
use crate::config::{CachedConfig, SensorCategory, SensorConfig, SensorTable};
use crate::session::credentials::{JoinCredentials, KEY_LEN};
use crate::session::{SESSION_LEN, SessionBuffer};

/// Size of the retained region.
pub const RETAINED_IMAGE_LEN: usize = 1024;
pub const RETAINED_MAGIC: u32 = 0x4E4F_4445;
pub const RETAINED_VERSION: u8 = 1;

const HEADER_LEN: usize = 7;
const CRC_LEN: usize = 2;

pub type RetainedImage = [u8; RETAINED_IMAGE_LEN];

/// Everything that must survive deep sleep.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct RetainedState {
    pub boot_count: u32,
    /// Wakes since the last completed join.
    pub boots_since_join: u32,
    /// Configuration mirrored from the store; `None` forces a store read.
    pub config: Option<CachedConfig>,
    /// Radio session context from the last cycle.
    pub session: Option<SessionBuffer>,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum RetainedError {
    /// State does not fit in the retained region.
    Overflow,
    /// Image ended before the body did.
    Truncated,
    BadMagic,
    BadVersion,
    BadChecksum,
    /// Checksum matched but a field held an impossible value.
    Malformed,
}

impl fmt::Display for RetainedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// Retained RAM region.
pub trait RetainedMemory {
    fn read(&mut self, image: &mut RetainedImage);

    fn write(&mut self, image: &RetainedImage);
}

impl RetainedState {
    /// Serializes into a framed image.
    pub fn encode(&self) -> Result<RetainedImage, RetainedError> {
        let mut image = [0u8; RETAINED_IMAGE_LEN];
        let mut body = Writer::new(&mut image[HEADER_LEN..RETAINED_IMAGE_LEN - CRC_LEN]);
        self.encode_body(&mut body)?;
        let body_len = u16::try_from(body.position).map_err(|_| RetainedError::Overflow)?;

        image[..4].copy_from_slice(&RETAINED_MAGIC.to_le_bytes());
        image[4] = RETAINED_VERSION;
        image[5..HEADER_LEN].copy_from_slice(&body_len.to_le_bytes());

        let end = HEADER_LEN + usize::from(body_len);
        let crc = crc16(&image[..end]);
        image[end..end + CRC_LEN].copy_from_slice(&crc.to_le_bytes());
        Ok(image)
    }

    /// Validates the frame and deserializes the body.
    pub fn decode(image: &RetainedImage) -> Result<Self, RetainedError> {
        let magic = u32::from_le_bytes([image[0], image[1], image[2], image[3]]);
        if magic != RETAINED_MAGIC {
            return Err(RetainedError::BadMagic);
        }
        if image[4] != RETAINED_VERSION {
            return Err(RetainedError::BadVersion);
        }
        let body_len = usize::from(u16::from_le_bytes([image[5], image[6]]));
        let end = HEADER_LEN + body_len;
        if end + CRC_LEN > RETAINED_IMAGE_LEN {
            return Err(RetainedError::Truncated);
        }
        let stored = u16::from_le_bytes([image[end], image[end + 1]]);
        if crc16(&image[..end]) != stored {
            return Err(RetainedError::BadChecksum);
        }

        let mut body = Reader::new(&image[HEADER_LEN..end]);
        let state = Self::decode_body(&mut body)?;
        if body.remaining() != 0 {
            return Err(RetainedError::Malformed);
        }
        Ok(state)
    }

    /// Loads the state kept by the previous cycle, or a fresh state when the
    /// region does not hold a valid image.
    pub fn restore<M: RetainedMemory>(memory: &mut M) -> (Self, Result<(), RetainedError>) {
        let mut image = [0u8; RETAINED_IMAGE_LEN];
        memory.read(&mut image);
        match Self::decode(&image) {
            Ok(state) => (state, Ok(())),
            Err(error) => (Self::default(), Err(error)),
        }
    }

    /// Writes the state back to the region.
    pub fn persist<M: RetainedMemory>(&self, memory: &mut M) -> Result<(), RetainedError> {
        let image = self.encode()?;
        memory.write(&image);
        Ok(())
    }

    fn encode_body(&self, out: &mut Writer<'_>) -> Result<(), RetainedError> {
        out.u32(self.boot_count)?;
        out.u32(self.boots_since_join)?;

        match &self.config {
            Some(config) => {
                out.u8(1)?;
                encode_config(out, config)?;
            }
            None => out.u8(0)?,
        }

        match &self.session {
            Some(session) => {
                out.u8(1)?;
                out.bytes(session)?;
            }
            None => out.u8(0)?,
        }
        Ok(())
    }

    fn decode_body(input: &mut Reader<'_>) -> Result<Self, RetainedError> {
        let boot_count = input.u32()?;
        let boots_since_join = input.u32()?;
        let config = if input.flag()? {
            Some(decode_config(input)?)
        } else {
            None
        };
        let session = if input.flag()? {
            Some(input.array::<SESSION_LEN>()?)
        } else {
            None
        };
        Ok(Self {
            boot_count,
            boots_since_join,
            config,
            session,
        })
    }
}

fn encode_config(out: &mut Writer<'_>, config: &CachedConfig) -> Result<(), RetainedError> {
    out.text(&config.device_id)?;
    out.text(&config.station_id)?;
    out.u32(config.sleep_interval_s)?;

    out.u8(u8::try_from(config.sensors.len()).map_err(|_| RetainedError::Overflow)?)?;
    for sensor in &config.sensors {
        out.text(&sensor.key)?;
        out.text(&sensor.id)?;
        out.u16(sensor.type_code)?;
        out.u8(sensor.category.to_raw())?;
        match sensor.address {
            Some(address) => {
                out.u8(1)?;
                out.u8(address)?;
            }
            None => out.u8(0)?,
        }
        out.u8(u8::from(sensor.enabled))?;
    }

    match &config.credentials {
        Some(credentials) => {
            out.u8(1)?;
            out.bytes(&credentials.join_eui.to_le_bytes())?;
            out.bytes(&credentials.dev_eui.to_le_bytes())?;
            out.bytes(&credentials.app_key)?;
            out.bytes(&credentials.nwk_key)?;
            out.u8(credentials.sub_band)?;
        }
        None => out.u8(0)?,
    }
    Ok(())
}

fn decode_config(input: &mut Reader<'_>) -> Result<CachedConfig, RetainedError> {
    let device_id = input.text()?;
    let station_id = input.text()?;
    let sleep_interval_s = input.u32()?;

    let count = input.u8()?;
    let mut sensors = SensorTable::new();
    for _ in 0..count {
        let key = input.text()?;
        let id = input.text()?;
        let type_code = input.u16()?;
        let category =
            SensorCategory::from_raw(input.u8()?).ok_or(RetainedError::Malformed)?;
        let address = if input.flag()? { Some(input.u8()?) } else { None };
        let enabled = input.flag()?;
        sensors
            .push(SensorConfig {
                key,
                id,
                type_code,
                category,
                address,
                enabled,
            })
            .map_err(|_| RetainedError::Malformed)?;
    }

    let credentials = if input.flag()? {
        Some(JoinCredentials {
            join_eui: u64::from_le_bytes(input.array()?),
            dev_eui: u64::from_le_bytes(input.array()?),
            app_key: input.array::<KEY_LEN>()?,
            nwk_key: input.array::<KEY_LEN>()?,
            sub_band: input.u8()?,
        })
    } else {
        None
    };

    Ok(CachedConfig {
        device_id,
        station_id,
        sleep_interval_s,
        sensors,
        credentials,
    })
}

struct Writer<'a> {
    buf: &'a mut [u8],
    position: usize,
}

impl<'a> Writer<'a> {
    fn new(buf: &'a mut [u8]) -> Self {
        Self { buf, position: 0 }
    }

    fn bytes(&mut self, data: &[u8]) -> Result<(), RetainedError> {
        let end = self.position + data.len();
        let slot = self
            .buf
            .get_mut(self.position..end)
            .ok_or(RetainedError::Overflow)?;
        slot.copy_from_slice(data);
        self.position = end;
        Ok(())
    }

    fn u8(&mut self, value: u8) -> Result<(), RetainedError> {
        self.bytes(&[value])
    }

    fn u16(&mut self, value: u16) -> Result<(), RetainedError> {
        self.bytes(&value.to_le_bytes())
    }

    fn u32(&mut self, value: u32) -> Result<(), RetainedError> {
        self.bytes(&value.to_le_bytes())
    }

    fn text(&mut self, text: &str) -> Result<(), RetainedError> {
        self.u8(u8::try_from(text.len()).map_err(|_| RetainedError::Overflow)?)?;
        self.bytes(text.as_bytes())
    }
}

struct Reader<'a> {
    buf: &'a [u8],
    position: usize,
}

impl<'a> Reader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, position: 0 }
    }

    fn remaining(&self) -> usize {
        self.buf.len() - self.position
    }

    fn take(&mut self, len: usize) -> Result<&'a [u8], RetainedError> {
        let end = self.position + len;
        let slice = self
            .buf
            .get(self.position..end)
            .ok_or(RetainedError::Truncated)?;
        self.position = end;
        Ok(slice)
    }

    fn array<const N: usize>(&mut self) -> Result<[u8; N], RetainedError> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }

    fn u8(&mut self) -> Result<u8, RetainedError> {
        Ok(self.array::<1>()?[0])
    }

    fn flag(&mut self) -> Result<bool, RetainedError> {
        match self.u8()? {
            0 => Ok(false),
            1 => Ok(true),
            _ => Err(RetainedError::Malformed),
        }
    }

    fn u16(&mut self) -> Result<u16, RetainedError> {
        Ok(u16::from_le_bytes(self.array()?))
    }

    fn u32(&mut self) -> Result<u32, RetainedError> {
        Ok(u32::from_le_bytes(self.array()?))
    }

    fn text<const N: usize>(&mut self) -> Result<String<N>, RetainedError> {
        let len = usize::from(self.u8()?);
        let bytes = self.take(len)?;
        let text = core::str::from_utf8(bytes).map_err(|_| RetainedError::Malformed)?;
        let mut out = String::new();
        out.push_str(text).map_err(|_| RetainedError::Malformed)?;
        Ok(out)
    }
}
