//! Join credentials and their comma-separated hex text form.
//!
//! The configuration store keeps EUIs and keys as text such as
//! `"1f,d4,e6,68,46,8c,e1,b7"`: one two-digit hex byte per field, most
//! significant first.

use core::fmt;

use winnow::ascii::space0;
use winnow::prelude::*;
use winnow::stream::AsChar;
use winnow::token::take_while;

use crate::config::LoraConfig;

pub const EUI_LEN: usize = 8;
pub const KEY_LEN: usize = 16;

/// US915 sub-band used when none is configured.
pub const DEFAULT_SUB_BAND: u8 = 2;

/// Binary credentials for over-the-air activation.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct JoinCredentials {
    pub join_eui: u64,
    pub dev_eui: u64,
    pub app_key: [u8; KEY_LEN],
    pub nwk_key: [u8; KEY_LEN],
    pub sub_band: u8,
}

impl JoinCredentials {
    /// Parses the text credentials held by the configuration store.
    pub fn from_config(config: &LoraConfig) -> Result<Self, CredentialError> {
        Ok(Self {
            join_eui: parse_eui(&config.join_eui)
                .ok_or(CredentialError::Malformed(CredentialField::JoinEui))?,
            dev_eui: parse_eui(&config.dev_eui)
                .ok_or(CredentialError::Malformed(CredentialField::DevEui))?,
            app_key: parse_key(&config.app_key)
                .ok_or(CredentialError::Malformed(CredentialField::AppKey))?,
            nwk_key: parse_key(&config.nwk_key)
                .ok_or(CredentialError::Malformed(CredentialField::NwkKey))?,
            sub_band: config.sub_band,
        })
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum CredentialField {
    JoinEui,
    DevEui,
    AppKey,
    NwkKey,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum CredentialError {
    Malformed(CredentialField),
}

impl fmt::Display for CredentialError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CredentialError::Malformed(field) => write!(f, "malformed {:?}", field),
        }
    }
}

/// Parses an 8-byte EUI into its big-endian integer form.
#[must_use]
pub fn parse_eui(text: &str) -> Option<u64> {
    let bytes = hex_list::<EUI_LEN>.parse(text).ok()?;
    Some(u64::from_be_bytes(bytes))
}

/// Parses a 16-byte AES key.
#[must_use]
pub fn parse_key(text: &str) -> Option<[u8; KEY_LEN]> {
    hex_list::<KEY_LEN>.parse(text).ok()
}

fn hex_list<const N: usize>(input: &mut &str) -> ModalResult<[u8; N]> {
    let mut bytes = [0u8; N];
    space0.parse_next(input)?;
    for (index, slot) in bytes.iter_mut().enumerate() {
        if index > 0 {
            (space0, ',', space0).void().parse_next(input)?;
        }
        *slot = hex_byte.parse_next(input)?;
    }
    space0.parse_next(input)?;
    Ok(bytes)
}

fn hex_byte(input: &mut &str) -> ModalResult<u8> {
    take_while(2, AsChar::is_hex_digit)
        .try_map(|digits: &str| u8::from_str_radix(digits, 16))
        .parse_next(input)
}
