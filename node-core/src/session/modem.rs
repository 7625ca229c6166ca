//! LoRaWAN modem driven over a line-oriented AT command link.
//!
//! The board carries the MAC on a co-processor. Every command is one ASCII
//! line terminated by CRLF and answered by exactly one non-empty line:
//!
//! ```text
//! AT+NONCES=?            ->  +NONCES: 0a0b...    (64 hex digits)
//! AT+ACTIVATE            ->  +ACTIVATE: NEW | +ACTIVATE: RESTORED | ERROR -1116
//! AT+DR=3                ->  OK
//! AT+TIME=?              ->  +TIME: 1750000000 | +TIME: NONE
//! ```
//!
//! Binary blobs (keys, nonce block, session context, payloads) travel as
//! lowercase hex.

use core::fmt::{self, Write as _};
use core::time::Duration;

use heapless::String;
use winnow::ascii::{dec_int, space0, space1};
use winnow::combinator::{alt, preceded, separated_pair};
use winnow::prelude::*;
use winnow::stream::AsChar;
use winnow::token::{rest, take_while};

use super::credentials::KEY_LEN;
use super::{
    Activation, JoinCredentials, LorawanNode, NONCES_LEN, NonceBlock, RadioStatus, SESSION_LEN,
    SessionBuffer,
};
use crate::session::payload::MAX_PAYLOAD_LEN;

/// Longest command or reply line, terminator excluded.
pub const MODEM_LINE_CAPACITY: usize = 16 + 2 * SESSION_LEN;

/// Wait for replies to configuration commands.
pub const COMMAND_TIMEOUT: Duration = Duration::from_secs(1);
/// Wait for an activation; covers both join receive windows.
pub const ACTIVATE_TIMEOUT: Duration = Duration::from_secs(15);
/// Wait for an uplink, including receive windows when they are opened.
pub const UPLINK_TIMEOUT: Duration = Duration::from_secs(8);

/// No reply arrived before the timeout.
pub const NO_REPLY: RadioStatus = RadioStatus(-6);

pub type ModemLine = String<MODEM_LINE_CAPACITY>;

/// Failures of the byte link under the modem.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum LinkError {
    Timeout,
    /// A reply line did not fit the buffer.
    Overflow,
    Io,
}

impl fmt::Display for LinkError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// Line transport to the modem.
pub trait ModemLink {
    /// Sends `line` followed by CRLF.
    fn write_line(&mut self, line: &str) -> Result<(), LinkError>;

    /// Receives one line into `buffer` without its terminator and returns its
    /// length.
    fn read_line(&mut self, buffer: &mut [u8], timeout: Duration) -> Result<usize, LinkError>;
}

/// One parsed reply line.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Reply<'a> {
    Ok,
    Error(RadioStatus),
    Value { tag: &'a str, value: &'a str },
}

/// Parses a reply line. Trailing whitespace is ignored.
#[must_use]
pub fn parse_reply(line: &str) -> Option<Reply<'_>> {
    reply.parse(line.trim_end()).ok()
}

fn reply<'a>(input: &mut &'a str) -> ModalResult<Reply<'a>> {
    alt((
        "OK".value(Reply::Ok),
        preceded(("ERROR", space1), dec_int).map(|code: i16| Reply::Error(RadioStatus(code))),
        preceded(
            '+',
            separated_pair(
                take_while(1.., |c: char| c.is_ascii_uppercase()),
                (':', space0),
                rest,
            ),
        )
        .map(|(tag, value)| Reply::Value { tag, value }),
    ))
    .parse_next(input)
}

fn hex_blob<const N: usize>(input: &mut &str) -> ModalResult<[u8; N]> {
    let mut bytes = [0u8; N];
    for slot in &mut bytes {
        *slot = take_while(2, AsChar::is_hex_digit)
            .try_map(|digits: &str| u8::from_str_radix(digits, 16))
            .parse_next(input)?;
    }
    Ok(bytes)
}

/// Decodes exactly `N` bytes of hex text.
#[must_use]
pub fn decode_hex<const N: usize>(text: &str) -> Option<[u8; N]> {
    hex_blob::<N>.parse(text.trim()).ok()
}

fn push_hex(line: &mut ModemLine, bytes: &[u8]) -> fmt::Result {
    for byte in bytes {
        write!(line, "{:02x}", byte)?;
    }
    Ok(())
}

/// [`LorawanNode`] over an AT command modem.
///
/// The nonce block and session context are read back after every exchange
/// that can change them, so the infallible accessors report the modem's
/// latest known state.
pub struct AtModem<L> {
    link: L,
    nonces: NonceBlock,
    session: SessionBuffer,
    reply: [u8; MODEM_LINE_CAPACITY],
}

impl<L> AtModem<L>
where
    L: ModemLink,
{
    pub fn new(link: L) -> Self {
        Self {
            link,
            nonces: [0; NONCES_LEN],
            session: [0; SESSION_LEN],
            reply: [0; MODEM_LINE_CAPACITY],
        }
    }

    pub fn link_mut(&mut self) -> &mut L {
        &mut self.link
    }

    fn transact(&mut self, line: &ModemLine, timeout: Duration) -> Result<Reply<'_>, RadioStatus> {
        self.link.write_line(line).map_err(link_status)?;
        let len = loop {
            let len = self
                .link
                .read_line(&mut self.reply, timeout)
                .map_err(link_status)?;
            if self.reply[..len].iter().any(|byte| !byte.is_ascii_whitespace()) {
                break len;
            }
        };
        let text = core::str::from_utf8(&self.reply[..len]).map_err(|_| RadioStatus::UNKNOWN)?;
        parse_reply(text).ok_or(RadioStatus::UNKNOWN)
    }

    fn expect_ok(&mut self, line: &ModemLine, timeout: Duration) -> Result<(), RadioStatus> {
        match self.transact(line, timeout)? {
            Reply::Ok => Ok(()),
            Reply::Error(status) => Err(status),
            Reply::Value { .. } => Err(RadioStatus::UNKNOWN),
        }
    }

    fn query<T>(
        &mut self,
        line: &ModemLine,
        tag: &str,
        parse: impl FnOnce(&str) -> Option<T>,
    ) -> Result<T, RadioStatus> {
        match self.transact(line, COMMAND_TIMEOUT)? {
            Reply::Value { tag: seen, value } if seen == tag => {
                parse(value).ok_or(RadioStatus::UNKNOWN)
            }
            Reply::Error(status) => Err(status),
            _ => Err(RadioStatus::UNKNOWN),
        }
    }

    /// Re-reads the nonce block and session context. Stale copies are kept
    /// when the modem does not answer.
    fn refresh(&mut self) {
        if let Ok(nonces) =
            self.query(&command("AT+NONCES=?"), "NONCES", decode_hex::<NONCES_LEN>)
        {
            self.nonces = nonces;
        }
        if let Ok(session) =
            self.query(&command("AT+SESSION=?"), "SESSION", decode_hex::<SESSION_LEN>)
        {
            self.session = session;
        }
    }

    fn uplink(&mut self, verb: &str, payload: &[u8], port: u8) -> Result<(), RadioStatus> {
        if payload.len() > MAX_PAYLOAD_LEN {
            return Err(RadioStatus::UNKNOWN);
        }
        let mut line = ModemLine::new();
        write!(line, "AT+{}={}:", verb, port).map_err(|_| RadioStatus::UNKNOWN)?;
        push_hex(&mut line, payload).map_err(|_| RadioStatus::UNKNOWN)?;
        let sent = self.expect_ok(&line, UPLINK_TIMEOUT);
        self.refresh();
        sent
    }
}

fn command(text: &str) -> ModemLine {
    let mut line = ModemLine::new();
    // Fixed command words are far shorter than the line capacity.
    let _ = line.push_str(text);
    line
}

fn command_with_hex(prefix: &str, bytes: &[u8]) -> Result<ModemLine, RadioStatus> {
    let mut line = command(prefix);
    push_hex(&mut line, bytes).map_err(|_| RadioStatus::UNKNOWN)?;
    Ok(line)
}

fn command_with_value(prefix: &str, value: u8) -> Result<ModemLine, RadioStatus> {
    let mut line = command(prefix);
    write!(line, "{}", value).map_err(|_| RadioStatus::UNKNOWN)?;
    Ok(line)
}

fn link_status(error: LinkError) -> RadioStatus {
    match error {
        LinkError::Timeout => NO_REPLY,
        LinkError::Overflow | LinkError::Io => RadioStatus::UNKNOWN,
    }
}

fn parse_time(value: &str) -> Option<Option<u32>> {
    if value == "NONE" {
        Some(None)
    } else {
        value.parse::<u32>().ok().map(Some)
    }
}

impl<L> LorawanNode for AtModem<L>
where
    L: ModemLink,
{
    fn begin(&mut self) -> Result<(), RadioStatus> {
        self.expect_ok(&command("AT"), COMMAND_TIMEOUT)
    }

    fn begin_otaa(&mut self, credentials: &JoinCredentials) -> Result<(), RadioStatus> {
        let keys: [(&str, &[u8; KEY_LEN]); 2] = [
            ("AT+APPKEY=", &credentials.app_key),
            ("AT+NWKKEY=", &credentials.nwk_key),
        ];
        let euis = [
            ("AT+JOINEUI=", credentials.join_eui),
            ("AT+DEVEUI=", credentials.dev_eui),
        ];
        for (prefix, eui) in euis {
            self.expect_ok(&command_with_hex(prefix, &eui.to_be_bytes())?, COMMAND_TIMEOUT)?;
        }
        for (prefix, key) in keys {
            self.expect_ok(&command_with_hex(prefix, key)?, COMMAND_TIMEOUT)?;
        }
        self.expect_ok(
            &command_with_value("AT+SUBBAND=", credentials.sub_band)?,
            COMMAND_TIMEOUT,
        )
    }

    fn restore_nonces(&mut self, nonces: &NonceBlock) -> Result<(), RadioStatus> {
        self.expect_ok(&command_with_hex("AT+NONCES=", nonces)?, COMMAND_TIMEOUT)?;
        self.nonces = *nonces;
        Ok(())
    }

    fn restore_session(&mut self, session: &SessionBuffer) -> Result<(), RadioStatus> {
        self.expect_ok(&command_with_hex("AT+SESSION=", session)?, COMMAND_TIMEOUT)?;
        self.session = *session;
        Ok(())
    }

    fn activate(&mut self) -> Activation {
        let activation = match self.transact(&command("AT+ACTIVATE"), ACTIVATE_TIMEOUT) {
            Ok(Reply::Value {
                tag: "ACTIVATE",
                value: "NEW",
            }) => Activation::NewSession,
            Ok(Reply::Value {
                tag: "ACTIVATE",
                value: "RESTORED",
            }) => Activation::SessionRestored,
            Ok(Reply::Error(status)) | Err(status) => Activation::Failed(status),
            Ok(_) => Activation::Failed(RadioStatus::UNKNOWN),
        };
        if activation == Activation::NewSession {
            self.refresh();
        }
        activation
    }

    fn nonces(&self) -> NonceBlock {
        self.nonces
    }

    fn session(&self) -> SessionBuffer {
        self.session
    }

    fn set_datarate(&mut self, datarate: u8) -> Result<(), RadioStatus> {
        self.expect_ok(&command_with_value("AT+DR=", datarate)?, COMMAND_TIMEOUT)
    }

    fn set_adr(&mut self, enabled: bool) {
        // The modem keeps its previous ADR setting if the command is lost.
        let _ = self.expect_ok(
            &command(if enabled { "AT+ADR=1" } else { "AT+ADR=0" }),
            COMMAND_TIMEOUT,
        );
    }

    fn request_device_time(&mut self) -> bool {
        self.expect_ok(&command("AT+TIMEREQ"), COMMAND_TIMEOUT).is_ok()
    }

    fn send_receive(&mut self, payload: &[u8], port: u8) -> Result<(), RadioStatus> {
        self.uplink("SENDRECV", payload, port)
    }

    fn send(&mut self, payload: &[u8], port: u8) -> Result<(), RadioStatus> {
        self.uplink("SEND", payload, port)
    }

    fn device_time(&mut self) -> Option<u32> {
        self.query(&command("AT+TIME=?"), "TIME", parse_time)
            .ok()
            .flatten()
    }

    fn sleep(&mut self) {
        let _ = self.expect_ok(&command("AT+SLEEP"), COMMAND_TIMEOUT);
    }
}
