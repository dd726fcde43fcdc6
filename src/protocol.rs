use crate::Error;
use std::fmt;
use std::ops::Deref;

/// Fixed start of every frame.
pub const PREAMBLE: [u8; 2] = [0x00, 0x00];
/// Preamble plus the payload length byte.
pub const HEAD_LEN: usize = 3;
/// Trailing checksum byte.
pub const CRC_LEN: usize = 1;

const LEN_POS: usize = 2;

/// Unsigned byte-wise sum modulo 256 over every byte except the last one.
pub fn calc_crc(buffer: &[u8]) -> u8 {
    let mut checksum: u8 = 0;
    let slice = &buffer[0..buffer.len().saturating_sub(CRC_LEN)];
    for b in slice {
        checksum = checksum.wrapping_add(*b);
    }
    checksum
}

fn calc_crc_and_set(buffer: &mut [u8]) {
    let len = buffer.len();
    buffer[len - 1] = calc_crc(buffer)
}

fn validate_len(buffer: &[u8]) -> std::result::Result<(), Error> {
    let expected = usize::from(buffer[LEN_POS]) + HEAD_LEN + CRC_LEN;
    if buffer.len() != expected {
        log::debug!(
            "Incorrect frame length - expected={} received={}",
            expected,
            buffer.len()
        );
        return Err(Error::LengthMismatch {
            expected,
            received: buffer.len(),
        });
    }
    Ok(())
}

fn validate_checksum(buffer: &[u8]) -> std::result::Result<(), Error> {
    let checksum = calc_crc(buffer);
    let received = buffer[buffer.len() - 1];
    if received != checksum {
        log::debug!(
            "Invalid checksum - calculated={:02X?} received={:02X?} buffer={:02X?}",
            checksum,
            received,
            buffer
        );
        return Err(Error::ChecksumMismatch {
            calculated: checksum,
            received,
        });
    }
    Ok(())
}

/// A buffer that passed [`validate`].
///
/// The bytes are exactly the ones received, header and checksum included, so
/// field offsets are counted from the first preamble byte.
#[derive(Clone, PartialEq, Eq)]
pub struct ValidFrame(Vec<u8>);

impl ValidFrame {
    /// The payload between header and checksum.
    pub fn payload(&self) -> &[u8] {
        &self.0[HEAD_LEN..self.0.len() - CRC_LEN]
    }
}

impl Deref for ValidFrame {
    type Target = [u8];

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl fmt::Debug for ValidFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02X?}", self.0)
    }
}

/// Checks start of frame, declared length and checksum, in that order.
pub fn validate(buffer: &[u8]) -> std::result::Result<ValidFrame, Error> {
    if buffer.len() < HEAD_LEN {
        log::debug!("Frame too short - received={}", buffer.len());
        return Err(Error::TooShort(buffer.len()));
    }
    if buffer[..PREAMBLE.len()] != PREAMBLE {
        log::debug!("Incorrect start of frame: {:02X?}", &buffer[..PREAMBLE.len()]);
        return Err(Error::BadPreamble);
    }
    validate_len(buffer)?;
    validate_checksum(buffer)?;
    Ok(ValidFrame(buffer.to_vec()))
}

/// Wraps `payload` with preamble, length byte and checksum.
///
/// Returns `None` when the payload does not fit the one byte length field.
pub fn build_frame(payload: &[u8]) -> Option<Vec<u8>> {
    let len = u8::try_from(payload.len()).ok()?;
    let mut tx_buffer = Vec::with_capacity(payload.len() + HEAD_LEN + CRC_LEN);
    tx_buffer.extend_from_slice(&PREAMBLE);
    tx_buffer.push(len);
    tx_buffer.extend_from_slice(payload);
    tx_buffer.push(0);
    calc_crc_and_set(&mut tx_buffer);
    Some(tx_buffer)
}

/// Reads `width` little-endian bytes at `offset`, sign extended when `signed`.
///
/// `None` if the range is not completely inside `buffer` or wider than 8 bytes.
pub fn read_le(buffer: &[u8], offset: usize, width: usize, signed: bool) -> Option<i64> {
    if width == 0 || width > 8 {
        return None;
    }
    let bytes = buffer.get(offset..offset.checked_add(width)?)?;
    let mut raw = [0u8; 8];
    raw[..width].copy_from_slice(bytes);
    let value = u64::from_le_bytes(raw);
    if signed {
        let shift = 64 - 8 * width as u32;
        Some(((value << shift) as i64) >> shift)
    } else {
        Some(value as i64)
    }
}

const CMD_POLL: [u8; 8] = [0x00, 0x00, 0x04, 0x01, 0x13, 0x55, 0xAA, 0x17];
const CMD_ENABLE_DISCHARGE: [u8; 8] = [0x00, 0x00, 0x04, 0x01, 0x0C, 0x55, 0xAA, 0x10];
const CMD_DISABLE_DISCHARGE: [u8; 8] = [0x00, 0x00, 0x04, 0x01, 0x0D, 0x55, 0xAA, 0x11];

/// Requests written to the BMS.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// Ask for a status frame.
    Poll,
    EnableDischarge,
    DisableDischarge,
}

impl Command {
    pub fn bytes(&self) -> &'static [u8] {
        match self {
            Command::Poll => &CMD_POLL,
            Command::EnableDischarge => &CMD_ENABLE_DISCHARGE,
            Command::DisableDischarge => &CMD_DISABLE_DISCHARGE,
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Command::Poll => write!(f, "poll"),
            Command::EnableDischarge => write!(f, "enable discharge"),
            Command::DisableDischarge => write!(f, "disable discharge"),
        }
    }
}
