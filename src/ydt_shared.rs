use crate::error::ProtocolError;

// —————————————————————————————————————————————————————————————————————————————————————————————————
//                                          YD/T 1363 Frame
// —————————————————————————————————————————————————————————————————————————————————————————————————

/// YD/T 1363 binary frame, as spoken by rectifier / DC bus / environment monitoring units.
///
/// Half-duplex request/response. Every frame carries a nibble-checked length field and an
/// additive 16-bit checksum.
///
/// Frame Structure:
/// [SOI:1][VER:1][ADR:1][CID1:1][CID2:1][LENGTH:2][INFO:N][CHKSUM:2][EOI:1]
///
/// LENGTH: [LCHKSUM:4 bits][LENID:12 bits]
///
pub const SOI: u8 = 0x7E;
pub const EOI: u8 = 0x0D;
pub const PROTOCOL_VERSION: u8 = 0x21;

// Field offsets
pub const SOI_INDEX: usize = 0;
pub const VER_INDEX: usize = 1;
pub const ADR_INDEX: usize = 2;
pub const CID1_INDEX: usize = 3;
pub const CID2_INDEX: usize = 4;
pub const LENGTH_INDEX: usize = 5;
pub const INFO_INDEX: usize = 7;

// Field sizes
pub const SOI_LEN: usize = 1;
pub const HEADER_LEN: usize = 4; // VER ADR CID1 CID2
pub const LENGTH_LEN: usize = 2;
pub const CHKSUM_LEN: usize = 2;
pub const EOI_LEN: usize = 1;

pub const MAX_INFO_LEN: usize = 0x0FFF;
pub const MIN_FRAME_SIZE: usize = SOI_LEN + HEADER_LEN + LENGTH_LEN + CHKSUM_LEN + EOI_LEN;

const LENID_LOW_MASK: u16 = 0xFF;
const LENID_HIGH_MASK: u16 = 0x0F;
const LCHKSUM_SHIFT: u8 = 4;

// ——————————————————————————————————————————— Return Code —————————————————————————————————————————

/// Status byte a responder places in the CID2 position of its reply
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReturnCode {
    Ok,
    VersionMismatch,
    ChecksumError,
    LengthChecksumError,
    InvalidId,
    FormatError,
    InvalidData,
    /// Device defined, 0x80..=0xEF
    Device(u8),
    Unknown(u8),
}

impl ReturnCode {
    pub const DEVICE_RANGE: std::ops::RangeInclusive<u8> = 0x80..=0xEF;

    pub fn is_ok(self) -> bool {
        self == Self::Ok
    }
}

impl From<u8> for ReturnCode {
    fn from(value: u8) -> Self {
        match value {
            0x00 => Self::Ok,
            0x01 => Self::VersionMismatch,
            0x02 => Self::ChecksumError,
            0x03 => Self::LengthChecksumError,
            0x04 => Self::InvalidId,
            0x05 => Self::FormatError,
            0x06 => Self::InvalidData,
            v if Self::DEVICE_RANGE.contains(&v) => Self::Device(v),
            v => Self::Unknown(v),
        }
    }
}

impl From<ReturnCode> for u8 {
    fn from(code: ReturnCode) -> Self {
        match code {
            ReturnCode::Ok => 0x00,
            ReturnCode::VersionMismatch => 0x01,
            ReturnCode::ChecksumError => 0x02,
            ReturnCode::LengthChecksumError => 0x03,
            ReturnCode::InvalidId => 0x04,
            ReturnCode::FormatError => 0x05,
            ReturnCode::InvalidData => 0x06,
            ReturnCode::Device(v) | ReturnCode::Unknown(v) => v,
        }
    }
}

// —————————————————————————————————————————— Length Field —————————————————————————————————————————

/// LCHKSUM sums the low byte, the high nibble AND the full LENID again.
/// Devices in the field compute it this way, keep it bit-exact.
#[inline]
fn length_checksum(lenid: u16) -> u8 {
    let lenid_low = u32::from(lenid & LENID_LOW_MASK);
    let lenid_high = u32::from((lenid >> 8) & LENID_HIGH_MASK);
    let sum = (lenid_low + lenid_high + u32::from(lenid)) % 16;

    ((!sum).wrapping_add(1) & 0x0F) as u8
}

/// Packs an info length into the 2 byte LENGTH field.
///
/// Only the low 12 bits of `len` are representable, callers check against `MAX_INFO_LEN`.
#[inline]
pub fn encode_length(len: usize) -> [u8; LENGTH_LEN] {
    let lenid = (len as u16) & 0x0FFF;
    let lenid_high = ((lenid >> 8) & LENID_HIGH_MASK) as u8;
    let lenid_low = (lenid & LENID_LOW_MASK) as u8;

    [(length_checksum(lenid) << LCHKSUM_SHIFT) | lenid_high, lenid_low]
}

/// Unpacks the LENGTH field and checks its nibble checksum
#[inline]
pub fn decode_length(field: [u8; LENGTH_LEN]) -> Result<usize, ProtocolError> {
    let received = field[0] >> LCHKSUM_SHIFT;
    let lenid = ((u16::from(field[0]) & LENID_HIGH_MASK) << 8) | u16::from(field[1]);
    let calculated = length_checksum(lenid);

    if received != calculated {
        return Err(ProtocolError::LengthChecksum(format!(
            "LCHKSUM received {received:X}, calculated {calculated:X}"
        )));
    }

    Ok(lenid as usize)
}

// ———————————————————————————————————————— Payload Checksum ———————————————————————————————————————

/// Two's complement of the byte sum, mod 65536.
///
/// Callers pass ADR through the last INFO byte. VER is left out on both the encode and
/// the validate path.
#[inline]
pub fn payload_checksum(bytes: &[u8]) -> u16 {
    let sum = bytes.iter().fold(0u32, |acc, &b| acc + u32::from(b)) % 0x1_0000;

    ((!sum).wrapping_add(1) & 0xFFFF) as u16
}

// —————————————————————————————————————————————————————————————————————————————————————————————————
//                                              Tests
// —————————————————————————————————————————————————————————————————————————————————————————————————
