pub use crate::ydt_shared::*;

use tracing::warn;

use crate::error::ProtocolError;

// —————————————————————————————————————————————————————————————————————————————————————————————————
//                                            YDT Decoder
// —————————————————————————————————————————————————————————————————————————————————————————————————

/// Decoded Frame
#[derive(Debug, PartialEq, Eq)]
pub struct YdtFrame<'a> {
    pub address: u8,
    pub id1:     u8,
    pub id2:     u8,
    pub info:    &'a [u8],
}

pub struct YdtDecoder;

impl YdtDecoder {
    /// Zero-copy frame split. Validates first, `info` borrows from `frame`.
    #[inline]
    pub fn decode_frame(frame: &[u8]) -> Result<YdtFrame<'_>, ProtocolError> {
        Self::validate_frame(frame)?;

        let info_end = frame.len() - CHKSUM_LEN - EOI_LEN;

        Ok(YdtFrame {
            address: frame[ADR_INDEX],
            id1:     frame[CID1_INDEX],
            id2:     frame[CID2_INDEX],
            info:    &frame[INFO_INDEX..info_end],
        })
    }

    /// Checks, in order: size, SOI, EOI, VER, LENGTH, CHKSUM.
    ///
    /// A version mismatch is reported as a format error.
    pub fn validate_frame(frame: &[u8]) -> Result<(), ProtocolError> {
        if frame.len() < MIN_FRAME_SIZE {
            warn!("Frame too short: {} bytes", frame.len());
            return Err(ProtocolError::Format(format!("frame too short: {} bytes", frame.len())));
        }

        let soi = frame[SOI_INDEX];
        if soi != SOI {
            warn!("Invalid start byte: {soi:02X}");
            return Err(ProtocolError::Format(format!("invalid start byte {soi:#04X}")));
        }

        let eoi = frame[frame.len() - EOI_LEN];
        if eoi != EOI {
            warn!("Invalid end byte: {eoi:02X}");
            return Err(ProtocolError::Format(format!("invalid end byte {eoi:#04X}")));
        }

        let ver = frame[VER_INDEX];
        if ver != PROTOCOL_VERSION {
            warn!("Version mismatch: expected {PROTOCOL_VERSION:02X}, got {ver:02X}");
            return Err(ProtocolError::Format(format!("version mismatch {ver:#04X}")));
        }

        // ---- Length
        let info_len = decode_length([frame[LENGTH_INDEX], frame[LENGTH_INDEX + 1]])?;
        let expected = MIN_FRAME_SIZE + info_len;
        if frame.len() != expected {
            warn!("Frame length mismatch: expected {expected}, got {}", frame.len());
            return Err(ProtocolError::LengthChecksum(format!(
                "LENID {info_len} does not match frame of {} bytes",
                frame.len()
            )));
        }

        // ---- Checksum
        let chksum_at = frame.len() - CHKSUM_LEN - EOI_LEN;
        let received = u16::from_be_bytes([frame[chksum_at], frame[chksum_at + 1]]);
        let calculated = payload_checksum(&frame[ADR_INDEX..chksum_at]);
        if received != calculated {
            warn!("Checksum mismatch: expected {calculated:04X}, got {received:04X}");
            return Err(ProtocolError::Checksum { received, calculated });
        }

        Ok(())
    }
}

// —————————————————————————————————————————————————————————————————————————————————————————————————
//                                              Tests
// —————————————————————————————————————————————————————————————————————————————————————————————————
