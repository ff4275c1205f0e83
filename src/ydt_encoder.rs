pub use crate::ydt_shared::*;

use crate::error::ProtocolError;

// —————————————————————————————————————————————————————————————————————————————————————————————————
//                                            YDT Encoder
// —————————————————————————————————————————————————————————————————————————————————————————————————

pub struct YdtEncoder;

impl YdtEncoder {
    /// Builds a complete frame around `info`.
    ///
    /// CHKSUM covers ADR through the last INFO byte.
    #[inline]
    pub fn encode_frame(id1: u8, id2: u8, info: &[u8], address: u8) -> Result<Vec<u8>, ProtocolError> {
        if info.len() > MAX_INFO_LEN {
            return Err(ProtocolError::Format(format!(
                "info of {} bytes exceeds {MAX_INFO_LEN}",
                info.len()
            )));
        }

        let mut frame = Vec::<u8>::with_capacity(MIN_FRAME_SIZE + info.len());

        frame.push(SOI);
        frame.push(PROTOCOL_VERSION);
        frame.push(address);
        frame.push(id1);
        frame.push(id2);
        frame.extend_from_slice(&encode_length(info.len()));
        frame.extend_from_slice(info);

        let chksum = payload_checksum(&frame[ADR_INDEX..]);
        frame.extend_from_slice(&chksum.to_be_bytes());
        frame.push(EOI);

        Ok(frame)
    }
}

// —————————————————————————————————————————————————————————————————————————————————————————————————
//                                              Tests
// —————————————————————————————————————————————————————————————————————————————————————————————————
