//! CFDP PDU header decoding and reassembly primitives.
//!
//! Reference: [CCSDS File Delivery Protocol](https://public.ccsds.org/Pubs/727x0b5.pdf)
mod buffer;
mod header;

pub use buffer::ReassemblyBuffer;
pub use header::PduHeader;

use serde::{Deserialize, Serialize};

/// CRC used for the optional PDU checksum and for TM frame error control.
pub(crate) const CRC16: crc::Crc<u16> = crc::Crc::<u16>::new(&crc::CRC_16_IBM_3740);

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum PduType {
    #[default]
    FileDirective,
    FileData,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Direction {
    #[default]
    TowardReceiver,
    TowardSender,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum TransmissionMode {
    #[default]
    Acknowledged,
    Unacknowledged,
}

/// File directive codes, the first octet of a file directive PDU's data field.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DirectiveCode {
    Eof,
    Finished,
    Ack,
    Metadata,
    Nak,
    Prompt,
    KeepAlive,
}

impl DirectiveCode {
    #[must_use]
    pub fn from_u8(code: u8) -> Option<Self> {
        match code {
            0x04 => Some(Self::Eof),
            0x05 => Some(Self::Finished),
            0x06 => Some(Self::Ack),
            0x07 => Some(Self::Metadata),
            0x08 => Some(Self::Nak),
            0x09 => Some(Self::Prompt),
            0x0c => Some(Self::KeepAlive),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_u8(&self) -> u8 {
        match self {
            Self::Eof => 0x04,
            Self::Finished => 0x05,
            Self::Ack => 0x06,
            Self::Metadata => 0x07,
            Self::Nak => 0x08,
            Self::Prompt => 0x09,
            Self::KeepAlive => 0x0c,
        }
    }
}

/// Directive code of a complete PDU, or `None` for file data PDUs, unknown codes, or
/// if `pdu` is too short.
#[must_use]
pub fn directive_code(header: &PduHeader, pdu: &[u8]) -> Option<DirectiveCode> {
    if header.pdu_type != PduType::FileDirective {
        return None;
    }
    pdu.get(header.header_length())
        .and_then(|code| DirectiveCode::from_u8(*code))
}

/// Verify the trailing CRC-16 of a complete PDU. The CRC covers every byte preceding it.
#[must_use]
pub fn crc_matches(pdu: &[u8]) -> bool {
    if pdu.len() < 2 {
        return false;
    }
    let (body, trailer) = pdu.split_at(pdu.len() - 2);
    CRC16.checksum(body) == u16::from_be_bytes([trailer[0], trailer[1]])
}
