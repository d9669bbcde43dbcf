use std::fmt::Display;

use serde::{Deserialize, Serialize};

use super::{Direction, PduType, TransmissionMode};
use crate::{Error, Result};

/// CFDP PDU header.
///
/// The header is decoded in two steps because a reassembler only learns the total header
/// length after the 4 byte fixed portion is available:
///
/// 1. [PduHeader::load_fixed_header] decodes the fixed portion, after which
///    [PduHeader::header_length] and [PduHeader::data_length] are known.
/// 2. [PduHeader::load] decodes the variable portion (entity ids and transaction sequence
///    number), after which [PduHeader::is_valid] is meaningful.
///
/// # Example
/// ```
/// use cfdp_extract::pdu::PduHeader;
///
/// let dat: &[u8] = &[
///     // fixed header: version 1, file data, 16 data bytes, 2 byte ids, 4 byte tsn
///     0x30, 0x00, 0x10, 0x13,
///     // source id, tsn, destination id
///     0x00, 0x17, 0x00, 0x00, 0x00, 0x2a, 0x00, 0x01,
/// ];
/// let mut header = PduHeader::new();
/// header.load_fixed_header(dat, 0).unwrap();
/// assert_eq!(header.header_length(), 12);
/// header.load(dat, 0).unwrap();
/// assert!(header.is_valid());
/// assert_eq!(header.transaction_seq_num, 42);
/// ```
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Default)]
pub struct PduHeader {
    pub version: u8,
    pub pdu_type: PduType,
    pub direction: Direction,
    pub transmission_mode: TransmissionMode,
    pub crc_flag: bool,
    /// Large file flag; reserved in version 0 headers.
    pub large_file: bool,
    pub data_field_length: u16,
    pub segmentation_control: bool,
    /// Entity id length in bytes, 1 to 8.
    pub entity_id_length: usize,
    pub segment_metadata: bool,
    /// Transaction sequence number length in bytes, 1 to 8.
    pub tsn_length: usize,
    pub source_entity_id: u64,
    pub transaction_seq_num: u64,
    pub destination_entity_id: u64,

    #[serde(skip)]
    fixed_loaded: bool,
    #[serde(skip)]
    loaded: bool,
}

impl PduHeader {
    /// Length of the fixed portion of the header.
    pub const FIXED_LEN: usize = 4;
    /// Protocol maximum for the total length of a PDU.
    pub const MAX_PDU_LENGTH: usize = 65536;
    /// CFDP version field values this decoder understands.
    pub const SUPPORTED_VERSIONS: [u8; 2] = [0, 1];
    /// Length of the optional trailing CRC.
    pub const CRC_LEN: usize = 2;

    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Decode the fixed portion of the header starting at `offset`.
    ///
    /// # Errors
    /// [Error::NotEnoughData] if fewer than [PduHeader::FIXED_LEN] bytes are available at
    /// `offset`. The header is unusable afterwards.
    pub fn load_fixed_header(&mut self, buf: &[u8], offset: usize) -> Result<()> {
        self.fixed_loaded = false;
        self.loaded = false;
        let avail = buf.len().saturating_sub(offset);
        if avail < Self::FIXED_LEN {
            return Err(Error::NotEnoughData {
                actual: avail,
                minimum: Self::FIXED_LEN,
            });
        }
        let dat = &buf[offset..offset + Self::FIXED_LEN];

        self.version = (dat[0] >> 5) & 0x7;
        self.pdu_type = if (dat[0] >> 4) & 0x1 == 0 {
            PduType::FileDirective
        } else {
            PduType::FileData
        };
        self.direction = if (dat[0] >> 3) & 0x1 == 0 {
            Direction::TowardReceiver
        } else {
            Direction::TowardSender
        };
        self.transmission_mode = if (dat[0] >> 2) & 0x1 == 0 {
            TransmissionMode::Acknowledged
        } else {
            TransmissionMode::Unacknowledged
        };
        self.crc_flag = (dat[0] >> 1) & 0x1 == 1;
        self.large_file = dat[0] & 0x1 == 1;
        self.data_field_length = u16::from_be_bytes([dat[1], dat[2]]);
        self.segmentation_control = (dat[3] >> 7) & 0x1 == 1;
        self.entity_id_length = ((dat[3] >> 4) & 0x7) as usize + 1;
        self.segment_metadata = (dat[3] >> 3) & 0x1 == 1;
        self.tsn_length = (dat[3] & 0x7) as usize + 1;

        self.fixed_loaded = true;
        Ok(())
    }

    /// Decode the complete header starting at `offset`, including the fixed portion if it
    /// has not already been loaded.
    ///
    /// # Errors
    /// [Error::NotEnoughData] if the buffer does not contain the complete header.
    pub fn load(&mut self, buf: &[u8], offset: usize) -> Result<()> {
        if !self.fixed_loaded {
            self.load_fixed_header(buf, offset)?;
        }
        self.loaded = false;
        let avail = buf.len().saturating_sub(offset);
        if avail < self.header_length() {
            return Err(Error::NotEnoughData {
                actual: avail,
                minimum: self.header_length(),
            });
        }

        let mut pos = offset + Self::FIXED_LEN;
        self.source_entity_id = read_uint(&buf[pos..pos + self.entity_id_length]);
        pos += self.entity_id_length;
        self.transaction_seq_num = read_uint(&buf[pos..pos + self.tsn_length]);
        pos += self.tsn_length;
        self.destination_entity_id = read_uint(&buf[pos..pos + self.entity_id_length]);

        self.loaded = true;
        Ok(())
    }

    /// Decode a complete header from the start of `buf`.
    ///
    /// # Errors
    /// [Error::NotEnoughData] if `buf` does not contain the complete header.
    pub fn decode(buf: &[u8]) -> Result<Self> {
        let mut header = Self::new();
        header.load(buf, 0)?;
        Ok(header)
    }

    /// True once the fixed portion has been decoded.
    #[must_use]
    pub fn is_fixed_loaded(&self) -> bool {
        self.fixed_loaded
    }

    /// True once the complete header has been decoded.
    #[must_use]
    pub fn is_loaded(&self) -> bool {
        self.loaded
    }

    /// Total header length in bytes. Only meaningful once the fixed portion is loaded.
    #[must_use]
    pub fn header_length(&self) -> usize {
        Self::FIXED_LEN + 2 * self.entity_id_length + self.tsn_length
    }

    /// Length of the data field in bytes, including any CRC.
    #[must_use]
    pub fn data_length(&self) -> usize {
        self.data_field_length as usize
    }

    #[must_use]
    pub fn pdu_length(&self) -> usize {
        self.header_length() + self.data_length()
    }

    #[must_use]
    pub fn is_valid(&self) -> bool {
        if !self.loaded || !Self::SUPPORTED_VERSIONS.contains(&self.version) {
            return false;
        }
        if !(1..=8).contains(&self.entity_id_length) || !(1..=8).contains(&self.tsn_length) {
            return false;
        }
        let min_data = if self.crc_flag { Self::CRC_LEN + 1 } else { 1 };
        if self.data_length() < min_data {
            return false;
        }
        self.pdu_length() <= Self::MAX_PDU_LENGTH
    }

    /// Encode this header to its wire format.
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let mut dat = Vec::with_capacity(self.header_length());
        let mut b0 = (self.version & 0x7) << 5;
        if self.pdu_type == PduType::FileData {
            b0 |= 1 << 4;
        }
        if self.direction == Direction::TowardSender {
            b0 |= 1 << 3;
        }
        if self.transmission_mode == TransmissionMode::Unacknowledged {
            b0 |= 1 << 2;
        }
        b0 |= u8::from(self.crc_flag) << 1;
        b0 |= u8::from(self.large_file);
        dat.push(b0);
        dat.extend(self.data_field_length.to_be_bytes());

        let eid_bits = (self.entity_id_length.clamp(1, 8) - 1) as u8;
        let tsn_bits = (self.tsn_length.clamp(1, 8) - 1) as u8;
        dat.push(
            u8::from(self.segmentation_control) << 7
                | eid_bits << 4
                | u8::from(self.segment_metadata) << 3
                | tsn_bits,
        );

        write_uint(&mut dat, self.source_entity_id, self.entity_id_length);
        write_uint(&mut dat, self.transaction_seq_num, self.tsn_length);
        write_uint(&mut dat, self.destination_entity_id, self.entity_id_length);
        dat
    }
}

impl Display for PduHeader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "PduHeader{{version={}, type={:?}, direction={:?}, mode={:?}, crc={}, header_len={}, data_len={}, source={}, tsn={}, dest={}}}",
            self.version,
            self.pdu_type,
            self.direction,
            self.transmission_mode,
            self.crc_flag,
            self.header_length(),
            self.data_length(),
            self.source_entity_id,
            self.transaction_seq_num,
            self.destination_entity_id,
        )
    }
}

fn read_uint(dat: &[u8]) -> u64 {
    dat.iter().fold(0u64, |acc, b| (acc << 8) | u64::from(*b))
}

fn write_uint(dat: &mut Vec<u8>, val: u64, len: usize) {
    let len = len.clamp(1, 8);
    dat.extend(&val.to_be_bytes()[8 - len..]);
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test]
    fn test_load_fixed_header() {
        let dat: &[u8] = &[
            // version 1, file data, toward sender, unack, crc, not large
            0b0011_1110,
            // data field len
            0x01,
            0x00,
            // segmentation, eid len 3 (2+1), segment metadata, tsn len 2 (1+1)
            0b1010_1001,
        ];
        let mut header = PduHeader::new();
        header.load_fixed_header(dat, 0).unwrap();

        assert!(header.is_fixed_loaded());
        assert!(!header.is_loaded());
        assert_eq!(header.version, 1);
        assert_eq!(header.pdu_type, PduType::FileData);
        assert_eq!(header.direction, Direction::TowardSender);
        assert_eq!(header.transmission_mode, TransmissionMode::Unacknowledged);
        assert!(header.crc_flag);
        assert!(!header.large_file);
        assert_eq!(header.data_length(), 256);
        assert!(header.segmentation_control);
        assert_eq!(header.entity_id_length, 3);
        assert!(header.segment_metadata);
        assert_eq!(header.tsn_length, 2);
        assert_eq!(header.header_length(), 4 + 6 + 2);
        assert_eq!(header.pdu_length(), 268);
        // variable portion not yet loaded
        assert!(!header.is_valid());
    }

    #[test]
    fn test_load_fixed_header_offset() {
        let dat = hex::decode("ffff2000050000").unwrap();
        let mut header = PduHeader::new();
        header.load_fixed_header(&dat, 2).unwrap();
        assert_eq!(header.version, 1);
        assert_eq!(header.data_length(), 5);
    }

    #[test]
    fn test_load_fixed_header_short() {
        let mut header = PduHeader::new();
        let zult = header.load_fixed_header(&[0x20, 0x00, 0x05], 0);
        assert!(
            matches!(
                zult,
                Err(Error::NotEnoughData {
                    actual: 3,
                    minimum: 4
                })
            ),
            "got {zult:?}"
        );
        assert!(!header.is_fixed_loaded());

        assert!(header.load_fixed_header(&[0x20; 8], 6).is_err());
    }

    #[test]
    fn test_load_variable_header() {
        // 2 byte eids, 3 byte tsn
        let dat = hex::decode("20000a12abcd010203beef").unwrap();
        let mut header = PduHeader::new();
        header.load_fixed_header(&dat, 0).unwrap();
        header.load(&dat, 0).unwrap();

        assert!(header.is_loaded());
        assert_eq!(header.source_entity_id, 0xabcd);
        assert_eq!(header.transaction_seq_num, 0x010203);
        assert_eq!(header.destination_entity_id, 0xbeef);
        assert!(header.is_valid());
    }

    #[test]
    fn test_load_variable_header_short() {
        let dat = hex::decode("20000a12abcd0102").unwrap();
        let mut header = PduHeader::new();
        header.load_fixed_header(&dat, 0).unwrap();
        assert!(header.load(&dat, 0).is_err());
        assert!(!header.is_loaded());
        assert!(!header.is_valid());
    }

    #[test_case(0x00, 0x0001, false, true; "version 0")]
    #[test_case(0x20, 0x0001, false, true; "version 1")]
    #[test_case(0x40, 0x0001, false, false; "version 2 unsupported")]
    #[test_case(0x20, 0x0000, false, false; "empty data field")]
    #[test_case(0x22, 0x0002, true, false; "crc without data")]
    #[test_case(0x22, 0x0003, true, true; "crc with data")]
    #[test_case(0x20, 0xfff9, false, true; "max pdu length")]
    #[test_case(0x20, 0xfffa, false, false; "exceeds max pdu length")]
    fn test_is_valid(b0: u8, data_len: u16, crc: bool, expected: bool) {
        // 1 byte eids and tsn -> 7 byte header
        let mut dat = vec![b0];
        dat.extend(data_len.to_be_bytes());
        dat.extend([0x00, 0x01, 0x02, 0x03]);
        let header = PduHeader::decode(&dat).unwrap();
        assert_eq!(header.crc_flag, crc);
        assert_eq!(header.is_valid(), expected, "{header}");
    }

    #[test]
    fn test_max_pdu_length_large_header() {
        // 8 byte eids and tsn -> 28 byte header, data len brings total to 65536 + 1
        let mut dat = vec![0x20];
        dat.extend(((PduHeader::MAX_PDU_LENGTH - 28 + 1) as u16).to_be_bytes());
        dat.push(0x77);
        dat.extend([0u8; 24]);
        let header = PduHeader::decode(&dat).unwrap();
        assert_eq!(header.header_length(), 28);
        assert!(!header.is_valid());
    }

    #[test]
    fn test_encode() {
        let dat = hex::decode("3e010029abcdef0102fedcba").unwrap();
        let header = PduHeader::decode(&dat).unwrap();
        assert_eq!(header.encode(), dat);
    }

    #[test]
    fn test_display() {
        let header = PduHeader::decode(&hex::decode("20000a00010203").unwrap()).unwrap();
        let s = header.to_string();
        assert!(s.contains("header_len=7"), "{s}");
        assert!(s.contains("data_len=10"), "{s}");
    }
}
