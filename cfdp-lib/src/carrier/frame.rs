use serde::{Deserialize, Serialize};
use typed_builder::TypedBuilder;

use super::{FrameFormat, FrameId, Scid, StationInfo, Vcid};
use crate::pdu::CRC16;
use crate::{Error, Result};

/// CCSDS TM transfer frame primary header (CCSDS 132.0-B).
#[derive(Serialize, Deserialize, Debug, PartialEq, Eq, Clone)]
pub struct TmFrameHeader {
    /// Transfer frame version number; 0 for TM version 1 frames.
    pub version: u8,
    pub scid: Scid,
    pub vcid: Vcid,
    pub ocf: bool,
    pub mc_count: u8,
    pub vc_count: u8,
    pub secondary_header: bool,
    pub sync: bool,
    pub packet_order: bool,
    pub segment_length_id: u8,
    pub first_header_pointer: u16,
}

impl TmFrameHeader {
    /// TM primary header length in bytes
    pub const LEN: usize = 6;
    /// First header pointer value indicating no PDU starts in this frame.
    pub const FHP_CONTINUATION: u16 = 0x7ff;
    /// First header pointer value indicating an idle frame.
    pub const FHP_IDLE: u16 = 0x7fe;
    /// Maximum value of the virtual channel frame count before rollover.
    pub const VC_COUNT_MAX: u32 = 255;
    pub const OCF_LEN: usize = 4;
    pub const FECF_LEN: usize = 2;

    /// Construct from the provided bytes, or `None` if there are not enough bytes.
    #[must_use]
    pub fn decode(dat: &[u8]) -> Option<Self> {
        if dat.len() < Self::LEN {
            return None;
        }
        let x = u16::from_be_bytes([dat[0], dat[1]]);
        let y = u16::from_be_bytes([dat[4], dat[5]]);
        Some(TmFrameHeader {
            version: (x >> 14) as u8,
            scid: (x >> 4) & 0x3ff,
            vcid: (x >> 1) & 0x7,
            ocf: x & 0x1 == 1,
            mc_count: dat[2],
            vc_count: dat[3],
            secondary_header: (y >> 15) & 0x1 == 1,
            sync: (y >> 14) & 0x1 == 1,
            packet_order: (y >> 13) & 0x1 == 1,
            segment_length_id: ((y >> 11) & 0x3) as u8,
            first_header_pointer: y & 0x7ff,
        })
    }

    #[must_use]
    pub fn format(&self) -> FrameFormat {
        match self.version {
            0 => FrameFormat::CcsdsTmV1,
            1 => FrameFormat::CcsdsAos,
            _ => FrameFormat::Other,
        }
    }
}

/// A transfer frame as delivered to the frame extractor.
///
/// The data area, i.e., the bytes that may contain PDU data, is
/// `data[header_len..header_len + data_len]`. The data pointer is relative to the start of
/// the data area.
#[derive(TypedBuilder, Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct FrameRecord {
    pub scid: Scid,
    pub vcid: Vcid,
    /// Virtual channel frame count.
    pub sequence: u32,
    /// Maximum frame count before rollover.
    #[builder(default = TmFrameHeader::VC_COUNT_MAX)]
    pub max_sequence: u32,
    #[builder(default)]
    pub format: FrameFormat,
    /// Offset of the data area, i.e., the length of all headers.
    pub header_len: usize,
    /// Length of the data area.
    pub data_len: usize,
    /// First header pointer, or `None` if the frame does not carry one.
    #[builder(default, setter(strip_option))]
    pub data_pointer: Option<u16>,
    /// No PDU starts in this frame; all data continues the PDU in progress.
    #[builder(default)]
    pub continuation: bool,
    #[builder(default)]
    pub idle: bool,
    /// Frame contains the deadcode fill pattern.
    #[builder(default)]
    pub dead: bool,
    /// Frame failed an integrity check.
    #[builder(default)]
    pub bad: bool,
    #[builder(default)]
    pub station: StationInfo,
    #[builder(default)]
    pub from_simulator: bool,
    /// All frame bytes, including headers and trailer.
    #[serde(with = "serde_bytes")]
    pub data: Vec<u8>,
}

impl FrameRecord {
    #[must_use]
    pub fn id(&self) -> FrameId {
        FrameId {
            vcid: self.vcid,
            sequence: self.sequence,
        }
    }

    /// The data area bytes, or `None` if the frame is shorter than its declared data area.
    #[must_use]
    pub fn data_area(&self) -> Option<&[u8]> {
        self.data.get(self.header_len..self.header_len + self.data_len)
    }

    /// Create a record from the bytes of a CCSDS TM version 1 transfer frame.
    ///
    /// When `fecf` is true the trailing 2 bytes are treated as a frame error control field
    /// and a frame that fails the check is marked bad.
    ///
    /// # Errors
    /// [Error::NotEnoughData] if there are not enough bytes for the headers and trailer.
    pub fn from_tm_frame(dat: Vec<u8>, fecf: bool) -> Result<Self> {
        let header = TmFrameHeader::decode(&dat).ok_or(Error::NotEnoughData {
            actual: dat.len(),
            minimum: TmFrameHeader::LEN,
        })?;

        let mut header_len = TmFrameHeader::LEN;
        if header.secondary_header {
            let Some(b) = dat.get(TmFrameHeader::LEN) else {
                return Err(Error::NotEnoughData {
                    actual: dat.len(),
                    minimum: TmFrameHeader::LEN + 1,
                });
            };
            header_len += (b & 0x3f) as usize + 1;
        }
        let mut trailer_len = 0;
        if header.ocf {
            trailer_len += TmFrameHeader::OCF_LEN;
        }
        if fecf {
            trailer_len += TmFrameHeader::FECF_LEN;
        }
        if dat.len() < header_len + trailer_len {
            return Err(Error::NotEnoughData {
                actual: dat.len(),
                minimum: header_len + trailer_len,
            });
        }

        let bad = fecf && {
            let (body, trailer) = dat.split_at(dat.len() - TmFrameHeader::FECF_LEN);
            CRC16.checksum(body) != u16::from_be_bytes([trailer[0], trailer[1]])
        };
        let fhp = header.first_header_pointer;

        Ok(FrameRecord {
            scid: header.scid,
            vcid: header.vcid,
            sequence: u32::from(header.vc_count),
            max_sequence: TmFrameHeader::VC_COUNT_MAX,
            format: header.format(),
            header_len,
            data_len: dat.len() - header_len - trailer_len,
            // sync flag set means the data field is not octet synchronized and the
            // first header pointer is undefined
            data_pointer: if header.sync { None } else { Some(fhp) },
            continuation: fhp == TmFrameHeader::FHP_CONTINUATION,
            idle: fhp == TmFrameHeader::FHP_IDLE,
            dead: false,
            bad,
            station: StationInfo::default(),
            from_simulator: false,
            data: dat,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_header() {
        let dat: &[u8] = &[
            // version 0, scid 0x2a5, vcid 3, ocf
            0b0010_1010, 0b0101_0111,
            // mc count, vc count
            0x10, 0x20,
            // no secondary header, sync 0, order 0, seg len 3, fhp 0x123
            0b0001_1001, 0x23,
        ];
        let header = TmFrameHeader::decode(dat).unwrap();
        assert_eq!(
            header,
            TmFrameHeader {
                version: 0,
                scid: 0x2a5,
                vcid: 3,
                ocf: true,
                mc_count: 0x10,
                vc_count: 0x20,
                secondary_header: false,
                sync: false,
                packet_order: false,
                segment_length_id: 3,
                first_header_pointer: 0x123,
            }
        );
        assert_eq!(header.format(), FrameFormat::CcsdsTmV1);
        assert!(TmFrameHeader::decode(&dat[..5]).is_none());
    }

    fn frame_bytes(fhp: u16, ocf: bool, body: &[u8]) -> Vec<u8> {
        let mut dat = vec![0x00, 0x12 | u8::from(ocf), 0x00, 0x07];
        dat.extend(fhp.to_be_bytes());
        dat.extend(body);
        dat
    }

    #[test]
    fn test_from_tm_frame() {
        let mut dat = frame_bytes(0x002, true, &[0xaa; 10]);
        let crc = CRC16.checksum(&dat);
        dat.extend(crc.to_be_bytes());

        let frame = FrameRecord::from_tm_frame(dat.clone(), true).unwrap();
        assert_eq!(frame.vcid, 1);
        assert_eq!(frame.scid, 1);
        assert_eq!(frame.sequence, 7);
        assert_eq!(frame.header_len, 6);
        // 10 body bytes less 4 ocf bytes
        assert_eq!(frame.data_len, 6);
        assert_eq!(frame.data_pointer, Some(2));
        assert!(!frame.bad);
        assert!(!frame.continuation);
        assert!(!frame.idle);
        assert_eq!(frame.data_area().unwrap(), &[0xaa; 6]);
        assert_eq!(frame.id(), FrameId { vcid: 1, sequence: 7 });

        let last = dat.len() - 1;
        dat[last] ^= 0x01;
        let frame = FrameRecord::from_tm_frame(dat, true).unwrap();
        assert!(frame.bad);
    }

    #[test]
    fn test_from_tm_frame_flags() {
        let frame =
            FrameRecord::from_tm_frame(frame_bytes(0x7ff, false, &[0; 8]), false).unwrap();
        assert!(frame.continuation);
        assert_eq!(frame.data_len, 8);

        let frame =
            FrameRecord::from_tm_frame(frame_bytes(0x7fe, false, &[0; 8]), false).unwrap();
        assert!(frame.idle);
    }

    #[test]
    fn test_from_tm_frame_secondary_header() {
        let mut dat = frame_bytes(0, false, &[0x02, 0xff, 0xff, 0x01, 0x02]);
        dat[4] |= 0x80;
        let frame = FrameRecord::from_tm_frame(dat, false).unwrap();
        assert_eq!(frame.header_len, 9);
        assert_eq!(frame.data_area().unwrap(), &[0x01, 0x02]);
    }

    #[test]
    fn test_from_tm_frame_short() {
        let zult = FrameRecord::from_tm_frame(vec![0, 0x03, 0, 0, 0, 0], true);
        assert!(matches!(zult, Err(Error::NotEnoughData { .. })));
    }
}
