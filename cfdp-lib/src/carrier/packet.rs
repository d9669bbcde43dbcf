use std::io::{ErrorKind, Read, Result as IOResult};

use hifitime::Epoch;
use serde::{Deserialize, Serialize};
use typed_builder::TypedBuilder;

use super::{Apid, PacketId, Scid, StationInfo, Vcid};
use crate::timecode::{self, Format};
use crate::Result;

/// CCSDS space packet primary header.
#[derive(Serialize, Deserialize, Debug, Copy, Clone, PartialEq, Eq)]
pub struct PrimaryHeader {
    pub version: u8,
    pub type_flag: u8,
    pub has_secondary_header: bool,
    pub apid: Apid,
    pub sequence_flags: u8,
    pub sequence_id: u16,
    pub len_minus1: u16,
}

impl PrimaryHeader {
    /// Size of a ``PrimaryHeader``
    pub const LEN: usize = 6;
    /// APID reserved for idle (fill) packets.
    pub const FILL_APID: Apid = 0x7ff;

    /// Decode from bytes. Returns `None` if there are not enough bytes to construct the
    /// header.
    #[must_use]
    pub fn decode(buf: &[u8]) -> Option<Self> {
        if buf.len() < Self::LEN {
            return None;
        }
        let d1 = u16::from_be_bytes([buf[0], buf[1]]);
        let d2 = u16::from_be_bytes([buf[2], buf[3]]);
        let d3 = u16::from_be_bytes([buf[4], buf[5]]);

        Some(PrimaryHeader {
            version: (d1 >> 13 & 0x7) as u8,
            type_flag: (d1 >> 12 & 0x1) as u8,
            has_secondary_header: (d1 >> 11 & 0x1) == 1,
            apid: (d1 & 0x7ff),
            sequence_flags: (d2 >> 14 & 0x3) as u8,
            sequence_id: (d2 & 0x3fff),
            len_minus1: d3,
        })
    }

    /// Total packet length, including this header.
    #[must_use]
    pub fn packet_len(&self) -> usize {
        Self::LEN + self.len_minus1 as usize + 1
    }
}

/// A space packet as delivered to the packet extractor.
#[derive(TypedBuilder, Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct PacketRecord {
    pub header: PrimaryHeader,
    #[builder(default)]
    pub scid: Scid,
    #[builder(default)]
    pub vcid: Vcid,
    /// Length of the secondary header, if any, following the primary header.
    #[builder(default)]
    pub secondary_header_len: usize,
    #[builder(default)]
    pub station: StationInfo,
    /// Spacecraft event time
    #[builder(default, setter(strip_option))]
    pub scet: Option<Epoch>,
    /// Spacecraft clock, as formatted by the mission.
    #[builder(default, setter(strip_option, into))]
    pub sclk: Option<String>,
    /// Local solar time
    #[builder(default, setter(strip_option, into))]
    pub lst: Option<String>,
    /// Frame counts of the frames this packet was extracted from.
    #[builder(default)]
    pub source_frames: Vec<u32>,
    #[builder(default)]
    pub from_simulator: bool,
    /// All packet bytes, including headers
    #[serde(with = "serde_bytes")]
    pub data: Vec<u8>,
}

impl PacketRecord {
    /// Create a record from packet bytes, or `None` if there are not enough bytes for a
    /// primary header.
    #[must_use]
    pub fn decode(dat: Vec<u8>) -> Option<Self> {
        let header = PrimaryHeader::decode(&dat)?;
        Some(PacketRecord::builder().header(header).data(dat).build())
    }

    #[must_use]
    pub fn id(&self) -> PacketId {
        PacketId {
            apid: self.header.apid,
            sequence: self.header.sequence_id,
        }
    }

    #[must_use]
    pub fn apid(&self) -> Apid {
        self.header.apid
    }

    #[must_use]
    pub fn is_fill(&self) -> bool {
        self.header.apid == PrimaryHeader::FILL_APID
    }

    /// Offset of the user data following the primary and secondary headers.
    ///
    /// `secondary_header_len` only applies when the primary header flags a secondary
    /// header.
    #[must_use]
    pub fn data_offset(&self) -> usize {
        if self.header.has_secondary_header {
            PrimaryHeader::LEN + self.secondary_header_len
        } else {
            PrimaryHeader::LEN
        }
    }

    /// Set the spacecraft event time from a secondary header starting with a timecode of
    /// `format`. The secondary header is assumed to be at least as long as the timecode.
    ///
    /// Packets without a secondary header are left unchanged.
    ///
    /// # Errors
    /// If the timecode cannot be decoded.
    pub fn decode_scet(&mut self, format: &Format) -> Result<()> {
        if !self.header.has_secondary_header {
            return Ok(());
        }
        let buf = self.data.get(PrimaryHeader::LEN..).unwrap_or_default();
        self.scet = Some(timecode::decode(format, buf)?);
        self.secondary_header_len = self.secondary_header_len.max(format.len());
        Ok(())
    }
}

/// Iterator of packet bytes read from a stream of concatenated space packets.
pub struct PacketReaderIter<R>
where
    R: Read,
{
    reader: R,
    offset: usize,
}

impl<R> PacketReaderIter<R>
where
    R: Read,
{
    pub fn new(reader: R) -> Self {
        PacketReaderIter { reader, offset: 0 }
    }

    /// Byte offset in the stream of the next packet.
    #[must_use]
    pub fn offset(&self) -> usize {
        self.offset
    }
}

impl<R> Iterator for PacketReaderIter<R>
where
    R: Read,
{
    type Item = IOResult<PacketRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        let mut buf = vec![0u8; PrimaryHeader::LEN];
        if let Err(err) = self.reader.read_exact(&mut buf) {
            if err.kind() == ErrorKind::UnexpectedEof {
                return None;
            }
            return Some(Err(err));
        }
        // can't fail, we just read enough bytes
        let header = PrimaryHeader::decode(&buf)?;
        buf.resize(header.packet_len(), 0);
        if let Err(err) = self.reader.read_exact(&mut buf[PrimaryHeader::LEN..]) {
            return Some(Err(err));
        }
        self.offset += buf.len();
        Some(Ok(PacketRecord::builder().header(header).data(buf).build()))
    }
}

/// Read space packets from `reader`. Iteration ends at the end of the stream; a packet
/// truncated by the end of the stream is an error.
pub fn read_packets<R: Read>(reader: R) -> PacketReaderIter<R> {
    PacketReaderIter::new(reader)
}
