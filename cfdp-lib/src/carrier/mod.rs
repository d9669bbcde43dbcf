//! Telemetry carriers: transfer frames and space packets that PDUs are extracted from.
mod frame;
mod packet;

pub use frame::*;
pub use packet::*;

use std::fmt::Display;

use hifitime::Epoch;
use serde::{Deserialize, Serialize};

pub type Scid = u16;
pub type Vcid = u16;
pub type Apid = u16;
pub type DssId = u16;

/// Ground station receipt information attached to a carrier.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct StationInfo {
    pub dss_id: DssId,
    /// Earth receive time
    pub ert: Option<Epoch>,
    pub relay_scid: Option<Scid>,
}

impl StationInfo {
    /// ERT formatted for messages, or an empty string if unknown.
    #[must_use]
    pub fn ert_string(&self) -> String {
        self.ert.map(|e| e.to_string()).unwrap_or_default()
    }
}

/// Transfer frame formats. Only [FrameFormat::CcsdsTmV1] frames carry PDUs the frame
/// extractor understands.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FrameFormat {
    #[default]
    CcsdsTmV1,
    CcsdsAos,
    Other,
}

/// Identity of a transfer frame within a channel.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FrameId {
    pub vcid: Vcid,
    pub sequence: u32,
}

impl Display for FrameId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "vcid={} vcfc={}", self.vcid, self.sequence)
    }
}

/// Identity of a space packet.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PacketId {
    pub apid: Apid,
    pub sequence: u16,
}

impl Display for PacketId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "apid={} seq={}", self.apid, self.sequence)
    }
}
