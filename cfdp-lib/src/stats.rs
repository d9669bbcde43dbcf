//! Per-extractor counters.
use serde::Serialize;

/// Counters maintained by a frame extractor.
#[derive(Serialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct FrameStats {
    /// Frames accepted by the channel filters.
    pub frames_seen: u64,
    pub pdus_produced: u64,
    /// PDUs discarded as invalid.
    pub pdus_invalid: u64,
    pub frame_gaps: u64,
    /// Sequence counts skipped over by all gaps.
    pub frames_missed: u64,
    pub frame_regressions: u64,
    pub frame_repeats: u64,
    pub bad_frames: u64,
}

/// Counters maintained by a packet extractor.
#[derive(Serialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct PacketStats {
    /// Packets accepted by the channel and APID filters, including fill.
    pub packets_seen: u64,
    pub pdus_produced: u64,
    pub pdus_invalid: u64,
}

/// Counters common to both extractor kinds.
#[derive(Serialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct Stats {
    pub carriers_seen: u64,
    pub pdus_produced: u64,
    pub pdus_invalid: u64,
}

impl From<&FrameStats> for Stats {
    fn from(s: &FrameStats) -> Self {
        Stats {
            carriers_seen: s.frames_seen,
            pdus_produced: s.pdus_produced,
            pdus_invalid: s.pdus_invalid,
        }
    }
}

impl From<&PacketStats> for Stats {
    fn from(s: &PacketStats) -> Self {
        Stats {
            carriers_seen: s.packets_seen,
            pdus_produced: s.pdus_produced,
            pdus_invalid: s.pdus_invalid,
        }
    }
}
