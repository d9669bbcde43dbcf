//! Events produced by the extractors.
use std::fmt::Display;

use hifitime::Epoch;
use serde::{de::DeserializeOwned, Deserialize, Serialize};

use crate::carrier::{Apid, DssId, FrameId, PacketId, Scid, Vcid};
use crate::pdu::PduHeader;
use crate::{Error, Result};

/// Carriers a PDU was extracted from.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub enum Provenance {
    /// Frames that contributed bytes, in order, each listed once.
    Frames(Vec<FrameId>),
    Packet(PacketId),
}

/// A complete PDU and the metadata of the carrier(s) it was extracted from.
///
/// For PDUs spanning frames, station and time fields come from the first contributing
/// frame.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct PduEvent {
    /// Raw PDU bytes, header included.
    #[serde(with = "serde_bytes")]
    pub pdu: Vec<u8>,
    pub provenance: Provenance,
    pub scid: Scid,
    pub vcid: Vcid,
    pub apid: Option<Apid>,
    pub dss_id: DssId,
    pub relay_scid: Option<Scid>,
    /// Sequence count of the first contributing carrier.
    pub sequence_count: u32,
    pub ert: Option<Epoch>,
    pub scet: Option<Epoch>,
    pub sclk: Option<String>,
    pub lst: Option<String>,
    pub from_simulator: bool,
}

impl PduEvent {
    /// Decode the header of the contained PDU.
    ///
    /// # Errors
    /// [Error::NotEnoughData] if the PDU is shorter than its header.
    pub fn header(&self) -> Result<PduHeader> {
        PduHeader::decode(&self.pdu)
    }

    /// Encode to a self-describing binary (CBOR) envelope.
    ///
    /// # Errors
    /// [Error::Envelope] if serialization fails.
    pub fn to_binary(&self) -> Result<Vec<u8>> {
        to_binary(self)
    }

    /// Decode from an envelope produced by [PduEvent::to_binary].
    ///
    /// # Errors
    /// [Error::Envelope] if `dat` is not a valid envelope.
    pub fn from_binary(dat: &[u8]) -> Result<Self> {
        from_binary(dat)
    }
}

impl Display for PduEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "PduEvent{{scid={}, vcid={}, len={}, seq={}}}",
            self.scid,
            self.vcid,
            self.pdu.len(),
            self.sequence_count
        )
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AnomalyKind {
    BadFrame,
    RepeatedFrame,
    SequenceGap,
    SequenceRegression,
    InvalidPduHeader,
    InvalidPduData,
    BufferOverrun,
}

impl AnomalyKind {
    /// True for kinds that discard an in-flight PDU.
    #[must_use]
    pub fn discards_pdu(&self) -> bool {
        matches!(
            self,
            Self::InvalidPduHeader | Self::InvalidPduData | Self::BufferOverrun
        )
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Severity {
    Info,
    #[default]
    Warn,
    Error,
}

/// Diagnostic event describing a carrier or PDU anomaly.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Anomaly {
    pub kind: AnomalyKind,
    pub severity: Severity,
    pub message: String,
    pub vcid: Vcid,
    pub apid: Option<Apid>,
    /// Expected sequence count, for sequence anomalies.
    pub expected: Option<u32>,
    /// Received sequence count.
    pub actual: Option<u32>,
    pub ert: String,
}

impl Anomaly {
    pub fn new(kind: AnomalyKind, vcid: Vcid, message: impl Into<String>) -> Self {
        Self {
            kind,
            severity: Severity::Warn,
            message: message.into(),
            vcid,
            apid: None,
            expected: None,
            actual: None,
            ert: String::new(),
        }
    }

    #[must_use]
    pub fn with_apid(mut self, apid: Apid) -> Self {
        self.apid = Some(apid);
        self
    }

    #[must_use]
    pub fn with_sequence(mut self, expected: Option<u32>, actual: u32) -> Self {
        self.expected = expected;
        self.actual = Some(actual);
        self
    }

    #[must_use]
    pub fn with_ert(mut self, ert: String) -> Self {
        self.ert = ert;
        self
    }

    /// Encode to a self-describing binary (CBOR) envelope.
    ///
    /// # Errors
    /// [Error::Envelope] if serialization fails.
    pub fn to_binary(&self) -> Result<Vec<u8>> {
        to_binary(self)
    }

    /// # Errors
    /// [Error::Envelope] if `dat` is not a valid envelope.
    pub fn from_binary(dat: &[u8]) -> Result<Self> {
        from_binary(dat)
    }
}

impl Display for Anomaly {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?} vcid={}: {}", self.kind, self.vcid, self.message)
    }
}

fn to_binary<T: Serialize>(val: &T) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    ciborium::into_writer(val, &mut buf).map_err(|e| Error::Envelope(e.to_string()))?;
    Ok(buf)
}

fn from_binary<T: DeserializeOwned>(dat: &[u8]) -> Result<T> {
    ciborium::from_reader(dat).map_err(|e| Error::Envelope(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pdu_event() -> PduEvent {
        PduEvent {
            pdu: hex::decode("20000300010203aabbcc").unwrap(),
            provenance: Provenance::Frames(vec![
                FrameId {
                    vcid: 1,
                    sequence: 254,
                },
                FrameId {
                    vcid: 1,
                    sequence: 255,
                },
            ]),
            scid: 42,
            vcid: 1,
            apid: None,
            dss_id: 14,
            relay_scid: Some(76),
            sequence_count: 254,
            ert: None,
            scet: None,
            sclk: Some("0123456789.000".to_string()),
            lst: None,
            from_simulator: true,
        }
    }

    #[test]
    fn test_pdu_event_envelope() {
        let event = pdu_event();
        let dat = event.to_binary().unwrap();
        assert_eq!(PduEvent::from_binary(&dat).unwrap(), event);
    }

    #[test]
    fn test_pdu_event_header() {
        let header = pdu_event().header().unwrap();
        assert_eq!(header.pdu_length(), 10);
        assert!(header.is_valid());
    }

    #[test]
    fn test_envelope_garbage() {
        let zult = PduEvent::from_binary(&[0xff, 0x00, 0x13]);
        assert!(matches!(zult, Err(Error::Envelope(_))), "got {zult:?}");
    }

    #[test]
    fn test_anomaly() {
        let anomaly = Anomaly::new(AnomalyKind::SequenceGap, 3, "gap")
            .with_sequence(Some(3), 5)
            .with_apid(1280);
        assert_eq!(anomaly.severity, Severity::Warn);
        assert_eq!(anomaly.expected, Some(3));
        assert_eq!(anomaly.actual, Some(5));
        assert!(!anomaly.kind.discards_pdu());
        assert!(AnomalyKind::BufferOverrun.discards_pdu());

        let dat = anomaly.to_binary().unwrap();
        assert_eq!(Anomaly::from_binary(&dat).unwrap(), anomaly);
    }
}
