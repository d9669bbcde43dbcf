//! PDU extractors.
//!
//! Extractors are synchronous state machines. Each call to [Extractor::consume] processes
//! one carrier record completely and returns the ordered [Effect]s it produced, so an
//! extractor can be driven directly, e.g., in tests, or through
//! [crate::service::ExtractService].
mod frame;
mod packet;

pub use frame::{FramePduExtractor, State};
pub use packet::PacketPduExtractor;

use crate::bus::{Message, MessageKind};
use crate::carrier::{FrameRecord, PacketRecord};
use crate::event::{Anomaly, PduEvent};
use crate::pdu::PduHeader;
use crate::stats::Stats;

/// Observable outcome of consuming a carrier.
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    /// Bytes copied from a carrier into the reassembly buffer.
    BytesConsumed(usize),
    /// A PDU header was completely decoded.
    HeaderDecoded(PduHeader),
    Pdu(PduEvent),
    Anomaly(Anomaly),
}

impl Effect {
    /// Convert to a bus message, or `None` for effects that are not published.
    #[must_use]
    pub fn into_message(self) -> Option<Message> {
        match self {
            Effect::Pdu(event) => Some(Message::CfdpPdu(event)),
            Effect::Anomaly(anomaly) => Some(Message::Anomaly(anomaly)),
            Effect::BytesConsumed(_) | Effect::HeaderDecoded(_) => None,
        }
    }
}

/// A carrier record type an extractor consumes.
pub trait Carrier: Sized {
    /// Bus message kind carrying this record type.
    const KIND: MessageKind;

    fn from_message(msg: &Message) -> Option<&Self>;
}

impl Carrier for FrameRecord {
    const KIND: MessageKind = MessageKind::TelemetryFrame;

    fn from_message(msg: &Message) -> Option<&Self> {
        match msg {
            Message::TelemetryFrame(frame) => Some(frame),
            _ => None,
        }
    }
}

impl Carrier for PacketRecord {
    const KIND: MessageKind = MessageKind::TelemetryPacket;

    fn from_message(msg: &Message) -> Option<&Self> {
        match msg {
            Message::TelemetryPacket(packet) => Some(packet),
            _ => None,
        }
    }
}

pub trait Extractor: Send {
    type Record: Carrier;

    /// Process a single carrier record.
    fn consume(&mut self, record: &Self::Record) -> Vec<Effect>;

    /// Discard any PDU in progress, e.g., at the end of data.
    fn flush(&mut self) -> Vec<Effect>;

    fn totals(&self) -> Stats;
}

/// PDUs contained in `effects`.
pub fn pdus(effects: &[Effect]) -> impl Iterator<Item = &PduEvent> {
    effects.iter().filter_map(|e| match e {
        Effect::Pdu(event) => Some(event),
        _ => None,
    })
}

/// Anomalies contained in `effects`.
pub fn anomalies(effects: &[Effect]) -> impl Iterator<Item = &Anomaly> {
    effects.iter().filter_map(|e| match e {
        Effect::Anomaly(anomaly) => Some(anomaly),
        _ => None,
    })
}
