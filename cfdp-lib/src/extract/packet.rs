use tracing::{debug, span, trace, warn, Level, Span};

use super::{Effect, Extractor};
use crate::carrier::PacketRecord;
use crate::config::ExtractorConfig;
use crate::event::{Anomaly, AnomalyKind, PduEvent, Provenance};
use crate::pdu::{crc_matches, PduHeader, ReassemblyBuffer};
use crate::stats::{PacketStats, Stats};
use crate::Result;

/// Extracts PDUs from space packets.
///
/// A packet carries at most one PDU and PDUs never span packets, so no state is carried
/// between packets. Bytes following the PDU in a packet are ignored.
pub struct PacketPduExtractor {
    config: ExtractorConfig,
    buffer: ReassemblyBuffer,
    stats: PacketStats,
    span: Span,
}

impl PacketPduExtractor {
    /// `config` is expected to have passed [ExtractorConfig::validate]; see
    /// [PacketPduExtractor::try_new].
    #[must_use]
    pub fn new(config: ExtractorConfig) -> Self {
        let span = span!(Level::DEBUG, "packet_pdu_extractor", vcid = config.vcid);
        Self {
            buffer: ReassemblyBuffer::new(config.max_pdu_length),
            config,
            stats: PacketStats::default(),
            span,
        }
    }

    /// Validate `config` and create an extractor.
    ///
    /// # Errors
    /// [crate::Error::Config] if `config` is not valid.
    pub fn try_new(config: ExtractorConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self::new(config))
    }

    #[must_use]
    pub fn stats(&self) -> &PacketStats {
        &self.stats
    }

    #[must_use]
    pub fn config(&self) -> &ExtractorConfig {
        &self.config
    }

    fn accept(&self, packet: &PacketRecord) -> bool {
        self.config.filter.accept(packet.scid, &packet.station)
            && packet.vcid == self.config.vcid
            && self.config.cfdp_apids.contains(&packet.apid())
    }

    fn anomaly(&mut self, kind: AnomalyKind, packet: &PacketRecord, message: String) -> Effect {
        let ert = packet.station.ert_string();
        let message = format!(
            "{message}, VC={}, APID={}, ERT={ert}, packet SPSC={}",
            self.config.vcid,
            packet.apid(),
            packet.header.sequence_id
        );
        warn!(?kind, apid = packet.apid(), "{message}");
        if kind.discards_pdu() {
            self.stats.pdus_invalid += 1;
        }
        self.buffer.reset();
        Effect::Anomaly(
            Anomaly::new(kind, self.config.vcid, message)
                .with_apid(packet.apid())
                .with_ert(ert),
        )
    }

    fn extract(&mut self, packet: &PacketRecord, effects: &mut Vec<Effect>) {
        let dat = packet.data.get(packet.data_offset()..).unwrap_or_default();

        let mut header = PduHeader::new();
        if header.load_fixed_header(dat, 0).is_err() {
            debug!(
                apid = packet.apid(),
                seq = packet.header.sequence_id,
                "incomplete pdu fixed header, dropping"
            );
            return;
        }
        if header.load(dat, 0).is_err() {
            let msg = format!(
                "All data for a PDU could not be found, header length={}, available={}",
                header.header_length(),
                dat.len()
            );
            effects.push(self.anomaly(AnomalyKind::InvalidPduData, packet, msg));
            return;
        }
        trace!(%header, "pdu header complete");
        effects.push(Effect::HeaderDecoded(header.clone()));

        let pdu_len = header.pdu_length();
        if !header.is_valid() {
            let msg = format!("PDU abandoned because header was corrupt, length={pdu_len}");
            effects.push(self.anomaly(AnomalyKind::InvalidPduHeader, packet, msg));
            return;
        }
        if pdu_len > dat.len() {
            let msg = format!(
                "All data for a PDU could not be found, length={pdu_len}, available={}",
                dat.len()
            );
            effects.push(self.anomaly(AnomalyKind::InvalidPduData, packet, msg));
            return;
        }
        if let Err(err) = self.buffer.append(&dat[..pdu_len]) {
            let msg = format!("PDU buffer overrun: {err}");
            effects.push(self.anomaly(AnomalyKind::BufferOverrun, packet, msg));
            return;
        }
        effects.push(Effect::BytesConsumed(pdu_len));

        if self.config.verify_crc && header.crc_flag && !crc_matches(self.buffer.as_slice()) {
            let msg = format!("PDU CRC check failed, length={pdu_len}");
            effects.push(self.anomaly(AnomalyKind::InvalidPduData, packet, msg));
            return;
        }

        let event = PduEvent {
            pdu: self.buffer.take(),
            provenance: Provenance::Packet(packet.id()),
            scid: packet.scid,
            vcid: packet.vcid,
            apid: Some(packet.apid()),
            dss_id: packet.station.dss_id,
            relay_scid: packet.station.relay_scid,
            sequence_count: u32::from(packet.header.sequence_id),
            ert: packet.station.ert,
            scet: packet.scet,
            sclk: packet.sclk.clone(),
            lst: packet.lst.clone(),
            from_simulator: packet.from_simulator,
        };
        debug!(%event, "pdu complete");
        self.stats.pdus_produced += 1;
        effects.push(Effect::Pdu(event));
    }
}

impl Extractor for PacketPduExtractor {
    type Record = PacketRecord;

    fn consume(&mut self, packet: &PacketRecord) -> Vec<Effect> {
        let span = self.span.clone();
        let _guard = span.enter();

        if !self.accept(packet) {
            return Vec::new();
        }
        self.stats.packets_seen += 1;
        if packet.is_fill() {
            trace!(apid = packet.apid(), "fill packet");
            return Vec::new();
        }
        trace!(
            apid = packet.apid(),
            seq = packet.header.sequence_id,
            len = packet.data.len(),
            "new packet"
        );

        let mut effects = Vec::new();
        self.buffer.reset();
        self.extract(packet, &mut effects);
        self.buffer.reset();
        effects
    }

    fn flush(&mut self) -> Vec<Effect> {
        self.buffer.reset();
        Vec::new()
    }

    fn totals(&self) -> Stats {
        Stats::from(&self.stats)
    }
}
