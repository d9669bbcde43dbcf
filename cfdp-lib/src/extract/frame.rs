use tracing::{debug, span, trace, warn, Level, Span};

use super::{Effect, Extractor};
use crate::carrier::{FrameFormat, FrameId, FrameRecord, Scid, StationInfo};
use crate::config::ExtractorConfig;
use crate::event::{Anomaly, AnomalyKind, PduEvent, Provenance};
use crate::pdu::{crc_matches, PduHeader, ReassemblyBuffer};
use crate::stats::{FrameStats, Stats};
use crate::Result;

/// Reassembly state carried between frames.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum State {
    /// No PDU in progress; waiting for a frame with a first header pointer.
    #[default]
    FirstPdu,
    /// The next byte read starts a PDU header.
    NextPdu,
    /// Part of the fixed header has been read.
    NeedFixedHeader,
    /// The fixed header has been decoded and part of the variable header read.
    NeedVariableHeader(PduHeader),
    /// The header is complete and valid; reading the data field.
    NeedData(PduHeader),
}

/// Why an in-flight PDU is being discarded.
#[derive(Debug, Clone, Copy)]
enum Flush {
    DataPointer,
    Gap,
    Idle,
    EndOfData,
}

/// Carrier metadata from the first frame contributing to the PDU in progress.
#[derive(Debug, Clone)]
struct Origin {
    scid: Scid,
    sequence: u32,
    station: StationInfo,
    from_simulator: bool,
}

/// Extracts PDUs from CCSDS TM version 1 transfer frames on a single virtual channel.
///
/// PDUs may span frames and a frame may contain several PDUs. The first header pointer of
/// each frame locates the first PDU header in the frame, or marks the frame as a
/// continuation of the PDU in progress.
///
/// Any carrier or PDU anomaly discards the PDU in progress and is reported as an
/// [Effect::Anomaly]; nothing is fatal.
pub struct FramePduExtractor {
    config: ExtractorConfig,
    buffer: ReassemblyBuffer,
    state: State,
    stats: FrameStats,
    last_sequence: Option<u32>,
    /// Bytes expected to continue the PDU in progress at the start of the next frame.
    continuation: usize,
    pdu_frames: Vec<FrameId>,
    origin: Option<Origin>,
    span: Span,
}

impl FramePduExtractor {
    /// Create an extractor for `config.vcid`.
    ///
    /// `config` is expected to have passed [ExtractorConfig::validate]; a zero
    /// `max_pdu_length` reports every PDU as a buffer overrun. Use
    /// [FramePduExtractor::try_new] for configs that have not been checked.
    #[must_use]
    pub fn new(config: ExtractorConfig) -> Self {
        let span = span!(Level::DEBUG, "frame_pdu_extractor", vcid = config.vcid);
        Self {
            buffer: ReassemblyBuffer::new(config.max_pdu_length),
            config,
            state: State::FirstPdu,
            stats: FrameStats::default(),
            last_sequence: None,
            continuation: 0,
            pdu_frames: Vec::new(),
            origin: None,
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
    pub fn stats(&self) -> &FrameStats {
        &self.stats
    }

    #[must_use]
    pub fn state(&self) -> &State {
        &self.state
    }

    #[must_use]
    pub fn config(&self) -> &ExtractorConfig {
        &self.config
    }

    /// Bytes of the PDU in progress.
    #[must_use]
    pub fn bytes_read(&self) -> usize {
        self.buffer.bytes_read()
    }

    fn accept(&self, frame: &FrameRecord) -> bool {
        self.config.filter.accept(frame.scid, &frame.station)
            && frame.vcid == self.config.vcid
            && self.config.is_cfdp_vcid(frame.vcid)
    }

    fn anomaly(&mut self, kind: AnomalyKind, ert: String, message: String) -> Anomaly {
        warn!(?kind, "{message}");
        if kind.discards_pdu() {
            self.stats.pdus_invalid += 1;
        }
        Anomaly::new(kind, self.config.vcid, message).with_ert(ert)
    }

    fn reset_pdu(&mut self) {
        self.buffer.reset();
        self.pdu_frames.clear();
        self.origin = None;
        self.continuation = 0;
    }

    /// Discard the PDU in progress, reporting it if any bytes had been read.
    fn flush_pdu(&mut self, reason: Flush, ert: String) -> Option<Effect> {
        let bytes_read = self.buffer.bytes_read();
        let effect = if bytes_read > 0 {
            let frames = self
                .pdu_frames
                .iter()
                .map(|id| id.sequence.to_string())
                .collect::<Vec<_>>()
                .join(",");
            let (kind, message) = match (&self.state, reason) {
                (State::NeedData(header), Flush::DataPointer) => (
                    AnomalyKind::InvalidPduData,
                    format!(
                        "PDU abandoned because of an invalid first header pointer, VC={}, length={}, read={bytes_read}, frame VCFC(s)={frames}",
                        self.config.vcid,
                        header.pdu_length(),
                    ),
                ),
                (State::NeedData(header), _) => (
                    AnomalyKind::InvalidPduData,
                    format!(
                        "All data for a PDU could not be found ({reason:?}), VC={}, length={}, read={bytes_read}, frame VCFC(s)={frames}",
                        self.config.vcid,
                        header.pdu_length(),
                    ),
                ),
                (_, _) => (
                    AnomalyKind::InvalidPduHeader,
                    format!(
                        "A PDU could not be constructed because all header data could not be found ({reason:?}), VC={}, read={bytes_read}, frame VCFC(s)={frames}",
                        self.config.vcid,
                    ),
                ),
            };
            Some(Effect::Anomaly(self.anomaly(kind, ert, message)))
        } else {
            None
        };
        self.reset_pdu();
        effect
    }

    /// Copy `count` bytes at `pos` into the reassembly buffer.
    fn copy(
        &mut self,
        frame: &FrameRecord,
        area: &[u8],
        pos: &mut usize,
        count: usize,
        effects: &mut Vec<Effect>,
    ) -> bool {
        if count == 0 {
            return true;
        }
        if let Err(err) = self.buffer.append(&area[*pos..*pos + count]) {
            self.overrun(frame, area, pos, &err.to_string(), effects);
            return false;
        }
        if self.origin.is_none() {
            trace!(ert = %frame.station.ert_string(), vcfc = frame.sequence, "pdu origin");
            self.origin = Some(Origin {
                scid: frame.scid,
                sequence: frame.sequence,
                station: frame.station.clone(),
                from_simulator: frame.from_simulator,
            });
        }
        let id = frame.id();
        if self.pdu_frames.last() != Some(&id) {
            self.pdu_frames.push(id);
        }
        *pos += count;
        effects.push(Effect::BytesConsumed(count));
        true
    }

    /// Report a PDU that cannot fit in the reassembly buffer, discard it and the rest of
    /// the frame.
    fn overrun(
        &mut self,
        frame: &FrameRecord,
        area: &[u8],
        pos: &mut usize,
        detail: &str,
        effects: &mut Vec<Effect>,
    ) {
        let message = format!(
            "PDU buffer overrun (PDU size exceeds maximum PDU length {}): {detail}, vcfc={}",
            self.buffer.capacity(),
            frame.sequence
        );
        let anomaly = self.anomaly(
            AnomalyKind::BufferOverrun,
            frame.station.ert_string(),
            message,
        );
        effects.push(Effect::Anomaly(anomaly));
        self.reset_pdu();
        self.state = State::FirstPdu;
        *pos = area.len();
    }

    /// Report a corrupt header, discard the PDU and the rest of the frame.
    fn invalid_header(
        &mut self,
        detail: &str,
        frame: &FrameRecord,
        area: &[u8],
        pos: &mut usize,
        effects: &mut Vec<Effect>,
    ) {
        let message = format!(
            "PDU abandoned because header was corrupt, VC={}, {detail}, ERT={}, frame VCFC={}",
            self.config.vcid,
            frame.station.ert_string(),
            frame.sequence,
        );
        let anomaly = self.anomaly(
            AnomalyKind::InvalidPduHeader,
            frame.station.ert_string(),
            message,
        );
        effects.push(Effect::Anomaly(anomaly));
        self.reset_pdu();
        self.state = State::NextPdu;
        *pos = area.len();
    }

    /// Read as much of a PDU header as is available, decoding and validating it once
    /// complete.
    fn read_header(
        &mut self,
        mut header: PduHeader,
        frame: &FrameRecord,
        area: &[u8],
        pos: &mut usize,
        effects: &mut Vec<Effect>,
    ) {
        if !header.is_fixed_loaded() {
            let want = PduHeader::FIXED_LEN - self.buffer.bytes_read();
            let count = want.min(area.len() - *pos);
            if !self.copy(frame, area, pos, count, effects) {
                return;
            }
            if self.buffer.bytes_read() < PduHeader::FIXED_LEN {
                trace!(read = self.buffer.bytes_read(), "fixed header spans frames");
                self.continuation = PduHeader::FIXED_LEN - self.buffer.bytes_read();
                self.state = State::NeedFixedHeader;
                return;
            }
            if let Err(err) = header.load_fixed_header(self.buffer.as_slice(), 0) {
                self.invalid_header(&err.to_string(), frame, area, pos, effects);
                return;
            }
            trace!(%header, "fixed header complete");
            if header.header_length() > self.buffer.capacity() {
                let detail = format!("header length {}", header.header_length());
                self.overrun(frame, area, pos, &detail, effects);
                return;
            }
        }

        let want = header.header_length() - self.buffer.bytes_read();
        let count = want.min(area.len() - *pos);
        if !self.copy(frame, area, pos, count, effects) {
            return;
        }
        if self.buffer.bytes_read() < header.header_length() {
            trace!(read = self.buffer.bytes_read(), "variable header spans frames");
            self.continuation = header.pdu_length() - self.buffer.bytes_read();
            self.state = State::NeedVariableHeader(header);
            return;
        }
        if let Err(err) = header.load(self.buffer.as_slice(), 0) {
            self.invalid_header(&err.to_string(), frame, area, pos, effects);
            return;
        }
        effects.push(Effect::HeaderDecoded(header.clone()));

        if !header.is_valid() {
            let detail = format!("length={}", header.pdu_length());
            self.invalid_header(&detail, frame, area, pos, effects);
            return;
        }
        if header.pdu_length() > self.buffer.capacity() {
            let detail = format!("pdu length {}", header.pdu_length());
            self.overrun(frame, area, pos, &detail, effects);
            return;
        }

        trace!(%header, "pdu header complete");
        self.continuation = header.pdu_length() - self.buffer.bytes_read();
        self.state = State::NeedData(header);
    }

    #[allow(clippy::too_many_arguments)]
    fn read_data(
        &mut self,
        header: PduHeader,
        frame: &FrameRecord,
        area: &[u8],
        dp: usize,
        first: bool,
        pos: &mut usize,
        effects: &mut Vec<Effect>,
    ) {
        let remaining = header.pdu_length() - self.buffer.bytes_read();
        if first && !frame.continuation {
            if self.continuation != dp && remaining != dp && self.config.correct_data_pointer {
                debug!(
                    dp,
                    continuation = self.continuation,
                    remaining,
                    "first header pointer disagrees with pdu in progress"
                );
                self.state = State::NeedData(header);
                if let Some(effect) = self.flush_pdu(Flush::DataPointer, frame.station.ert_string())
                {
                    effects.push(effect);
                }
                *pos = dp.min(area.len());
                self.state = State::NextPdu;
                return;
            }
        }

        let count = remaining.min(area.len() - *pos);
        if !self.copy(frame, area, pos, count, effects) {
            return;
        }
        if count < remaining {
            trace!(left = remaining - count, "pdu continues in next frame");
            self.continuation = remaining - count;
            self.state = State::NeedData(header);
            return;
        }

        self.emit(&header, frame, effects);

        if frame.continuation {
            // no pdu starts in a continuation frame
            *pos = area.len();
            self.state = State::FirstPdu;
        } else if self.config.stop_flag.is_some() && area.get(*pos) == self.config.stop_flag.as_ref()
        {
            trace!(vcfc = frame.sequence, "pdu stop flag, discarding rest of frame");
            *pos = area.len();
            self.state = State::FirstPdu;
        } else {
            self.state = State::NextPdu;
        }
    }

    fn emit(&mut self, header: &PduHeader, frame: &FrameRecord, effects: &mut Vec<Effect>) {
        if self.config.verify_crc && header.crc_flag && !crc_matches(self.buffer.as_slice()) {
            let message = format!(
                "PDU CRC check failed, VC={}, length={}, frame VCFC={}",
                self.config.vcid,
                header.pdu_length(),
                frame.sequence
            );
            let anomaly = self.anomaly(
                AnomalyKind::InvalidPduData,
                frame.station.ert_string(),
                message,
            );
            effects.push(Effect::Anomaly(anomaly));
            self.reset_pdu();
            return;
        }

        let origin = self.origin.take().unwrap_or_else(|| Origin {
            scid: frame.scid,
            sequence: frame.sequence,
            station: frame.station.clone(),
            from_simulator: frame.from_simulator,
        });
        let event = PduEvent {
            pdu: self.buffer.take(),
            provenance: Provenance::Frames(std::mem::take(&mut self.pdu_frames)),
            scid: origin.scid,
            vcid: self.config.vcid,
            apid: None,
            dss_id: origin.station.dss_id,
            relay_scid: origin.station.relay_scid,
            sequence_count: origin.sequence,
            ert: origin.station.ert,
            scet: None,
            sclk: None,
            lst: None,
            from_simulator: origin.from_simulator,
        };
        debug!(%event, %header, "pdu complete");
        self.stats.pdus_produced += 1;
        self.reset_pdu();
        effects.push(Effect::Pdu(event));
    }

    /// Run one state machine step starting at `pos`.
    fn step(
        &mut self,
        frame: &FrameRecord,
        area: &[u8],
        dp: usize,
        first: bool,
        pos: &mut usize,
        effects: &mut Vec<Effect>,
    ) {
        let mut state = std::mem::take(&mut self.state);
        // a frame starting on a pdu boundary is located by its data pointer
        if first && state == State::NextPdu && self.buffer.is_empty() {
            state = State::FirstPdu;
        }
        trace!(?state, first, pos = *pos, read = self.buffer.bytes_read(), "step");

        match state {
            State::FirstPdu => {
                if frame.continuation {
                    trace!(vcfc = frame.sequence, "continuation with no pdu in progress, discarding frame");
                    *pos = area.len();
                    self.state = State::FirstPdu;
                } else if dp >= area.len() {
                    warn!(
                        vcfc = frame.sequence,
                        dp,
                        len = area.len(),
                        "first header pointer beyond data area, discarding frame"
                    );
                    *pos = area.len();
                    self.state = State::FirstPdu;
                } else {
                    *pos = dp;
                    self.reset_pdu();
                    self.state = State::NextPdu;
                }
            }
            State::NextPdu | State::NeedFixedHeader => {
                self.read_header(PduHeader::new(), frame, area, pos, effects);
            }
            State::NeedVariableHeader(header) => {
                self.read_header(header, frame, area, pos, effects);
            }
            State::NeedData(header) => {
                self.read_data(header, frame, area, dp, first, pos, effects);
            }
        }
    }

    /// Check the frame sequence count, reporting gaps and regressions.
    fn check_sequence(&mut self, frame: &FrameRecord, effects: &mut Vec<Effect>) {
        let seq = frame.sequence;
        let Some(last) = self.last_sequence else {
            return;
        };
        let modulus = u64::from(frame.max_sequence) + 1;
        #[allow(clippy::cast_possible_truncation)]
        let expected = ((u64::from(last) + 1) % modulus) as u32;
        if seq == expected {
            return;
        }
        if seq == 0 {
            warn!(last, "unexpected frame sequence rollover, vcfc={last} followed by 0");
            return;
        }

        let ert = frame.station.ert_string();
        let missed = missing_frames(seq, expected, modulus);
        let anomaly = if missed < modulus / 2 {
            self.stats.frame_gaps += 1;
            self.stats.frames_missed += missed;
            let last_missing = (u64::from(seq) + modulus - 1) % modulus;
            let message = format!(
                "Frame sequence gap, VC={}, expected vcfc={expected}, received vcfc={seq}, missing {missed} vcfc {expected}..{last_missing}, ERT={ert}",
                frame.vcid,
            );
            self.anomaly(AnomalyKind::SequenceGap, ert.clone(), message)
        } else {
            self.stats.frame_regressions += 1;
            let message = format!(
                "Frame sequence regression, VC={}, expected vcfc={expected}, received vcfc={seq}, ERT={ert}",
                frame.vcid,
            );
            self.anomaly(AnomalyKind::SequenceRegression, ert.clone(), message)
        };
        effects.push(Effect::Anomaly(anomaly.with_sequence(Some(expected), seq)));

        if let Some(effect) = self.flush_pdu(Flush::Gap, ert) {
            effects.push(effect);
        }
        self.state = State::FirstPdu;
    }
}

/// Number of sequence counts between `expected` and `seq` in a counter space of size
/// `modulus`, accounting for rollover.
fn missing_frames(seq: u32, expected: u32, modulus: u64) -> u64 {
    (u64::from(seq) + modulus - u64::from(expected)) % modulus
}

impl Extractor for FramePduExtractor {
    type Record = FrameRecord;

    fn consume(&mut self, frame: &FrameRecord) -> Vec<Effect> {
        let span = self.span.clone();
        let _guard = span.enter();

        if !self.accept(frame) {
            return Vec::new();
        }
        if frame.format != FrameFormat::CcsdsTmV1 {
            warn!(format = ?frame.format, vcfc = frame.sequence, "unsupported frame format, dropping");
            return Vec::new();
        }
        let Some(dp) = frame.data_pointer else {
            warn!(vcfc = frame.sequence, "frame has no first header pointer, dropping");
            return Vec::new();
        };
        let Some(area) = frame.data_area() else {
            warn!(
                vcfc = frame.sequence,
                len = frame.data.len(),
                header_len = frame.header_len,
                data_len = frame.data_len,
                "frame data area exceeds frame, dropping"
            );
            return Vec::new();
        };
        self.stats.frames_seen += 1;

        let mut effects = Vec::new();
        if frame.bad {
            self.stats.bad_frames += 1;
            let message = format!(
                "Bad frame discarded, VC={}, vcfc={}, ERT={}",
                frame.vcid,
                frame.sequence,
                frame.station.ert_string()
            );
            let anomaly = self.anomaly(AnomalyKind::BadFrame, frame.station.ert_string(), message);
            effects.push(Effect::Anomaly(anomaly));
            return effects;
        }
        if frame.dead {
            trace!(vcfc = frame.sequence, "dead frame");
            return effects;
        }
        if self.last_sequence == Some(frame.sequence) {
            self.stats.frame_repeats += 1;
            let message = format!(
                "Repeated frame discarded, VC={}, vcfc={}, ERT={}",
                frame.vcid,
                frame.sequence,
                frame.station.ert_string()
            );
            let anomaly =
                self.anomaly(AnomalyKind::RepeatedFrame, frame.station.ert_string(), message);
            effects.push(Effect::Anomaly(
                anomaly.with_sequence(Some(frame.sequence), frame.sequence),
            ));
            return effects;
        }

        self.check_sequence(frame, &mut effects);
        self.last_sequence = Some(frame.sequence);

        if frame.idle {
            trace!(vcfc = frame.sequence, "idle frame");
            if let Some(effect) = self.flush_pdu(Flush::Idle, frame.station.ert_string()) {
                effects.push(effect);
            }
            self.state = State::FirstPdu;
            return effects;
        }

        debug!(
            vcfc = frame.sequence,
            dp,
            continuation = frame.continuation,
            state = ?self.state,
            "new frame"
        );
        let dp = dp as usize;
        let mut pos = 0;
        let mut first = true;
        while pos < area.len() {
            self.step(frame, area, dp, first, &mut pos, &mut effects);
            first = false;
        }
        effects
    }

    fn flush(&mut self) -> Vec<Effect> {
        let span = self.span.clone();
        let _guard = span.enter();

        let ert = self
            .origin
            .as_ref()
            .map(|o| o.station.ert_string())
            .unwrap_or_default();
        let effects = self.flush_pdu(Flush::EndOfData, ert).into_iter().collect();
        self.state = State::FirstPdu;
        self.last_sequence = None;
        effects
    }

    fn totals(&self) -> Stats {
        Stats::from(&self.stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::carrier::TmFrameHeader;
    use crate::extract::{anomalies, pdus};
    use test_case::test_case;

    // file data pdu, 1 byte ids and tsn, 4 data bytes
    const PDU: &str = "3000040001020311223344";

    fn pdu() -> Vec<u8> {
        hex::decode(PDU).unwrap()
    }

    fn frame(seq: u32, dp: u16, area: &[u8]) -> FrameRecord {
        FrameRecord::builder()
            .scid(1)
            .vcid(1)
            .sequence(seq)
            .header_len(0)
            .data_len(area.len())
            .data_pointer(dp)
            .continuation(dp == TmFrameHeader::FHP_CONTINUATION)
            .idle(dp == TmFrameHeader::FHP_IDLE)
            .data(area.to_vec())
            .build()
    }

    fn extractor() -> FramePduExtractor {
        FramePduExtractor::new(ExtractorConfig::builder().vcid(1).build())
    }

    fn kinds(effects: &[Effect]) -> Vec<AnomalyKind> {
        anomalies(effects).map(|a| a.kind).collect()
    }

    #[test]
    fn test_try_new_validates() {
        let config = ExtractorConfig::builder().vcid(1).max_pdu_length(0).build();
        assert!(matches!(
            FramePduExtractor::try_new(config),
            Err(crate::Error::Config(_))
        ));
        assert!(FramePduExtractor::try_new(ExtractorConfig::builder().vcid(1).build()).is_ok());
    }

    #[test]
    fn test_two_pdus_one_frame() {
        let mut ex = extractor();
        let mut area = pdu();
        area.extend(pdu());

        let effects = ex.consume(&frame(0, 0, &area));
        assert_eq!(pdus(&effects).count(), 2);
        assert!(kinds(&effects).is_empty());
        assert_eq!(ex.state(), &State::NextPdu);
        assert_eq!(ex.bytes_read(), 0);
        assert_eq!(ex.stats().pdus_produced, 2);
        assert_eq!(ex.stats().frames_seen, 1);
    }

    #[test]
    fn test_header_spans_frames() {
        let mut ex = extractor();
        let pdu = pdu();

        let effects = ex.consume(&frame(1, 0, &pdu[..2]));
        assert_eq!(pdus(&effects).count(), 0);
        assert_eq!(ex.state(), &State::NeedFixedHeader);

        let effects = ex.consume(&frame(2, TmFrameHeader::FHP_CONTINUATION, &pdu[2..]));
        let got: Vec<&PduEvent> = pdus(&effects).collect();
        assert_eq!(got.len(), 1);
        assert_eq!(got[0].pdu, pdu);
        assert_eq!(got[0].sequence_count, 1);
        assert_eq!(
            got[0].provenance,
            Provenance::Frames(vec![
                FrameId {
                    vcid: 1,
                    sequence: 1
                },
                FrameId {
                    vcid: 1,
                    sequence: 2
                }
            ])
        );
        assert_eq!(ex.state(), &State::FirstPdu);
    }

    #[test]
    fn test_variable_header_spans_frames() {
        let mut ex = extractor();
        let pdu = pdu();

        ex.consume(&frame(1, 0, &pdu[..5]));
        assert!(matches!(ex.state(), State::NeedVariableHeader(_)));

        let effects = ex.consume(&frame(2, TmFrameHeader::FHP_CONTINUATION, &pdu[5..]));
        assert_eq!(pdus(&effects).count(), 1);
    }

    #[test]
    fn test_data_pointer_mismatch_resyncs() {
        let mut ex = extractor();
        let pdu = pdu();

        ex.consume(&frame(1, 0, &pdu[..8]));
        assert!(matches!(ex.state(), State::NeedData(_)));

        // next pdu claimed to start at 5, but 3 bytes remain for the pdu in progress
        let mut area = vec![0xaa; 5];
        area.extend(&pdu);
        let effects = ex.consume(&frame(2, 5, &area));
        assert_eq!(kinds(&effects), vec![AnomalyKind::InvalidPduData]);
        let got: Vec<&PduEvent> = pdus(&effects).collect();
        assert_eq!(got.len(), 1);
        assert_eq!(got[0].pdu, pdu);
        assert_eq!(ex.stats().pdus_invalid, 1);
        assert_eq!(ex.stats().pdus_produced, 1);
    }

    #[test]
    fn test_data_pointer_agrees() {
        let mut ex = extractor();
        let pdu = pdu();

        ex.consume(&frame(1, 0, &pdu[..8]));
        let mut area = pdu[8..].to_vec();
        area.extend(&pdu);
        let effects = ex.consume(&frame(2, 3, &area));
        assert_eq!(pdus(&effects).count(), 2);
        assert!(kinds(&effects).is_empty());
    }

    #[test]
    fn test_data_pointer_correction_disabled() {
        let mut ex = FramePduExtractor::new(
            ExtractorConfig::builder()
                .vcid(1)
                .correct_data_pointer(false)
                .build(),
        );
        let pdu = pdu();

        ex.consume(&frame(1, 0, &pdu[..8]));
        // disagreeing pointer is ignored and the pdu in progress is completed
        let mut area = pdu[8..].to_vec();
        area.extend(&pdu);
        let effects = ex.consume(&frame(2, 9, &area));
        assert_eq!(pdus(&effects).count(), 2);
        assert!(kinds(&effects).is_empty());
    }

    #[test]
    fn test_stop_flag() {
        let mut ex = FramePduExtractor::new(
            ExtractorConfig::builder().vcid(1).stop_flag(0xff).build(),
        );
        let mut area = pdu();
        area.extend([0xff, 0x30, 0x00]);

        let effects = ex.consume(&frame(0, 0, &area));
        assert_eq!(pdus(&effects).count(), 1);
        assert!(kinds(&effects).is_empty());
        assert_eq!(ex.state(), &State::FirstPdu);
        assert_eq!(ex.bytes_read(), 0);
    }

    #[test]
    fn test_no_stop_flag_reads_partial_header() {
        let mut ex = extractor();
        let mut area = pdu();
        area.extend([0x30, 0x00]);

        ex.consume(&frame(0, 0, &area));
        assert_eq!(ex.state(), &State::NeedFixedHeader);
        assert_eq!(ex.bytes_read(), 2);
    }

    #[test]
    fn test_idle_frame_flushes() {
        let mut ex = extractor();
        ex.consume(&frame(1, 0, &pdu()[..8]));

        let effects = ex.consume(&frame(2, TmFrameHeader::FHP_IDLE, &[0u8; 8]));
        assert_eq!(kinds(&effects), vec![AnomalyKind::InvalidPduData]);
        assert_eq!(ex.state(), &State::FirstPdu);
        assert_eq!(ex.stats().pdus_invalid, 1);
    }

    #[test]
    fn test_idle_frame_without_pdu_is_silent() {
        let mut ex = extractor();
        let effects = ex.consume(&frame(1, TmFrameHeader::FHP_IDLE, &[0u8; 8]));
        assert!(effects.is_empty());
        assert_eq!(ex.stats().frames_seen, 1);
    }

    #[test]
    fn test_bad_frame() {
        let mut ex = extractor();
        let mut bad = frame(1, 0, &pdu());
        bad.bad = true;

        let effects = ex.consume(&bad);
        assert_eq!(kinds(&effects), vec![AnomalyKind::BadFrame]);
        assert_eq!(ex.stats().bad_frames, 1);
        assert_eq!(ex.stats().pdus_invalid, 0);
        assert_eq!(ex.stats().frames_seen, 1);
    }

    #[test]
    fn test_dead_frame() {
        let mut ex = extractor();
        let mut dead = frame(1, 0, &pdu());
        dead.dead = true;

        assert!(ex.consume(&dead).is_empty());
        assert_eq!(ex.stats().frames_seen, 1);
        assert_eq!(ex.stats().pdus_produced, 0);
    }

    #[test_case(FrameFormat::CcsdsAos; "aos")]
    #[test_case(FrameFormat::Other; "other")]
    fn test_unsupported_format(format: FrameFormat) {
        let mut ex = extractor();
        let mut f = frame(1, 0, &pdu());
        f.format = format;

        assert!(ex.consume(&f).is_empty());
        assert_eq!(ex.stats().frames_seen, 0);
    }

    #[test]
    fn test_no_data_pointer() {
        let mut ex = extractor();
        let mut f = frame(1, 0, &pdu());
        f.data_pointer = None;

        assert!(ex.consume(&f).is_empty());
        assert_eq!(ex.stats().frames_seen, 0);
    }

    #[test]
    fn test_data_area_exceeds_frame() {
        let mut ex = extractor();
        let mut f = frame(1, 0, &pdu());
        f.data_len += 1;

        assert!(ex.consume(&f).is_empty());
        assert_eq!(ex.stats().frames_seen, 0);
    }

    #[test_case(2, 1; "wrong vcid")]
    #[test_case(1, 2; "wrong scid")]
    fn test_filtered(vcid: u16, scid: u16) {
        let mut ex = FramePduExtractor::new(
            ExtractorConfig::builder()
                .vcid(1)
                .filter(crate::config::ContextFilter::builder().scid(1).build())
                .build(),
        );
        let mut f = frame(1, 0, &pdu());
        f.vcid = vcid;
        f.scid = scid;

        assert!(ex.consume(&f).is_empty());
        assert_eq!(ex.stats().frames_seen, 0);
    }

    #[test]
    fn test_vcid_not_in_cfdp_set() {
        let mut ex = FramePduExtractor::new(
            ExtractorConfig::builder()
                .vcid(1)
                .cfdp_vcids([2, 3].into())
                .build(),
        );
        assert!(ex.consume(&frame(1, 0, &pdu())).is_empty());
        assert_eq!(ex.stats().frames_seen, 0);
    }

    #[test]
    fn test_regression() {
        let mut ex = extractor();
        ex.consume(&frame(5, 0, &pdu()));

        let effects = ex.consume(&frame(3, 0, &pdu()));
        let got: Vec<&Anomaly> = anomalies(&effects).collect();
        assert_eq!(got.len(), 1);
        assert_eq!(got[0].kind, AnomalyKind::SequenceRegression);
        assert_eq!(got[0].expected, Some(6));
        assert_eq!(got[0].actual, Some(3));
        // the frame is still processed
        assert_eq!(pdus(&effects).count(), 1);
        assert_eq!(ex.stats().frame_regressions, 1);
        assert_eq!(ex.stats().pdus_invalid, 0);
    }

    #[test_case(&[1, 2, 5], 3, 2; "forward")]
    #[test_case(&[254, 255, 3], 0, 3; "across rollover")]
    #[test_case(&[250, 2], 251, 7; "rollover from middle")]
    fn test_gap(counts: &[u32], expected: u32, missed: u64) {
        let mut ex = extractor();
        let mut effects = Vec::new();
        for seq in counts {
            effects.extend(ex.consume(&frame(*seq, 0, &pdu())));
        }
        let got: Vec<&Anomaly> = anomalies(&effects).collect();
        assert_eq!(got.len(), 1, "{got:?}");
        assert_eq!(got[0].kind, AnomalyKind::SequenceGap);
        assert_eq!(got[0].expected, Some(expected));
        assert_eq!(got[0].actual, counts.last().copied());
        assert!(
            got[0].message.contains(&format!("missing {missed} ")),
            "{}",
            got[0].message
        );
        assert_eq!(ex.stats().frame_gaps, 1);
        assert_eq!(ex.stats().frames_missed, missed);
        assert_eq!(ex.stats().frame_regressions, 0);
    }

    #[test]
    fn test_regression_flushes_partial_pdu() {
        let mut ex = extractor();
        ex.consume(&frame(5, 0, &pdu()[..8]));
        assert!(matches!(ex.state(), State::NeedData(_)));

        let effects = ex.consume(&frame(3, 0, &pdu()));
        assert_eq!(
            kinds(&effects),
            vec![AnomalyKind::SequenceRegression, AnomalyKind::InvalidPduData]
        );
        // the regressed frame starts a new pdu
        assert_eq!(pdus(&effects).count(), 1);
        assert_eq!(ex.stats().frame_regressions, 1);
        assert_eq!(ex.stats().frame_gaps, 0);
        assert_eq!(ex.stats().pdus_invalid, 1);
    }

    #[test_case(255, 0; "expected rollover")]
    #[test_case(10, 0; "unexpected rollover")]
    #[test_case(7, 8; "in sequence")]
    fn test_sequence_intact(last: u32, next: u32) {
        let mut ex = extractor();
        ex.consume(&frame(last, 0, &pdu()));
        let effects = ex.consume(&frame(next, 0, &pdu()));
        assert!(kinds(&effects).is_empty());
        assert_eq!(pdus(&effects).count(), 1);
    }

    #[test]
    fn test_continuation_without_pdu_discarded() {
        let mut ex = extractor();
        let effects = ex.consume(&frame(1, TmFrameHeader::FHP_CONTINUATION, &pdu()));
        assert!(effects.is_empty());
        assert_eq!(ex.state(), &State::FirstPdu);
    }

    #[test]
    fn test_data_pointer_beyond_area() {
        let mut ex = extractor();
        let effects = ex.consume(&frame(1, 100, &pdu()));
        assert!(effects.is_empty());
        assert_eq!(ex.state(), &State::FirstPdu);
    }

    #[test]
    fn test_invalid_header_aborts_frame() {
        let mut ex = extractor();
        // version 3 header followed by a good pdu that is skipped with the rest of the frame
        let mut area = hex::decode("7000040001020311223344").unwrap();
        area.extend(pdu());

        let effects = ex.consume(&frame(1, 0, &area));
        assert_eq!(kinds(&effects), vec![AnomalyKind::InvalidPduHeader]);
        assert_eq!(pdus(&effects).count(), 0);
        assert_eq!(ex.state(), &State::NextPdu);

        let effects = ex.consume(&frame(2, 0, &pdu()));
        assert_eq!(pdus(&effects).count(), 1);
        assert_eq!(ex.stats().pdus_invalid, 1);
    }

    #[test]
    fn test_header_larger_than_buffer() {
        let mut ex = FramePduExtractor::new(
            ExtractorConfig::builder().vcid(1).max_pdu_length(6).build(),
        );
        let effects = ex.consume(&frame(1, 0, &pdu()));
        assert_eq!(kinds(&effects), vec![AnomalyKind::BufferOverrun]);
        assert_eq!(ex.stats().pdus_invalid, 1);
        assert_eq!(ex.bytes_read(), 0);
    }

    #[test]
    fn test_flush_end_of_data() {
        let mut ex = extractor();
        ex.consume(&frame(1, 0, &pdu()[..3]));

        let effects = ex.flush();
        assert_eq!(kinds(&effects), vec![AnomalyKind::InvalidPduHeader]);
        assert_eq!(ex.state(), &State::FirstPdu);
        assert!(ex.flush().is_empty());
        assert_eq!(ex.stats().pdus_invalid, 1);
    }

    #[test]
    fn test_crc_verified() {
        let mut ex = FramePduExtractor::new(
            ExtractorConfig::builder().vcid(1).verify_crc(true).build(),
        );
        let mut good = hex::decode("32000400010203aabb").unwrap();
        good.extend(crate::pdu::CRC16.checksum(&good).to_be_bytes());
        let mut bad = good.clone();
        bad[7] = 0x00;

        let mut area = bad;
        area.extend(&good);
        let effects = ex.consume(&frame(1, 0, &area));
        assert_eq!(kinds(&effects), vec![AnomalyKind::InvalidPduData]);
        assert_eq!(pdus(&effects).count(), 1);
    }
}
