use std::{fs::File, io::BufReader, path::Path};

use anyhow::{Context, Result};
use cfdp_extract::carrier::read_packets;
use cfdp_extract::config::ExtractorConfig;
use cfdp_extract::extract::{Effect, Extractor, PacketPduExtractor};
use cfdp_extract::timecode::Format as TimecodeFormat;
use tracing::{debug, info, warn};

use crate::output::{PduWriter, Summary};

/// Extract PDUs from a file of space packets.
pub fn extract(
    input: &Path,
    config: ExtractorConfig,
    timecode: Option<&TimecodeFormat>,
    writer: &mut PduWriter,
) -> Result<Summary> {
    let src = BufReader::new(File::open(input).context("opening input")?);
    let vcid = config.vcid;
    let mut extractor =
        PacketPduExtractor::try_new(config).context("invalid extractor config")?;
    let mut summary = Summary::new(input);

    let mut packets = read_packets(src);
    for zult in packets.by_ref() {
        let mut packet = match zult {
            Ok(packet) => packet,
            Err(err) => {
                // a partial trailing packet is expected for truncated captures
                warn!("stopping at packet read error: {err}");
                break;
            }
        };
        packet.vcid = vcid;
        if let Some(format) = timecode {
            if let Err(err) = packet.decode_scet(format) {
                debug!(apid = packet.apid(), "failed to decode scet: {err}");
            }
        }
        for effect in extractor.consume(&packet) {
            match effect {
                Effect::Pdu(event) => writer.write(&event)?,
                Effect::Anomaly(anomaly) => summary.add_anomaly(&anomaly),
                Effect::BytesConsumed(_) | Effect::HeaderDecoded(_) => {}
            }
        }
    }
    info!(bytes = packets.offset(), "finished reading packets");

    writer.finish()?;
    summary.add_channel(vcid.to_string(), &extractor.totals());
    summary.set_written(writer);
    Ok(summary)
}
