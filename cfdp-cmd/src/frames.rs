use std::{
    collections::{BTreeMap, HashSet},
    fs::File,
    io::{BufReader, ErrorKind, Read},
    path::Path,
    thread::{self, JoinHandle},
};

use anyhow::{anyhow, Context, Result};
use cfdp_extract::carrier::{FrameRecord, Vcid};
use cfdp_extract::config::ExtractorConfig;
use cfdp_extract::event::{Anomaly, PduEvent};
use cfdp_extract::extract::{Effect, Extractor, FramePduExtractor};
use cfdp_extract::stats::Stats;
use crossbeam::channel::{bounded, unbounded, Receiver, Sender};
use tracing::{debug, info, warn};

use crate::output::{PduWriter, Summary};

const CHANNEL_BUFFER: usize = 100;

/// Output of a per-VCID extraction worker.
enum Output {
    Pdu(PduEvent),
    Anomaly(Anomaly),
    Done(Vcid, Stats),
}

/// Iterator of fixed length frames read from a stream.
struct FrameReader<R: Read> {
    reader: R,
    frame_len: usize,
}

impl<R: Read> Iterator for FrameReader<R> {
    type Item = std::io::Result<Vec<u8>>;

    fn next(&mut self) -> Option<Self::Item> {
        let mut buf = vec![0u8; self.frame_len];
        match self.reader.read_exact(&mut buf) {
            Ok(()) => Some(Ok(buf)),
            Err(err) if err.kind() == ErrorKind::UnexpectedEof => None,
            Err(err) => Some(Err(err)),
        }
    }
}

fn spawn_worker(
    config: ExtractorConfig,
    frames: Receiver<FrameRecord>,
    output: Sender<Output>,
) -> Result<JoinHandle<()>> {
    let vcid = config.vcid;
    let mut extractor = FramePduExtractor::try_new(config).context("invalid extractor config")?;
    thread::Builder::new()
        .name(format!("extract-vcid-{vcid}"))
        .spawn(move || {
            let send = |effects: Vec<Effect>| {
                for effect in effects {
                    let msg = match effect {
                        Effect::Pdu(event) => Output::Pdu(event),
                        Effect::Anomaly(anomaly) => Output::Anomaly(anomaly),
                        Effect::BytesConsumed(_) | Effect::HeaderDecoded(_) => continue,
                    };
                    if output.send(msg).is_err() {
                        debug!(vcid, "output closed");
                        return false;
                    }
                }
                true
            };
            for frame in frames {
                if !send(extractor.consume(&frame)) {
                    return;
                }
            }
            send(extractor.flush());
            let _ = output.send(Output::Done(vcid, extractor.totals()));
        })
        .context("spawning extraction worker")
}

/// Read frames and dispatch them to one worker per VCID. Returns the number of frames read.
fn dispatch(
    input: &Path,
    frame_len: usize,
    fecf: bool,
    vcids: &HashSet<Vcid>,
    config: &ExtractorConfig,
    output: Sender<Output>,
) -> Result<u64> {
    let reader = FrameReader {
        reader: BufReader::new(File::open(input).context("opening input")?),
        frame_len,
    };
    let mut workers: BTreeMap<Vcid, (Sender<FrameRecord>, JoinHandle<()>)> = BTreeMap::new();
    let mut count = 0;

    for zult in reader {
        let dat = zult.context("reading frame")?;
        count += 1;
        let frame = match FrameRecord::from_tm_frame(dat, fecf) {
            Ok(frame) => frame,
            Err(err) => {
                warn!(count, "invalid frame: {err}");
                continue;
            }
        };
        if !vcids.is_empty() && !vcids.contains(&frame.vcid) {
            continue;
        }
        if !workers.contains_key(&frame.vcid) {
            let mut config = config.clone();
            config.vcid = frame.vcid;
            config.cfdp_vcids = vcids.clone();
            let (tx, rx) = bounded(CHANNEL_BUFFER);
            let handle = spawn_worker(config, rx, output.clone())?;
            info!(vcid = frame.vcid, "started worker");
            workers.insert(frame.vcid, (tx, handle));
        }
        let Some((tx, _)) = workers.get(&frame.vcid) else {
            continue;
        };
        tx.send(frame)
            .map_err(|_| anyhow!("extraction worker exited"))?;
    }

    for (vcid, (tx, handle)) in workers {
        drop(tx);
        if handle.join().is_err() {
            warn!(vcid, "extraction worker panicked");
        }
    }
    Ok(count)
}

/// Extract PDUs from a file of fixed length TM version 1 frames.
///
/// Frames are demultiplexed by VCID to one extractor per channel, each on its own thread.
/// An empty `vcids` extracts from every channel.
pub fn extract(
    input: &Path,
    frame_len: usize,
    fecf: bool,
    vcids: HashSet<Vcid>,
    config: ExtractorConfig,
    writer: &mut PduWriter,
) -> Result<Summary> {
    let (output_tx, output_rx) = unbounded();
    let dispatcher = {
        let input = input.to_path_buf();
        thread::Builder::new()
            .name("frame-dispatch".into())
            .spawn(move || dispatch(&input, frame_len, fecf, &vcids, &config, output_tx))
            .context("spawning dispatcher")?
    };

    let mut summary = Summary::new(input);
    let mut written = Ok(());
    for msg in output_rx {
        match msg {
            Output::Pdu(event) => {
                if written.is_ok() {
                    written = writer.write(&event);
                }
            }
            Output::Anomaly(anomaly) => summary.add_anomaly(&anomaly),
            Output::Done(vcid, stats) => summary.add_channel(vcid.to_string(), &stats),
        }
    }
    let count = dispatcher
        .join()
        .map_err(|_| anyhow!("frame dispatcher panicked"))??;
    info!(count, "finished reading frames");

    written?;
    writer.finish()?;
    summary.set_written(writer);
    Ok(summary)
}
