mod frames;
mod output;
mod packets;

use std::collections::HashSet;
use std::io::stderr;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, bail, Context, Result};
use cfdp_extract::carrier::{Apid, Vcid};
use cfdp_extract::config::ExtractorConfig;
use cfdp_extract::timecode::Format as TimecodeFormat;
use clap::{Args, Parser, Subcommand};
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

use output::{DropOpts, Format, PduWriter};

#[derive(Parser)]
#[command(version, about)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

/// Options common to all extraction commands.
#[derive(Args)]
struct CommonOpts {
    /// Extractor configuration file (JSON). Command line options override values in the
    /// file.
    #[arg(short, long, value_name = "path")]
    config: Option<PathBuf>,

    /// Verify the CRC of PDUs whose header indicates one is present.
    #[arg(long, action)]
    verify_crc: bool,

    /// Maximum PDU length; longer PDUs are discarded.
    #[arg(long, value_name = "bytes")]
    max_pdu_length: Option<usize>,

    /// Do not write metadata directive PDUs.
    #[arg(long, action)]
    drop_metadata: bool,

    /// Do not write EOF directive PDUs.
    #[arg(long, action)]
    drop_eof: bool,

    /// Delete output file if it already exists
    #[arg(long, action)]
    clobber: bool,

    /// Output file path. All PDUs are concatenated in the order they are extracted.
    #[arg(short, long, default_value = "pdus.dat", value_name = "path")]
    output: PathBuf,

    /// Write each PDU to its own file in this directory instead of --output.
    #[arg(short = 'd', long, value_name = "path")]
    output_dir: Option<PathBuf>,

    /// Summary output format
    #[arg(short, long, default_value = "text")]
    format: Format,
}

#[derive(Debug, Clone)]
enum TCFormat {
    Cds,
    None,
}

impl clap::ValueEnum for TCFormat {
    fn value_variants<'a>() -> &'a [Self] {
        &[Self::Cds, Self::None]
    }

    fn to_possible_value(&self) -> Option<clap::builder::PossibleValue> {
        match self {
            Self::Cds => Some(clap::builder::PossibleValue::new("cds")),
            Self::None => Some(clap::builder::PossibleValue::new("none")),
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Extract CFDP PDUs from a spacepacket file.
    ///
    /// Each packet carries at most one PDU.
    Packets {
        /// APIDs or APID ranges that carry PDUs.
        ///
        /// This accepts a CSV of APIDs as well as ranges of the format <start>-<end>
        /// where start and end are inclusive. For example, --apids 1280-1283,1290
        #[arg(short, long, value_name = "csv", value_delimiter = ',', required = true)]
        apids: Vec<String>,

        /// Virtual channel the packets were received on.
        #[arg(short, long, default_value = "0")]
        vcid: Vcid,

        /// Decode packet times from the start of the secondary header using this
        /// format. The cds decoder expects an 8 byte CDS timecode.
        #[arg(short, long, default_value = "none")]
        timecode: TCFormat,

        #[command(flatten)]
        common: CommonOpts,

        /// Input spacepacket file.
        input: PathBuf,
    },
    /// Extract CFDP PDUs from a file of CCSDS TM version 1 transfer frames.
    ///
    /// PDUs may span frames. Each virtual channel is extracted independently.
    Frames {
        /// Length of each frame in bytes, including headers and trailers.
        #[arg(short = 'l', long, value_name = "bytes")]
        frame_len: usize,

        /// Frames include a 2 byte frame error control field. Frames failing the check are
        /// discarded.
        #[arg(long, action)]
        fecf: bool,

        /// Virtual channels or ranges that carry PDUs, e.g., 1,3-5. If not provided all
        /// channels are extracted.
        #[arg(short, long, value_name = "csv", value_delimiter = ',')]
        vcids: Vec<String>,

        /// Byte value marking the rest of a frame as unused when found where a PDU header
        /// would start.
        #[arg(long, value_name = "byte")]
        stop_flag: Option<u8>,

        /// Do not resynchronize to the first header pointer when it disagrees with the PDU
        /// in progress.
        #[arg(long, action)]
        no_correct_data_pointer: bool,

        #[command(flatten)]
        common: CommonOpts,

        /// Input frame file.
        input: PathBuf,
    },
}

fn parse_number_ranges(list: Vec<String>) -> Result<Vec<u32>> {
    let rx = regex::Regex::new(r"^(?:(\d+)|(\d+)-(\d+))$").context("compiling range regex")?;
    let mut values = Vec::default();
    for (i, s) in list.into_iter().enumerate() {
        let Some(cap) = rx.captures(s.trim()) else {
            bail!("invalid number or range at {i}: {s}");
        };
        if cap.get(1).is_some() {
            let x = cap[1]
                .parse::<u32>()
                .map_err(|_| anyhow!("invalid number value"))?;
            values.push(x);
        } else {
            let start = cap[2]
                .parse::<u32>()
                .map_err(|_| anyhow!("invalid range value"))?;
            let end = cap[3]
                .parse::<u32>()
                .map_err(|_| anyhow!("invalid range value"))?;
            if start >= end {
                bail!("invalid range at {i}: {s}");
            }
            values.extend(start..=end);
        }
    }
    Ok(values)
}

fn parse_ids(list: Vec<String>) -> Result<HashSet<u16>> {
    parse_number_ranges(list)?
        .into_iter()
        .map(|v| u16::try_from(v).map_err(|_| anyhow!("{v} is not a valid id")))
        .collect()
}

/// Load the config file, if any, and apply command line overrides.
fn load_config(common: &CommonOpts, vcid: Vcid) -> Result<ExtractorConfig> {
    let mut config = match &common.config {
        Some(path) => ExtractorConfig::from_file(path)
            .with_context(|| format!("loading config {path:?}"))?,
        None => ExtractorConfig::builder().vcid(vcid).build(),
    };
    config.vcid = vcid;
    if common.verify_crc {
        config.verify_crc = true;
    }
    if let Some(max) = common.max_pdu_length {
        config.max_pdu_length = max;
    }
    config.validate().context("invalid configuration")?;
    Ok(config)
}

fn writer(common: &CommonOpts) -> Result<PduWriter> {
    let drop = DropOpts {
        metadata: common.drop_metadata,
        eof: common.drop_eof,
    };
    PduWriter::new(&common.output, common.output_dir.as_ref(), common.clobber, drop)
}

fn check_input(input: &Path) -> Result<()> {
    if !input.is_file() {
        bail!("{input:?} is not a file");
    }
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    tracing_subscriber::fmt()
        .with_target(false)
        .with_writer(stderr)
        .with_ansi(false)
        .without_time()
        .with_env_filter(
            EnvFilter::try_from_env("CFDP_LOG").unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    debug!("{} {}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION"));

    match cli.command {
        Commands::Packets {
            apids,
            vcid,
            timecode,
            common,
            input,
        } => {
            check_input(&input)?;
            let mut config = load_config(&common, vcid)?;
            let apids: HashSet<Apid> = parse_ids(apids)?;
            debug!("cfdp apids {apids:?}");
            config.cfdp_apids = apids;
            let timecode = match timecode {
                TCFormat::Cds => Some(TimecodeFormat::Cds {
                    num_day: 2,
                    num_submillis: 2,
                }),
                TCFormat::None => None,
            };

            let mut writer = writer(&common)?;
            info!("extracting pdus from packets in {input:?}");
            let summary = packets::extract(&input, config, timecode.as_ref(), &mut writer)?;
            summary.print(&common.format)
        }
        Commands::Frames {
            frame_len,
            fecf,
            vcids,
            stop_flag,
            no_correct_data_pointer,
            common,
            input,
        } => {
            check_input(&input)?;
            let mut config = load_config(&common, 0)?;
            if stop_flag.is_some() {
                config.stop_flag = stop_flag;
            }
            if no_correct_data_pointer {
                config.correct_data_pointer = false;
            }
            let vcids: HashSet<Vcid> = if vcids.is_empty() {
                config.cfdp_vcids.clone()
            } else {
                parse_ids(vcids)?
            };
            debug!("cfdp vcids {vcids:?}");

            let mut writer = writer(&common)?;
            info!("extracting pdus from frames in {input:?}");
            let summary = frames::extract(&input, frame_len, fecf, vcids, config, &mut writer)?;
            summary.print(&common.format)
        }
    }
}
