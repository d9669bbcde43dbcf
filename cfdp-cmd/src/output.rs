use std::{
    collections::BTreeMap,
    fs::{create_dir_all, File},
    io::{stdout, BufWriter, Write},
    path::{Path, PathBuf},
};

use anyhow::{bail, Context, Result};
use cfdp_extract::event::{Anomaly, PduEvent};
use cfdp_extract::pdu::{directive_code, DirectiveCode};
use cfdp_extract::stats::Stats;
use handlebars::handlebars_helper;
use serde::Serialize;
use tracing::{debug, trace};

#[derive(Debug, Clone)]
pub enum Format {
    Json,
    Text,
}

impl clap::ValueEnum for Format {
    fn value_variants<'a>() -> &'a [Self] {
        &[Self::Json, Self::Text]
    }

    fn to_possible_value(&self) -> Option<clap::builder::PossibleValue> {
        match self {
            Self::Json => Some(clap::builder::PossibleValue::new("json")),
            Self::Text => Some(clap::builder::PossibleValue::new("text")),
        }
    }
}

/// Directive PDUs to leave out of the output.
#[derive(Debug, Clone, Default)]
pub struct DropOpts {
    pub metadata: bool,
    pub eof: bool,
}

impl DropOpts {
    fn should_drop(&self, event: &PduEvent) -> bool {
        let Ok(header) = event.header() else {
            return false;
        };
        match directive_code(&header, &event.pdu) {
            Some(DirectiveCode::Metadata) => self.metadata,
            Some(DirectiveCode::Eof) => self.eof,
            _ => false,
        }
    }
}

enum Sink {
    /// All PDUs concatenated into one file.
    File(BufWriter<File>),
    /// One file per PDU.
    Dir(PathBuf),
}

/// Writes extracted PDUs to a file or directory.
pub struct PduWriter {
    sink: Sink,
    drop: DropOpts,
    written: u64,
    dropped: u64,
}

impl PduWriter {
    pub fn to_file(path: &Path, clobber: bool, drop: DropOpts) -> Result<Self> {
        if !clobber && path.exists() {
            bail!("{path:?} exists; use --clobber");
        }
        let file =
            File::create(path).with_context(|| format!("failed to create output {path:?}"))?;
        Ok(Self {
            sink: Sink::File(BufWriter::new(file)),
            drop,
            written: 0,
            dropped: 0,
        })
    }

    pub fn to_dir(path: &Path, drop: DropOpts) -> Result<Self> {
        create_dir_all(path).with_context(|| format!("failed to create directory {path:?}"))?;
        Ok(Self {
            sink: Sink::Dir(path.to_path_buf()),
            drop,
            written: 0,
            dropped: 0,
        })
    }

    /// Create a writer for `output_dir` if provided, otherwise for `output`.
    pub fn new(
        output: &Path,
        output_dir: Option<&PathBuf>,
        clobber: bool,
        drop: DropOpts,
    ) -> Result<Self> {
        match output_dir {
            Some(dir) => Self::to_dir(dir, drop),
            None => Self::to_file(output, clobber, drop),
        }
    }

    pub fn write(&mut self, event: &PduEvent) -> Result<()> {
        if self.drop.should_drop(event) {
            debug!(%event, "dropping directive pdu");
            self.dropped += 1;
            return Ok(());
        }
        match &mut self.sink {
            Sink::File(writer) => writer.write_all(&event.pdu).context("writing pdu")?,
            Sink::Dir(dir) => {
                let path = dir.join(pdu_filename(event, self.written));
                trace!(?path, "writing pdu");
                std::fs::write(&path, &event.pdu)
                    .with_context(|| format!("writing pdu to {path:?}"))?;
            }
        }
        self.written += 1;
        Ok(())
    }

    pub fn finish(&mut self) -> Result<()> {
        if let Sink::File(writer) = &mut self.sink {
            writer.flush().context("flushing output")?;
        }
        Ok(())
    }

    pub fn written(&self) -> u64 {
        self.written
    }

    pub fn dropped(&self) -> u64 {
        self.dropped
    }
}

/// File name for a PDU written to a directory. The index keeps names unique when a
/// transaction is seen more than once.
fn pdu_filename(event: &PduEvent, index: u64) -> String {
    match event.header() {
        Ok(header) => format!(
            "{index:08}_{}_{}_{}.pdu",
            header.source_entity_id,
            header.transaction_seq_num,
            event.vcid
        ),
        Err(_) => format!("{index:08}_{}.pdu", event.vcid),
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ChannelSummary {
    pub carriers_seen: u64,
    pub pdus_produced: u64,
    pub pdus_invalid: u64,
}

impl From<&Stats> for ChannelSummary {
    fn from(stats: &Stats) -> Self {
        Self {
            carriers_seen: stats.carriers_seen,
            pdus_produced: stats.pdus_produced,
            pdus_invalid: stats.pdus_invalid,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct Summary {
    pub input: String,
    pub carriers_seen: u64,
    pub pdus_produced: u64,
    pub pdus_invalid: u64,
    pub pdus_written: u64,
    pub pdus_dropped: u64,
    /// Anomaly counts by kind.
    pub anomalies: BTreeMap<String, u64>,
    /// Per-channel totals, keyed by VCID.
    pub channels: BTreeMap<String, ChannelSummary>,
}

impl Summary {
    pub fn new(input: &Path) -> Self {
        Self {
            input: input.to_string_lossy().to_string(),
            ..Default::default()
        }
    }

    pub fn add_anomaly(&mut self, anomaly: &Anomaly) {
        *self
            .anomalies
            .entry(format!("{:?}", anomaly.kind))
            .or_default() += 1;
    }

    pub fn add_channel(&mut self, name: String, stats: &Stats) {
        self.carriers_seen += stats.carriers_seen;
        self.pdus_produced += stats.pdus_produced;
        self.pdus_invalid += stats.pdus_invalid;
        self.channels.insert(name, stats.into());
    }

    pub fn set_written(&mut self, writer: &PduWriter) {
        self.pdus_written = writer.written();
        self.pdus_dropped = writer.dropped();
    }

    pub fn print(&self, format: &Format) -> Result<()> {
        match format {
            Format::Json => {
                serde_json::to_writer_pretty(stdout(), self).context("serializing to json")?;
                println!();
                Ok(())
            }
            Format::Text => {
                let data = render_text(self).context("serializing summary")?;
                stdout()
                    .write_all(data.as_bytes())
                    .context("writing to stdout")
            }
        }
    }
}

fn render_text(summary: &Summary) -> Result<String> {
    handlebars_helper!(left_pad: |num: u64, v: Json| {
        let v = match v {
            serde_json::Value::String(s) => s.to_owned(),
            serde_json::Value::Null => String::new(),
            _ => v.to_string()
        };
        let num = usize::try_from(num).unwrap_or_default().max(v.len());
        format!("{v:>num$}")
    });
    let mut hb = handlebars::Handlebars::new();
    hb.register_helper("lpad", Box::new(left_pad));
    hb.register_template_string("summary", TEXT_TEMPLATE)
        .context("registering template")?;

    hb.render("summary", summary).context("rendering text")
}

const TEXT_TEMPLATE: &str = r"{{ input }}
===============================================================================
Carriers: {{ carriers_seen }}
PDUs:     {{ pdus_produced }}
Invalid:  {{ pdus_invalid }}
Written:  {{ pdus_written }}
Dropped:  {{ pdus_dropped }}
-------------------------------------------------------------------------------
Channel     Carriers        PDUs     Invalid
-------------------------------------------------------------------------------
{{ #each channels }}{{ lpad 7 @key }}  {{ lpad 11 carriers_seen }} {{ lpad 11 pdus_produced }} {{ lpad 11 pdus_invalid }}
{{/each }}{{ #if anomalies }}-------------------------------------------------------------------------------
Anomaly                  Count
-------------------------------------------------------------------------------
{{ #each anomalies }}{{ @key }}{{ lpad 28 this }}
{{/each }}{{ /if }}";
