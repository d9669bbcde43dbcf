//! Extractor configuration.
use std::collections::HashSet;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use serde::{Deserialize, Serialize};
use typed_builder::TypedBuilder;

use crate::carrier::{Apid, DssId, Scid, StationInfo, Vcid};
use crate::pdu::PduHeader;
use crate::{Error, Result};

/// Restricts the carriers an extractor will accept by spacecraft and station.
///
/// Unset fields match anything.
#[derive(Serialize, Deserialize, TypedBuilder, Debug, Clone, Default, PartialEq, Eq)]
#[serde(default)]
pub struct ContextFilter {
    #[builder(default, setter(strip_option))]
    pub scid: Option<Scid>,
    #[builder(default, setter(strip_option))]
    pub dss_id: Option<DssId>,
}

impl ContextFilter {
    #[must_use]
    pub fn accept(&self, scid: Scid, station: &StationInfo) -> bool {
        self.scid.map_or(true, |s| s == scid) && self.dss_id.map_or(true, |d| d == station.dss_id)
    }
}

fn default_max_pdu_length() -> usize {
    PduHeader::MAX_PDU_LENGTH
}

fn default_true() -> bool {
    true
}

/// Configuration for a single extractor instance.
///
/// # Example
/// ```
/// use cfdp_extract::config::ExtractorConfig;
///
/// let config: ExtractorConfig = serde_json::from_str(r#"{
///     "vcid": 5,
///     "cfdp_vcids": [5, 6],
///     "stop_flag": 255
/// }"#).unwrap();
/// assert!(config.correct_data_pointer);
/// assert_eq!(config.stop_flag, Some(0xff));
/// ```
#[derive(Serialize, Deserialize, TypedBuilder, Debug, Clone, PartialEq, Eq)]
pub struct ExtractorConfig {
    /// Virtual channel the extractor is bound to.
    pub vcid: Vcid,
    /// Virtual channels that carry CFDP PDUs in frames. An empty set accepts only the
    /// bound channel.
    #[serde(default)]
    #[builder(default)]
    pub cfdp_vcids: HashSet<Vcid>,
    /// APIDs that carry CFDP PDUs in packets. An empty set rejects all packets.
    #[serde(default)]
    #[builder(default)]
    pub cfdp_apids: HashSet<Apid>,
    /// Capacity of the reassembly buffer.
    #[serde(default = "default_max_pdu_length")]
    #[builder(default = PduHeader::MAX_PDU_LENGTH)]
    pub max_pdu_length: usize,
    /// Resynchronize to the first header pointer when it disagrees with the PDU in
    /// progress.
    #[serde(default = "default_true")]
    #[builder(default = true)]
    pub correct_data_pointer: bool,
    /// Byte value that, found where a PDU header should start, marks the rest of a frame
    /// as unused.
    #[serde(default)]
    #[builder(default, setter(strip_option))]
    pub stop_flag: Option<u8>,
    /// Verify the PDU CRC when a header indicates one is present.
    #[serde(default)]
    #[builder(default)]
    pub verify_crc: bool,
    #[serde(default)]
    #[builder(default)]
    pub filter: ContextFilter,
}

impl ExtractorConfig {
    /// Load a JSON config file.
    ///
    /// # Errors
    /// [Error::Io] if the file cannot be read, [Error::ConfigFormat] if it is not valid,
    /// and [Error::Config] if the values fail [ExtractorConfig::validate].
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let reader = BufReader::new(File::open(path)?);
        let config: Self = serde_json::from_reader(reader)?;
        config.validate()?;
        Ok(config)
    }

    /// # Errors
    /// [Error::Config] if `max_pdu_length` is zero or exceeds the protocol maximum.
    pub fn validate(&self) -> Result<()> {
        if self.max_pdu_length == 0 || self.max_pdu_length > PduHeader::MAX_PDU_LENGTH {
            return Err(Error::Config(format!(
                "max_pdu_length must be between 1 and {}; got {}",
                PduHeader::MAX_PDU_LENGTH,
                self.max_pdu_length
            )));
        }
        Ok(())
    }

    /// True if frames on `vcid` may carry PDUs.
    #[must_use]
    pub fn is_cfdp_vcid(&self, vcid: Vcid) -> bool {
        if self.cfdp_vcids.is_empty() {
            vcid == self.vcid
        } else {
            self.cfdp_vcids.contains(&vcid)
        }
    }
}
