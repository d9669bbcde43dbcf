//! Time code decoding for space packet secondary headers.
//!
//! Reference: [CCSDS Time Code Formats](https://public.ccsds.org/Pubs/301x0b4e1.pdf)
use hifitime::{Duration, Epoch};
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Number of seconds between the 1958 and 1900
const CCSDS_HIFIEPOCH_DELTA_SECS: u64 = 1_830_297_600;
const NUM_CDS_MILLIS_OF_DAY_BYTES: usize = 4;

/// CCSDS timecode format configuration.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "lowercase")]
#[non_exhaustive]
pub enum Format {
    /// Day segmented timecode. `num_day` is 2 or 3 and `num_submillis` is 0, 2, or 4.
    Cds { num_day: usize, num_submillis: usize },
    /// Unsegmented timecode. `num_coarse` is 1 to 4 and `num_fine` is 0 to 3.
    ///
    /// Fine time is a binary fraction of a second unless `fine_mult` is provided, in which
    /// case it is multiplied by `fine_mult` to produce nanoseconds.
    Cuc {
        num_coarse: usize,
        num_fine: usize,
        fine_mult: Option<f32>,
    },
}

impl Format {
    /// Number of bytes occupied by a timecode of this format.
    #[must_use]
    pub fn len(&self) -> usize {
        match self {
            Format::Cds {
                num_day,
                num_submillis,
            } => num_day + NUM_CDS_MILLIS_OF_DAY_BYTES + num_submillis,
            Format::Cuc {
                num_coarse,
                num_fine,
                ..
            } => num_coarse + num_fine,
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for Format {
    fn default() -> Self {
        Format::Cds {
            num_day: 2,
            num_submillis: 2,
        }
    }
}

/// Decode `buf` into [hifitime::Epoch].
///
/// # Errors
/// [Error::NotEnoughData] if there is not enough data for the provided format, or
/// [Error::TimecodeConfig] if the format fields are not supported.
pub fn decode(format: &Format, buf: &[u8]) -> Result<Epoch> {
    let want = format.len();
    if buf.len() < want {
        return Err(Error::NotEnoughData {
            actual: buf.len(),
            minimum: want,
        });
    }
    match format {
        Format::Cds {
            num_day,
            num_submillis,
        } => decode_cds(*num_day, *num_submillis, &buf[..want]),
        Format::Cuc {
            num_coarse,
            num_fine,
            fine_mult,
        } => decode_cuc(*num_coarse, *num_fine, *fine_mult, &buf[..want]),
    }
}

fn be_uint(dat: &[u8]) -> u64 {
    dat.iter().fold(0u64, |acc, b| (acc << 8) | u64::from(*b))
}

fn decode_cds(num_day: usize, num_submillis: usize, buf: &[u8]) -> Result<Epoch> {
    if !(2..=3).contains(&num_day) {
        return Err(Error::TimecodeConfig(format!(
            "Number of CDS day bytes must be 2 or 3; got {num_day}"
        )));
    }
    let (days, rest) = buf.split_at(num_day);
    let (millis, submillis) = rest.split_at(NUM_CDS_MILLIS_OF_DAY_BYTES);
    let nanos = match num_submillis {
        0 => 0,
        2 => be_uint(submillis) * 1_000,
        4 => be_uint(submillis) / 1_000,
        _ => {
            return Err(Error::TimecodeConfig(format!(
                "Number of CDS sub-millisecond must be 0, 2, or 4; got {num_submillis}"
            )))
        }
    };

    let dur = Duration::compose(
        0,
        be_uint(days),
        0,
        0,
        CCSDS_HIFIEPOCH_DELTA_SECS,
        be_uint(millis),
        0,
        nanos,
    );
    Ok(Epoch::from_utc_duration(dur))
}

fn decode_cuc(
    num_coarse: usize,
    num_fine: usize,
    fine_mult: Option<f32>,
    buf: &[u8],
) -> Result<Epoch> {
    if !(1..=4).contains(&num_coarse) {
        return Err(Error::TimecodeConfig(
            "Number of CUC coarse bytes must be 1 to 4".to_string(),
        ));
    }
    if num_fine > 3 {
        return Err(Error::TimecodeConfig(
            "Number of CUC fine bytes must be 0 to 3".to_string(),
        ));
    }
    let (coarse, fine) = buf.split_at(num_coarse);
    let coarse = be_uint(coarse);
    let fine = be_uint(fine);

    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let nanos = match fine_mult {
        Some(mult) => (fine as f64 * f64::from(mult)) as u64,
        None if num_fine == 0 => 0,
        None => (fine as f64 / (1u64 << (8 * num_fine)) as f64 * 1e9) as u64,
    };

    let dur = Duration::compose(0, 0, 0, 0, CCSDS_HIFIEPOCH_DELTA_SECS + coarse, 0, 0, nanos);
    Ok(Epoch::from_tai_duration(dur))
}
