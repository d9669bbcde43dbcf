//! Extraction of CFDP Protocol Data Units from CCSDS telemetry carriers.
//!
//! PDUs are reconstructed from version-1 TM transfer frames, where a PDU may span many
//! frames and the first header pointer locates PDU boundaries, or from space packets,
//! where each packet carries at most one PDU.
//!
//! The extractors in [extract] are synchronous and bus-agnostic; each call to
//! [extract::Extractor::consume] returns the ordered [extract::Effect]s produced by one
//! carrier record. [service::ExtractService] wires an extractor to an [bus::EventBus].
//!
//! # Example
//! ```
//! use cfdp_extract::config::ExtractorConfig;
//! use cfdp_extract::extract::{Extractor, PacketPduExtractor};
//!
//! let config = ExtractorConfig::builder()
//!     .vcid(1)
//!     .cfdp_apids([1280].into())
//!     .build();
//! let mut extractor = PacketPduExtractor::new(config);
//! assert_eq!(extractor.stats().packets_seen, 0);
//! ```
mod error;

pub mod bus;
pub mod carrier;
pub mod config;
pub mod event;
pub mod extract;
pub mod pdu;
pub mod service;
pub mod stats;
pub mod timecode;

pub use error::{Error, Result};
