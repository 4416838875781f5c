//! # Synchrophasor Stream Ingestion Adapter
//!
//! This crate implements the ingestion side of an electric-grid
//! time-series platform: it owns a long-lived connection to a Phasor
//! Measurement Unit (PMU) or Phasor Data Concentrator (PDC), consumes the
//! decoded frame stream of a wire parser, correlates each sample against
//! the configured device and measurement topology, and emits typed,
//! timestamped measurements to a downstream sink.
//!
//! The wire decoders themselves (IEEE C37.118, IEEE 1344, BPA PDCstream),
//! the external configuration store, and the downstream measurement bus
//! are external collaborators reached through the `parser`, `store`, and
//! `sink` seams.
//!
//! ## Submodules
//!
//! - `frames`: decoded frame model and 100 ns tick arithmetic.
//! - `parser`: the opaque frame-parser contract and its event enum.
//! - `settings`: connection-string parsing.
//! - `store`: configuration-store access (topology and metadata rows).
//! - `sink`: the downstream measurement bus seam.
//! - `cache`: last-known-good configuration persistence.
//! - `measurement`: measurement identity and value types.
//! - `mapping`: the stream-mapping engine itself.
//! - `mock`: mock parser and synthetic frames for tests and benchmarks.
//!
//! ## Usage
//!
//! Build a `MeasurementMapper` with `initialize`, spawn its `run` loop on
//! a tokio runtime, and drive it through a `MapperHandle`. The mapper
//! keeps reconnecting and recovering for as long as it is enabled;
//! only initialize-time failures surface as errors.

pub mod cache;
pub mod frames;
pub mod mapping;
pub mod measurement;
pub mod mock;
pub mod parser;
pub mod settings;
pub mod sink;
pub mod store;

pub use cache::ConfigurationCacheStore;
pub use mapping::mapper::{
    ConnectionState, IngestError, MapperCommand, MapperHandle, MapperStatistics,
    MeasurementMapper,
};
pub use parser::{FrameParser, ParserEvent};
pub use sink::{ChannelSink, MeasurementSink};
pub use store::{ConfigurationSource, InMemoryConfigurationSource};
