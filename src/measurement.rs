//! # Measurement Identity and Value Types
//!
//! Types that attach platform-wide identity to anonymous parsed samples.
//! A wire parser produces positionally-indexed values; the mapping engine
//! enriches each one with the metadata configured for its signal reference,
//! producing a `MappedMeasurement` ready for the downstream bus.
//!
//! ## Key Components
//!
//! - `MeasurementKey`: historian key in `SOURCE:ID` form.
//! - `MeasurementDescriptor`: immutable per-signal metadata loaded from the
//!   external configuration store, indexed by signal reference.
//! - `MappedMeasurement`: a parsed sample plus its descriptor.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use uuid::Uuid;

use crate::frames::Ticks;

/// Raised when a historian key string does not parse.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("invalid measurement key {key:?}: expected SOURCE:ID")]
pub struct InvalidMeasurementKey {
    pub key: String,
}

/// Historian key identifying one measurement point, rendered `SOURCE:ID`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MeasurementKey {
    pub source: String,
    pub id: u64,
}

impl fmt::Display for MeasurementKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.source, self.id)
    }
}

impl FromStr for MeasurementKey {
    type Err = InvalidMeasurementKey;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || InvalidMeasurementKey { key: s.to_string() };
        let (source, id) = s.split_once(':').ok_or_else(invalid)?;
        if source.is_empty() {
            return Err(invalid());
        }
        let id = id.trim().parse().map_err(|_| invalid())?;
        Ok(MeasurementKey {
            source: source.trim().to_string(),
            id,
        })
    }
}

/// Immutable metadata for one configured signal.
///
/// # Fields
///
/// * `signal_id`: platform-wide unique identifier.
/// * `key`: historian key.
/// * `signal_reference`: the reference string this descriptor is indexed by.
/// * `adder` / `multiplier`: linear adjustment applied downstream.
#[derive(Debug, Clone, PartialEq)]
pub struct MeasurementDescriptor {
    pub signal_id: Uuid,
    pub key: MeasurementKey,
    pub signal_reference: String,
    pub adder: f64,
    pub multiplier: f64,
}

/// A sample extracted from a data cell before identity is attached.
///
/// Quality booleans are derived from the owning cell's status word.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ParsedMeasurement {
    pub value: f64,
    pub timestamp: Ticks,
    pub value_quality_is_good: bool,
    pub time_quality_is_good: bool,
}

/// A parsed sample enriched with its configured descriptor; the unit the
/// measurement sink receives.
#[derive(Debug, Clone, PartialEq)]
pub struct MappedMeasurement {
    pub signal_id: Uuid,
    pub key: MeasurementKey,
    pub signal_reference: String,
    pub value: f64,
    pub timestamp: Ticks,
    pub adder: f64,
    pub multiplier: f64,
    pub value_quality_is_good: bool,
    pub time_quality_is_good: bool,
}

impl MappedMeasurement {
    /// Combines a parsed sample with its descriptor. The value and
    /// timestamp already on the sample are preserved.
    pub fn from_parsed(parsed: ParsedMeasurement, descriptor: &MeasurementDescriptor) -> Self {
        MappedMeasurement {
            signal_id: descriptor.signal_id,
            key: descriptor.key.clone(),
            signal_reference: descriptor.signal_reference.clone(),
            value: parsed.value,
            timestamp: parsed.timestamp,
            adder: descriptor.adder,
            multiplier: descriptor.multiplier,
            value_quality_is_good: parsed.value_quality_is_good,
            time_quality_is_good: parsed.time_quality_is_good,
        }
    }

    /// The value after the configured linear adjustment.
    pub fn adjusted_value(&self) -> f64 {
        self.value * self.multiplier + self.adder
    }
}
