//! # Decoded Synchrophasor Frame Model
//!
//! This module defines the already-decoded frame types handed to the mapping
//! engine by a wire parser, together with the 100-nanosecond tick arithmetic
//! used to timestamp measurements. The binary dialects themselves (IEEE
//! C37.118, IEEE 1344, BPA PDCstream) live behind the opaque parser seam in
//! `parser`; everything here is dialect-neutral.
//!
//! ## Key Components
//!
//! - `Ticks`: 100 ns time units counted from 0001-01-01T00:00:00Z, with
//!   conversions to and from `chrono` UTC instants and named time zones.
//! - `DataFrame` / `DataCell`: one measurement sample for one or more
//!   devices at a common timestamp, with per-device quality flags.
//! - `ConfigurationFrame` / `ConfigurationCell`: the layout metadata
//!   (signal counts, frame rate) that makes subsequent data frames
//!   interpretable; serializable so it can be cached across restarts.
//! - `DeviceCommand`: control instructions forwarded to the source device.

use chrono::{DateTime, LocalResult, TimeZone, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use std::fmt;

/// 100-nanosecond intervals since 0001-01-01T00:00:00Z.
pub type Ticks = i64;

/// Ticks in one second.
pub const TICKS_PER_SECOND: Ticks = 10_000_000;

/// Tick count at the Unix epoch (1970-01-01T00:00:00Z).
pub const UNIX_EPOCH_TICKS: Ticks = 621_355_968_000_000_000;

/// Maximum station-name length carried by the wire protocols (bytes).
pub const MAX_STATION_NAME_LENGTH: usize = 16;

/// Converts a UTC instant to ticks.
pub fn ticks_from_utc(instant: DateTime<Utc>) -> Ticks {
    UNIX_EPOCH_TICKS
        + instant.timestamp() * TICKS_PER_SECOND
        + i64::from(instant.timestamp_subsec_nanos()) / 100
}

/// Converts ticks to a UTC instant.
///
/// Returns `None` when the tick count falls outside the range `chrono`
/// can represent.
pub fn utc_from_ticks(ticks: Ticks) -> Option<DateTime<Utc>> {
    let unix_ticks = ticks - UNIX_EPOCH_TICKS;
    let secs = unix_ticks.div_euclid(TICKS_PER_SECOND);
    let nanos = (unix_ticks.rem_euclid(TICKS_PER_SECOND) * 100) as u32;
    DateTime::<Utc>::from_timestamp(secs, nanos)
}

/// Current system time as ticks.
pub fn ticks_now() -> Ticks {
    ticks_from_utc(Utc::now())
}

/// Reinterprets a tick count that encodes a wall-clock reading in `zone`
/// as the equivalent UTC tick count.
///
/// Ambiguous local times (DST fold) resolve to the earlier instant;
/// nonexistent local times (DST gap) are passed through unchanged.
pub fn local_ticks_to_utc(ticks: Ticks, zone: Tz) -> Ticks {
    let Some(instant) = utc_from_ticks(ticks) else {
        return ticks;
    };
    match zone.from_local_datetime(&instant.naive_utc()) {
        LocalResult::Single(local) => ticks_from_utc(local.with_timezone(&Utc)),
        LocalResult::Ambiguous(earlier, _) => ticks_from_utc(earlier.with_timezone(&Utc)),
        LocalResult::None => ticks,
    }
}

/// Control instructions forwarded to a source device.
///
/// Numeric codes follow the synchrophasor command-frame convention, so a
/// wire parser can place them directly into a command frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeviceCommand {
    TurnOffTransmission,
    TurnOnTransmission,
    SendHeaderFrame,
    SendConfigFrame1,
    SendConfigFrame2,
    SendConfigFrame3,
}

impl DeviceCommand {
    /// Wire-level command code.
    pub fn code(self) -> u16 {
        match self {
            DeviceCommand::TurnOffTransmission => 1,
            DeviceCommand::TurnOnTransmission => 2,
            DeviceCommand::SendHeaderFrame => 3,
            DeviceCommand::SendConfigFrame1 => 4,
            DeviceCommand::SendConfigFrame2 => 5,
            DeviceCommand::SendConfigFrame3 => 6,
        }
    }
}

impl fmt::Display for DeviceCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceCommand::TurnOffTransmission => write!(f, "turn off transmission"),
            DeviceCommand::TurnOnTransmission => write!(f, "turn on transmission"),
            DeviceCommand::SendHeaderFrame => write!(f, "send header frame"),
            DeviceCommand::SendConfigFrame1 => write!(f, "send configuration frame 1"),
            DeviceCommand::SendConfigFrame2 => write!(f, "send configuration frame 2"),
            DeviceCommand::SendConfigFrame3 => write!(f, "send configuration frame 3"),
        }
    }
}

/// Layout description for one device inside a configuration frame.
///
/// # Fields
///
/// * `id_code`: protocol-level device identifier.
/// * `station_name`: device station name, at most
///   [`MAX_STATION_NAME_LENGTH`] bytes on the wire.
/// * `phasor_count` / `analog_count` / `digital_count`: signal counts that
///   fix the shape of every subsequent data cell for this device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigurationCell {
    pub id_code: u16,
    pub station_name: String,
    pub phasor_count: usize,
    pub analog_count: usize,
    pub digital_count: usize,
}

/// A decoded configuration frame: the metadata that makes data frames
/// interpretable.
///
/// Serializable so the last-known-good configuration can be written to the
/// configuration cache and replayed after a restart.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigurationFrame {
    pub id_code: u16,
    pub frame_rate: u16,
    pub cells: Vec<ConfigurationCell>,
}

/// Polar phasor composite: magnitude and angle.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PhasorValue {
    pub magnitude: f64,
    pub angle: f64,
}

/// Frequency composite: frequency and its rate of change.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FrequencyValue {
    pub frequency: f64,
    pub dfdt: f64,
}

/// A single analog channel sample.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AnalogValue {
    pub value: f64,
}

/// A single digital status word.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DigitalValue {
    pub value: u16,
}

/// Decoded measurements for one device within a data frame.
///
/// # Fields
///
/// * `id_code`: protocol-level device identifier from the wire.
/// * `station_name`: station name the parser associated with the cell.
/// * `status_word`: raw 16-bit status flags.
/// * `data_is_valid` / `synchronization_is_valid` / `device_error`:
///   quality flags decoded from the status word.
/// * `phasors` / `frequency` / `analogs` / `digitals`: the sample values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataCell {
    pub id_code: u16,
    pub station_name: String,
    pub status_word: u16,
    pub data_is_valid: bool,
    pub synchronization_is_valid: bool,
    pub device_error: bool,
    pub phasors: Vec<PhasorValue>,
    pub frequency: FrequencyValue,
    pub analogs: Vec<AnalogValue>,
    pub digitals: Vec<DigitalValue>,
}

/// One decoded data frame: a common timestamp plus one cell per device.
///
/// # Fields
///
/// * `id_code`: stream identifier of the sending device or concentrator.
/// * `timestamp`: source timestamp in ticks, as decoded from the wire.
/// * `received_timestamp`: local receipt time in ticks, stamped by the
///   parser adapter; used for latency sampling.
/// * `cells`: per-device measurement cells.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataFrame {
    pub id_code: u16,
    pub timestamp: Ticks,
    pub received_timestamp: Ticks,
    pub cells: Vec<DataCell>,
}
