//! # Configured Device Registry
//!
//! The per-adapter table of devices expected in the stream, with the
//! per-device counters the mapper maintains as frames arrive.
//!
//! Devices are keyed primarily by their protocol-level identification
//! code. Real deployments contain concentrators that reuse one id code
//! for every child device; when a collision is detected during load, a
//! secondary case-insensitive label table is created and every colliding
//! entry lives there instead, leaving labels as the only disambiguator.
//! A device whose id code *and* label are both taken is dropped with a
//! reported error. Each device therefore appears in exactly one of the
//! two tables.
//!
//! Devices observed in the stream but absent from the table are tallied in
//! `UndefinedDeviceTracker` so the condition is visible without flooding
//! the log.

use std::collections::HashMap;

use tracing::error;

use crate::frames::{DataCell, Ticks, MAX_STATION_NAME_LENGTH};
use crate::store::InputStreamDeviceRow;

/// Counters maintained per configured device.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DeviceStatistics {
    pub total_frames: u64,
    pub data_quality_errors: u64,
    pub time_quality_errors: u64,
    pub device_errors: u64,
    /// Monotonic under normal operation; allowed to jump backwards only
    /// through `reset`.
    pub last_report_time: Ticks,
}

impl DeviceStatistics {
    /// Folds one parsed cell into the counters.
    pub fn observe(&mut self, cell: &DataCell, timestamp: Ticks) {
        self.total_frames += 1;
        if timestamp > self.last_report_time {
            self.last_report_time = timestamp;
        }
        if !cell.data_is_valid {
            self.data_quality_errors += 1;
        }
        if !cell.synchronization_is_valid {
            self.time_quality_errors += 1;
        }
        if cell.device_error {
            self.device_errors += 1;
        }
    }

    pub fn reset(&mut self) {
        *self = DeviceStatistics::default();
    }
}

/// The configured expectation for one device in the stream.
///
/// # Fields
///
/// * `id_code`: protocol-level identifier used by the wire format.
/// * `label`: human acronym, the fallback lookup key under id collisions.
/// * `station_name`: longer name, bounded by the wire format's maximum.
/// * `external_id`: identifier of this device in the external store.
/// * `statistics`: counters mutated as frames arrive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceRecord {
    pub id_code: u16,
    pub label: String,
    pub station_name: String,
    pub external_id: u32,
    pub statistics: DeviceStatistics,
}

impl DeviceRecord {
    pub fn new(id_code: u16, label: &str, station_name: &str, external_id: u32) -> Self {
        DeviceRecord {
            id_code,
            label: label.trim().to_string(),
            station_name: station_name.chars().take(MAX_STATION_NAME_LENGTH).collect(),
            external_id,
            statistics: DeviceStatistics::default(),
        }
    }
}

fn label_key(label: &str) -> String {
    label.trim().to_ascii_uppercase()
}

/// Dual-keyed registry of configured devices.
#[derive(Debug, Default, Clone)]
pub struct DeviceTable {
    by_id: HashMap<u16, DeviceRecord>,
    by_label: Option<HashMap<String, DeviceRecord>>,
}

impl DeviceTable {
    pub fn new() -> Self {
        DeviceTable::default()
    }

    /// A table holding one device; the non-concentrator case.
    pub fn single(record: DeviceRecord) -> Self {
        let mut table = DeviceTable::new();
        table.by_id.insert(record.id_code, record);
        table
    }

    /// Builds the table from external-store rows, applying the collision
    /// rules above. Rejected rows are reported and dropped; loading
    /// continues.
    pub fn from_rows(rows: Vec<InputStreamDeviceRow>) -> Self {
        let mut table = DeviceTable::new();
        for row in rows {
            let record = DeviceRecord::new(row.access_id, &row.acronym, &row.name, row.id);
            if table.by_id.contains_key(&record.id_code) {
                let labels = table.by_label.get_or_insert_with(HashMap::new);
                let key = label_key(&record.label);
                if labels.contains_key(&key) {
                    error!(
                        id_code = record.id_code,
                        label = %record.label,
                        "duplicate device: id code and label both already defined, dropping entry"
                    );
                    continue;
                }
                labels.insert(key, record);
            } else {
                table.by_id.insert(record.id_code, record);
            }
        }
        table
    }

    /// Resolves a parsed cell to its configured device: by station name in
    /// the label table when one exists, then by id code.
    pub fn resolve_mut(&mut self, id_code: u16, station_name: &str) -> Option<&mut DeviceRecord> {
        if let Some(labels) = self.by_label.as_mut() {
            let key = label_key(station_name);
            if labels.contains_key(&key) {
                return labels.get_mut(&key);
            }
        }
        self.by_id.get_mut(&id_code)
    }

    /// Finds a device by id code across both tables.
    pub fn get_mut(&mut self, id_code: u16) -> Option<&mut DeviceRecord> {
        if self.by_id.contains_key(&id_code) {
            return self.by_id.get_mut(&id_code);
        }
        self.by_label
            .as_mut()?
            .values_mut()
            .find(|record| record.id_code == id_code)
    }

    pub fn get(&self, id_code: u16) -> Option<&DeviceRecord> {
        if let Some(record) = self.by_id.get(&id_code) {
            return Some(record);
        }
        self.by_label
            .as_ref()?
            .values()
            .find(|record| record.id_code == id_code)
    }

    /// Finds a device by label across both tables.
    pub fn get_by_label(&self, label: &str) -> Option<&DeviceRecord> {
        let key = label_key(label);
        if let Some(labels) = self.by_label.as_ref() {
            if let Some(record) = labels.get(&key) {
                return Some(record);
            }
        }
        self.by_id
            .values()
            .find(|record| label_key(&record.label) == key)
    }

    pub fn records(&self) -> impl Iterator<Item = &DeviceRecord> {
        self.by_id
            .values()
            .chain(self.by_label.iter().flat_map(|labels| labels.values()))
    }

    pub fn records_mut(&mut self) -> impl Iterator<Item = &mut DeviceRecord> {
        self.by_id
            .values_mut()
            .chain(self.by_label.iter_mut().flat_map(|labels| labels.values_mut()))
    }

    pub fn len(&self) -> usize {
        self.by_id.len() + self.by_label.as_ref().map_or(0, HashMap::len)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// True when an id-code collision forced the label table into being.
    pub fn has_label_table(&self) -> bool {
        self.by_label.is_some()
    }
}

/// Tally of stream devices with no configured counterpart.
#[derive(Debug, Default, Clone)]
pub struct UndefinedDeviceTracker {
    counts: HashMap<String, u64>,
}

impl UndefinedDeviceTracker {
    /// Records one sighting and returns the updated count; a return of 1
    /// marks the first sighting (the caller's cue to warn).
    pub fn observe(&mut self, station_name: &str) -> u64 {
        let count = self.counts.entry(station_name.trim().to_string()).or_insert(0);
        *count += 1;
        *count
    }

    pub fn count(&self, station_name: &str) -> u64 {
        self.counts.get(station_name.trim()).copied().unwrap_or(0)
    }

    pub fn len(&self) -> usize {
        self.counts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.counts.is_empty()
    }

    pub fn clear(&mut self) {
        self.counts.clear();
    }
}
