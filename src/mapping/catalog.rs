//! # Measurement Catalog
//!
//! Maps signal-reference strings to the measurement metadata configured in
//! the external store. Loaded once at initialize (and again on
//! reconfiguration) and read-only on the frame path. A reference with no
//! catalog entry means the wire signal is not subscribed; its values are
//! dropped silently.

use std::collections::HashMap;

use tracing::error;

use crate::measurement::MeasurementDescriptor;
use crate::store::ActiveMeasurementRow;

/// Signal-reference → descriptor lookup table.
#[derive(Debug, Default, Clone)]
pub struct MeasurementCatalog {
    by_reference: HashMap<String, MeasurementDescriptor>,
}

impl MeasurementCatalog {
    pub fn new() -> Self {
        MeasurementCatalog::default()
    }

    /// Builds the catalog from external-store rows. Rows whose historian
    /// key does not parse are reported and dropped; loading continues.
    pub fn from_rows(rows: Vec<ActiveMeasurementRow>) -> Self {
        let mut by_reference = HashMap::with_capacity(rows.len());
        for row in rows {
            let key = match row.key.parse() {
                Ok(key) => key,
                Err(err) => {
                    error!(signal_reference = %row.signal_reference, %err, "dropping measurement row");
                    continue;
                }
            };
            by_reference.insert(
                row.signal_reference.clone(),
                MeasurementDescriptor {
                    signal_id: row.signal_id,
                    key,
                    signal_reference: row.signal_reference,
                    adder: row.adder,
                    multiplier: row.multiplier,
                },
            );
        }
        MeasurementCatalog { by_reference }
    }

    pub fn get(&self, signal_reference: &str) -> Option<&MeasurementDescriptor> {
        self.by_reference.get(signal_reference)
    }

    pub fn len(&self) -> usize {
        self.by_reference.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_reference.is_empty()
    }
}
