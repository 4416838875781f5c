//! External configuration store access.
//!
//! The adapter never talks to a database directly; topology and
//! measurement metadata come through the `ConfigurationSource` trait as
//! tabular rows. Production hosts implement it over their store of record;
//! tests use the in-memory source below.

use thiserror::Error;
use uuid::Uuid;

/// Raised when the backing store cannot satisfy a query.
#[derive(Error, Debug, Clone)]
#[error("configuration source error: {0}")]
pub struct StoreError(pub String);

/// One row of the input-adapters table; used to resolve a shared-mapping
/// acronym to the adapter identifier it maps to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InputAdapterRow {
    pub id: u32,
    pub adapter_name: String,
}

/// One row of the input-stream-devices table: a child device expected in
/// a concentrated stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InputStreamDeviceRow {
    pub parent_id: u32,
    pub id: u32,
    pub access_id: u16,
    pub acronym: String,
    pub name: String,
}

/// One row of the active-measurements table: metadata for a subscribed
/// signal, keyed by its signal reference.
#[derive(Debug, Clone, PartialEq)]
pub struct ActiveMeasurementRow {
    pub device_id: u32,
    pub signal_reference: String,
    pub signal_id: Uuid,
    /// Historian key in `SOURCE:ID` form.
    pub key: String,
    pub adder: f64,
    pub multiplier: f64,
}

/// Read access to the external configuration store.
pub trait ConfigurationSource: Send + Sync {
    /// All configured input adapters (for shared-mapping resolution).
    fn input_adapters(&self) -> Result<Vec<InputAdapterRow>, StoreError>;

    /// Child devices configured under `parent_id`.
    fn input_stream_devices(&self, parent_id: u32)
        -> Result<Vec<InputStreamDeviceRow>, StoreError>;

    /// Measurement metadata configured for `device_id`.
    fn active_measurements(&self, device_id: u32)
        -> Result<Vec<ActiveMeasurementRow>, StoreError>;
}

/// In-memory `ConfigurationSource` for tests and embedded hosts.
#[derive(Debug, Default, Clone)]
pub struct InMemoryConfigurationSource {
    pub adapters: Vec<InputAdapterRow>,
    pub devices: Vec<InputStreamDeviceRow>,
    pub measurements: Vec<ActiveMeasurementRow>,
}

impl InMemoryConfigurationSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_adapter(mut self, id: u32, adapter_name: &str) -> Self {
        self.adapters.push(InputAdapterRow {
            id,
            adapter_name: adapter_name.to_string(),
        });
        self
    }

    pub fn with_device(
        mut self,
        parent_id: u32,
        id: u32,
        access_id: u16,
        acronym: &str,
        name: &str,
    ) -> Self {
        self.devices.push(InputStreamDeviceRow {
            parent_id,
            id,
            access_id,
            acronym: acronym.to_string(),
            name: name.to_string(),
        });
        self
    }

    pub fn with_measurement(
        mut self,
        device_id: u32,
        signal_reference: &str,
        signal_id: Uuid,
        key: &str,
        adder: f64,
        multiplier: f64,
    ) -> Self {
        self.measurements.push(ActiveMeasurementRow {
            device_id,
            signal_reference: signal_reference.to_string(),
            signal_id,
            key: key.to_string(),
            adder,
            multiplier,
        });
        self
    }
}

impl ConfigurationSource for InMemoryConfigurationSource {
    fn input_adapters(&self) -> Result<Vec<InputAdapterRow>, StoreError> {
        Ok(self.adapters.clone())
    }

    fn input_stream_devices(
        &self,
        parent_id: u32,
    ) -> Result<Vec<InputStreamDeviceRow>, StoreError> {
        Ok(self
            .devices
            .iter()
            .filter(|row| row.parent_id == parent_id)
            .cloned()
            .collect())
    }

    fn active_measurements(
        &self,
        device_id: u32,
    ) -> Result<Vec<ActiveMeasurementRow>, StoreError> {
        Ok(self
            .measurements
            .iter()
            .filter(|row| row.device_id == device_id)
            .cloned()
            .collect())
    }
}
