//! # Phasor Measurement Mapping Engine
//!
//! `MeasurementMapper` is the heart of the ingestion adapter. It owns a
//! frame parser for one PMU or PDC connection, consumes the parser's event
//! stream, correlates every decoded device cell against the configured
//! topology, attaches platform identity to each sample through the signal
//! reference scheme, and hands the resulting batch to the measurement sink
//! once per data frame.
//!
//! ## Key Components
//!
//! - `MeasurementMapper`: state, statistics, and the frame hot path.
//! - `MapperCommand` / `MapperHandle`: the administrative surface, a
//!   command enum delivered over a channel so every mutation is applied by
//!   the mapper's own task.
//! - `MapperStatistics` / `LatencyStatistics`: adapter-level counters.
//! - `IngestError`: initialize-time failures; streaming-time errors are
//!   reported and recovered instead of propagated.
//!
//! ## Concurrency
//!
//! The run loop is the only writer of mapper state. Parser events,
//! administrative commands, the liveness ticker, and the reconnect timer
//! are arms of one `select!`, so per-connection counters need no locks and
//! reconfiguration swaps the device table and catalog as one coherent
//! snapshot. Disk access (cache writes, configuration loads) is dispatched
//! off the event path.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use chrono_tz::Tz;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{sleep_until, Duration as TokioDuration, Instant as TokioInstant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::cache::ConfigurationCacheStore;
use crate::frames::{
    local_ticks_to_utc, ticks_now, ConfigurationFrame, DataCell, DataFrame, DeviceCommand, Ticks,
};
use crate::measurement::{MappedMeasurement, ParsedMeasurement};
use crate::parser::{FrameParser, ParserError, ParserEvent};
use crate::settings::{ConnectionSettings, SettingsError};
use crate::sink::MeasurementSink;
use crate::store::{ConfigurationSource, StoreError};

use super::catalog::MeasurementCatalog;
use super::device::{DeviceRecord, DeviceTable, UndefinedDeviceTracker};
use super::liveness::{LivenessAction, LivenessMonitor, LivenessProbe};
use super::signal::{SignalIndexError, SignalKind, SignalReferenceCache};

const EVENT_QUEUE_DEPTH: usize = 256;
const COMMAND_QUEUE_DEPTH: usize = 32;

/// Failures surfaced by `initialize` and by handle calls against a
/// stopped mapper. Streaming-time errors never take this path; the
/// adapter's liveness contract is to keep trying as long as it is enabled.
#[derive(Error, Debug)]
pub enum IngestError {
    #[error(transparent)]
    Settings(#[from] SettingsError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Parser(#[from] ParserError),
    #[error("configuration file i/o error: {0}")]
    ConfigurationFile(#[from] std::io::Error),
    #[error("configuration file is not a valid frame: {0}")]
    MalformedConfiguration(#[from] serde_json::Error),
    #[error("mapper task has stopped")]
    Stopped,
}

/// Connection lifecycle of the mapper.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Initialized or administratively stopped.
    Idle,
    /// Between connection attempts.
    Connecting,
    /// Transport up, layout of data frames not yet known.
    ConnectedNoConfig,
    /// Mapping measurements.
    Streaming,
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConnectionState::Idle => write!(f, "idle"),
            ConnectionState::Connecting => write!(f, "connecting"),
            ConnectionState::ConnectedNoConfig => write!(f, "connected, awaiting configuration"),
            ConnectionState::Streaming => write!(f, "streaming"),
        }
    }
}

/// Rolling frame-latency counters.
///
/// Minimum and maximum use initialize-on-zero semantics: zero means
/// "unset" and the first sample overwrites it.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct LatencyStatistics {
    pub minimum_ticks: Ticks,
    pub maximum_ticks: Ticks,
    pub total_ticks: i64,
    pub measurement_count: u64,
}

impl LatencyStatistics {
    pub fn observe(&mut self, latency: Ticks) {
        if self.minimum_ticks == 0 || latency < self.minimum_ticks {
            self.minimum_ticks = latency;
        }
        if self.maximum_ticks == 0 || latency > self.maximum_ticks {
            self.maximum_ticks = latency;
        }
        self.total_ticks += latency;
        self.measurement_count += 1;
    }

    pub fn average_ticks(&self) -> i64 {
        if self.measurement_count == 0 {
            0
        } else {
            self.total_ticks / self.measurement_count as i64
        }
    }
}

/// Adapter-level counters.
///
/// `bytes_received` covers the current liveness interval and is zeroed on
/// every tick; `total_bytes_received` is cumulative.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct MapperStatistics {
    pub connection_attempts: u64,
    pub total_data_frames: u64,
    pub total_configuration_frames: u64,
    pub total_header_frames: u64,
    pub configuration_changes: u64,
    pub parsing_exceptions: u64,
    pub out_of_order_frames: u64,
    pub bytes_received: u64,
    pub total_bytes_received: u64,
    /// Newest frame timestamp seen this connection; monotonic
    /// non-decreasing.
    pub last_report_time: Ticks,
    pub latency: LatencyStatistics,
}

/// Administrative requests, linearized through the mapper's run loop.
#[derive(Debug)]
pub enum MapperCommand {
    Connect,
    Disconnect,
    SendDeviceCommand(DeviceCommand),
    ResetStatistics,
    ResetDeviceStatistics(u16),
    LoadCachedConfiguration,
    LoadConfiguration(PathBuf),
    GetShortStatus {
        max_length: usize,
        reply: oneshot::Sender<String>,
    },
    Shutdown,
}

/// Cloneable administrative handle to a running mapper.
#[derive(Debug, Clone)]
pub struct MapperHandle {
    commands: mpsc::Sender<MapperCommand>,
}

impl MapperHandle {
    /// Creates a handle and the command receiver to pass to
    /// [`MeasurementMapper::run`].
    pub fn channel() -> (Self, mpsc::Receiver<MapperCommand>) {
        let (commands, rx) = mpsc::channel(COMMAND_QUEUE_DEPTH);
        (MapperHandle { commands }, rx)
    }

    async fn send(&self, command: MapperCommand) -> Result<(), IngestError> {
        self.commands
            .send(command)
            .await
            .map_err(|_| IngestError::Stopped)
    }

    pub async fn connect(&self) -> Result<(), IngestError> {
        self.send(MapperCommand::Connect).await
    }

    pub async fn disconnect(&self) -> Result<(), IngestError> {
        self.send(MapperCommand::Disconnect).await
    }

    pub async fn send_device_command(&self, command: DeviceCommand) -> Result<(), IngestError> {
        self.send(MapperCommand::SendDeviceCommand(command)).await
    }

    pub async fn reset_statistics(&self) -> Result<(), IngestError> {
        self.send(MapperCommand::ResetStatistics).await
    }

    pub async fn reset_device_statistics(&self, id_code: u16) -> Result<(), IngestError> {
        self.send(MapperCommand::ResetDeviceStatistics(id_code)).await
    }

    pub async fn load_cached_configuration(&self) -> Result<(), IngestError> {
        self.send(MapperCommand::LoadCachedConfiguration).await
    }

    pub async fn load_configuration(&self, path: PathBuf) -> Result<(), IngestError> {
        self.send(MapperCommand::LoadConfiguration(path)).await
    }

    pub async fn get_short_status(&self, max_length: usize) -> Result<String, IngestError> {
        let (reply, rx) = oneshot::channel();
        self.send(MapperCommand::GetShortStatus { max_length, reply })
            .await?;
        rx.await.map_err(|_| IngestError::Stopped)
    }

    pub async fn shutdown(&self) -> Result<(), IngestError> {
        self.send(MapperCommand::Shutdown).await
    }
}

/// The stateful stream-mapping engine for one PMU/PDC connection.
pub struct MeasurementMapper {
    name: String,
    external_id: u32,
    settings: ConnectionSettings,
    shared_mapping_id: Option<u32>,
    simulate_timestamp: bool,
    parser: Box<dyn FrameParser>,
    source: Arc<dyn ConfigurationSource>,
    sink: Arc<dyn MeasurementSink>,
    cache: ConfigurationCacheStore,
    devices: DeviceTable,
    catalog: MeasurementCatalog,
    signal_cache: SignalReferenceCache,
    undefined_devices: UndefinedDeviceTracker,
    liveness: LivenessMonitor,
    statistics: MapperStatistics,
    state: ConnectionState,
    enabled: bool,
    received_config_frame: bool,
    cached_config_active: bool,
    cached_config_load_attempted: bool,
    reconnect_at: Option<TokioInstant>,
    started_at: Option<Instant>,
    events_tx: mpsc::Sender<ParserEvent>,
    events_rx: Option<mpsc::Receiver<ParserEvent>>,
}

impl MeasurementMapper {
    /// Parses settings, resolves the optional shared mapping, loads the
    /// device topology and measurement catalog, and applies an optional
    /// preloaded configuration file.
    ///
    /// This is the one place a failure is fatal: invalid settings or an
    /// unreadable store leave nothing to connect with.
    pub fn initialize(
        name: impl Into<String>,
        external_id: u32,
        connection_string: &str,
        mut parser: Box<dyn FrameParser>,
        source: Arc<dyn ConfigurationSource>,
        sink: Arc<dyn MeasurementSink>,
        cache: ConfigurationCacheStore,
    ) -> Result<Self, IngestError> {
        let name = name.into();
        let settings = ConnectionSettings::parse(connection_string)?;
        parser.apply_settings(&settings.passthrough);

        let shared_mapping_id = match &settings.shared_mapping {
            Some(acronym) => {
                let row = source
                    .input_adapters()?
                    .into_iter()
                    .find(|row| row.adapter_name.eq_ignore_ascii_case(acronym));
                match row {
                    Some(row) => Some(row.id),
                    None => {
                        error!(
                            adapter = %name,
                            shared_mapping = %acronym,
                            "unknown shared mapping, falling back to own identifier"
                        );
                        None
                    }
                }
            }
            None => None,
        };

        let simulate_timestamp = settings
            .simulate_timestamp
            .unwrap_or_else(|| parser.is_file_based());

        let (events_tx, events_rx) = mpsc::channel(EVENT_QUEUE_DEPTH);
        let liveness = LivenessMonitor::new(settings.data_loss_interval);

        let mut mapper = MeasurementMapper {
            signal_cache: SignalReferenceCache::new(name.as_str()),
            name,
            external_id,
            settings,
            shared_mapping_id,
            simulate_timestamp,
            parser,
            source,
            sink,
            cache,
            devices: DeviceTable::new(),
            catalog: MeasurementCatalog::new(),
            undefined_devices: UndefinedDeviceTracker::default(),
            liveness,
            statistics: MapperStatistics::default(),
            state: ConnectionState::Idle,
            enabled: false,
            received_config_frame: false,
            cached_config_active: false,
            cached_config_load_attempted: false,
            reconnect_at: None,
            started_at: None,
            events_tx,
            events_rx: Some(events_rx),
        };

        mapper.load_topology()?;

        if let Some(path) = mapper.settings.configuration_file.clone() {
            match read_configuration_file(&path) {
                Ok(frame) => {
                    info!(adapter = %mapper.name, path = %path.display(), "preloaded configuration frame");
                    mapper.parser.inject_configuration(frame);
                }
                Err(err) => {
                    warn!(adapter = %mapper.name, path = %path.display(), %err, "could not preload configuration file");
                }
            }
        }

        Ok(mapper)
    }

    /// The store identifier used for topology and catalog queries: the
    /// shared mapping's when configured, otherwise this adapter's own.
    pub fn effective_query_id(&self) -> u32 {
        self.shared_mapping_id.unwrap_or(self.external_id)
    }

    /// Loads (or reloads) the device table and measurement catalog and
    /// swaps them in as one snapshot.
    fn load_topology(&mut self) -> Result<(), IngestError> {
        let query_id = self.effective_query_id();
        let devices = if self.settings.is_concentrator {
            DeviceTable::from_rows(self.source.input_stream_devices(query_id)?)
        } else {
            DeviceTable::single(DeviceRecord::new(
                self.settings.access_id,
                &self.name,
                &self.name,
                query_id,
            ))
        };
        let catalog = MeasurementCatalog::from_rows(self.source.active_measurements(query_id)?);
        info!(
            adapter = %self.name,
            devices = devices.len(),
            measurements = catalog.len(),
            "topology loaded"
        );
        self.devices = devices;
        self.catalog = catalog;
        Ok(())
    }

    /// Resets per-connection state and starts the frame parser.
    pub fn attempt_connection(&mut self) {
        self.enabled = true;
        self.reconnect_at = None;
        self.reset_connection_state();
        self.state = ConnectionState::Connecting;
        if self.started_at.is_none() {
            self.started_at = Some(Instant::now());
        }
        if let Err(err) = self.parser.start(self.events_tx.clone()) {
            error!(adapter = %self.name, %err, "failed to start frame parser");
            self.schedule_reconnect();
        }
    }

    /// Disables liveness monitoring, stops the parser, and returns to
    /// idle. In-flight frame processing already queued is still applied.
    pub fn attempt_disconnection(&mut self) {
        self.enabled = false;
        self.liveness.disable();
        self.reconnect_at = None;
        self.parser.stop();
        self.state = ConnectionState::Idle;
        info!(adapter = %self.name, "disconnected");
    }

    fn reset_connection_state(&mut self) {
        self.statistics.last_report_time = 0;
        self.statistics.bytes_received = 0;
        self.statistics.out_of_order_frames = 0;
        self.received_config_frame = false;
        self.cached_config_active = false;
        self.cached_config_load_attempted = false;
    }

    fn schedule_reconnect(&mut self) {
        if !self.enabled {
            return;
        }
        let delay = self.settings.delayed_connection_interval;
        self.state = ConnectionState::Connecting;
        self.reconnect_at = Some(TokioInstant::now() + delay);
        debug!(adapter = %self.name, ?delay, "reconnect scheduled");
    }

    /// Stops the parser and schedules a fresh connection attempt.
    fn restart_connection(&mut self) {
        self.parser.stop();
        self.schedule_reconnect();
    }

    /// Applies one parser event. All mapper state changes flow through
    /// here or through [`MapperCommand`] handling.
    pub fn process_event(&mut self, event: ParserEvent) {
        match event {
            ParserEvent::ConnectionAttempt => {
                self.statistics.connection_attempts += 1;
                info!(adapter = %self.name, "attempting connection");
            }
            ParserEvent::ConnectionEstablished => {
                info!(adapter = %self.name, "connection established");
                self.reset_connection_state();
                self.state = ConnectionState::ConnectedNoConfig;
                if self.parser.supports_commands()
                    || self.settings.allow_use_of_cached_configuration
                {
                    self.liveness.enable();
                }
            }
            ParserEvent::ConnectionException(err) => {
                error!(adapter = %self.name, err = %err, "connection exception");
                if self.enabled {
                    self.schedule_reconnect();
                }
            }
            ParserEvent::ConnectionTerminated => {
                warn!(adapter = %self.name, "connection terminated");
                if self.enabled {
                    self.schedule_reconnect();
                }
            }
            ParserEvent::ReceivedConfigurationFrame(frame) => {
                self.handle_configuration_frame(frame);
            }
            ParserEvent::ReceivedDataFrame(frame) => {
                self.extract_frame_measurements(frame);
            }
            ParserEvent::ReceivedHeaderFrame => {
                self.statistics.total_header_frames += 1;
            }
            ParserEvent::ReceivedFrameBufferImage(byte_count) => {
                self.statistics.bytes_received += byte_count as u64;
                self.statistics.total_bytes_received += byte_count as u64;
            }
            ParserEvent::ParsingException(err) => {
                self.statistics.parsing_exceptions += 1;
                error!(adapter = %self.name, err = %err, "parsing exception");
            }
            ParserEvent::ExceededParsingExceptionThreshold => {
                warn!(
                    adapter = %self.name,
                    "parsing exception threshold exceeded, restarting connection"
                );
                self.restart_connection();
            }
            ParserEvent::ConfigurationChanged => {
                self.handle_configuration_changed();
            }
        }
    }

    /// Configuration receipt is idempotent per connection: only the first
    /// frame persists to the cache, later ones count as configuration
    /// changes.
    fn handle_configuration_frame(&mut self, frame: ConfigurationFrame) {
        self.statistics.total_configuration_frames += 1;
        if self.received_config_frame {
            self.statistics.configuration_changes += 1;
        } else {
            self.received_config_frame = true;
            info!(
                adapter = %self.name,
                devices = frame.cells.len(),
                frame_rate = frame.frame_rate,
                "configuration frame received"
            );
            self.cache.cache(&self.name, &frame);
        }
        self.state = ConnectionState::Streaming;
    }

    fn handle_configuration_changed(&mut self) {
        info!(adapter = %self.name, "device reported a configuration change");
        self.received_config_frame = false;
        self.cached_config_active = false;
        self.state = ConnectionState::ConnectedNoConfig;

        // Bounce the liveness monitor so the absent-configuration path
        // rearms for the new layout.
        self.liveness.disable();
        if self.parser.supports_commands() || self.settings.allow_use_of_cached_configuration {
            self.liveness.enable();
        }

        // Reload topology; on failure keep streaming against the previous
        // snapshot.
        if let Err(err) = self.load_topology() {
            error!(adapter = %self.name, %err, "topology reload failed, keeping previous snapshot");
        }

        if self.parser.supports_commands() {
            if let Err(err) = self.parser.send_command(DeviceCommand::SendConfigFrame2) {
                error!(adapter = %self.name, %err, "failed to request new configuration frame");
            }
        }
    }

    /// One liveness interval elapsed: evaluate starvation and
    /// configuration absence, then rearm the byte counter.
    pub async fn liveness_tick(&mut self) {
        let probe = LivenessProbe {
            bytes_received: self.statistics.bytes_received,
            // A connection running on an injected configuration is not
            // starved of one; escalation is for the empty-cache case.
            received_config_frame: self.received_config_frame || self.cached_config_active,
            allow_cached_configuration: self.settings.allow_use_of_cached_configuration,
            cached_config_load_attempted: self.cached_config_load_attempted,
            parser_supports_commands: self.parser.supports_commands(),
        };
        let action = self.liveness.evaluate(probe);
        self.statistics.bytes_received = 0;

        match action {
            LivenessAction::None => {}
            LivenessAction::RestartConnection => {
                warn!(adapter = %self.name, "liveness check failed, restarting connection");
                self.restart_connection();
            }
            LivenessAction::LoadCachedConfiguration => {
                self.cached_config_load_attempted = true;
                self.load_cached_configuration().await;
            }
        }
    }

    /// Feeds the last-known-good configuration into the parser, bypassing
    /// the wire.
    pub async fn load_cached_configuration(&mut self) {
        match self.cache.load(&self.name).await {
            Some(frame) => {
                info!(adapter = %self.name, "streaming against cached configuration");
                self.parser.inject_configuration(frame);
                self.cached_config_active = true;
                if self.state == ConnectionState::ConnectedNoConfig {
                    self.state = ConnectionState::Streaming;
                }
            }
            None => {
                warn!(adapter = %self.name, "no cached configuration available");
            }
        }
    }

    /// Reads a configuration frame from `path` and feeds it into the
    /// parser, bypassing the wire. The read runs on a blocking worker.
    pub async fn load_configuration(&mut self, path: &Path) {
        let owned = path.to_owned();
        let read = tokio::task::spawn_blocking(move || std::fs::read_to_string(owned)).await;
        let contents = match read {
            Ok(Ok(contents)) => contents,
            Ok(Err(err)) => {
                error!(adapter = %self.name, path = %path.display(), %err, "failed to read configuration file");
                return;
            }
            Err(err) => {
                error!(adapter = %self.name, %err, "configuration file read task failed");
                return;
            }
        };
        match serde_json::from_str::<ConfigurationFrame>(&contents) {
            Ok(frame) => {
                info!(adapter = %self.name, path = %path.display(), "configuration frame loaded from file");
                self.parser.inject_configuration(frame);
                self.cached_config_active = true;
                if self.state == ConnectionState::ConnectedNoConfig {
                    self.state = ConnectionState::Streaming;
                }
            }
            Err(err) => {
                error!(adapter = %self.name, path = %path.display(), %err, "configuration file is not a valid frame");
            }
        }
    }

    /// Forwards a device command to the parser when the dialect supports
    /// one.
    pub fn send_device_command(&mut self, command: DeviceCommand) {
        if !self.parser.supports_commands() {
            warn!(adapter = %self.name, %command, "parser does not support device commands");
            return;
        }
        if let Err(err) = self.parser.send_command(command) {
            error!(adapter = %self.name, %command, %err, "failed to send device command");
        }
    }

    /// Zeroes adapter-level and per-device counters.
    pub fn reset_statistics(&mut self) {
        self.statistics = MapperStatistics::default();
        for device in self.devices.records_mut() {
            device.statistics.reset();
        }
        self.undefined_devices.clear();
        info!(adapter = %self.name, "statistics reset");
    }

    /// Zeroes the counters of one device.
    pub fn reset_device_statistics(&mut self, id_code: u16) {
        match self.devices.get_mut(id_code) {
            Some(device) => {
                device.statistics.reset();
                info!(adapter = %self.name, id_code, "device statistics reset");
            }
            None => warn!(adapter = %self.name, id_code, "no such device"),
        }
    }

    /// Renders a bounded one-line status summary.
    pub fn get_short_status(&self, max_length: usize) -> String {
        let uptime = self.started_at.map(|t| t.elapsed()).unwrap_or_default();
        let frames = self.statistics.total_data_frames;
        let rate = if uptime.as_secs_f64() > 0.0 {
            frames as f64 / uptime.as_secs_f64()
        } else {
            0.0
        };
        let errors = self.statistics.parsing_exceptions
            + self
                .devices
                .records()
                .map(|device| device.statistics.device_errors)
                .sum::<u64>();
        let status = format!(
            "{}: {} frames at {:.1}/s, {} errors, up {}s",
            self.state,
            frames,
            rate,
            errors,
            uptime.as_secs()
        );
        truncate(status, max_length)
    }

    /// The hot path: normalizes the frame timestamp, tracks ordering and
    /// latency, resolves every cell to a configured device, emits mapped
    /// measurements in fixed order, and publishes the batch exactly once.
    pub fn extract_frame_measurements(&mut self, frame: DataFrame) {
        // Time normalization: optional clock override, source zone to UTC,
        // then the configured adjustment.
        let mut timestamp = frame.timestamp;
        if self.simulate_timestamp {
            timestamp = ticks_now();
        }
        if self.settings.time_zone != Tz::UTC {
            timestamp = local_ticks_to_utc(timestamp, self.settings.time_zone);
        }
        timestamp += self.settings.time_adjustment_ticks;

        // Order tracking: late frames are counted but still mapped.
        if timestamp > self.statistics.last_report_time {
            self.statistics.last_report_time = timestamp;
        } else {
            self.statistics.out_of_order_frames += 1;
        }

        // Latency sampling against local receipt time.
        self.statistics
            .latency
            .observe(frame.received_timestamp - timestamp);

        let mut batch = Vec::new();
        for cell in &frame.cells {
            let resolved = match self.devices.resolve_mut(cell.id_code, &cell.station_name) {
                Some(device) => {
                    device.statistics.observe(cell, timestamp);
                    Some(device.label.clone())
                }
                None => None,
            };
            let Some(label) = resolved else {
                if self.undefined_devices.observe(&cell.station_name) == 1 {
                    warn!(
                        adapter = %self.name,
                        station = %cell.station_name,
                        "data received for undefined device"
                    );
                }
                continue;
            };
            // Per-device fault isolation: one failing cell never aborts
            // the rest of the frame.
            if let Err(err) = self.map_device_cell(cell, timestamp, &mut batch) {
                error!(adapter = %self.name, device = %label, %err, "failed to map device measurements");
            }
        }

        self.statistics.total_data_frames += 1;
        self.sink.publish(batch);
    }

    /// Emits one cell's measurements in fixed order: status, phasor
    /// angle/magnitude pairs, frequency, df/dt, analogs, digitals.
    fn map_device_cell(
        &mut self,
        cell: &DataCell,
        timestamp: Ticks,
        batch: &mut Vec<MappedMeasurement>,
    ) -> Result<(), SignalIndexError> {
        let signal_cache = &mut self.signal_cache;
        let catalog = &self.catalog;
        let parsed = |value: f64| ParsedMeasurement {
            value,
            timestamp,
            value_quality_is_good: cell.data_is_valid,
            time_quality_is_good: cell.synchronization_is_valid,
        };

        map_attributes(
            batch,
            catalog,
            signal_cache.scalar(SignalKind::Status),
            parsed(f64::from(cell.status_word)),
        );

        let phasor_count = cell.phasors.len();
        for (index, phasor) in cell.phasors.iter().enumerate() {
            map_attributes(
                batch,
                catalog,
                signal_cache.indexed(SignalKind::Angle, index, phasor_count)?,
                parsed(phasor.angle),
            );
            map_attributes(
                batch,
                catalog,
                signal_cache.indexed(SignalKind::Magnitude, index, phasor_count)?,
                parsed(phasor.magnitude),
            );
        }

        map_attributes(
            batch,
            catalog,
            signal_cache.scalar(SignalKind::Frequency),
            parsed(cell.frequency.frequency),
        );
        map_attributes(
            batch,
            catalog,
            signal_cache.scalar(SignalKind::DfDt),
            parsed(cell.frequency.dfdt),
        );

        let analog_count = cell.analogs.len();
        for (index, analog) in cell.analogs.iter().enumerate() {
            map_attributes(
                batch,
                catalog,
                signal_cache.indexed(SignalKind::Analog, index, analog_count)?,
                parsed(analog.value),
            );
        }

        let digital_count = cell.digitals.len();
        for (index, digital) in cell.digitals.iter().enumerate() {
            map_attributes(
                batch,
                catalog,
                signal_cache.indexed(SignalKind::Digital, index, digital_count)?,
                parsed(f64::from(digital.value)),
            );
        }

        Ok(())
    }

    /// Consumes parser events, administrative commands, the liveness
    /// ticker, and the reconnect timer until shut down.
    pub async fn run(mut self, mut commands: mpsc::Receiver<MapperCommand>) {
        let Some(mut events) = self.events_rx.take() else {
            error!(adapter = %self.name, "mapper run invoked twice");
            return;
        };

        let mut ticker = tokio::time::interval(self.liveness.period());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // A far-future placeholder keeps the disabled arm type-checked.
        let idle = TokioDuration::from_secs(3600);

        loop {
            let reconnect_at = self
                .reconnect_at
                .unwrap_or_else(|| TokioInstant::now() + idle);
            tokio::select! {
                _ = ticker.tick() => {
                    self.liveness_tick().await;
                }
                Some(event) = events.recv() => {
                    self.process_event(event);
                }
                maybe_command = commands.recv() => {
                    match maybe_command {
                        Some(command) => {
                            if !self.handle_command(command).await {
                                break;
                            }
                        }
                        None => break,
                    }
                }
                _ = sleep_until(reconnect_at), if self.reconnect_at.is_some() => {
                    self.reconnect_at = None;
                    info!(adapter = %self.name, "re-attempting connection");
                    self.attempt_connection();
                }
            }
        }

        self.attempt_disconnection();
    }

    /// Returns false when the loop should exit.
    async fn handle_command(&mut self, command: MapperCommand) -> bool {
        match command {
            MapperCommand::Connect => self.attempt_connection(),
            MapperCommand::Disconnect => self.attempt_disconnection(),
            MapperCommand::SendDeviceCommand(device_command) => {
                self.send_device_command(device_command)
            }
            MapperCommand::ResetStatistics => self.reset_statistics(),
            MapperCommand::ResetDeviceStatistics(id_code) => {
                self.reset_device_statistics(id_code)
            }
            MapperCommand::LoadCachedConfiguration => self.load_cached_configuration().await,
            MapperCommand::LoadConfiguration(path) => self.load_configuration(&path).await,
            MapperCommand::GetShortStatus { max_length, reply } => {
                let _ = reply.send(self.get_short_status(max_length));
            }
            MapperCommand::Shutdown => return false,
        }
        true
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn settings(&self) -> &ConnectionSettings {
        &self.settings
    }

    pub fn statistics(&self) -> &MapperStatistics {
        &self.statistics
    }

    pub fn devices(&self) -> &DeviceTable {
        &self.devices
    }

    pub fn catalog(&self) -> &MeasurementCatalog {
        &self.catalog
    }

    pub fn undefined_devices(&self) -> &UndefinedDeviceTracker {
        &self.undefined_devices
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.state
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn received_config_frame(&self) -> bool {
        self.received_config_frame
    }

    pub fn cached_config_load_attempted(&self) -> bool {
        self.cached_config_load_attempted
    }

    pub fn liveness_enabled(&self) -> bool {
        self.liveness.is_enabled()
    }

    pub fn simulate_timestamp(&self) -> bool {
        self.simulate_timestamp
    }

    /// A clone of the sender the parser reports through; lets hosts and
    /// tests inject events as if the parser raised them.
    pub fn event_sender(&self) -> mpsc::Sender<ParserEvent> {
        self.events_tx.clone()
    }
}

/// Attaches catalog identity to one parsed sample and appends it to the
/// batch. Absence from the catalog means the signal is not subscribed and
/// the sample is dropped silently.
fn map_attributes(
    batch: &mut Vec<MappedMeasurement>,
    catalog: &MeasurementCatalog,
    signal_reference: &str,
    parsed: ParsedMeasurement,
) {
    if let Some(descriptor) = catalog.get(signal_reference) {
        batch.push(MappedMeasurement::from_parsed(parsed, descriptor));
    }
}

fn read_configuration_file(path: &Path) -> Result<ConfigurationFrame, IngestError> {
    let contents = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&contents)?)
}

fn truncate(status: String, max_length: usize) -> String {
    if status.chars().count() <= max_length {
        return status;
    }
    if max_length <= 3 {
        return status.chars().take(max_length).collect();
    }
    let mut shortened: String = status.chars().take(max_length - 3).collect();
    shortened.push_str("...");
    shortened
}
