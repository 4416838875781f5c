//! Mock parser and synthetic frames for exercising the mapping engine
//! without a wire connection. Used by the test suites and benchmarks.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use rand::Rng;
use tokio::sync::mpsc;

use crate::frames::{
    AnalogValue, ConfigurationCell, ConfigurationFrame, DataCell, DataFrame, DeviceCommand,
    DigitalValue, FrequencyValue, PhasorValue, Ticks,
};
use crate::parser::{FrameParser, ParserError, ParserEvent};

/// Observable state of a [`MockFrameParser`], shared with the test that
/// created it.
#[derive(Debug, Default)]
pub struct MockParserState {
    pub start_count: u32,
    pub stop_count: u32,
    pub running: bool,
    pub sent_commands: Vec<DeviceCommand>,
    pub injected_configurations: Vec<ConfigurationFrame>,
    pub settings: HashMap<String, String>,
    pub events: Option<mpsc::Sender<ParserEvent>>,
}

/// A `FrameParser` that records every interaction and emits nothing on its
/// own; tests drive events through the mapper directly or through the
/// sender captured in [`MockParserState`].
#[derive(Debug, Clone)]
pub struct MockFrameParser {
    state: Arc<Mutex<MockParserState>>,
    supports_commands: bool,
    file_based: bool,
    fail_start: bool,
}

impl Default for MockFrameParser {
    fn default() -> Self {
        Self::new()
    }
}

impl MockFrameParser {
    pub fn new() -> Self {
        MockFrameParser {
            state: Arc::new(Mutex::new(MockParserState::default())),
            supports_commands: true,
            file_based: false,
            fail_start: false,
        }
    }

    /// Models a dialect/transport without a command channel.
    pub fn without_command_support(mut self) -> Self {
        self.supports_commands = false;
        self
    }

    /// Models file playback.
    pub fn with_file_transport(mut self) -> Self {
        self.file_based = true;
        self
    }

    /// Makes every `start` call fail, for connect-retry tests.
    pub fn failing_start(mut self) -> Self {
        self.fail_start = true;
        self
    }

    /// Shared handle for inspecting the parser after the mapper owns it.
    pub fn state(&self) -> Arc<Mutex<MockParserState>> {
        Arc::clone(&self.state)
    }
}

impl FrameParser for MockFrameParser {
    fn start(&mut self, events: mpsc::Sender<ParserEvent>) -> Result<(), ParserError> {
        let mut state = self.state.lock().expect("mock parser state poisoned");
        state.start_count += 1;
        if self.fail_start {
            return Err(ParserError::Other("mock start failure".to_string()));
        }
        state.running = true;
        state.events = Some(events);
        Ok(())
    }

    fn stop(&mut self) {
        let mut state = self.state.lock().expect("mock parser state poisoned");
        state.stop_count += 1;
        state.running = false;
        state.events = None;
    }

    fn send_command(&mut self, command: DeviceCommand) -> Result<(), ParserError> {
        let mut state = self.state.lock().expect("mock parser state poisoned");
        if !state.running {
            return Err(ParserError::NotConnected);
        }
        state.sent_commands.push(command);
        Ok(())
    }

    fn supports_commands(&self) -> bool {
        self.supports_commands
    }

    fn is_file_based(&self) -> bool {
        self.file_based
    }

    fn inject_configuration(&mut self, frame: ConfigurationFrame) {
        let mut state = self.state.lock().expect("mock parser state poisoned");
        state.injected_configurations.push(frame);
    }

    fn apply_settings(&mut self, settings: &HashMap<String, String>) {
        let mut state = self.state.lock().expect("mock parser state poisoned");
        state.settings = settings.clone();
    }
}

/// A configuration frame with uniformly shaped cells.
pub fn sample_configuration_frame(id_code: u16, cells: &[(u16, &str)]) -> ConfigurationFrame {
    ConfigurationFrame {
        id_code,
        frame_rate: 30,
        cells: cells
            .iter()
            .map(|(id, station)| ConfigurationCell {
                id_code: *id,
                station_name: station.to_string(),
                phasor_count: 2,
                analog_count: 1,
                digital_count: 0,
            })
            .collect(),
    }
}

/// Builds one device cell with explicit values, all quality flags good.
#[allow(clippy::too_many_arguments)]
pub fn data_cell(
    id_code: u16,
    station_name: &str,
    phasors: &[(f64, f64)],
    frequency: f64,
    dfdt: f64,
    analogs: &[f64],
    digitals: &[u16],
) -> DataCell {
    DataCell {
        id_code,
        station_name: station_name.to_string(),
        status_word: 0,
        data_is_valid: true,
        synchronization_is_valid: true,
        device_error: false,
        phasors: phasors
            .iter()
            .map(|(magnitude, angle)| PhasorValue {
                magnitude: *magnitude,
                angle: *angle,
            })
            .collect(),
        frequency: FrequencyValue { frequency, dfdt },
        analogs: analogs.iter().map(|value| AnalogValue { value: *value }).collect(),
        digitals: digitals.iter().map(|value| DigitalValue { value: *value }).collect(),
    }
}

/// Generates a data frame shaped by `config` with plausible randomized
/// values: nominal 60 Hz with jitter, unit-circle angles, 120 V-ish
/// magnitudes.
pub fn random_data_frame(config: &ConfigurationFrame, timestamp: Ticks) -> DataFrame {
    let mut rng = rand::thread_rng();
    let cells = config
        .cells
        .iter()
        .map(|cell| DataCell {
            id_code: cell.id_code,
            station_name: cell.station_name.clone(),
            status_word: 0,
            data_is_valid: true,
            synchronization_is_valid: true,
            device_error: false,
            phasors: (0..cell.phasor_count)
                .map(|_| PhasorValue {
                    magnitude: rng.gen_range(119.0..121.0),
                    angle: rng.gen_range(-std::f64::consts::PI..std::f64::consts::PI),
                })
                .collect(),
            frequency: FrequencyValue {
                frequency: rng.gen_range(59.95..60.05),
                dfdt: rng.gen_range(-0.01..0.01),
            },
            analogs: (0..cell.analog_count)
                .map(|_| AnalogValue {
                    value: rng.gen_range(0.0..10.0),
                })
                .collect(),
            digitals: (0..cell.digital_count)
                .map(|_| DigitalValue { value: rng.gen() })
                .collect(),
        })
        .collect();

    DataFrame {
        id_code: config.id_code,
        timestamp,
        received_timestamp: timestamp,
        cells,
    }
}
