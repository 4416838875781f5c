//! # Frame Parser Seam
//!
//! The wire decoder for each synchrophasor dialect is an external
//! collaborator. This module fixes its contract: a `FrameParser` is started
//! with an event sender and from then on reports everything it sees, from
//! connection lifecycle to decoded frames, as a single `ParserEvent` enum
//! through that channel. The mapping engine consumes the stream from one
//! task, which linearizes all per-connection state without per-field locks.
//!
//! ## Key Components
//!
//! - `ParserEvent`: every signal a parser can raise, one variant each.
//! - `FrameParser`: lifecycle and command surface of a dialect decoder.
//!
//! Within one connection a parser must deliver `ReceivedDataFrame` events
//! in receipt order; the engine's out-of-order accounting counts wire
//! reordering only.

use std::collections::HashMap;

use thiserror::Error;
use tokio::sync::mpsc;

use crate::frames::{ConfigurationFrame, DataFrame, DeviceCommand};

/// Raised by parser lifecycle and command operations.
#[derive(Error, Debug)]
pub enum ParserError {
    #[error("parser i/o failure: {0}")]
    Io(#[from] std::io::Error),
    #[error("parser is not connected")]
    NotConnected,
    #[error("{0}")]
    Other(String),
}

/// Everything a frame parser can report to the mapping engine.
#[derive(Debug, Clone)]
pub enum ParserEvent {
    /// The parser is about to try connecting.
    ConnectionAttempt,
    /// Transport is up; frames may start flowing.
    ConnectionEstablished,
    /// Connecting or staying connected failed.
    ConnectionException(String),
    /// An established connection closed.
    ConnectionTerminated,
    /// A configuration frame was decoded.
    ReceivedConfigurationFrame(ConfigurationFrame),
    /// A data frame was decoded.
    ReceivedDataFrame(DataFrame),
    /// A header frame was decoded; contents are not used by the engine.
    ReceivedHeaderFrame,
    /// Raw bytes arrived; payload is the byte count.
    ReceivedFrameBufferImage(usize),
    /// A frame failed to decode; the frame is discarded.
    ParsingException(String),
    /// Too many parsing exceptions inside the configured window.
    ExceededParsingExceptionThreshold,
    /// The device flagged a configuration change in its status word.
    ConfigurationChanged,
}

/// Lifecycle and command surface of an opaque wire decoder.
///
/// Implementations own their transport (socket, serial port, capture
/// file) and any internal threads or tasks. `start` may be called again
/// after `stop` to begin a fresh connection cycle; each call receives the
/// sender to report through.
pub trait FrameParser: Send {
    /// Begins a connection cycle, reporting through `events`.
    fn start(&mut self, events: mpsc::Sender<ParserEvent>) -> Result<(), ParserError>;

    /// Tears down the current connection cycle.
    fn stop(&mut self);

    /// Sends a device command upstream.
    fn send_command(&mut self, command: DeviceCommand) -> Result<(), ParserError>;

    /// Whether the dialect/transport supports device commands (a capture
    /// file or a broadcast-only dialect does not).
    fn supports_commands(&self) -> bool {
        true
    }

    /// Whether the transport is file playback rather than a live device.
    fn is_file_based(&self) -> bool {
        false
    }

    /// Supplies a configuration frame out of band (cached or preloaded),
    /// letting the parser interpret data frames without a wire
    /// configuration exchange.
    fn inject_configuration(&mut self, frame: ConfigurationFrame);

    /// Hands the parser its dialect-specific settings, lower-cased keys.
    fn apply_settings(&mut self, _settings: &HashMap<String, String>) {}
}
