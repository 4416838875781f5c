//! Downstream measurement bus seam.
//!
//! The mapper publishes one batch of mapped measurements per data frame.
//! What happens to them afterwards (concentration, archival, routing) is
//! the host's concern.

use tokio::sync::mpsc;

use crate::measurement::MappedMeasurement;

/// Receives mapped measurement batches, one call per data frame.
pub trait MeasurementSink: Send + Sync {
    fn publish(&self, batch: Vec<MappedMeasurement>);
}

/// A sink that forwards batches onto an unbounded tokio channel, for
/// composing the mapper into a larger pipeline (and for tests).
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<Vec<MappedMeasurement>>,
}

impl ChannelSink {
    /// Creates the sink and the receiving end of its channel.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Vec<MappedMeasurement>>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (ChannelSink { tx }, rx)
    }
}

impl MeasurementSink for ChannelSink {
    fn publish(&self, batch: Vec<MappedMeasurement>) {
        // Receiver dropped means the host is shutting down; nothing to do.
        let _ = self.tx.send(batch);
    }
}
