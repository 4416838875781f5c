//! # Liveness Monitoring
//!
//! Many devices silently drop configuration replies, and a quiet socket
//! looks identical to a healthy idle one. The liveness monitor runs a
//! periodic check over the mapper's byte and configuration counters and
//! decides between waiting, loading the cached configuration, and tearing
//! the connection down for a fresh attempt. The decision logic is pure so
//! it can be tested as a table.

use std::time::Duration;

use tracing::debug;

/// What the mapper should do after a liveness tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LivenessAction {
    /// Healthy; keep streaming.
    None,
    /// Data starvation or unrecoverable configuration absence; restart the
    /// connect cycle.
    RestartConnection,
    /// No configuration frame yet; try the last-known-good cache.
    LoadCachedConfiguration,
}

/// Per-tick snapshot of the counters the monitor evaluates.
#[derive(Debug, Clone, Copy)]
pub struct LivenessProbe {
    /// Bytes received since the previous tick.
    pub bytes_received: u64,
    pub received_config_frame: bool,
    pub allow_cached_configuration: bool,
    /// Whether the cached-configuration path has already run this
    /// connection.
    pub cached_config_load_attempted: bool,
    pub parser_supports_commands: bool,
}

/// Periodic data-starvation and configuration-absence detector.
#[derive(Debug, Clone)]
pub struct LivenessMonitor {
    period: Duration,
    enabled: bool,
}

impl LivenessMonitor {
    pub fn new(period: Duration) -> Self {
        LivenessMonitor {
            period,
            enabled: false,
        }
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn enable(&mut self) {
        self.enabled = true;
    }

    pub fn disable(&mut self) {
        self.enabled = false;
    }

    /// Evaluates one tick.
    ///
    /// Starvation wins over configuration absence: a connection moving no
    /// bytes at all gets restarted outright when the parser can be
    /// commanded. Otherwise a missing configuration frame first tries the
    /// cache (once per connection), then falls back to a restart. The
    /// monitor disables itself when it orders a restart; connection
    /// establishment re-enables it.
    pub fn evaluate(&mut self, probe: LivenessProbe) -> LivenessAction {
        if !self.enabled {
            return LivenessAction::None;
        }

        if probe.bytes_received == 0 && probe.parser_supports_commands {
            debug!("no bytes received within the data-loss interval");
            self.enabled = false;
            return LivenessAction::RestartConnection;
        }

        if !probe.received_config_frame && probe.allow_cached_configuration {
            if !probe.cached_config_load_attempted {
                return LivenessAction::LoadCachedConfiguration;
            }
            if probe.parser_supports_commands {
                debug!("configuration frame still absent after cache attempt");
                self.enabled = false;
                return LivenessAction::RestartConnection;
            }
        }

        LivenessAction::None
    }
}
