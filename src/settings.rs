//! Connection-string parsing for the ingestion adapter.
//!
//! Settings arrive as a single `key=value;key=value` string with
//! case-insensitive keys. Keys the mapper does not consume itself are kept
//! in a pass-through table handed to the wire parser.

use chrono_tz::Tz;
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Default liveness tick period.
pub const DEFAULT_DATA_LOSS_INTERVAL: Duration = Duration::from_secs(5);

/// Default reconnect backoff.
pub const DEFAULT_DELAYED_CONNECTION_INTERVAL: Duration = Duration::from_millis(1500);

/// Smallest accepted reconnect backoff.
pub const MIN_DELAYED_CONNECTION_INTERVAL: Duration = Duration::from_millis(1);

/// Settings keys forwarded verbatim to the wire parser.
const PARSER_PASSTHROUGH_KEYS: &[&str] = &[
    "allowedparsingexceptions",
    "parsingexceptionwindow",
    "autostartdataparsingsequence",
    "skipdisablerealtimedata",
    "executeparseonseparatethread",
];

/// Raised when the connection string cannot be parsed. Settings failures
/// are the one fatal error class: without valid settings no connection can
/// be attempted.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SettingsError {
    #[error("malformed settings entry {entry:?}: expected key=value")]
    MalformedEntry { entry: String },
    #[error("invalid value {value:?} for setting {key:?}")]
    InvalidValue { key: String, value: String },
    #[error("unknown time zone {zone:?}")]
    UnknownTimeZone { zone: String },
}

/// Parsed adapter settings; see the connection-string table in the
/// project documentation for key meanings and defaults.
#[derive(Debug, Clone)]
pub struct ConnectionSettings {
    pub is_concentrator: bool,
    pub access_id: u16,
    pub shared_mapping: Option<String>,
    pub time_zone: Tz,
    pub time_adjustment_ticks: i64,
    pub data_loss_interval: Duration,
    pub delayed_connection_interval: Duration,
    pub allow_use_of_cached_configuration: bool,
    pub defined_frame_rate: u16,
    pub auto_repeat_file: bool,
    pub use_high_resolution_input_timer: bool,
    /// `None` until resolved against the parser's transport at initialize.
    pub simulate_timestamp: Option<bool>,
    pub configuration_file: Option<PathBuf>,
    /// Parser knobs and unrecognized keys, lower-cased, forwarded verbatim.
    pub passthrough: HashMap<String, String>,
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        ConnectionSettings {
            is_concentrator: false,
            access_id: 1,
            shared_mapping: None,
            time_zone: Tz::UTC,
            time_adjustment_ticks: 0,
            data_loss_interval: DEFAULT_DATA_LOSS_INTERVAL,
            delayed_connection_interval: DEFAULT_DELAYED_CONNECTION_INTERVAL,
            allow_use_of_cached_configuration: true,
            defined_frame_rate: 30,
            auto_repeat_file: true,
            use_high_resolution_input_timer: false,
            simulate_timestamp: None,
            configuration_file: None,
            passthrough: HashMap::new(),
        }
    }
}

impl ConnectionSettings {
    /// Parses a `key=value;...` connection string. Keys are matched
    /// case-insensitively; empty segments are skipped.
    pub fn parse(connection_string: &str) -> Result<Self, SettingsError> {
        let mut settings = ConnectionSettings::default();

        for entry in connection_string.split(';') {
            let entry = entry.trim();
            if entry.is_empty() {
                continue;
            }
            let (key, value) = entry.split_once('=').ok_or_else(|| {
                SettingsError::MalformedEntry {
                    entry: entry.to_string(),
                }
            })?;
            let key = key.trim().to_ascii_lowercase();
            let value = value.trim();

            match key.as_str() {
                "isconcentrator" => settings.is_concentrator = parse_bool(&key, value)?,
                "accessid" => settings.access_id = parse_number(&key, value)?,
                "sharedmapping" => {
                    if !value.is_empty() {
                        settings.shared_mapping = Some(value.to_string());
                    }
                }
                "timezone" => {
                    settings.time_zone =
                        value
                            .parse()
                            .map_err(|_| SettingsError::UnknownTimeZone {
                                zone: value.to_string(),
                            })?
                }
                "timeadjustmentticks" => {
                    settings.time_adjustment_ticks = parse_number(&key, value)?
                }
                "datalossinterval" => {
                    let seconds: f64 = parse_number(&key, value)?;
                    if !seconds.is_finite() || seconds <= 0.0 {
                        return Err(SettingsError::InvalidValue {
                            key,
                            value: value.to_string(),
                        });
                    }
                    settings.data_loss_interval = Duration::from_secs_f64(seconds);
                }
                "delayedconnectioninterval" => {
                    let seconds: f64 = parse_number(&key, value)?;
                    if !seconds.is_finite() || seconds < 0.0 {
                        return Err(SettingsError::InvalidValue {
                            key,
                            value: value.to_string(),
                        });
                    }
                    // Backoff floor is one millisecond.
                    settings.delayed_connection_interval =
                        Duration::from_secs_f64(seconds).max(MIN_DELAYED_CONNECTION_INTERVAL);
                }
                "allowuseofcachedconfiguration" => {
                    settings.allow_use_of_cached_configuration = parse_bool(&key, value)?
                }
                "definedframerate" => settings.defined_frame_rate = parse_number(&key, value)?,
                "autorepeatfile" => settings.auto_repeat_file = parse_bool(&key, value)?,
                "usehighresolutioninputtimer" => {
                    settings.use_high_resolution_input_timer = parse_bool(&key, value)?
                }
                "simulatetimestamp" => {
                    settings.simulate_timestamp = Some(parse_bool(&key, value)?)
                }
                "configurationfile" => {
                    if !value.is_empty() {
                        settings.configuration_file = Some(PathBuf::from(value));
                    }
                }
                _ => {
                    settings.passthrough.insert(key, value.to_string());
                }
            }
        }

        Ok(settings)
    }

    /// True when `key` (lower-cased) is one of the recognized parser
    /// pass-through knobs rather than an unrecognized setting.
    pub fn is_parser_setting(key: &str) -> bool {
        PARSER_PASSTHROUGH_KEYS.contains(&key)
    }
}

fn parse_bool(key: &str, value: &str) -> Result<bool, SettingsError> {
    match value.to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" => Ok(true),
        "false" | "0" | "no" => Ok(false),
        _ => Err(SettingsError::InvalidValue {
            key: key.to_string(),
            value: value.to_string(),
        }),
    }
}

fn parse_number<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, SettingsError> {
    value.parse().map_err(|_| SettingsError::InvalidValue {
        key: key.to_string(),
        value: value.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let settings = ConnectionSettings::parse("").unwrap();
        assert!(!settings.is_concentrator);
        assert_eq!(settings.access_id, 1);
        assert_eq!(settings.time_zone, Tz::UTC);
        assert_eq!(settings.data_loss_interval, DEFAULT_DATA_LOSS_INTERVAL);
        assert!(settings.allow_use_of_cached_configuration);
        assert_eq!(settings.defined_frame_rate, 30);
        assert_eq!(settings.simulate_timestamp, None);
    }

    #[test]
    fn test_keys_are_case_insensitive() {
        let settings =
            ConnectionSettings::parse("IsConcentrator=TRUE; AccessID=42; TimeZone=US/Eastern")
                .unwrap();
        assert!(settings.is_concentrator);
        assert_eq!(settings.access_id, 42);
        assert_eq!(settings.time_zone, chrono_tz::US::Eastern);
    }

    #[test]
    fn test_backoff_floor() {
        let settings = ConnectionSettings::parse("delayedConnectionInterval=0.0").unwrap();
        assert_eq!(
            settings.delayed_connection_interval,
            MIN_DELAYED_CONNECTION_INTERVAL
        );
    }

    #[test]
    fn test_passthrough_keys_retained() {
        let settings = ConnectionSettings::parse(
            "allowedParsingExceptions=10;parsingExceptionWindow=5.0;somethingElse=x",
        )
        .unwrap();
        assert_eq!(
            settings.passthrough.get("allowedparsingexceptions"),
            Some(&"10".to_string())
        );
        assert!(ConnectionSettings::is_parser_setting("parsingexceptionwindow"));
        assert!(!ConnectionSettings::is_parser_setting("somethingelse"));
        assert_eq!(settings.passthrough.get("somethingelse"), Some(&"x".to_string()));
    }

    #[test]
    fn test_bad_values_are_fatal() {
        assert!(ConnectionSettings::parse("accessId=notanumber").is_err());
        assert!(ConnectionSettings::parse("timeZone=Mars/Olympus").is_err());
        assert!(ConnectionSettings::parse("dataLossInterval=-1").is_err());
        assert!(ConnectionSettings::parse("justakeywithoutvalue").is_err());
    }
}
