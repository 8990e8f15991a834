//! Node configuration consumed from an option bag.

use std::time::Duration;
use thiserror::Error;
use tracing::Level;

/// Error from applying an option-bag entry.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum OptionError {
    #[error("unknown option key '{0}'")]
    UnknownKey(String),

    #[error("invalid value '{value}' for option '{key}'")]
    InvalidValue { key: String, value: String },
}

/// Map an integer severity threshold to a tracing level.
///
/// 0 = errors only, rising thresholds log more.
pub fn level_for(threshold: i32) -> Level {
    match threshold {
        i32::MIN..=0 => Level::ERROR,
        1 => Level::WARN,
        2 => Level::INFO,
        3 => Level::DEBUG,
        _ => Level::TRACE,
    }
}

/// Logging knobs shared by every node.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LogOptions {
    pub console_level: i32,
    pub file_level: i32,
    pub logfile: String,
    /// Retain every processed message and emit a trace on termination.
    pub dumplog: bool,
}

/// Configuration common to brokers and cores.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeOptions {
    /// Node identity; auto-generated when left empty.
    pub identifier: String,
    /// Stall-detection heartbeat period; zero disables the timer.
    pub tick: Duration,
    /// How long to wait for required connections before giving up.
    pub timeout: Duration,
    pub log: LogOptions,
}

impl Default for NodeOptions {
    fn default() -> Self {
        NodeOptions {
            identifier: String::new(),
            tick: Duration::from_millis(4000),
            timeout: Duration::from_millis(20000),
            log: LogOptions::default(),
        }
    }
}

impl NodeOptions {
    pub fn named(identifier: impl Into<String>) -> Self {
        NodeOptions {
            identifier: identifier.into(),
            ..NodeOptions::default()
        }
    }

    /// The node identity, generating a uuid the first time when unset.
    pub fn identifier_or_generate(&mut self) -> &str {
        if self.identifier.is_empty() {
            self.identifier = uuid::Uuid::new_v4().to_string();
        }
        &self.identifier
    }

    /// Apply one option-bag entry.
    pub fn apply(&mut self, key: &str, value: &str) -> Result<(), OptionError> {
        match key {
            "name" | "identifier" => self.identifier = value.to_string(),
            "tick" => self.tick = Duration::from_millis(parse_int(key, value)? as u64),
            "timeout" => self.timeout = Duration::from_millis(parse_int(key, value)? as u64),
            "loglevel" => {
                let level = parse_int(key, value)? as i32;
                self.log.console_level = level;
                self.log.file_level = level;
            }
            "consoleloglevel" => self.log.console_level = parse_int(key, value)? as i32,
            "fileloglevel" => self.log.file_level = parse_int(key, value)? as i32,
            "logfile" => self.log.logfile = value.to_string(),
            "dumplog" => self.log.dumplog = parse_bool(key, value)?,
            _ => return Err(OptionError::UnknownKey(key.to_string())),
        }
        Ok(())
    }
}

pub(crate) fn parse_int(key: &str, value: &str) -> Result<i64, OptionError> {
    value.parse().map_err(|_| OptionError::InvalidValue {
        key: key.to_string(),
        value: value.to_string(),
    })
}

pub(crate) fn parse_bool(key: &str, value: &str) -> Result<bool, OptionError> {
    match value {
        "" | "true" | "1" | "yes" => Ok(true),
        "false" | "0" | "no" => Ok(false),
        _ => Err(OptionError::InvalidValue {
            key: key.to_string(),
            value: value.to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let options = NodeOptions::default();
        assert_eq!(options.tick, Duration::from_millis(4000));
        assert_eq!(options.timeout, Duration::from_millis(20000));
        assert!(!options.log.dumplog);
    }

    #[test]
    fn test_apply_recognized_keys() {
        let mut options = NodeOptions::default();
        options.apply("identifier", "gridsim").unwrap();
        options.apply("tick", "250").unwrap();
        options.apply("timeout", "500").unwrap();
        options.apply("loglevel", "3").unwrap();
        options.apply("dumplog", "true").unwrap();
        assert_eq!(options.identifier, "gridsim");
        assert_eq!(options.tick, Duration::from_millis(250));
        assert_eq!(options.timeout, Duration::from_millis(500));
        assert_eq!(options.log.console_level, 3);
        assert_eq!(options.log.file_level, 3);
        assert!(options.log.dumplog);
    }

    #[test]
    fn test_unknown_key_rejected() {
        let mut options = NodeOptions::default();
        assert_eq!(
            options.apply("frobnicate", "1"),
            Err(OptionError::UnknownKey("frobnicate".into()))
        );
    }

    #[test]
    fn test_invalid_value_rejected() {
        let mut options = NodeOptions::default();
        assert!(matches!(
            options.apply("tick", "soon"),
            Err(OptionError::InvalidValue { .. })
        ));
    }

    #[test]
    fn test_identifier_generation_is_sticky() {
        let mut options = NodeOptions::default();
        let generated = options.identifier_or_generate().to_string();
        assert!(!generated.is_empty());
        assert_eq!(options.identifier_or_generate(), generated);
    }

    #[test]
    fn test_level_mapping() {
        assert_eq!(level_for(0), Level::ERROR);
        assert_eq!(level_for(2), Level::INFO);
        assert_eq!(level_for(9), Level::TRACE);
    }
}
