//! Broker configuration.

use tandem_runtime::{NodeOptions, OptionError};

/// Configuration for a broker node.
///
/// `min_federates`/`min_brokers` gate the initialization barrier at the
/// root: the federation does not leave init until that many federates
/// and direct children have connected (or `timeout` expires).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerOptions {
    pub node: NodeOptions,
    pub min_federates: usize,
    pub min_brokers: usize,
    pub max_iterations: u16,
}

impl Default for BrokerOptions {
    fn default() -> Self {
        BrokerOptions {
            node: NodeOptions::default(),
            min_federates: 1,
            min_brokers: 0,
            max_iterations: 10,
        }
    }
}

impl BrokerOptions {
    pub fn named(identifier: impl Into<String>) -> Self {
        BrokerOptions {
            node: NodeOptions::named(identifier),
            ..BrokerOptions::default()
        }
    }

    /// Apply one option-bag entry, delegating shared keys to the node
    /// options.
    pub fn apply(&mut self, key: &str, value: &str) -> Result<(), OptionError> {
        match key {
            "federates" | "minfed" | "min" => {
                self.min_federates = parse(key, value)?;
            }
            "minbroker" => self.min_brokers = parse(key, value)?,
            "maxiter" => self.max_iterations = parse(key, value)? as u16,
            _ => self.node.apply(key, value)?,
        }
        Ok(())
    }
}

fn parse(key: &str, value: &str) -> Result<usize, OptionError> {
    value.parse().map_err(|_| OptionError::InvalidValue {
        key: key.to_string(),
        value: value.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let options = BrokerOptions::default();
        assert_eq!(options.min_federates, 1);
        assert_eq!(options.min_brokers, 0);
        assert_eq!(options.max_iterations, 10);
    }

    #[test]
    fn test_apply_broker_keys() {
        let mut options = BrokerOptions::default();
        options.apply("federates", "3").unwrap();
        options.apply("minbroker", "2").unwrap();
        options.apply("maxiter", "7").unwrap();
        assert_eq!(options.min_federates, 3);
        assert_eq!(options.min_brokers, 2);
        assert_eq!(options.max_iterations, 7);
    }

    #[test]
    fn test_shared_keys_delegate() {
        let mut options = BrokerOptions::default();
        options.apply("name", "root0").unwrap();
        assert_eq!(options.node.identifier, "root0");
        assert!(options.apply("bogus", "1").is_err());
    }
}
