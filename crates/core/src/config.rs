//! Core configuration.

use std::time::Duration;
use tandem_runtime::{NodeOptions, OptionError};

/// Configuration for a core node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoreOptions {
    pub node: NodeOptions,
    /// Upper bound on how long a blocking federate API call waits for
    /// its reply before reporting the core as gone.
    pub call_timeout: Duration,
    /// Default iteration limit for federates that join without their
    /// own timing configuration.
    pub max_iterations: u16,
}

impl Default for CoreOptions {
    fn default() -> Self {
        CoreOptions {
            node: NodeOptions::default(),
            call_timeout: Duration::from_secs(60),
            max_iterations: 10,
        }
    }
}

impl CoreOptions {
    pub fn named(identifier: impl Into<String>) -> Self {
        CoreOptions {
            node: NodeOptions::named(identifier),
            ..CoreOptions::default()
        }
    }

    /// Apply one option-bag entry, delegating shared keys to the node
    /// options.
    pub fn apply(&mut self, key: &str, value: &str) -> Result<(), OptionError> {
        match key {
            "maxiter" => {
                self.max_iterations =
                    value.parse().map_err(|_| OptionError::InvalidValue {
                        key: key.to_string(),
                        value: value.to_string(),
                    })?;
                Ok(())
            }
            _ => self.node.apply(key, value),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_apply_delegates() {
        let mut options = CoreOptions::default();
        options.apply("name", "c0").unwrap();
        options.apply("maxiter", "4").unwrap();
        assert_eq!(options.node.identifier, "c0");
        assert_eq!(options.max_iterations, 4);
        assert!(options.apply("federates", "2").is_err());
    }
}
