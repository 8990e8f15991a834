//! Timing configuration for a single federate.

use sbor::prelude::BasicSbor;
use tandem_types::SimTime;

/// Per-federate timing parameters.
///
/// All three delays default to zero; `max_iterations` bounds same-time
/// iteration rounds before a grant is forced out with the
/// iteration-limit flag. Wire-encodable so the federate API can hand it
/// to its core inside the join command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, BasicSbor)]
pub struct TimingConfig {
    /// Minimum spacing between consecutive grants.
    pub period: SimTime,
    /// Added to incoming publish timestamps before they become events.
    pub input_delay: SimTime,
    /// Added to the earliest-output promise reported to dependents.
    pub output_delay: SimTime,
    /// Iteration rounds tolerated at a single time before forcing the
    /// grant.
    pub max_iterations: u16,
}

impl Default for TimingConfig {
    fn default() -> Self {
        TimingConfig {
            period: SimTime::ZERO,
            input_delay: SimTime::ZERO,
            output_delay: SimTime::ZERO,
            max_iterations: 10,
        }
    }
}
