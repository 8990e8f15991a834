//! Interface handles: publications and inputs.

use crate::GlobalId;
use sbor::prelude::BasicSbor;

/// What kind of interface a handle names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, BasicSbor)]
pub enum HandleKind {
    /// A typed value source.
    Publication,
    /// A typed value sink.
    Input,
}

/// Per-handle option bits, settable at registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, BasicSbor)]
pub struct HandleFlags {
    /// Registration fails if no matching peer exists at the end of
    /// initialization.
    pub required: bool,
    /// Incoming publishes identical to the last delivered payload are
    /// dropped.
    pub only_update_on_change: bool,
    /// The last payload stays readable after it has been consumed.
    pub buffer_data: bool,
    /// Reject additional matches after the first binding.
    pub single_connection_only: bool,
}

/// Option selector for the get/set option calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, BasicSbor)]
pub enum HandleOption {
    Required,
    OnlyUpdateOnChange,
    BufferData,
    SingleConnectionOnly,
}

impl HandleFlags {
    pub fn get(&self, option: HandleOption) -> bool {
        match option {
            HandleOption::Required => self.required,
            HandleOption::OnlyUpdateOnChange => self.only_update_on_change,
            HandleOption::BufferData => self.buffer_data,
            HandleOption::SingleConnectionOnly => self.single_connection_only,
        }
    }

    pub fn set(&mut self, option: HandleOption, value: bool) {
        match option {
            HandleOption::Required => self.required = value,
            HandleOption::OnlyUpdateOnChange => self.only_update_on_change = value,
            HandleOption::BufferData => self.buffer_data = value,
            HandleOption::SingleConnectionOnly => self.single_connection_only = value,
        }
    }
}

/// A registered interface.
///
/// Created during the `Created` phase and never destroyed before
/// federation teardown. The key is unique within the owning federate;
/// globally registered handles use the key verbatim, federate-scoped ones
/// are prefixed with the federate name before they reach the root table.
#[derive(Debug, Clone, PartialEq, Eq, BasicSbor)]
pub struct HandleInfo {
    pub id: GlobalId,
    pub owner: GlobalId,
    pub kind: HandleKind,
    pub key: String,
    pub type_tag: String,
    pub units: String,
    pub flags: HandleFlags,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_option_get_set() {
        let mut flags = HandleFlags::default();
        assert!(!flags.get(HandleOption::BufferData));
        flags.set(HandleOption::BufferData, true);
        assert!(flags.get(HandleOption::BufferData));
        flags.set(HandleOption::BufferData, false);
        assert!(!flags.get(HandleOption::BufferData));
    }
}
