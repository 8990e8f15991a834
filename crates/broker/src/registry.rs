//! The root broker's name table.
//!
//! Registrations from the whole federation land here; subscriptions are
//! resolved against it once at the end of initialization and the
//! resulting bindings are frozen before execution starts.

use std::collections::HashMap;
use tandem_types::{FederationError, GlobalId, HandleFlags};

#[derive(Debug, Clone)]
pub struct PublicationEntry {
    pub id: GlobalId,
    pub owner: GlobalId,
    pub type_tag: String,
    pub units: String,
    pub flags: HandleFlags,
    pub subscribers: Vec<GlobalId>,
}

#[derive(Debug, Clone)]
pub struct InputEntry {
    pub id: GlobalId,
    pub owner: GlobalId,
    pub flags: HandleFlags,
    pub sources: Vec<GlobalId>,
}

/// One resolved (publication → input) pair.
#[derive(Debug, Clone)]
pub struct Binding {
    pub publication: GlobalId,
    pub publication_owner: GlobalId,
    pub type_tag: String,
    pub units: String,
    pub input: GlobalId,
    pub input_owner: GlobalId,
}

/// What subscription resolution produced: installable bindings plus the
/// per-owner failures (unmatched required handles, over-subscribed
/// single-connection handles).
#[derive(Debug, Default)]
pub struct ResolutionOutcome {
    pub bindings: Vec<Binding>,
    pub failures: Vec<(GlobalId, FederationError)>,
}

#[derive(Debug, Clone)]
struct PendingTarget {
    input: GlobalId,
    owner: GlobalId,
    target: String,
}

/// Name table owned by the root broker.
#[derive(Debug, Default)]
pub struct InterfaceRegistry {
    publications: HashMap<String, PublicationEntry>,
    inputs: HashMap<String, InputEntry>,
    federates: HashMap<String, GlobalId>,
    pending_targets: Vec<PendingTarget>,
}

impl InterfaceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn federate_count(&self) -> usize {
        self.federates.len()
    }

    pub fn federate_id(&self, name: &str) -> Option<GlobalId> {
        self.federates.get(name).copied()
    }

    pub fn federate_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.federates.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn publication_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.publications.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn register_federate(&mut self, name: &str, id: GlobalId) -> Result<(), FederationError> {
        if self.federates.contains_key(name) {
            return Err(FederationError::NameCollision(name.to_string()));
        }
        self.federates.insert(name.to_string(), id);
        Ok(())
    }

    pub fn remove_federate(&mut self, id: GlobalId) {
        self.federates.retain(|_, fed| *fed != id);
    }

    pub fn register_publication(
        &mut self,
        name: &str,
        entry: PublicationEntry,
    ) -> Result<(), FederationError> {
        if self.publications.contains_key(name) {
            return Err(FederationError::NameCollision(name.to_string()));
        }
        self.publications.insert(name.to_string(), entry);
        Ok(())
    }

    pub fn register_input(
        &mut self,
        name: &str,
        entry: InputEntry,
    ) -> Result<(), FederationError> {
        if self.inputs.contains_key(name) {
            return Err(FederationError::NameCollision(name.to_string()));
        }
        self.inputs.insert(name.to_string(), entry);
        Ok(())
    }

    /// Queue a by-name source binding for resolution at the end of
    /// initialization.
    pub fn add_source_target(&mut self, input: GlobalId, owner: GlobalId, target: &str) {
        self.pending_targets.push(PendingTarget {
            input,
            owner,
            target: target.to_string(),
        });
    }

    /// Resolve every queued target and check the `required` /
    /// `single_connection_only` constraints. Called exactly once, at the
    /// initialization barrier.
    pub fn resolve_targets(&mut self) -> ResolutionOutcome {
        let mut outcome = ResolutionOutcome::default();

        let pending = std::mem::take(&mut self.pending_targets);
        for target in pending {
            let Some(publication) = self.publications.get_mut(&target.target) else {
                // No such publication; the input's required flag decides
                // below whether that is fatal.
                continue;
            };
            if publication.flags.single_connection_only && !publication.subscribers.is_empty() {
                outcome.failures.push((
                    target.owner,
                    FederationError::ConnectionFailure(format!(
                        "publication '{}' accepts a single connection",
                        target.target
                    )),
                ));
                continue;
            }
            publication.subscribers.push(target.input);
            outcome.bindings.push(Binding {
                publication: publication.id,
                publication_owner: publication.owner,
                type_tag: publication.type_tag.clone(),
                units: publication.units.clone(),
                input: target.input,
                input_owner: target.owner,
            });
            if let Some(input) = self.inputs.values_mut().find(|i| i.id == target.input) {
                input.sources.push(publication.id);
            }
        }

        for (name, publication) in &self.publications {
            if publication.flags.required && publication.subscribers.is_empty() {
                outcome.failures.push((
                    publication.owner,
                    FederationError::ConnectionFailure(format!(
                        "required publication '{name}' has no subscribers"
                    )),
                ));
            }
        }
        for (name, input) in &self.inputs {
            if input.flags.required && input.sources.is_empty() {
                outcome.failures.push((
                    input.owner,
                    FederationError::ConnectionFailure(format!(
                        "required input '{name}' has no source"
                    )),
                ));
            }
        }

        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tandem_types::NodeId;

    fn id(node: u16, local: u16) -> GlobalId {
        GlobalId::new(NodeId(node), local)
    }

    fn publication(node: u16, local: u16, flags: HandleFlags) -> PublicationEntry {
        PublicationEntry {
            id: id(node, local),
            owner: id(node, 1),
            type_tag: "double".into(),
            units: String::new(),
            flags,
            subscribers: Vec::new(),
        }
    }

    fn input(node: u16, local: u16, flags: HandleFlags) -> InputEntry {
        InputEntry {
            id: id(node, local),
            owner: id(node, 1),
            flags,
            sources: Vec::new(),
        }
    }

    #[test]
    fn test_global_name_collision() {
        let mut registry = InterfaceRegistry::new();
        registry
            .register_publication("load", publication(2, 2, HandleFlags::default()))
            .unwrap();
        let err = registry
            .register_publication("load", publication(3, 2, HandleFlags::default()))
            .unwrap_err();
        assert_eq!(err, FederationError::NameCollision("load".into()));
    }

    #[test]
    fn test_federate_name_collision() {
        let mut registry = InterfaceRegistry::new();
        registry.register_federate("alpha", id(2, 1)).unwrap();
        assert!(registry.register_federate("alpha", id(3, 1)).is_err());
        assert_eq!(registry.federate_count(), 1);
    }

    #[test]
    fn test_target_resolution_binds() {
        let mut registry = InterfaceRegistry::new();
        registry
            .register_publication("x", publication(2, 2, HandleFlags::default()))
            .unwrap();
        registry
            .register_input("fedb/_input_1", input(3, 2, HandleFlags::default()))
            .unwrap();
        registry.add_source_target(id(3, 2), id(3, 1), "x");

        let outcome = registry.resolve_targets();
        assert_eq!(outcome.bindings.len(), 1);
        assert!(outcome.failures.is_empty());
        let binding = &outcome.bindings[0];
        assert_eq!(binding.publication, id(2, 2));
        assert_eq!(binding.input, id(3, 2));
        assert_eq!(binding.type_tag, "double");
    }

    #[test]
    fn test_unmatched_required_input_fails_owner() {
        let mut registry = InterfaceRegistry::new();
        let flags = HandleFlags {
            required: true,
            ..HandleFlags::default()
        };
        registry.register_input("fedb/need", input(3, 2, flags)).unwrap();
        registry.add_source_target(id(3, 2), id(3, 1), "nothere");

        let outcome = registry.resolve_targets();
        assert!(outcome.bindings.is_empty());
        assert_eq!(outcome.failures.len(), 1);
        assert_eq!(outcome.failures[0].0, id(3, 1));
    }

    #[test]
    fn test_single_connection_only_rejects_second_match() {
        let mut registry = InterfaceRegistry::new();
        let flags = HandleFlags {
            single_connection_only: true,
            ..HandleFlags::default()
        };
        registry.register_publication("x", publication(2, 2, flags)).unwrap();
        registry.add_source_target(id(3, 2), id(3, 1), "x");
        registry.add_source_target(id(4, 2), id(4, 1), "x");

        let outcome = registry.resolve_targets();
        assert_eq!(outcome.bindings.len(), 1);
        assert_eq!(outcome.failures.len(), 1);
        assert_eq!(outcome.failures[0].0, id(4, 1));
    }

    #[test]
    fn test_unrequired_unmatched_target_is_tolerated() {
        let mut registry = InterfaceRegistry::new();
        registry
            .register_input("fedb/_input_1", input(3, 2, HandleFlags::default()))
            .unwrap();
        registry.add_source_target(id(3, 2), id(3, 1), "ghost");
        let outcome = registry.resolve_targets();
        assert!(outcome.bindings.is_empty());
        assert!(outcome.failures.is_empty());
    }
}
