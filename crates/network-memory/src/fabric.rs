//! The in-process fabric.

use dashmap::DashMap;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, RwLock};
use tandem_network::{MessageSink, Transport, TransportError};
use tandem_protocol::codec;
use tandem_types::RouteId;
use tracing::trace;

/// The far end of one link.
struct Peer {
    sink: Arc<dyn MessageSink>,
    /// Route id the receiver sees the message arrive on.
    arrival: RouteId,
}

/// Outbound side of one node's links.
///
/// Sends decode the wire frame and deliver synchronously into the peer's
/// sink; the sink is a channel push, so the sender never blocks on the
/// consumer.
pub struct MemoryTransport {
    name: String,
    routes: RwLock<HashMap<RouteId, Peer>>,
    failed: RwLock<HashSet<RouteId>>,
    next_route: AtomicU32,
}

impl MemoryTransport {
    fn new(name: String) -> Self {
        MemoryTransport {
            name,
            routes: RwLock::new(HashMap::new()),
            failed: RwLock::new(HashSet::new()),
            // Route 0 is reserved for the parent link.
            next_route: AtomicU32::new(1),
        }
    }

    fn allocate_route(&self) -> RouteId {
        RouteId(self.next_route.fetch_add(1, Ordering::Relaxed))
    }

    fn install(&self, route: RouteId, peer: Peer) {
        self.routes
            .write()
            .expect("route table lock poisoned")
            .insert(route, peer);
    }

    /// Make every future send on `route` fail, for transport-failure
    /// tests.
    pub fn fail_route(&self, route: RouteId) {
        self.failed
            .write()
            .expect("failure set lock poisoned")
            .insert(route);
    }
}

impl Transport for MemoryTransport {
    fn send(&self, route: RouteId, data: &[u8]) -> Result<(), TransportError> {
        if self
            .failed
            .read()
            .expect("failure set lock poisoned")
            .contains(&route)
        {
            return Err(TransportError::LinkDown(route, "injected failure".into()));
        }
        let routes = self.routes.read().expect("route table lock poisoned");
        let peer = routes
            .get(&route)
            .ok_or(TransportError::UnknownRoute(route))?;
        let message = codec::decode_message(data)
            .map_err(|e| TransportError::LinkDown(route, e.to_string()))?;
        trace!(node = %self.name, %route, msg = %message, "delivering");
        peer.sink.deliver(peer.arrival, message);
        Ok(())
    }
}

/// Registry wiring all in-process nodes together.
///
/// Registration order does not matter; links are created explicitly with
/// [`connect`](MemoryFabric::connect).
#[derive(Default)]
pub struct MemoryFabric {
    nodes: DashMap<String, (Arc<dyn MessageSink>, Arc<MemoryTransport>)>,
}

impl MemoryFabric {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a node's inbound sink and get its outbound transport.
    pub fn register(&self, name: &str, sink: Arc<dyn MessageSink>) -> Arc<MemoryTransport> {
        let transport = Arc::new(MemoryTransport::new(name.to_string()));
        self.nodes
            .insert(name.to_string(), (sink, Arc::clone(&transport)));
        transport
    }

    /// Wire `child` under `parent`: the child's parent route reaches the
    /// parent, which gains a fresh route back. Returns the route id the
    /// parent sees the child on.
    ///
    /// Panics if either name is unregistered: fabric wiring is test
    /// setup, not runtime input.
    pub fn connect(&self, child: &str, parent: &str) -> RouteId {
        let (child_sink, child_transport) = {
            let entry = self.nodes.get(child).expect("child not registered");
            (Arc::clone(&entry.0), Arc::clone(&entry.1))
        };
        let (parent_sink, parent_transport) = {
            let entry = self.nodes.get(parent).expect("parent not registered");
            (Arc::clone(&entry.0), Arc::clone(&entry.1))
        };

        let child_route = parent_transport.allocate_route();
        child_transport.install(
            RouteId::PARENT,
            Peer {
                sink: parent_sink,
                arrival: child_route,
            },
        );
        parent_transport.install(
            child_route,
            Peer {
                sink: child_sink,
                arrival: RouteId::PARENT,
            },
        );
        child_route
    }
}
