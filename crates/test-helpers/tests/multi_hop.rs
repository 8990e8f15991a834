//! Three-level tree: root broker, sub-broker, cores.

use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tandem_broker::{Broker, BrokerOptions, BrokerRole};
use tandem_coordination::TimingConfig;
use tandem_core::{Core, CoreOptions};
use tandem_network_memory::MemoryFabric;
use tandem_test_helpers::init_logging;
use tandem_types::{HandleFlags, SimTime};

fn spawn_root(fabric: &MemoryFabric, name: &str, min_federates: usize) -> Broker {
    let mut options = BrokerOptions::named(name);
    options.min_federates = min_federates;
    options.node.tick = Duration::from_millis(100);
    let (tx, rx) = Broker::queue();
    let transport = fabric.register(name, Arc::new(tx.clone()));
    Broker::spawn(options, BrokerRole::Root, tx, rx, transport)
}

/// The link must exist before spawn: a sub-broker introduces itself
/// upstream as its first act.
fn spawn_sub_broker(fabric: &MemoryFabric, name: &str, parent: &str) -> Broker {
    let mut options = BrokerOptions::named(name);
    options.node.tick = Duration::from_millis(100);
    let (tx, rx) = Broker::queue();
    let transport = fabric.register(name, Arc::new(tx.clone()));
    fabric.connect(name, parent);
    Broker::spawn(options, BrokerRole::Sub, tx, rx, transport)
}

fn spawn_core(fabric: &MemoryFabric, name: &str, parent: &str) -> Core {
    let mut options = CoreOptions::named(name);
    options.node.tick = Duration::from_millis(100);
    let (tx, rx) = Core::queue();
    let transport = fabric.register(name, Arc::new(tx.clone()));
    fabric.connect(name, parent);
    let core = Core::spawn(options, tx, rx, transport);
    core.connect().unwrap();
    core
}

/// A publish crosses two broker hops and a grant negotiation follows it
/// back.
#[test]
fn test_publish_across_two_hops() {
    init_logging();
    let fabric = MemoryFabric::new();
    let root = spawn_root(&fabric, "root", 2);
    let mid = spawn_sub_broker(&fabric, "mid", "root");
    let near = spawn_core(&fabric, "near-core", "root");
    let far = spawn_core(&fabric, "far-core", "mid");

    let writer = near
        .join_federate("writer", TimingConfig::default())
        .unwrap();
    let reader = far.join_federate("reader", TimingConfig::default()).unwrap();

    let out = writer
        .register_global_publication("deep", "double", "", HandleFlags::default())
        .unwrap();
    let sub = reader.register_subscription("deep", "").unwrap();

    let tw = thread::spawn(move || {
        writer.enter_initializing().unwrap();
        writer.enter_executing().unwrap();
        writer.publish(out, 6.28f64.to_le_bytes().to_vec()).unwrap();
        let grant = writer
            .request_time(SimTime::from_seconds(1.0), false)
            .unwrap();
        assert_eq!(grant.granted, SimTime::from_seconds(1.0));
        assert_eq!(writer.query("root", "name").unwrap(), "root");
        writer.finalize().unwrap();
    });
    let tr = thread::spawn(move || {
        reader.enter_initializing().unwrap();
        reader.enter_executing().unwrap();
        let grant = reader
            .request_time(SimTime::from_seconds(1.0), false)
            .unwrap();
        assert_eq!(grant.granted, SimTime::from_seconds(1.0));
        assert_eq!(
            reader.get_value_raw(sub).unwrap(),
            6.28f64.to_le_bytes().to_vec()
        );
        reader.finalize().unwrap();
    });
    tw.join().unwrap();
    tr.join().unwrap();

    let deadline = std::time::Instant::now() + Duration::from_secs(10);
    while std::time::Instant::now() < deadline {
        if root.is_finished() && mid.is_finished() && near.is_finished() && far.is_finished() {
            return;
        }
        thread::sleep(Duration::from_millis(10));
    }
    panic!("three-level federation did not shut down");
}
