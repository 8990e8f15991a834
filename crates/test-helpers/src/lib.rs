//! Fixtures for federation integration tests.
//!
//! Builds in-process federations (a root broker plus cores wired over
//! the memory fabric) with test-friendly tick and timeout settings,
//! and provides seeded randomness for scenario generation.

use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tandem_broker::{Broker, BrokerOptions, BrokerRole};
use tandem_core::{Core, CoreOptions};
use tandem_network_memory::{MemoryFabric, MemoryTransport};
use tandem_types::FederationError;

/// Initialize test logging once; respects `RUST_LOG`.
pub fn init_logging() {
    use std::sync::Once;
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
            )
            .with_test_writer()
            .try_init();
    });
}

/// Deterministic rng for scenario generation.
pub fn seeded_rng(seed: u64) -> ChaCha8Rng {
    ChaCha8Rng::seed_from_u64(seed)
}

/// An in-process federation: one root broker and `cores` cores.
pub struct FederationFixture {
    pub fabric: Arc<MemoryFabric>,
    pub broker: Broker,
    pub cores: Vec<Core>,
    /// Outbound transports of the cores, for failure injection.
    pub core_transports: Vec<Arc<MemoryTransport>>,
}

impl FederationFixture {
    pub fn builder(name: &str) -> FederationBuilder {
        FederationBuilder {
            name: name.to_string(),
            cores: 1,
            min_federates: 1,
            tick: Duration::from_millis(100),
            timeout: Duration::from_secs(10),
        }
    }

    /// Wait until the root broker's loop has exited.
    pub fn wait_for_shutdown(&self, limit: Duration) -> bool {
        let deadline = Instant::now() + limit;
        while Instant::now() < deadline {
            if self.broker.is_finished() && self.cores.iter().all(|c| c.is_finished()) {
                return true;
            }
            std::thread::sleep(Duration::from_millis(10));
        }
        false
    }
}

pub struct FederationBuilder {
    name: String,
    cores: usize,
    min_federates: usize,
    tick: Duration,
    timeout: Duration,
}

impl FederationBuilder {
    pub fn cores(mut self, cores: usize) -> Self {
        self.cores = cores;
        self
    }

    pub fn min_federates(mut self, min_federates: usize) -> Self {
        self.min_federates = min_federates;
        self
    }

    pub fn tick(mut self, tick: Duration) -> Self {
        self.tick = tick;
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Spawn the broker and cores and connect everything.
    pub fn build(self) -> Result<FederationFixture, FederationError> {
        init_logging();
        let fabric = Arc::new(MemoryFabric::new());
        let broker_name = format!("{}-root", self.name);

        let mut broker_options = BrokerOptions::named(&broker_name);
        broker_options.min_federates = self.min_federates;
        broker_options.node.tick = self.tick;
        broker_options.node.timeout = self.timeout;

        let (broker_tx, broker_rx) = Broker::queue();
        let broker_transport = fabric.register(&broker_name, Arc::new(broker_tx.clone()));
        let broker = Broker::spawn(
            broker_options,
            BrokerRole::Root,
            broker_tx,
            broker_rx,
            broker_transport,
        );

        let mut cores = Vec::with_capacity(self.cores);
        let mut core_transports = Vec::with_capacity(self.cores);
        for index in 0..self.cores {
            let core_name = format!("{}-core{}", self.name, index);
            let mut core_options = CoreOptions::named(&core_name);
            core_options.node.tick = self.tick;
            core_options.node.timeout = self.timeout;

            let (core_tx, core_rx) = Core::queue();
            let core_transport = fabric.register(&core_name, Arc::new(core_tx.clone()));
            fabric.connect(&core_name, &broker_name);
            let core = Core::spawn(core_options, core_tx, core_rx, core_transport.clone());
            core.connect()?;
            cores.push(core);
            core_transports.push(core_transport);
        }

        Ok(FederationFixture {
            fabric,
            broker,
            cores,
            core_transports,
        })
    }
}
