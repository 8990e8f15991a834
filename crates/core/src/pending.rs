//! Pending blocking API calls.
//!
//! The federate API runs on arbitrary user threads; the core's state
//! lives on its worker. Calls register a single-shot reply channel here,
//! post their command, and block; the worker completes the entry when
//! the answer is ready (possibly after a round trip to the root).

use crossbeam::channel::{self, Receiver, Sender};
use dashmap::DashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use tandem_types::{FederationError, GlobalId, SimTime};

/// Replies delivered to blocked API calls.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApiReply {
    Ack,
    Handle(GlobalId),
    Time {
        granted: SimTime,
        iteration_limit: bool,
    },
    Value(Vec<u8>),
    Flag(bool),
    TimeValue(SimTime),
    Updates(Vec<GlobalId>),
    Query(String),
    Failed(FederationError),
}

/// Table of in-flight calls, keyed by message id.
///
/// The id counter also stamps the core's internally generated messages,
/// so api correlation ids and internal message ids never collide.
#[derive(Debug, Default)]
pub struct PendingCalls {
    entries: DashMap<u32, Sender<ApiReply>>,
    next_id: AtomicU32,
}

impl PendingCalls {
    pub fn new() -> Self {
        PendingCalls {
            entries: DashMap::new(),
            next_id: AtomicU32::new(1),
        }
    }

    /// Allocate an id without a waiting caller (internal messages).
    pub fn allocate_id(&self) -> u32 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Register a call and get the channel its reply will land on.
    pub fn register(&self) -> (u32, Receiver<ApiReply>) {
        let id = self.allocate_id();
        let (tx, rx) = channel::bounded(1);
        self.entries.insert(id, tx);
        (id, rx)
    }

    /// Complete a call; returns false when nothing was waiting.
    pub fn complete(&self, id: u32, reply: ApiReply) -> bool {
        match self.entries.remove(&id) {
            Some((_, tx)) => tx.send(reply).is_ok(),
            None => false,
        }
    }

    /// Drop a call that timed out on the caller side.
    pub fn forget(&self, id: u32) {
        self.entries.remove(&id);
    }

    /// Fail every outstanding call, for structural errors and shutdown.
    pub fn fail_all(&self, err: &FederationError) {
        let ids: Vec<u32> = self.entries.iter().map(|e| *e.key()).collect();
        for id in ids {
            self.complete(id, ApiReply::Failed(err.clone()));
        }
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
