use parking_lot::Mutex;
use smol_str::SmolStr;
use std::collections::VecDeque;
use std::sync::Arc;

/// A message surfaced by an account store, delivered to strategies via
/// `notify_store`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreMessage {
    pub store: SmolStr,
    pub msg: SmolStr,
}

/// Account-store contract.
///
/// Stores are reference-counted singletons shared by feeds and brokers
/// targeting the same venue; the engine drains their notification queues
/// each loop iteration.
pub trait Store: Send + Sync {
    fn name(&self) -> &str;
    fn start(&self) {}
    fn stop(&self) {}
    fn poll_notifications(&self) -> Vec<StoreMessage>;
}

/// In-memory store with an externally fed notification queue; the shared
/// handle (`Arc`) models the per-venue singleton.
pub struct QueueStore {
    name: SmolStr,
    queue: Mutex<VecDeque<StoreMessage>>,
}

impl QueueStore {
    pub fn shared(name: impl Into<SmolStr>) -> Arc<Self> {
        Arc::new(Self {
            name: name.into(),
            queue: Mutex::new(VecDeque::new()),
        })
    }

    pub fn push(&self, msg: impl Into<SmolStr>) {
        let message = StoreMessage {
            store: self.name.clone(),
            msg: msg.into(),
        };
        self.queue.lock().push_back(message);
    }
}

impl Store for QueueStore {
    fn name(&self) -> &str {
        &self.name
    }

    fn poll_notifications(&self) -> Vec<StoreMessage> {
        self.queue.lock().drain(..).collect()
    }
}
