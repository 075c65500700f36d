//! Application state.

use std::sync::Arc;

use tokio::task::AbortHandle;

use tally_meter::MeterQueue;
use tally_store::Store;

use crate::config::ServiceConfig;
use crate::ledger::Ledger;
use crate::pipeline::UsagePipeline;

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    /// The storage backend.
    pub store: Arc<dyn Store>,

    /// The credit ledger.
    pub ledger: Ledger,

    /// The durable meter-event queue.
    pub queue: MeterQueue,

    /// The usage reporting pipeline.
    pub pipeline: UsagePipeline,

    /// Service configuration.
    pub config: ServiceConfig,

    /// Liveness probe for the delivery worker, when one is running.
    pub worker_liveness: Option<AbortHandle>,
}

impl AppState {
    /// Create application state over a store, with no delivery worker.
    #[must_use]
    pub fn new(store: Arc<dyn Store>, config: ServiceConfig) -> Self {
        let ledger = Ledger::new(Arc::clone(&store));
        let queue = MeterQueue::new(Arc::clone(&store));
        let pipeline = UsagePipeline::new(Arc::clone(&store), queue.clone());

        Self {
            store,
            ledger,
            queue,
            pipeline,
            config,
            worker_liveness: None,
        }
    }

    /// Attach the delivery worker's liveness probe.
    #[must_use]
    pub fn with_worker_liveness(mut self, handle: AbortHandle) -> Self {
        self.worker_liveness = Some(handle);
        self
    }

    /// Whether the delivery worker task is running.
    #[must_use]
    pub fn worker_alive(&self) -> bool {
        self.worker_liveness
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }
}
