use std::sync::Arc;
use std::time::Instant;

use crate::broadcast::{BroadcastDispatcher, BroadcastService};
use crate::config::Settings;
use crate::graph::{GraphClient, GraphError};
use crate::ratelimit::BroadcastLimiter;
use crate::store::BroadcastRecordStore;

#[derive(Clone)]
pub struct AppState {
    pub settings: Arc<Settings>,
    pub service: Arc<BroadcastService>,
    pub graph: GraphClient,
    pub limiter: Arc<BroadcastLimiter>,
    pub start_time: Instant,
}

impl AppState {
    pub fn new(
        settings: Settings,
        store: Arc<dyn BroadcastRecordStore>,
    ) -> Result<Self, GraphError> {
        let graph = GraphClient::new(&settings.graph)?;
        let dispatcher = BroadcastDispatcher::new(settings.dispatch_config());
        let service = Arc::new(BroadcastService::new(store, dispatcher));
        let limiter = Arc::new(BroadcastLimiter::new(settings.ratelimit.clone()));

        Ok(Self {
            settings: Arc::new(settings),
            service,
            graph,
            limiter,
            start_time: Instant::now(),
        })
    }

    pub fn store(&self) -> &Arc<dyn BroadcastRecordStore> {
        self.service.store()
    }
}
