use crate::scheduler::FlowScheduler;
use crate::storage::Pool;

#[derive(Clone)]
pub struct AppState {
    pub pool: Pool,
    pub scheduler: FlowScheduler,
}

impl AppState {
    pub fn new(scheduler: FlowScheduler) -> Self {
        Self {
            pool: scheduler.get_pool().clone(),
            scheduler,
        }
    }
}
