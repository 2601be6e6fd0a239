use std::sync::Arc;

use tokio::sync::Mutex;

use crate::services::LifecycleController;

#[derive(Clone)]
pub struct AppState {
    /// One command at a time: a second request waits for the lock.
    pub controller: Arc<Mutex<LifecycleController>>,
}

impl AppState {
    pub fn new(controller: LifecycleController) -> Self {
        Self {
            controller: Arc::new(Mutex::new(controller)),
        }
    }
}
