use std::sync::Arc;

use synergy_gateway::Engine;

pub type AppState = Arc<AppStateInner>;

pub struct AppStateInner {
    pub engine: Engine,
}

impl AppStateInner {
    pub fn new(engine: Engine) -> AppState {
        Arc::new(Self { engine })
    }
}
