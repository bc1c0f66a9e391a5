use std::sync::Arc;

use leadwatch_core::engine::Engine;

use crate::auth::Gate;

/// Shared application state passed to all route handlers.
#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<Engine>,
    pub gate: Arc<Gate>,
}

impl AppState {
    /// Operator identities and the rate limit come from the engine's config.
    pub fn new(engine: Arc<Engine>) -> Self {
        let operator = &engine.config().operator;
        let gate = Gate::new(operator.authorized_ids(), operator.rate_limit_per_minute);
        Self {
            engine,
            gate: Arc::new(gate),
        }
    }
}
