use std::sync::Arc;

use crate::engine::Engine;

#[derive(Clone)]
pub struct HandlerState {
    pub engine: Arc<Engine>,
}

impl HandlerState {
    pub fn new(engine: Arc<Engine>) -> Self {
        Self { engine }
    }
}
