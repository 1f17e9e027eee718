use std::sync::Arc;

use crate::control::ControlSurface;

/// Shared application state for HTTP handlers.
#[derive(Clone)]
pub struct AppState {
    pub control: Arc<ControlSurface>,
}

impl AppState {
    pub fn new(control: Arc<ControlSurface>) -> Self {
        Self { control }
    }
}
