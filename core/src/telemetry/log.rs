use log::{debug, info, warn};
use serde::Serialize;

/// Thin facade over the `log` macros, tagged with the pipeline component.
#[derive(Debug, Clone)]
pub struct LogManager {
    component: &'static str,
}

impl LogManager {
    pub fn new() -> Self {
        Self::for_component("stormcore")
    }

    pub fn for_component(component: &'static str) -> Self {
        Self { component }
    }

    pub fn record(&self, message: &str) {
        info!("[{}] {}", self.component, message);
    }

    pub fn detail(&self, message: &str) {
        debug!("[{}] {}", self.component, message);
    }

    pub fn warn(&self, message: &str) {
        warn!("[{}] {}", self.component, message);
    }

    /// Logs a serializable record as a single JSON line.
    pub fn event<T: Serialize>(&self, kind: &str, payload: &T) {
        match serde_json::to_string(payload) {
            Ok(json) => debug!("[{}] {} {}", self.component, kind, json),
            Err(err) => warn!("[{}] {} could not be serialized: {}", self.component, kind, err),
        }
    }
}

impl Default for LogManager {
    fn default() -> Self {
        Self::new()
    }
}
