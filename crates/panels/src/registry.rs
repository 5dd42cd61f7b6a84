use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use common::{CommandRecorder, RemoteStore, SharedDiagnostics};

use crate::actuator::ActuatorController;

/// Hands out the single controller that owns each actuated path.
///
/// Two panels asking for the same path get clones of one controller, so
/// they share one in-flight guard instead of racing two of them.
#[derive(Clone)]
pub struct ControllerRegistry {
    store: Arc<dyn RemoteStore>,
    cooldown: Duration,
    diagnostics: Arc<SharedDiagnostics>,
    recorder: Option<CommandRecorder>,
    controllers: Arc<Mutex<HashMap<String, ActuatorController>>>,
}

impl ControllerRegistry {
    pub fn new(
        store: Arc<dyn RemoteStore>,
        cooldown: Duration,
        diagnostics: Arc<SharedDiagnostics>,
        recorder: Option<CommandRecorder>,
    ) -> Self {
        Self {
            store,
            cooldown,
            diagnostics,
            recorder,
            controllers: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn controller_for(&self, path: &str) -> ActuatorController {
        let mut controllers = self.controllers.lock().unwrap_or_else(PoisonError::into_inner);
        controllers
            .entry(path.to_string())
            .or_insert_with(|| {
                ActuatorController::new(
                    Arc::clone(&self.store),
                    path,
                    self.cooldown,
                    Arc::clone(&self.diagnostics),
                    self.recorder.clone(),
                )
            })
            .clone()
    }

    pub fn get(&self, path: &str) -> Option<ActuatorController> {
        self.controllers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(path)
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.controllers.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actuator::{ActuatorCommandState, ToggleRequest};
    use common::MemoryStore;
    use serde_json::json;

    #[tokio::test(start_paused = true)]
    async fn one_guard_per_path() {
        let store = Arc::new(MemoryStore::with_seed([("soil/pump1", json!(false))]));
        let registry = ControllerRegistry::new(
            store.clone(),
            Duration::from_secs(1),
            Arc::new(SharedDiagnostics::default()),
            None,
        );

        let a = registry.controller_for("soil/pump1");
        let b = registry.controller_for("soil/pump1");
        let other = registry.controller_for("soil/pump2");
        assert_eq!(registry.len(), 2);

        assert!(a.toggle().is_accepted());
        assert!(matches!(b.toggle(), ToggleRequest::Rejected(ActuatorCommandState::InFlight)));
        assert_eq!(other.state(), ActuatorCommandState::Idle);

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(store.writes_to("soil/pump1"), vec![json!(true)]);
    }
}
