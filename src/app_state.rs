//! Process-scoped service container handed to the HTTP layer.

use std::sync::Arc;

use ractor::ActorRef;

use crate::actors::event_log::EventLogMsg;
use crate::actors::task_manager::TaskManagerMsg;
use crate::actors::task_registry::TaskRegistryMsg;
use crate::config::Config;

#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    manager: ActorRef<TaskManagerMsg>,
    registry: ActorRef<TaskRegistryMsg>,
    event_log: ActorRef<EventLogMsg>,
    config: Config,
}

impl AppState {
    pub fn new(
        manager: ActorRef<TaskManagerMsg>,
        registry: ActorRef<TaskRegistryMsg>,
        event_log: ActorRef<EventLogMsg>,
        config: Config,
    ) -> Self {
        Self {
            inner: Arc::new(AppStateInner {
                manager,
                registry,
                event_log,
                config,
            }),
        }
    }

    pub fn manager(&self) -> ActorRef<TaskManagerMsg> {
        self.inner.manager.clone()
    }

    pub fn registry(&self) -> ActorRef<TaskRegistryMsg> {
        self.inner.registry.clone()
    }

    pub fn event_log(&self) -> ActorRef<EventLogMsg> {
        self.inner.event_log.clone()
    }

    pub fn config(&self) -> &Config {
        &self.inner.config
    }
}
