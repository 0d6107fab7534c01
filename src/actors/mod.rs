//! Actor-based service components: the event log, the task registry, and
//! the task manager that owns runner lifecycles.

pub mod event_log;
pub mod task_manager;
pub mod task_registry;

pub use event_log::{EventLogActor, EventLogArguments, EventLogError, EventLogMsg};
pub use task_manager::{
    CancelOutcome, TaskManagerActor, TaskManagerArguments, TaskManagerError, TaskManagerMsg,
    WorkerStats,
};
pub use task_registry::{
    StatusCounts, TaskFilter, TaskPatch, TaskRegistryActor, TaskRegistryArguments,
    TaskRegistryError, TaskRegistryMsg, TaskStore,
};
