//! Background agents (ambient concern): periodic maintenance sweeps driven
//! by an `acton-reactive` actor so their lifecycle (startup, cancellation,
//! graceful stop) is managed the same way as the rest of the gateway's
//! async work, rather than as bare detached `tokio::spawn` tasks.

pub mod background_worker;
pub mod messages;

pub mod prelude {
    pub use acton_reactive::prelude::*;

    pub use super::background_worker::{BackgroundWorker, TaskStatus};
    pub use super::messages::{CancelTask, GetAllTaskStatuses, GetTaskStatus, TaskStatusResponse};
}
