pub mod maintenance;
pub mod scheduler;

pub use maintenance::MaintenanceWorker;
pub use scheduler::{DispatchWorker, Scheduler, SchedulerStatus, TickReport};
