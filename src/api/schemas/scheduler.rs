use crate::workers::SchedulerStatus;
use serde::Serialize;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SchedulerToggle {
    /// False when the scheduler was already in the requested state.
    pub changed: bool,
    pub status: SchedulerStatus,
}
