use chrono::Utc;
use fleetbridge_kernel::TaskTransition;
use fleetbridge_middleware::{EventBus, Topic};
use fleetbridge_types::{EventPayload, TaskEvent};
use tracing::{debug, info};

pub(crate) fn task_event(robot: &str, transition: &TaskTransition) -> TaskEvent {
    TaskEvent {
        robot: robot.to_owned(),
        task_id: transition.task_id.clone(),
        kind: transition.kind,
        state: transition.to,
        is_paused: transition.is_paused,
        reason: transition.reason.clone(),
        timestamp: Utc::now(),
    }
}

/// Publish a task transition on [`Topic::TaskEvents`]. Terminal transitions
/// are logged at info.
pub(crate) fn publish_transition(
    bus: &EventBus,
    source: &str,
    robot: &str,
    transition: &TaskTransition,
) {
    if transition.to.is_terminal() {
        info!(
            robot,
            task_id = %transition.task_id,
            state = ?transition.to,
            reason = transition.reason.as_deref().unwrap_or(""),
            "task finished"
        );
    } else {
        debug!(robot, task_id = %transition.task_id, state = ?transition.to, "task update");
    }
    bus.emit(
        Topic::TaskEvents,
        source,
        EventPayload::TaskUpdate(task_event(robot, transition)),
    );
}
