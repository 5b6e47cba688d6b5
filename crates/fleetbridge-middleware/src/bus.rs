//! Headless, typed, topic-based publish/subscribe event bus.
//!
//! Uses [`tokio::sync::broadcast`] channels under the hood so that every
//! subscriber receives every message without any single subscriber blocking
//! the others. A slow subscriber loses the oldest events and sees
//! `RecvError::Lagged`.
//!
//! # Topics
//!
//! | Topic | Typical traffic |
//! |---|---|
//! | [`Topic::RobotState`] | Periodic `StatusReport`s, one per robot per poll |
//! | [`Topic::TaskEvents`] | Task lifecycle transitions |
//! | [`Topic::Commands`] | Assignments from the control plane, and rejections |
//! | [`Topic::SystemAlerts`] | Reachability changes |

use fleetbridge_types::{Event, EventPayload};
use tokio::sync::broadcast;
use tracing::trace;

/// Default channel capacity (number of buffered events before old ones are
/// dropped for slow subscribers).
const DEFAULT_CAPACITY: usize = 256;

/// Routing lanes on the event bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Topic {
    RobotState,
    TaskEvents,
    Commands,
    SystemAlerts,
}

/// Shared event bus. Clone it cheaply – all clones share the same underlying
/// broadcast channels.
#[derive(Clone, Debug)]
pub struct EventBus {
    robot_state: broadcast::Sender<Event>,
    task_events: broadcast::Sender<Event>,
    commands: broadcast::Sender<Event>,
    system_alerts: broadcast::Sender<Event>,
}

impl EventBus {
    /// Create a new bus. `capacity` applies to every topic independently and
    /// must be non-zero.
    pub fn new(capacity: usize) -> Self {
        let (robot_state, _) = broadcast::channel(capacity);
        let (task_events, _) = broadcast::channel(capacity);
        let (commands, _) = broadcast::channel(capacity);
        let (system_alerts, _) = broadcast::channel(capacity);
        Self {
            robot_state,
            task_events,
            commands,
            system_alerts,
        }
    }

    /// Publish `event` to `topic`.
    ///
    /// Returns the number of receivers that were handed the event. Having no
    /// subscribers is normal (e.g. the control plane is disconnected) and
    /// yields `0`.
    pub fn publish_to(&self, topic: Topic, event: Event) -> usize {
        match self.topic_sender(topic).send(event) {
            Ok(n) => n,
            Err(broadcast::error::SendError(event)) => {
                trace!(?topic, source = %event.source, "no subscribers");
                0
            }
        }
    }

    /// Stamp `payload` into an [`Event`] and publish it.
    pub fn emit(&self, topic: Topic, source: impl Into<String>, payload: EventPayload) -> usize {
        self.publish_to(topic, Event::new(source, payload))
    }

    /// Subscribe to a single topic.
    pub fn subscribe_to(&self, topic: Topic) -> TopicReceiver {
        TopicReceiver {
            topic,
            receiver: self.topic_sender(topic).subscribe(),
        }
    }

    /// Number of live subscribers on `topic`.
    pub fn subscriber_count(&self, topic: Topic) -> usize {
        self.topic_sender(topic).receiver_count()
    }

    fn topic_sender(&self, topic: Topic) -> &broadcast::Sender<Event> {
        match topic {
            Topic::RobotState => &self.robot_state,
            Topic::TaskEvents => &self.task_events,
            Topic::Commands => &self.commands,
            Topic::SystemAlerts => &self.system_alerts,
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

/// An async receiver bound to a single [`Topic`].
///
/// Obtained via [`EventBus::subscribe_to`].
#[derive(Debug)]
pub struct TopicReceiver {
    topic: Topic,
    receiver: broadcast::Receiver<Event>,
}

impl TopicReceiver {
    /// Wait for the next event on this topic.
    ///
    /// * `Err(RecvError::Lagged(n))` – `n` events were dropped; the receiver
    ///   is still usable.
    /// * `Err(RecvError::Closed)` – every sender is gone.
    pub async fn recv(&mut self) -> Result<Event, broadcast::error::RecvError> {
        self.receiver.recv().await
    }

    pub fn topic(&self) -> Topic {
        self.topic
    }
}
