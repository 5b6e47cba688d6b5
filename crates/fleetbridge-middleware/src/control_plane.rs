//! Websocket link to the fleet-management control plane.
//!
//! [`ControlPlaneLink`] is a client: it dials the control plane, keeps the
//! connection alive across failures, and shuttles JSON frames in both
//! directions.
//!
//! # Outbound frames
//!
//! | Bus topic | Frame |
//! |---|---|
//! | (on connect) | `{"type": "hello", "fleet": ..}` |
//! | [`Topic::RobotState`] | `{"type": "robot_state", "robot", "status", "health", "timestamp"}` |
//! | [`Topic::TaskEvents`] | `{"type": "task_update", "robot", "task_id", "kind", "state", ..}` |
//! | [`Topic::Commands`] | `{"type": "command_rejected", "robot", "task_id", "reason"}` |
//! | [`Topic::SystemAlerts`] | `{"type": "link_changed", "robot", "health"}` |
//!
//! # Inbound frames
//!
//! `{"type": "assign", "robot": "kachaka_1", "command": {..TaskCommand..}}` is
//! published as `EventPayload::CommandReceived` on [`Topic::Commands`].
//! Anything else is logged and dropped.

use std::sync::Arc;
use std::time::Duration;

use fleetbridge_types::{
    Event, EventPayload, FleetError, LinkHealth, StatusReport, TaskCommand, TaskEvent,
};
use futures_util::{Sink, SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::net::TcpStream;
use tokio::sync::{broadcast, watch};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::{debug, info, warn};

use crate::bus::{EventBus, Topic, TopicReceiver};

const SOURCE: &str = "fleetbridge-middleware::control_plane";

// ────────────────────────────────────────────────────────────────────────────
// Wire format
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum Outbound<'a> {
    Hello {
        fleet: &'a str,
    },
    RobotState(&'a StatusReport),
    TaskUpdate(&'a TaskEvent),
    CommandRejected {
        robot: &'a str,
        task_id: &'a str,
        reason: &'a str,
    },
    LinkChanged {
        robot: &'a str,
        health: LinkHealth,
    },
}

/// Frames accepted from the control plane.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Inbound {
    Assign { robot: String, command: TaskCommand },
}

/// Parse one inbound text frame.
///
/// # Errors
///
/// [`FleetError::Serialization`] for invalid JSON or an unknown `type`.
pub fn parse_inbound(text: &str) -> Result<Inbound, FleetError> {
    serde_json::from_str(text).map_err(|e| FleetError::Serialization(e.to_string()))
}

/// Encode a bus event as an outbound frame. `None` for events that are not
/// forwarded (inbound commands travelling on [`Topic::Commands`]).
pub fn encode_outbound(event: &Event) -> Option<Result<String, FleetError>> {
    let frame = match &event.payload {
        EventPayload::RobotState(report) => Outbound::RobotState(report),
        EventPayload::TaskUpdate(update) => Outbound::TaskUpdate(update),
        EventPayload::CommandRejected {
            robot,
            task_id,
            reason,
        } => Outbound::CommandRejected {
            robot,
            task_id,
            reason,
        },
        EventPayload::LinkChanged { robot, health } => Outbound::LinkChanged {
            robot,
            health: *health,
        },
        EventPayload::CommandReceived { .. } => return None,
    };
    Some(serde_json::to_string(&frame).map_err(|e| FleetError::Serialization(e.to_string())))
}

// ────────────────────────────────────────────────────────────────────────────
// Reconnect policy
// ────────────────────────────────────────────────────────────────────────────

/// Capped exponential backoff between connection attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub initial: Duration,
    pub max: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            initial: Duration::from_millis(500),
            max: Duration::from_secs(30),
        }
    }
}

impl ReconnectPolicy {
    /// Delay before reconnect attempt `attempt` (1-based).
    pub fn delay(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.initial.saturating_mul(factor).min(self.max)
    }
}

// ────────────────────────────────────────────────────────────────────────────
// ControlPlaneLink
// ────────────────────────────────────────────────────────────────────────────

enum SessionEnd {
    Shutdown,
    Disconnected,
}

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Websocket client bridging the [`EventBus`] and the control plane.
#[derive(Clone, Debug)]
pub struct ControlPlaneLink {
    server_uri: String,
    fleet_name: String,
    bus: Arc<EventBus>,
    reconnect: ReconnectPolicy,
}

impl ControlPlaneLink {
    pub fn new(
        server_uri: impl Into<String>,
        fleet_name: impl Into<String>,
        bus: Arc<EventBus>,
    ) -> Self {
        Self {
            server_uri: server_uri.into(),
            fleet_name: fleet_name.into(),
            bus,
            reconnect: ReconnectPolicy::default(),
        }
    }

    pub fn with_reconnect(mut self, reconnect: ReconnectPolicy) -> Self {
        self.reconnect = reconnect;
        self
    }

    /// Connect and serve until `shutdown` becomes `true` (or its sender is
    /// dropped). Connection failures are retried forever.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let mut attempt: u32 = 0;
        loop {
            if *shutdown.borrow() {
                return;
            }
            match connect_async(self.server_uri.as_str()).await {
                Ok((ws, _)) => {
                    attempt = 0;
                    info!(uri = %self.server_uri, "connected to control plane");
                    match self.session(ws, &mut shutdown).await {
                        Ok(SessionEnd::Shutdown) => return,
                        Ok(SessionEnd::Disconnected) => {
                            warn!(uri = %self.server_uri, "control plane closed the connection");
                        }
                        Err(e) => {
                            warn!(uri = %self.server_uri, error = %e, "control plane session failed");
                        }
                    }
                }
                Err(e) => {
                    warn!(uri = %self.server_uri, error = %e, "control plane connect failed");
                }
            }

            attempt = attempt.saturating_add(1);
            let delay = self.reconnect.delay(attempt);
            debug!(attempt, delay_ms = delay.as_millis() as u64, "reconnecting");
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        return;
                    }
                }
            }
        }
    }

    async fn session(
        &self,
        ws: WsStream,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Result<SessionEnd, FleetError> {
        let (mut ws_tx, mut ws_rx) = ws.split();

        // Subscribe before the hello so nothing published after the
        // handshake is missed.
        let mut state_rx = self.bus.subscribe_to(Topic::RobotState);
        let mut task_rx = self.bus.subscribe_to(Topic::TaskEvents);
        let mut command_rx = self.bus.subscribe_to(Topic::Commands);
        let mut alert_rx = self.bus.subscribe_to(Topic::SystemAlerts);

        let hello = serde_json::to_string(&Outbound::Hello {
            fleet: &self.fleet_name,
        })
        .map_err(|e| FleetError::Serialization(e.to_string()))?;
        send_text(&mut ws_tx, hello).await?;

        loop {
            tokio::select! {
                result = state_rx.recv() => forward(&mut ws_tx, &state_rx, result).await?,
                result = task_rx.recv() => forward(&mut ws_tx, &task_rx, result).await?,
                result = command_rx.recv() => forward(&mut ws_tx, &command_rx, result).await?,
                result = alert_rx.recv() => forward(&mut ws_tx, &alert_rx, result).await?,
                msg = ws_rx.next() => match msg {
                    Some(Ok(Message::Text(text))) => self.handle_inbound(text.as_str()),
                    Some(Ok(Message::Close(_))) | None => return Ok(SessionEnd::Disconnected),
                    Some(Err(e)) => {
                        return Err(FleetError::Channel(format!("websocket receive: {e}")));
                    }
                    Some(Ok(_)) => {}
                },
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        let _ = ws_tx.send(Message::Close(None)).await;
                        return Ok(SessionEnd::Shutdown);
                    }
                }
            }
        }
    }

    fn handle_inbound(&self, text: &str) {
        match parse_inbound(text) {
            Ok(Inbound::Assign { robot, command }) => {
                info!(robot = %robot, task_id = %command.id, kind = ?command.kind, "assignment received");
                self.bus.emit(
                    Topic::Commands,
                    SOURCE,
                    EventPayload::CommandReceived { robot, command },
                );
            }
            Err(e) => warn!(error = %e, "ignoring control plane frame"),
        }
    }
}

async fn send_text<S>(tx: &mut S, text: String) -> Result<(), FleetError>
where
    S: Sink<Message> + Unpin,
    S::Error: std::fmt::Display,
{
    tx.send(Message::Text(text.into()))
        .await
        .map_err(|e| FleetError::Channel(format!("websocket send: {e}")))
}

async fn forward<S>(
    tx: &mut S,
    rx: &TopicReceiver,
    result: Result<Event, broadcast::error::RecvError>,
) -> Result<(), FleetError>
where
    S: Sink<Message> + Unpin,
    S::Error: std::fmt::Display,
{
    match result {
        Ok(event) => match encode_outbound(&event) {
            Some(frame) => send_text(tx, frame?).await,
            None => Ok(()),
        },
        Err(broadcast::error::RecvError::Lagged(n)) => {
            warn!(topic = ?rx.topic(), lagged_by = n, "control plane link lagged");
            Ok(())
        }
        Err(broadcast::error::RecvError::Closed) => {
            Err(FleetError::Channel("event bus closed".into()))
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Tests
// ────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use fleetbridge_types::{RobotStatus, TaskExecutionState, TaskKind};
    use tokio::net::TcpListener;
    use tokio_tungstenite::accept_async;

    const WAIT: Duration = Duration::from_secs(5);

    #[test]
    fn parses_assign_frame() {
        let text = r#"{
            "type": "assign",
            "robot": "kachaka_1",
            "command": {"id": "t1", "kind": "dock"}
        }"#;
        assert_eq!(
            parse_inbound(text).unwrap(),
            Inbound::Assign {
                robot: "kachaka_1".into(),
                command: TaskCommand::dock("t1"),
            }
        );
    }

    #[test]
    fn rejects_unknown_and_malformed_frames() {
        assert!(matches!(
            parse_inbound(r#"{"type": "reboot", "robot": "r"}"#),
            Err(FleetError::Serialization(_))
        ));
        assert!(parse_inbound("not json").is_err());
        assert!(parse_inbound(r#"{"type": "assign", "robot": "r"}"#).is_err());
    }

    #[test]
    fn encodes_task_update_with_type_tag() {
        let event = Event::new(
            "test",
            EventPayload::TaskUpdate(TaskEvent {
                robot: "r".into(),
                task_id: "t1".into(),
                kind: TaskKind::MoveTo,
                state: TaskExecutionState::Completed,
                is_paused: false,
                reason: None,
                timestamp: Utc::now(),
            }),
        );
        let json: serde_json::Value =
            serde_json::from_str(&encode_outbound(&event).unwrap().unwrap()).unwrap();
        assert_eq!(json["type"], "task_update");
        assert_eq!(json["state"], "completed");
        assert_eq!(json["task_id"], "t1");
    }

    #[test]
    fn encodes_link_changed_and_skips_inbound_commands() {
        let alert = Event::new(
            "test",
            EventPayload::LinkChanged {
                robot: "r".into(),
                health: LinkHealth::Unreachable {
                    consecutive_failures: 3,
                },
            },
        );
        let json: serde_json::Value =
            serde_json::from_str(&encode_outbound(&alert).unwrap().unwrap()).unwrap();
        assert_eq!(json["type"], "link_changed");
        assert_eq!(json["health"]["state"], "unreachable");

        let inbound = Event::new(
            "test",
            EventPayload::CommandReceived {
                robot: "r".into(),
                command: TaskCommand::cancel("c"),
            },
        );
        assert!(encode_outbound(&inbound).is_none());
    }

    #[test]
    fn reconnect_delay_doubles_and_caps() {
        let policy = ReconnectPolicy {
            initial: Duration::from_millis(100),
            max: Duration::from_millis(1_000),
        };
        assert_eq!(policy.delay(1), Duration::from_millis(100));
        assert_eq!(policy.delay(2), Duration::from_millis(200));
        assert_eq!(policy.delay(4), Duration::from_millis(800));
        assert_eq!(policy.delay(5), Duration::from_millis(1_000));
        assert_eq!(policy.delay(60), Duration::from_millis(1_000));
    }

    /// End to end against an in-process websocket server: hello out,
    /// assignment in, robot state out.
    #[tokio::test]
    async fn round_trip_with_local_server() -> Result<(), Box<dyn std::error::Error>> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let (seen_tx, mut seen_rx) = tokio::sync::mpsc::unbounded_channel::<serde_json::Value>();

        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = accept_async(stream).await.unwrap();
            let assign = r#"{"type":"assign","robot":"kachaka_1","command":{"id":"t9","kind":"charge"}}"#;
            while let Some(Ok(msg)) = ws.next().await {
                if let Message::Text(text) = msg {
                    let value: serde_json::Value = serde_json::from_str(text.as_str()).unwrap();
                    if value["type"] == "hello" {
                        ws.send(Message::Text(assign.into())).await.unwrap();
                    }
                    if seen_tx.send(value).is_err() {
                        break;
                    }
                }
            }
        });

        let bus = Arc::new(EventBus::default());
        let mut commands = bus.subscribe_to(Topic::Commands);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let link = ControlPlaneLink::new(format!("ws://{addr}"), "kachaka_fleet", Arc::clone(&bus));
        let link_task = tokio::spawn(link.run(shutdown_rx));

        let hello = tokio::time::timeout(WAIT, seen_rx.recv()).await?.ok_or("no hello")?;
        assert_eq!(hello["fleet"], "kachaka_fleet");

        let event = tokio::time::timeout(WAIT, commands.recv()).await??;
        match event.payload {
            EventPayload::CommandReceived { robot, command } => {
                assert_eq!(robot, "kachaka_1");
                assert_eq!(command, TaskCommand::charge("t9"));
            }
            other => panic!("unexpected payload: {other:?}"),
        }

        bus.emit(
            Topic::RobotState,
            "test",
            EventPayload::RobotState(StatusReport {
                robot: "kachaka_1".into(),
                status: RobotStatus::unknown(),
                health: LinkHealth::Fresh,
                timestamp: Utc::now(),
            }),
        );
        let state = tokio::time::timeout(WAIT, seen_rx.recv()).await?.ok_or("no state")?;
        assert_eq!(state["type"], "robot_state");
        assert_eq!(state["robot"], "kachaka_1");

        shutdown_tx.send(true)?;
        tokio::time::timeout(WAIT, link_task).await??;
        server.abort();
        Ok(())
    }

    #[tokio::test]
    async fn shutdown_interrupts_reconnect_backoff() {
        let bus = Arc::new(EventBus::default());
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        // Nothing listens on port 9.
        let link = ControlPlaneLink::new("ws://127.0.0.1:9", "fleet", bus).with_reconnect(
            ReconnectPolicy {
                initial: Duration::from_secs(60),
                max: Duration::from_secs(60),
            },
        );
        let handle = tokio::spawn(link.run(shutdown_rx));
        tokio::time::sleep(Duration::from_millis(100)).await;
        shutdown_tx.send(true).unwrap();
        assert!(tokio::time::timeout(WAIT, handle).await.is_ok());
    }
}
