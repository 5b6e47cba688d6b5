//! REST client for Kachaka robots behind the vendor's HTTP bridge.
//!
//! # Endpoints
//!
//! | Call | Request |
//! |------|---------|
//! | command | `PUT {prefix}{robot}/command` with `{"method": .., "args": ..}` |
//! | clear command state | `DELETE {prefix}{robot}/command_state` |
//! | pose | `GET {prefix}{robot}/pose` → `[{"value": {"x", "y", "theta"}}]` |
//! | battery | `GET {prefix}{robot}/battery` → `[{"value": pct}]` or `[{"value": [pct, power_status]}]` |
//! | map | `GET {prefix}{robot}/map_name` → `[{"value": "L1"}]` |
//! | command state | `GET {prefix}{robot}/command_state` → `[{"value": [state, error_code]}]` |
//! | connection | `GET {prefix}get_robot_serial_number` |
//! | shelf pickup | `POST {prefix}{robot}/dock_shelf` with `{"title": ""}` → `{"id": ..}` |
//! | shelf dropoff | `POST {prefix}{robot}/undock_shelf` with `{"title": ""}` → `{"id": ..}` |
//! | shelf result | `POST {prefix}command_result?task_id={id}` with `{"id": id}` |
//!
//! A shelf action stays pending until `command_result` answers 2xx; status
//! reads poll it and report `Docking` meanwhile. The client tracks whether a
//! shelf is docked and refuses a pickup while carrying one (or a dropoff
//! without one) before calling the bridge.
//!
//! The bridge offers no pause. [`KachakaClient::pause`] cancels the running
//! command and remembers it; [`KachakaClient::resume`] sends it again.

use std::fmt;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use fleetbridge_types::{Ack, FleetError, RobotMode, RobotPose, RobotStatus};
use reqwest::{Method, StatusCode};
use serde_json::{Value, json};
use tracing::{debug, warn};

use crate::robot_client::RobotClient;

/// `command_state` value meaning "waiting for requests".
const COMMAND_STATE_IDLE: i64 = 1;

/// `power_status` value reported while on the charger.
const POWER_STATUS_CHARGING: i64 = 1;

/// Default linear speed (m/s) when a move carries no speed limit.
const DEFAULT_LINEAR_SPEED: f64 = 1.0;
const DEFAULT_ANGULAR_SPEED: f64 = 1.0;

// ────────────────────────────────────────────────────────────────────────────
// Credentials
// ────────────────────────────────────────────────────────────────────────────

/// HTTP basic-auth credentials for the bridge.
#[derive(Clone)]
pub struct Credentials {
    pub user: String,
    pub password: String,
}

impl Credentials {
    pub fn new(user: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            password: password.into(),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("user", &self.user)
            .field("password", &"[REDACTED]")
            .finish()
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Wire helpers
// ────────────────────────────────────────────────────────────────────────────

/// The last motion command, kept so pause/resume can be emulated.
#[derive(Debug, Clone, Copy, PartialEq)]
enum MotionCommand {
    MoveTo {
        target: RobotPose,
        speed_limit: Option<f64>,
    },
    Dock,
}

/// Shelf docking state tracked on the client side.
#[derive(Debug, Default)]
struct ShelfState {
    docked: bool,
    /// `(bridge task id, docked state on success)`.
    pending: Option<(String, bool)>,
    /// Set when the last action ended unsuccessfully; reported once.
    failed: bool,
}

/// Parsed `command_state` reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct CommandState {
    idle: bool,
    error_code: i64,
}

fn command_body(method: &str, args: Value) -> Value {
    json!({ "method": method, "args": args })
}

fn velocity_args(speed_limit: Option<f64>) -> Value {
    let linear = speed_limit
        .filter(|v| *v > 0.0)
        .unwrap_or(DEFAULT_LINEAR_SPEED);
    json!({ "linear": linear, "angular": DEFAULT_ANGULAR_SPEED })
}

fn pose_args(target: &RobotPose) -> Value {
    json!({ "x": target.x, "y": target.y, "yaw": target.heading })
}

/// `[{"value": ...}, ...]` → the first `value`.
fn first_value<'a>(body: &'a Value, what: &str) -> Result<&'a Value, FleetError> {
    body.get(0)
        .and_then(|entry| entry.get("value"))
        .ok_or_else(|| FleetError::Serialization(format!("{what}: missing [0].value")))
}

fn field_f64(value: &Value, key: &str, what: &str) -> Result<f64, FleetError> {
    value
        .get(key)
        .and_then(Value::as_f64)
        .ok_or_else(|| FleetError::Serialization(format!("{what}: missing numeric '{key}'")))
}

fn parse_pose(body: &Value) -> Result<RobotPose, FleetError> {
    let value = first_value(body, "pose")?;
    Ok(RobotPose::robot(
        field_f64(value, "x", "pose")?,
        field_f64(value, "y", "pose")?,
        field_f64(value, "theta", "pose")?,
    ))
}

/// Returns `(fraction in [0, 1], is_charging)`.
fn parse_battery(body: &Value) -> Result<(f64, bool), FleetError> {
    let value = first_value(body, "battery")?;
    let (percent, charging) = match value {
        Value::Array(items) => {
            let percent = items.first().and_then(Value::as_f64);
            let power = items.get(1).and_then(Value::as_i64);
            (percent, power == Some(POWER_STATUS_CHARGING))
        }
        other => (other.as_f64(), false),
    };
    let percent = percent
        .ok_or_else(|| FleetError::Serialization("battery: value is not a percentage".into()))?;
    Ok(((percent / 100.0).clamp(0.0, 1.0), charging))
}

fn parse_map(body: &Value) -> Option<String> {
    first_value(body, "map_name")
        .ok()
        .and_then(Value::as_str)
        .map(str::to_owned)
}

fn parse_command_state(body: &Value) -> Result<CommandState, FleetError> {
    let value = first_value(body, "command_state")?;
    let state = value
        .get(0)
        .and_then(Value::as_i64)
        .ok_or_else(|| FleetError::Serialization("command_state: missing state".into()))?;
    let error_code = value.get(1).and_then(Value::as_i64).unwrap_or(0);
    Ok(CommandState {
        idle: state == COMMAND_STATE_IDLE,
        error_code,
    })
}

fn derive_mode(state: CommandState, charging: bool, last: Option<MotionCommand>) -> RobotMode {
    if state.error_code != 0 {
        return RobotMode::Error;
    }
    if !state.idle {
        return match last {
            Some(MotionCommand::Dock) => RobotMode::Docking,
            _ => RobotMode::Moving,
        };
    }
    if charging {
        RobotMode::Charging
    } else {
        RobotMode::Idle
    }
}

/// 5xx, 408 and 429 are worth retrying; any other refusal is final.
fn classify_status(robot: &str, status: StatusCode, body: &str) -> FleetError {
    let details = if body.is_empty() {
        format!("HTTP {status}")
    } else {
        format!("HTTP {status}: {body}")
    };
    if status.is_server_error()
        || status == StatusCode::REQUEST_TIMEOUT
        || status == StatusCode::TOO_MANY_REQUESTS
    {
        FleetError::Transport {
            robot: robot.to_owned(),
            details,
        }
    } else {
        FleetError::CommandRejected {
            robot: robot.to_owned(),
            details,
        }
    }
}

/// The task id of a 2xx `dock_shelf`/`undock_shelf` response.
fn parse_shelf_task_id(body: &str) -> Result<String, FleetError> {
    let value: Value = serde_json::from_str(body)
        .map_err(|e| FleetError::Serialization(format!("shelf response: {e}")))?;
    match value.get("id") {
        Some(Value::String(id)) => Ok(id.clone()),
        Some(Value::Number(id)) => Ok(id.to_string()),
        _ => Err(FleetError::Serialization("shelf response: missing 'id'".into())),
    }
}

/// Interpret a 2xx command response body.
fn parse_ack(robot: &str, body: &str) -> Result<Ack, FleetError> {
    let Ok(value) = serde_json::from_str::<Value>(body) else {
        return Ok(Ack::default());
    };
    if value.get("success").and_then(Value::as_bool) == Some(false) {
        let details = value
            .get("error")
            .or_else(|| value.get("message"))
            .map(|v| v.to_string())
            .unwrap_or_else(|| "success: false".to_string());
        return Err(FleetError::CommandRejected {
            robot: robot.to_owned(),
            details,
        });
    }
    let command_id = ["id", "command_id"]
        .iter()
        .find_map(|k| value.get(*k).and_then(Value::as_str))
        .map(str::to_owned);
    Ok(Ack { command_id })
}

// ────────────────────────────────────────────────────────────────────────────
// KachakaClient
// ────────────────────────────────────────────────────────────────────────────

/// [`RobotClient`] for one Kachaka robot.
#[derive(Debug)]
pub struct KachakaClient {
    name: String,
    prefix: String,
    credentials: Option<Credentials>,
    timeout: Duration,
    http: reqwest::Client,
    last_motion: Mutex<Option<MotionCommand>>,
    shelf: Mutex<ShelfState>,
}

impl KachakaClient {
    /// `prefix` is the bridge base URL including the trailing slash, e.g.
    /// `"http://bridge.local:26400/"`. `timeout` bounds every HTTP request.
    ///
    /// # Errors
    ///
    /// [`FleetError::Config`] if the HTTP client cannot be built.
    pub fn new(
        name: impl Into<String>,
        prefix: impl Into<String>,
        credentials: Option<Credentials>,
        timeout: Duration,
    ) -> Result<Self, FleetError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| FleetError::Config(format!("http client: {e}")))?;
        Ok(Self {
            name: name.into(),
            prefix: prefix.into(),
            credentials,
            timeout,
            http,
            last_motion: Mutex::new(None),
            shelf: Mutex::new(ShelfState::default()),
        })
    }

    fn robot_url(&self, path: &str) -> String {
        format!("{}{}/{}", self.prefix, self.name, path)
    }

    fn request(&self, method: Method, url: &str) -> reqwest::RequestBuilder {
        let builder = self.http.request(method, url);
        match &self.credentials {
            Some(c) => builder.basic_auth(&c.user, Some(&c.password)),
            None => builder,
        }
    }

    fn network_error(&self, operation: &str, err: reqwest::Error) -> FleetError {
        if err.is_timeout() {
            FleetError::Timeout {
                operation: format!("{}: {operation}", self.name),
                after_ms: self.timeout.as_millis() as u64,
            }
        } else {
            FleetError::Transport {
                robot: self.name.clone(),
                details: format!("{operation}: {err}"),
            }
        }
    }

    fn last_motion(&self) -> Option<MotionCommand> {
        *self.last_motion.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_last_motion(&self, motion: Option<MotionCommand>) {
        *self.last_motion.lock().unwrap_or_else(PoisonError::into_inner) = motion;
    }

    fn shelf(&self) -> std::sync::MutexGuard<'_, ShelfState> {
        self.shelf.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn post_json(
        &self,
        url: &str,
        body: &Value,
        operation: &str,
    ) -> Result<(StatusCode, String), FleetError> {
        let response = self
            .request(Method::POST, url)
            .json(body)
            .send()
            .await
            .map_err(|e| self.network_error(operation, e))?;
        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| self.network_error(operation, e))?;
        Ok((status, text))
    }

    /// Start a shelf pickup (`docked_after = true`) or dropoff.
    async fn shelf_action(&self, path: &str, docked_after: bool) -> Result<Ack, FleetError> {
        {
            let shelf = self.shelf();
            let refusal = if shelf.pending.is_some() {
                Some("a shelf action is already running")
            } else if shelf.docked == docked_after {
                Some(if docked_after {
                    "already carrying a shelf"
                } else {
                    "no shelf is docked"
                })
            } else {
                None
            };
            if let Some(details) = refusal {
                return Err(FleetError::CommandRejected {
                    robot: self.name.clone(),
                    details: details.into(),
                });
            }
        }

        let url = self.robot_url(path);
        let (status, text) = self.post_json(&url, &json!({ "title": "" }), path).await?;
        if !status.is_success() {
            return Err(classify_status(&self.name, status, &text));
        }
        let task_id = parse_shelf_task_id(&text)?;
        debug!(robot = %self.name, path, task_id = %task_id, "shelf action started");
        let mut shelf = self.shelf();
        shelf.pending = Some((task_id.clone(), docked_after));
        shelf.failed = false;
        Ok(Ack {
            command_id: Some(task_id),
        })
    }

    /// Ask the bridge whether the pending shelf action finished. Returns the
    /// docked state and whether an action is still running.
    async fn poll_shelf(&self) -> Result<(bool, bool), FleetError> {
        let pending = self.shelf().pending.clone();
        let Some((task_id, docked_after)) = pending else {
            let shelf = self.shelf();
            return Ok((shelf.docked, false));
        };

        let url = format!("{}command_result?task_id={}", self.prefix, task_id);
        let (status, text) = self
            .post_json(&url, &json!({ "id": task_id }), "command_result")
            .await?;

        let mut shelf = self.shelf();
        // A cancel may have cleared the action while the request was out.
        if shelf.pending.as_ref().map(|(id, _)| id) != Some(&task_id) {
            return Ok((shelf.docked, shelf.pending.is_some()));
        }
        if !status.is_success() {
            return Ok((shelf.docked, true));
        }
        shelf.pending = None;
        match parse_ack(&self.name, &text) {
            Ok(_) => {
                shelf.docked = docked_after;
                debug!(
                    robot = %self.name,
                    task_id = %task_id,
                    docked = docked_after,
                    "shelf action finished"
                );
            }
            Err(e) => {
                shelf.failed = true;
                warn!(robot = %self.name, task_id = %task_id, error = %e, "shelf action failed");
            }
        }
        Ok((shelf.docked, false))
    }

    async fn get_json(&self, path: &str) -> Result<Value, FleetError> {
        let url = self.robot_url(path);
        let response = self
            .request(Method::GET, &url)
            .send()
            .await
            .map_err(|e| self.network_error(path, e))?;
        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| self.network_error(path, e))?;
        if !status.is_success() {
            return Err(classify_status(&self.name, status, &text));
        }
        serde_json::from_str(&text)
            .map_err(|e| FleetError::Serialization(format!("{}: {path}: {e}", self.name)))
    }

    async fn clear_command_state(&self) -> Result<(), FleetError> {
        let url = self.robot_url("command_state");
        let response = self
            .request(Method::DELETE, &url)
            .send()
            .await
            .map_err(|e| self.network_error("clear command_state", e))?;
        if !response.status().is_success() {
            debug!(
                robot = %self.name,
                status = %response.status(),
                "clearing command_state returned non-success"
            );
        }
        Ok(())
    }

    async fn send_command(&self, method: &str, args: Value) -> Result<Ack, FleetError> {
        self.clear_command_state().await?;
        let url = self.robot_url("command");
        let response = self
            .request(Method::PUT, &url)
            .json(&command_body(method, args))
            .send()
            .await
            .map_err(|e| self.network_error(method, e))?;
        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| self.network_error(method, e))?;
        if !status.is_success() {
            return Err(classify_status(&self.name, status, &text));
        }
        debug!(robot = %self.name, method, "command accepted");
        parse_ack(&self.name, &text)
    }

    async fn run_motion(&self, motion: MotionCommand) -> Result<Ack, FleetError> {
        let ack = match motion {
            MotionCommand::MoveTo {
                target,
                speed_limit,
            } => {
                self.send_command("set_robot_velocity", velocity_args(speed_limit))
                    .await?;
                self.send_command("move_to_pose", pose_args(&target)).await?
            }
            MotionCommand::Dock => self.send_command("return_home", json!({})).await?,
        };
        self.set_last_motion(Some(motion));
        Ok(ack)
    }
}

#[async_trait]
impl RobotClient for KachakaClient {
    fn name(&self) -> &str {
        &self.name
    }

    async fn get_status(&self) -> Result<RobotStatus, FleetError> {
        let (pose, battery, map, state) = tokio::try_join!(
            self.get_json("pose"),
            self.get_json("battery"),
            self.get_json("map_name"),
            self.get_json("command_state"),
        )?;
        let pose = parse_pose(&pose)?;
        let (battery_fraction, is_charging) = parse_battery(&battery)?;
        let state = parse_command_state(&state)?;
        let (shelf_docked, shelf_running) = self.poll_shelf().await?;
        let shelf_failed = std::mem::take(&mut self.shelf().failed);

        let mut mode = derive_mode(state, is_charging, self.last_motion());
        if shelf_failed {
            mode = RobotMode::Error;
        } else if shelf_running && mode != RobotMode::Error {
            mode = RobotMode::Docking;
        }
        Ok(RobotStatus {
            pose,
            battery_fraction,
            is_charging,
            mode,
            current_task_id: None,
            map: parse_map(&map),
            shelf_docked: Some(shelf_docked),
        })
    }

    async fn move_to(
        &self,
        target: &RobotPose,
        speed_limit: Option<f64>,
    ) -> Result<Ack, FleetError> {
        self.run_motion(MotionCommand::MoveTo {
            target: *target,
            speed_limit,
        })
        .await
    }

    async fn dock(&self) -> Result<Ack, FleetError> {
        self.run_motion(MotionCommand::Dock).await
    }

    async fn pause(&self) -> Result<Ack, FleetError> {
        // Stop but keep `last_motion` for resume.
        self.send_command("cancel_command", json!({})).await
    }

    async fn resume(&self) -> Result<Ack, FleetError> {
        match self.last_motion() {
            Some(motion) => self.run_motion(motion).await,
            None => Err(FleetError::CommandRejected {
                robot: self.name.clone(),
                details: "nothing to resume".into(),
            }),
        }
    }

    async fn cancel(&self) -> Result<Ack, FleetError> {
        let ack = self.send_command("cancel_command", json!({})).await?;
        self.set_last_motion(None);
        self.shelf().pending = None;
        Ok(ack)
    }

    async fn dock_shelf(&self) -> Result<Ack, FleetError> {
        self.shelf_action("dock_shelf", true).await
    }

    async fn undock_shelf(&self) -> Result<Ack, FleetError> {
        self.shelf_action("undock_shelf", false).await
    }

    async fn check_connection(&self) -> bool {
        let url = format!("{}get_robot_serial_number", self.prefix);
        match self.request(Method::GET, &url).send().await {
            Ok(response) => response.status() == StatusCode::OK,
            Err(e) => {
                warn!(robot = %self.name, error = %e, "connection check failed");
                false
            }
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Tests
// ────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn velocity_defaults_when_no_limit() {
        assert_eq!(
            velocity_args(None),
            json!({ "linear": 1.0, "angular": 1.0 })
        );
        assert_eq!(
            velocity_args(Some(0.0)),
            json!({ "linear": 1.0, "angular": 1.0 })
        );
        assert_eq!(
            velocity_args(Some(0.4)),
            json!({ "linear": 0.4, "angular": 1.0 })
        );
    }

    #[test]
    fn move_body_uses_yaw() {
        let body = command_body("move_to_pose", pose_args(&RobotPose::robot(1.5, -2.0, 0.3)));
        assert_eq!(
            body,
            json!({ "method": "move_to_pose", "args": { "x": 1.5, "y": -2.0, "yaw": 0.3 } })
        );
    }

    #[test]
    fn parses_pose() {
        let body = json!([{ "value": { "x": 1.0, "y": 2.0, "theta": -0.5 } }]);
        assert_eq!(parse_pose(&body).unwrap(), RobotPose::robot(1.0, 2.0, -0.5));
    }

    #[test]
    fn malformed_pose_is_serialization_error() {
        let body = json!([{ "value": { "x": 1.0 } }]);
        assert!(matches!(parse_pose(&body), Err(FleetError::Serialization(_))));
        assert!(matches!(parse_pose(&json!([])), Err(FleetError::Serialization(_))));
    }

    #[test]
    fn parses_battery_percent_and_power_status() {
        let (frac, charging) = parse_battery(&json!([{ "value": 80 }])).unwrap();
        assert!((frac - 0.8).abs() < 1e-12);
        assert!(!charging);

        let (frac, charging) = parse_battery(&json!([{ "value": [55.0, 1] }])).unwrap();
        assert!((frac - 0.55).abs() < 1e-12);
        assert!(charging);

        let (frac, _) = parse_battery(&json!([{ "value": 140 }])).unwrap();
        assert!((frac - 1.0).abs() < 1e-12);
    }

    #[test]
    fn parses_map_name() {
        assert_eq!(parse_map(&json!([{ "value": "L1" }])).as_deref(), Some("L1"));
        assert_eq!(parse_map(&json!([])), None);
    }

    #[test]
    fn command_state_to_mode() {
        let idle = parse_command_state(&json!([{ "value": [1, 0] }])).unwrap();
        let busy = parse_command_state(&json!([{ "value": [2, 0] }])).unwrap();
        let failed = parse_command_state(&json!([{ "value": [1, 10250] }])).unwrap();

        assert_eq!(derive_mode(idle, false, None), RobotMode::Idle);
        assert_eq!(derive_mode(idle, true, None), RobotMode::Charging);
        assert_eq!(derive_mode(busy, false, None), RobotMode::Moving);
        assert_eq!(
            derive_mode(busy, false, Some(MotionCommand::Dock)),
            RobotMode::Docking
        );
        assert_eq!(derive_mode(failed, false, None), RobotMode::Error);
    }

    #[test]
    fn command_state_without_error_code() {
        let state = parse_command_state(&json!([{ "value": [1] }])).unwrap();
        assert!(state.idle);
        assert_eq!(state.error_code, 0);
    }

    #[test]
    fn status_classification() {
        assert!(classify_status("r", StatusCode::SERVICE_UNAVAILABLE, "").is_transient());
        assert!(classify_status("r", StatusCode::TOO_MANY_REQUESTS, "").is_transient());
        assert!(classify_status("r", StatusCode::REQUEST_TIMEOUT, "").is_transient());
        assert!(matches!(
            classify_status("r", StatusCode::BAD_REQUEST, "bad yaw"),
            FleetError::CommandRejected { .. }
        ));
    }

    #[test]
    fn ack_parsing() {
        assert_eq!(parse_ack("r", "").unwrap(), Ack::default());
        assert_eq!(
            parse_ack("r", r#"{"success": true, "id": "c-1"}"#).unwrap(),
            Ack {
                command_id: Some("c-1".into())
            }
        );
        assert!(matches!(
            parse_ack("r", r#"{"success": false, "error": "busy"}"#),
            Err(FleetError::CommandRejected { .. })
        ));
    }

    #[test]
    fn shelf_task_id_accepts_strings_and_numbers() {
        assert_eq!(parse_shelf_task_id(r#"{"id": "t-7"}"#).unwrap(), "t-7");
        assert_eq!(parse_shelf_task_id(r#"{"id": 42}"#).unwrap(), "42");
        assert!(matches!(
            parse_shelf_task_id(r#"{"status": "ok"}"#),
            Err(FleetError::Serialization(_))
        ));
    }

    #[tokio::test]
    async fn dropoff_without_shelf_is_refused_locally() {
        // Refused before any request goes out, so the closed port is never hit.
        let client = KachakaClient::new(
            "kachaka_1",
            "http://127.0.0.1:9/",
            None,
            Duration::from_millis(200),
        )
        .unwrap();
        let err = client.undock_shelf().await.unwrap_err();
        assert!(matches!(err, FleetError::CommandRejected { .. }), "{err:?}");

        client.shelf().docked = true;
        let err = client.dock_shelf().await.unwrap_err();
        assert!(matches!(err, FleetError::CommandRejected { .. }), "{err:?}");
    }

    #[tokio::test]
    async fn pickup_on_unreachable_bridge_is_transient() {
        let client = KachakaClient::new(
            "kachaka_1",
            "http://127.0.0.1:9/",
            None,
            Duration::from_millis(500),
        )
        .unwrap();
        let err = client.dock_shelf().await.unwrap_err();
        assert!(err.is_transient(), "{err:?}");
        assert!(client.shelf().pending.is_none());
    }

    #[test]
    fn credentials_debug_redacts_password() {
        let creds = Credentials::new("admin", "hunter2");
        let dbg = format!("{creds:?}");
        assert!(dbg.contains("admin"));
        assert!(!dbg.contains("hunter2"));
    }

    #[test]
    fn robot_urls() {
        let client = KachakaClient::new(
            "kachaka_1",
            "http://bridge:26400/",
            None,
            Duration::from_secs(5),
        )
        .unwrap();
        assert_eq!(
            client.robot_url("command"),
            "http://bridge:26400/kachaka_1/command"
        );
    }

    #[tokio::test]
    async fn resume_without_motion_is_rejected() {
        let client = KachakaClient::new(
            "kachaka_1",
            "http://127.0.0.1:9/",
            None,
            Duration::from_millis(200),
        )
        .unwrap();
        assert!(matches!(
            client.resume().await,
            Err(FleetError::CommandRejected { .. })
        ));
    }

    #[tokio::test]
    async fn unreachable_bridge_is_transient() {
        // Port 9 (discard) is closed on test hosts.
        let client = KachakaClient::new(
            "kachaka_1",
            "http://127.0.0.1:9/",
            None,
            Duration::from_millis(500),
        )
        .unwrap();
        let err = client.get_status().await.unwrap_err();
        assert!(err.is_transient(), "{err:?}");
        assert!(!client.check_connection().await);
    }
}
