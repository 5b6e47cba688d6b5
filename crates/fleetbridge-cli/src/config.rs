//! `fleetbridge.toml` loading, environment overrides and validation.
//!
//! ```toml
//! [control_plane]
//! server_uri = "ws://localhost:8000/_internal"
//! fleet_name = "kachaka"
//!
//! [fleet_manager]
//! prefix = "http://localhost:26400/kachaka/"
//! user = "admin"
//! password = "secret"
//!
//! [reference_coordinates.L1]
//! control_plane = [[0.0, 0.0], [10.0, 0.0], [0.0, 10.0]]
//! robot         = [[0.0, 0.0], [0.0, 10.0], [-10.0, 0.0]]
//!
//! [[robots]]
//! name = "kachaka_1"
//! level = "L1"
//! ```
//!
//! All other sections are optional and fall back to the defaults below.

use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::Path;
use std::time::Duration;

use fleetbridge_frames::CorrespondencePoint;
use fleetbridge_hal::Credentials;
use fleetbridge_kernel::TaskPolicy;
use fleetbridge_runtime::telemetry::TelemetrySettings;
use fleetbridge_runtime::{AdapterSettings, DispatchSettings};
use fleetbridge_types::FleetError;
use serde::Deserialize;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    #[serde(default)]
    pub control_plane: ControlPlaneConfig,
    #[serde(default)]
    pub fleet_manager: FleetManagerConfig,
    #[serde(default)]
    pub timing: TimingConfig,
    #[serde(default)]
    pub tolerance: ToleranceConfig,
    #[serde(default)]
    pub telemetry: TelemetryConfig,
    /// Level name → surveyed point pairs.
    #[serde(default)]
    pub reference_coordinates: BTreeMap<String, ReferenceCoordinates>,
    #[serde(default)]
    pub robots: Vec<RobotConfig>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ControlPlaneConfig {
    pub server_uri: String,
    pub fleet_name: String,
}

impl Default for ControlPlaneConfig {
    fn default() -> Self {
        Self {
            server_uri: "ws://localhost:8000/_internal".into(),
            fleet_name: "kachaka".into(),
        }
    }
}

/// Vendor fleet-manager REST endpoint.
#[derive(Clone, Deserialize)]
#[serde(default)]
pub struct FleetManagerConfig {
    /// Base URL; robot names are appended to it.
    pub prefix: String,
    pub user: Option<String>,
    pub password: Option<String>,
}

impl Default for FleetManagerConfig {
    fn default() -> Self {
        Self {
            prefix: "http://localhost:26400/kachaka/".into(),
            user: None,
            password: None,
        }
    }
}

impl fmt::Debug for FleetManagerConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FleetManagerConfig")
            .field("prefix", &self.prefix)
            .field("user", &self.user)
            .field(
                "password",
                if self.password.is_some() { &"<redacted>" } else { &"<not set>" },
            )
            .finish()
    }
}

impl FleetManagerConfig {
    /// Basic-auth credentials, when a user is configured.
    pub fn credentials(&self) -> Option<Credentials> {
        self.user.as_ref().map(|user| {
            Credentials::new(user.clone(), self.password.clone().unwrap_or_default())
        })
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct TimingConfig {
    pub poll_interval_ms: u64,
    pub poll_timeout_ms: u64,
    pub dispatch_timeout_ms: u64,
    pub progress_timeout_s: u64,
    pub unreachable_after: u32,
    pub dispatch_attempts: u32,
    pub retry_backoff_ms: u64,
    pub max_backoff_ms: u64,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 1_000,
            poll_timeout_ms: 2_000,
            dispatch_timeout_ms: 5_000,
            progress_timeout_s: 300,
            unreachable_after: 3,
            dispatch_attempts: 3,
            retry_backoff_ms: 200,
            max_backoff_ms: 5_000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct ToleranceConfig {
    pub position_m: f64,
    pub heading_rad: Option<f64>,
}

impl Default for ToleranceConfig {
    fn default() -> Self {
        Self {
            position_m: 0.3,
            heading_rad: None,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Compact,
    Json,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct TelemetryConfig {
    pub log_format: LogFormat,
    pub otlp_endpoint: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ReferenceCoordinates {
    pub control_plane: Vec<[f64; 2]>,
    pub robot: Vec<[f64; 2]>,
}

impl ReferenceCoordinates {
    pub fn correspondences(&self) -> Vec<CorrespondencePoint> {
        self.control_plane
            .iter()
            .zip(&self.robot)
            .map(|(c, r)| CorrespondencePoint::new((c[0], c[1]), (r[0], r[1])))
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RobotConfig {
    pub name: String,
    pub level: String,
}

// ─────────────────────────────────────────────────────────────────────────────
// Loading
// ─────────────────────────────────────────────────────────────────────────────

impl Config {
    /// Read `path`, apply `FLEETBRIDGE_*` overrides and validate.
    pub fn load(path: &Path) -> Result<Self, FleetError> {
        let raw = fs::read_to_string(path).map_err(|e| {
            FleetError::Config(format!("failed to read {}: {e}", path.display()))
        })?;
        let mut cfg = Self::parse(&raw)?;
        cfg.apply_env_overrides();
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn parse(raw: &str) -> Result<Self, FleetError> {
        toml::from_str(raw).map_err(|e| FleetError::Config(format!("failed to parse config: {e}")))
    }

    /// Apply overrides from the process environment.
    ///
    /// | Variable | Field |
    /// |---|---|
    /// | `FLEETBRIDGE_SERVER_URI` | `control_plane.server_uri` |
    /// | `FLEETBRIDGE_ROBOT_PREFIX` | `fleet_manager.prefix` |
    /// | `FLEETBRIDGE_POLL_INTERVAL_MS` | `timing.poll_interval_ms` |
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    pub(crate) fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(v) = lookup("FLEETBRIDGE_SERVER_URI") {
            self.control_plane.server_uri = v;
        }
        if let Some(v) = lookup("FLEETBRIDGE_ROBOT_PREFIX") {
            self.fleet_manager.prefix = v;
        }
        if let Some(v) = lookup("FLEETBRIDGE_POLL_INTERVAL_MS")
            && let Ok(ms) = v.parse::<u64>()
        {
            self.timing.poll_interval_ms = ms;
        }
    }

    /// Structural checks. Point geometry is checked when the levels are fitted.
    pub fn validate(&self) -> Result<(), FleetError> {
        for (level, coords) in &self.reference_coordinates {
            if coords.control_plane.len() != coords.robot.len() {
                return Err(FleetError::Config(format!(
                    "reference_coordinates.{level}: {} control_plane points but {} robot points",
                    coords.control_plane.len(),
                    coords.robot.len()
                )));
            }
        }
        if self.robots.is_empty() {
            return Err(FleetError::Config("no [[robots]] configured".into()));
        }
        let mut seen = std::collections::BTreeSet::new();
        for robot in &self.robots {
            if !seen.insert(robot.name.as_str()) {
                return Err(FleetError::Config(format!(
                    "robot {} is listed twice",
                    robot.name
                )));
            }
            if !self.reference_coordinates.contains_key(&robot.level) {
                return Err(FleetError::Config(format!(
                    "robot {} is on level {}, which has no reference_coordinates",
                    robot.name, robot.level
                )));
            }
        }
        if self.timing.poll_interval_ms == 0 {
            return Err(FleetError::Config("timing.poll_interval_ms must be > 0".into()));
        }
        if !(self.tolerance.position_m > 0.0) {
            return Err(FleetError::Config("tolerance.position_m must be > 0".into()));
        }
        Ok(())
    }

    pub fn adapter_settings(&self) -> AdapterSettings {
        let t = &self.timing;
        AdapterSettings {
            poll_interval: Duration::from_millis(t.poll_interval_ms),
            poll_timeout: Duration::from_millis(t.poll_timeout_ms),
            unreachable_after: t.unreachable_after,
            policy: TaskPolicy {
                position_tolerance: self.tolerance.position_m,
                heading_tolerance: self.tolerance.heading_rad,
                progress_timeout: Duration::from_secs(t.progress_timeout_s),
            },
            dispatch: DispatchSettings {
                timeout: Duration::from_millis(t.dispatch_timeout_ms),
                attempts: t.dispatch_attempts.max(1),
                retry_backoff: Duration::from_millis(t.retry_backoff_ms),
                max_backoff: Duration::from_millis(t.max_backoff_ms),
            },
        }
    }

    pub fn telemetry_settings(&self) -> TelemetrySettings {
        TelemetrySettings {
            json: self.telemetry.log_format == LogFormat::Json,
            otlp_endpoint: self.telemetry.otlp_endpoint.clone(),
        }
    }
}
