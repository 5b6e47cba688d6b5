//! `fleetbridge-middleware` – message routing between the adapter core and
//! the fleet-management control plane.
//!
//! # Modules
//!
//! - [`bus`] – topic-based publish/subscribe event bus built on Tokio
//!   broadcast channels.
//! - [`control_plane`] – websocket client that forwards robot state and task
//!   updates to the control plane and turns its assignments into
//!   `CommandReceived` events.

pub mod bus;
pub mod control_plane;

pub use bus::{EventBus, Topic, TopicReceiver};
pub use control_plane::{ControlPlaneLink, Inbound, ReconnectPolicy};
