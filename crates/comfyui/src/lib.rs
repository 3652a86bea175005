//! ComfyUI WebSocket listener and REST client.
//!
//! Provides typed event parsing, a long-lived listener session with
//! bounded reconnection, a shared job tracker that pipeline workers wait
//! on, history parsing, and the lip-sync workflow builder.

pub mod api;
pub mod client;
pub mod events;
pub mod history;
pub mod messages;
pub mod processor;
pub mod reconnect;
pub mod session;
pub mod tracker;
pub mod workflow;

pub use session::{ComfyUIConfig, ComfyUISession, ListenerHealth, SessionError};
pub use tracker::JobTracker;
