//! Connection management for the vehicle link
//!
//! This module handles:
//! - Selecting one of the BLE, Classic and WiFi transports
//! - The connect / disconnect lifecycle and its state machine
//! - Signal monitoring and forced disconnect on silence
//! - Fan-out of lifecycle, signal and battery events to the UI

mod config;
mod manager;

pub use config::ConnectionConfig;
pub use manager::{ConnectionEvent, ConnectionEventReceiver, ConnectionManager};
