//! WiFi radio seam: everything the transport needs from the platform

use crate::scanning::RawNetwork;
use async_trait::async_trait;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RadioError {
    #[error("WiFi is disabled")]
    Disabled,

    #[error("permission denied: {0}")]
    PermissionDenied(String),

    #[error("WiFi backend unavailable: {0}")]
    Unavailable(String),

    #[error("{0}")]
    Failed(String),
}

#[async_trait]
pub trait WifiRadio: Send + Sync {
    /// Whether the radio is switched on
    async fn is_enabled(&self) -> Result<bool, RadioError>;

    /// Fresh scan of nearby networks
    async fn scan(&self) -> Result<Vec<RawNetwork>, RadioError>;

    /// Join `ssid`; returns once the association is up
    async fn associate(&self, ssid: &str, passphrase: Option<&str>) -> Result<(), RadioError>;

    /// SSID of the currently active association, if any
    async fn current_ssid(&self) -> Result<Option<String>, RadioError>;

    /// Drop the association made for the vehicle link
    async fn release(&self, ssid: &str) -> Result<(), RadioError>;
}
