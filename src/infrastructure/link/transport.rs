//! Link Transport Contract
//!
//! Capability traits implemented once per link technology (Classic RFCOMM
//! socket, BLE GATT write-without-response, in-memory loopback) and
//! injected into the connection manager at startup.

use crate::domain::models::{DeviceTarget, ScannedDevice};
use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("IO Error: {0}")]
    Io(String),
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),
    #[error("Connection attempt timed out after {0} ms")]
    Timeout(u64),
    #[error("Not connected")]
    NotConnected,
    #[error("Permission denied: {0}")]
    PermissionDenied(String),
    #[error("Other: {0}")]
    Other(String),
}

/// Link technology behind a `Link`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkKind {
    /// Stream socket, no per-write size limit
    Classic,
    /// GATT characteristic, writes limited to the negotiated MTU
    Ble,
    Loopback,
}

/// Unsolicited events raised by an open link
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkEvent {
    /// Link dropped (out of range, peer reset, adapter off)
    Lost(String),
}

/// An open physical connection to the robot
#[async_trait]
pub trait Link: Send + Sync {
    fn kind(&self) -> LinkKind;

    /// Name the robot reports for itself, if any
    fn peer_name(&self) -> Option<String>;

    /// Per-write size limit; `None` means a line can go out in one write
    fn max_write_len(&self) -> Option<usize>;

    /// Write one chunk and wait for the transport to accept it
    async fn write(&self, bytes: &[u8]) -> Result<(), TransportError>;

    async fn close(&self) -> Result<(), TransportError>;
}

/// Result of a successful `open`
pub struct OpenedLink {
    pub link: Arc<dyn Link>,
    pub events: mpsc::UnboundedReceiver<LinkEvent>,
}

/// Opens links to robots. One implementation is chosen at startup.
#[async_trait]
pub trait LinkTransport: Send + Sync {
    async fn open(&self, target: &DeviceTarget) -> Result<OpenedLink, TransportError>;
}

/// Device discovery, possibly behind a runtime permission prompt
#[async_trait]
pub trait DeviceDiscovery: Send + Sync {
    /// Devices already bonded with this phone
    async fn bonded_devices(&self) -> Result<Vec<ScannedDevice>, TransportError>;

    /// Begin reporting discovered devices on `found` until `stop_scan`
    async fn start_scan(
        &self,
        found: mpsc::UnboundedSender<ScannedDevice>,
    ) -> Result<(), TransportError>;

    async fn stop_scan(&self) -> Result<(), TransportError>;
}
