//! Device Scanner Module
//!
//! Collects candidate robots from a `DeviceDiscovery` backend. A scan
//! always finishes at its timeout and returns whatever was found; running
//! out of time is not an error.

use crate::domain::models::ScannedDevice;
use crate::infrastructure::link::best_effort;
use crate::infrastructure::link::transport::{DeviceDiscovery, TransportError};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, info};

pub struct DeviceScanner {
    discovery: Arc<dyn DeviceDiscovery>,
}

impl DeviceScanner {
    pub fn new(discovery: Arc<dyn DeviceDiscovery>) -> Self {
        Self { discovery }
    }

    /// Bonded devices followed by everything discovered within `timeout`.
    ///
    /// Devices are deduplicated by id; a repeat sighting refreshes the
    /// signal strength.
    pub async fn scan(&self, timeout: Duration) -> Result<Vec<ScannedDevice>, TransportError> {
        let mut devices = self.discovery.bonded_devices().await?;

        let (tx, mut rx) = mpsc::unbounded_channel();
        info!("Scanning for robots ({} ms)", timeout.as_millis());
        self.discovery.start_scan(tx).await?;

        let deadline = Instant::now() + timeout;
        loop {
            match tokio::time::timeout_at(deadline, rx.recv()).await {
                Ok(Some(device)) => merge_device(&mut devices, device),
                // Backend finished early, or time is up
                Ok(None) | Err(_) => break,
            }
        }

        best_effort("stop scan", self.discovery.stop_scan().await);
        info!("Scan finished with {} device(s)", devices.len());
        Ok(devices)
    }
}

fn merge_device(devices: &mut Vec<ScannedDevice>, device: ScannedDevice) {
    if let Some(existing) = devices
        .iter_mut()
        .find(|d| d.target.id == device.target.id)
    {
        existing.signal_strength = device.signal_strength.or(existing.signal_strength);
    } else {
        debug!("Found {} ({})", device.target.display_name, device.target.id);
        devices.push(device);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::DeviceTarget;
    use async_trait::async_trait;
    use std::sync::Mutex;

    struct ScriptedDiscovery {
        bonded: Vec<ScannedDevice>,
        sightings: Vec<(u64, ScannedDevice)>,
        stopped: Mutex<bool>,
    }

    fn device(id: &str, rssi: i16, bonded: bool) -> ScannedDevice {
        ScannedDevice {
            target: DeviceTarget::new(id, format!("Robot {}", id)),
            signal_strength: Some(rssi),
            bonded,
        }
    }

    #[async_trait]
    impl DeviceDiscovery for ScriptedDiscovery {
        async fn bonded_devices(&self) -> Result<Vec<ScannedDevice>, TransportError> {
            Ok(self.bonded.clone())
        }

        async fn start_scan(
            &self,
            found: mpsc::UnboundedSender<ScannedDevice>,
        ) -> Result<(), TransportError> {
            let sightings = self.sightings.clone();
            tokio::spawn(async move {
                for (delay_ms, device) in sightings {
                    tokio::time::sleep(Duration::from_millis(delay_ms)).await;
                    if found.send(device).is_err() {
                        return;
                    }
                }
                // Keep the channel open like a real radio would
                tokio::time::sleep(Duration::from_secs(3600)).await;
                drop(found);
            });
            Ok(())
        }

        async fn stop_scan(&self) -> Result<(), TransportError> {
            *self.stopped.lock().unwrap() = true;
            Ok(())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_scan_ends_at_timeout_with_results() {
        let discovery = Arc::new(ScriptedDiscovery {
            bonded: vec![device("A", -70, true)],
            sightings: vec![
                (100, device("B", -60, false)),
                (100, device("A", -40, false)),
                (5_000, device("C", -50, false)),
            ],
            stopped: Mutex::new(false),
        });
        let scanner = DeviceScanner::new(discovery.clone());

        let devices = scanner.scan(Duration::from_secs(1)).await.unwrap();

        let ids: Vec<&str> = devices.iter().map(|d| d.target.id.as_str()).collect();
        assert_eq!(ids, vec!["A", "B"]);
        assert_eq!(devices[0].signal_strength, Some(-40));
        assert!(devices[0].bonded);
        assert!(*discovery.stopped.lock().unwrap());
    }
}
