//! In-memory robot.
//!
//! Implements the transport contract without any radio: writes are
//! reassembled into lines, decoded, and applied to a tiny robot model. Used
//! by the demo binary and as the transport double in tests, where it can
//! inject open failures, failed or hung writes, slow opens and link loss.

use crate::domain::models::{AimPoint, DeviceTarget, RobotConfig, ScannedDevice};
use crate::infrastructure::link::protocol::{self, Command};
use crate::infrastructure::link::transport::{
    DeviceDiscovery, Link, LinkEvent, LinkKind, LinkTransport, OpenedLink, TransportError,
};
use async_trait::async_trait;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, warn};

#[derive(Default)]
struct RobotSim {
    kind: Option<LinkKind>,
    mtu: Option<usize>,
    peer_name: Option<String>,
    advertised: Option<DeviceTarget>,
    scanning: bool,

    // Fault injection
    failing_opens: u32,
    fail_writes: bool,
    stall_writes: bool,
    open_delay: Option<Duration>,

    // Link bookkeeping
    session: u64,
    connected: bool,
    lost_tx: Option<mpsc::UnboundedSender<LinkEvent>>,
    opens: u32,
    closes: u32,
    opened_targets: Vec<DeviceTarget>,

    // Traffic
    chunks: Vec<Vec<u8>>,
    buffer: Vec<u8>,
    lines: Vec<String>,

    // Robot model
    running: bool,
    last_config: Option<RobotConfig>,
    last_aim: Option<AimPoint>,
    controller_name: Option<String>,
}

/// Shared handle to a simulated robot; clones observe the same robot
#[derive(Clone, Default)]
pub struct LoopbackRobot {
    sim: Arc<Mutex<RobotSim>>,
}

impl LoopbackRobot {
    /// Robot reachable over a stream link without write limits
    pub fn classic() -> Self {
        let robot = Self::default();
        robot.sim().kind = Some(LinkKind::Classic);
        robot
    }

    /// Robot reachable over BLE with writes capped at `mtu` bytes
    pub fn ble(mtu: usize) -> Self {
        let robot = Self::default();
        {
            let mut sim = robot.sim();
            sim.kind = Some(LinkKind::Ble);
            sim.mtu = Some(mtu);
        }
        robot
    }

    pub fn with_peer_name(self, name: impl Into<String>) -> Self {
        self.sim().peer_name = Some(name.into());
        self
    }

    /// Make the robot show up in scans as `target`
    pub fn with_advertisement(self, target: DeviceTarget) -> Self {
        self.sim().advertised = Some(target);
        self
    }

    pub fn is_scanning(&self) -> bool {
        self.sim().scanning
    }

    fn sim(&self) -> MutexGuard<'_, RobotSim> {
        self.sim.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Make the next `count` opens fail
    pub fn fail_next_opens(&self, count: u32) {
        self.sim().failing_opens = count;
    }

    pub fn set_fail_writes(&self, fail: bool) {
        self.sim().fail_writes = fail;
    }

    /// Make writes hang forever, like a peer that stopped acknowledging
    pub fn set_stall_writes(&self, stall: bool) {
        self.sim().stall_writes = stall;
    }

    /// Delay every open, to exercise connect timeouts
    pub fn set_open_delay(&self, delay: Option<Duration>) {
        self.sim().open_delay = delay;
    }

    /// Simulate the robot walking out of range
    pub fn drop_link(&self, reason: &str) -> bool {
        let mut sim = self.sim();
        sim.connected = false;
        match sim.lost_tx.take() {
            Some(tx) => tx.send(LinkEvent::Lost(reason.to_string())).is_ok(),
            None => false,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.sim().connected
    }

    pub fn open_count(&self) -> u32 {
        self.sim().opens
    }

    pub fn close_count(&self) -> u32 {
        self.sim().closes
    }

    pub fn opened_targets(&self) -> Vec<DeviceTarget> {
        self.sim().opened_targets.clone()
    }

    /// Number of transport writes, one per chunk
    pub fn write_count(&self) -> usize {
        self.sim().chunks.len()
    }

    pub fn chunks(&self) -> Vec<Vec<u8>> {
        self.sim().chunks.clone()
    }

    /// Complete lines received so far, newline included
    pub fn lines(&self) -> Vec<String> {
        self.sim().lines.clone()
    }

    pub fn commands(&self) -> Vec<Command> {
        self.lines()
            .iter()
            .filter_map(|line| protocol::decode_frame(line).ok())
            .collect()
    }

    pub fn clear_traffic(&self) {
        let mut sim = self.sim();
        sim.chunks.clear();
        sim.lines.clear();
        sim.buffer.clear();
    }

    pub fn is_running(&self) -> bool {
        self.sim().running
    }

    pub fn last_config(&self) -> Option<RobotConfig> {
        self.sim().last_config.clone()
    }

    pub fn last_aim(&self) -> Option<AimPoint> {
        self.sim().last_aim
    }

    pub fn controller_name(&self) -> Option<String> {
        self.sim().controller_name.clone()
    }
}

impl RobotSim {
    fn receive(&mut self, bytes: &[u8]) {
        self.chunks.push(bytes.to_vec());
        self.buffer.extend_from_slice(bytes);

        while let Some(end) = self.buffer.iter().position(|b| *b == b'\n') {
            let raw: Vec<u8> = self.buffer.drain(..=end).collect();
            let line = String::from_utf8_lossy(&raw).into_owned();
            self.apply(&line);
            self.lines.push(line);
        }
    }

    fn apply(&mut self, line: &str) {
        match protocol::decode_frame(line) {
            Ok(command) => {
                debug!("Loopback robot received {}", command.kind());
                match command {
                    Command::Config(config) => self.last_config = Some(config),
                    Command::Start => self.running = true,
                    Command::Stop | Command::DisconnectNotice => self.running = false,
                    Command::DeviceName(name) => self.controller_name = Some(name),
                    Command::LiveAim { pan, tilt } => self.last_aim = Some(AimPoint::new(pan, tilt)),
                }
            }
            Err(e) => warn!("Loopback robot rejected {:?}: {}", line.trim_end(), e),
        }
    }
}

struct LoopbackLink {
    robot: LoopbackRobot,
    session: u64,
    kind: LinkKind,
    mtu: Option<usize>,
    peer_name: Option<String>,
}

#[async_trait]
impl Link for LoopbackLink {
    fn kind(&self) -> LinkKind {
        self.kind
    }

    fn peer_name(&self) -> Option<String> {
        self.peer_name.clone()
    }

    fn max_write_len(&self) -> Option<usize> {
        self.mtu
    }

    async fn write(&self, bytes: &[u8]) -> Result<(), TransportError> {
        let stalled = self.robot.sim().stall_writes;
        if stalled {
            debug!("Write of {} byte(s) stalled", bytes.len());
            std::future::pending::<()>().await;
        }

        let mut sim = self.robot.sim();
        if sim.session != self.session || !sim.connected {
            return Err(TransportError::NotConnected);
        }
        if sim.fail_writes {
            return Err(TransportError::Io("write rejected by peer".into()));
        }
        if let Some(mtu) = self.mtu {
            if bytes.len() > mtu {
                return Err(TransportError::Io(format!(
                    "{} byte write exceeds MTU {}",
                    bytes.len(),
                    mtu
                )));
            }
        }
        sim.receive(bytes);
        Ok(())
    }

    async fn close(&self) -> Result<(), TransportError> {
        let mut sim = self.robot.sim();
        sim.closes += 1;
        if sim.session == self.session {
            sim.connected = false;
            sim.lost_tx = None;
        }
        Ok(())
    }
}

#[async_trait]
impl LinkTransport for LoopbackRobot {
    async fn open(&self, target: &DeviceTarget) -> Result<OpenedLink, TransportError> {
        let delay = self.sim().open_delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let mut sim = self.sim();
        sim.opens += 1;
        sim.opened_targets.push(target.clone());
        if sim.failing_opens > 0 {
            sim.failing_opens -= 1;
            return Err(TransportError::ConnectionFailed(format!(
                "{} is not responding",
                target.display_name
            )));
        }

        let (tx, rx) = mpsc::unbounded_channel();
        sim.session += 1;
        sim.connected = true;
        sim.lost_tx = Some(tx);
        sim.buffer.clear();

        let link = LoopbackLink {
            robot: self.clone(),
            session: sim.session,
            kind: sim.kind.unwrap_or(LinkKind::Loopback),
            mtu: sim.mtu,
            peer_name: sim.peer_name.clone(),
        };
        Ok(OpenedLink {
            link: Arc::new(link),
            events: rx,
        })
    }
}

#[async_trait]
impl DeviceDiscovery for LoopbackRobot {
    async fn bonded_devices(&self) -> Result<Vec<ScannedDevice>, TransportError> {
        Ok(Vec::new())
    }

    async fn start_scan(
        &self,
        found: mpsc::UnboundedSender<ScannedDevice>,
    ) -> Result<(), TransportError> {
        let mut sim = self.sim();
        sim.scanning = true;
        if let Some(target) = sim.advertised.clone() {
            // Receiver gone means the scan already ended
            let _ = found.send(ScannedDevice {
                target,
                signal_strength: Some(-42),
                bonded: false,
            });
        }
        Ok(())
    }

    async fn stop_scan(&self) -> Result<(), TransportError> {
        self.sim().scanning = false;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_reassembles_chunked_lines() {
        let robot = LoopbackRobot::ble(4);
        let opened = robot.open(&DeviceTarget::new("1", "Robot")).await.unwrap();

        for chunk in "A,250,-500\nS\n".as_bytes().chunks(4) {
            opened.link.write(chunk).await.unwrap();
        }

        assert_eq!(robot.lines(), vec!["A,250,-500\n", "S\n"]);
        assert_eq!(robot.last_aim(), Some(AimPoint::new(0.25, -0.5)));
        assert!(robot.is_running());
    }

    #[tokio::test]
    async fn test_rejects_oversized_write() {
        let robot = LoopbackRobot::ble(4);
        let opened = robot.open(&DeviceTarget::new("1", "Robot")).await.unwrap();
        assert!(opened.link.write(b"S\nP\nS\n").await.is_err());
    }

    #[tokio::test]
    async fn test_drop_link_raises_event() {
        let robot = LoopbackRobot::classic();
        let mut opened = robot.open(&DeviceTarget::new("1", "Robot")).await.unwrap();

        assert!(robot.drop_link("out of range"));
        assert_eq!(
            opened.events.recv().await,
            Some(LinkEvent::Lost("out of range".into()))
        );
        assert!(opened.link.write(b"S\n").await.is_err());
    }
}
