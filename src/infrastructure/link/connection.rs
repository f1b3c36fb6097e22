//! Robot Connection Module
//!
//! Owns the single link to the robot and is the only writer of
//! `ConnectionState`. Everything above this layer learns about the link by
//! subscribing; transport errors are turned into state here instead of
//! propagating into the UI.

use crate::domain::models::{AimPoint, ConnectionState, ConnectionStatus, DeviceTarget, RobotConfig};
use crate::domain::observers::{Observers, Subscription};
use crate::domain::settings::LinkSettings;
use crate::infrastructure::link::best_effort;
use crate::infrastructure::link::identity::{resolve_controller_name, NameSource};
use crate::infrastructure::link::protocol::{self, Command};
use crate::infrastructure::link::transport::{
    Link, LinkEvent, LinkTransport, OpenedLink, TransportError,
};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;
use tokio::sync::{mpsc, Mutex as AsyncMutex};
use tracing::{debug, info, trace, warn};

/// Configuration for connection behavior
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Upper bound on a single transport open
    pub connect_timeout: Duration,
    /// Pause after tearing down a held link before opening a new one
    pub settle_delay: Duration,
    /// Upper bound on each teardown step (disconnect notice, close)
    pub teardown_timeout: Duration,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self::from(&LinkSettings::default())
    }
}

impl From<&LinkSettings> for ConnectionConfig {
    fn from(settings: &LinkSettings) -> Self {
        Self {
            connect_timeout: settings.connect_timeout(),
            settle_delay: settings.settle_delay(),
            teardown_timeout: settings.teardown_timeout(),
        }
    }
}

/// Outcome of an outbound frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// Every chunk was accepted by the transport
    Sent,
    /// Not connected; nothing was written
    Dropped,
}

impl Delivery {
    pub fn is_sent(self) -> bool {
        self == Self::Sent
    }
}

struct ActiveLink {
    link: Arc<dyn Link>,
    target: DeviceTarget,
    generation: u64,
}

#[derive(Default)]
struct Inner {
    state: ConnectionState,
    active: Option<ActiveLink>,
    generation: u64,
}

pub struct ConnectionManager {
    transport: Arc<dyn LinkTransport>,
    names: Arc<dyn NameSource>,
    config: ConnectionConfig,
    inner: Mutex<Inner>,
    observers: Observers<ConnectionState>,
    /// Serializes connect/disconnect
    lifecycle: AsyncMutex<()>,
    /// Keeps the chunks of one frame together
    writer: AsyncMutex<()>,
}

fn duration_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

/// Write one line, split to the link's write limit, chunk after chunk
pub async fn write_chunked(link: &dyn Link, bytes: &[u8]) -> Result<(), TransportError> {
    match link.max_write_len() {
        Some(limit) if limit > 0 && bytes.len() > limit => {
            for chunk in bytes.chunks(limit) {
                link.write(chunk).await?;
            }
            Ok(())
        }
        _ => link.write(bytes).await,
    }
}

impl ConnectionManager {
    pub fn new(
        transport: Arc<dyn LinkTransport>,
        names: Arc<dyn NameSource>,
        config: ConnectionConfig,
    ) -> Arc<Self> {
        Arc::new(Self {
            transport,
            names,
            config,
            inner: Mutex::new(Inner::default()),
            observers: Observers::new(),
            lifecycle: AsyncMutex::new(()),
            writer: AsyncMutex::new(()),
        })
    }

    fn lock_inner(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_state(&self, inner: &mut Inner, next: ConnectionState) {
        if inner.state != next {
            debug!("Connection state: {:?} -> {:?}", inner.state.status, next.status);
            inner.state = next;
            self.observers.notify(&inner.state);
        }
    }

    /// Current snapshot
    pub fn state(&self) -> ConnectionState {
        self.lock_inner().state.clone()
    }

    pub fn is_connected(&self) -> bool {
        self.lock_inner().state.is_connected()
    }

    /// Receive the current snapshot now and every change after it
    pub fn subscribe(&self) -> Subscription<ConnectionState> {
        let inner = self.lock_inner();
        self.observers.subscribe(inner.state.clone())
    }

    /// Device behind the current link, if any
    pub fn connected_target(&self) -> Option<DeviceTarget> {
        self.lock_inner()
            .active
            .as_ref()
            .map(|active| active.target.clone())
    }

    /// Open a link to `target`, replacing any link currently held.
    ///
    /// Always resolves; the outcome is the returned (and published) state.
    pub async fn connect(self: &Arc<Self>, target: &DeviceTarget) -> ConnectionState {
        let _lifecycle = self.lifecycle.lock().await;
        self.connect_locked(target).await
    }

    /// Connect only if nothing else owns the link.
    ///
    /// The check runs under the lifecycle lock, so a user connect sitting in
    /// its settle delay is waited for instead of raced. `None` means the
    /// link was busy or already up and nothing was opened.
    pub async fn connect_if_disconnected(
        self: &Arc<Self>,
        target: &DeviceTarget,
    ) -> Option<ConnectionState> {
        let _lifecycle = self.lifecycle.lock().await;
        {
            let inner = self.lock_inner();
            if inner.state.status != ConnectionStatus::Disconnected || inner.active.is_some() {
                return None;
            }
        }
        Some(self.connect_locked(target).await)
    }

    async fn connect_locked(self: &Arc<Self>, target: &DeviceTarget) -> ConnectionState {
        let held = self.lock_inner().active.is_some();
        if held {
            info!("Replacing held link before connecting to {}", target.display_name);
            self.teardown().await;
            tokio::time::sleep(self.config.settle_delay).await;
        }

        {
            let mut inner = self.lock_inner();
            self.set_state(
                &mut inner,
                ConnectionState::connecting(Some(target.display_name.clone())),
            );
        }
        info!("Connecting to robot {} ({})", target.display_name, target.id);

        let limit = self.config.connect_timeout;
        let opened = tokio::time::timeout(limit, self.transport.open(target))
            .await
            .unwrap_or_else(|_| Err(TransportError::Timeout(duration_ms(limit))));

        match opened {
            Ok(OpenedLink { link, events }) => {
                let device_name = link
                    .peer_name()
                    .filter(|name| !name.trim().is_empty())
                    .unwrap_or_else(|| target.display_name.clone());
                info!("Connected to {} over {:?}", device_name, link.kind());

                let generation = {
                    let mut inner = self.lock_inner();
                    inner.generation += 1;
                    let generation = inner.generation;
                    inner.active = Some(ActiveLink {
                        link,
                        target: target.clone(),
                        generation,
                    });
                    self.set_state(&mut inner, ConnectionState::connected(Some(device_name)));
                    generation
                };

                self.watch_link(generation, events);
                self.announce_identity().await;
            }
            Err(e) => {
                warn!("Connection to {} failed: {}", target.display_name, e);
                let mut inner = self.lock_inner();
                inner.active = None;
                self.set_state(&mut inner, ConnectionState::failed(e.to_string()));
            }
        }

        self.state()
    }

    /// Best-effort teardown; always ends `Disconnected`
    pub async fn disconnect(&self) -> ConnectionState {
        let _lifecycle = self.lifecycle.lock().await;
        self.teardown().await;
        self.state()
    }

    /// Drop the held link. The state is `Disconnected` as soon as the link
    /// is taken; the notice and close that follow are each bounded by the
    /// teardown timeout.
    async fn teardown(&self) {
        let active = {
            let mut inner = self.lock_inner();
            let active = inner.active.take();
            self.set_state(&mut inner, ConnectionState::disconnected());
            active
        };
        let Some(active) = active else {
            return;
        };

        info!("Disconnecting from {}", active.target.display_name);
        let limit = self.config.teardown_timeout;
        let notice = tokio::time::timeout(limit, async {
            let _writer = self.writer.lock().await;
            write_chunked(
                active.link.as_ref(),
                protocol::encode_disconnect_notice().as_bytes(),
            )
            .await
        })
        .await
        .unwrap_or_else(|_| Err(TransportError::Timeout(duration_ms(limit))));
        best_effort("disconnect notice", notice);

        let closed = tokio::time::timeout(limit, active.link.close())
            .await
            .unwrap_or_else(|_| Err(TransportError::Timeout(duration_ms(limit))));
        best_effort("close link", closed);
    }

    fn watch_link(self: &Arc<Self>, generation: u64, mut events: mpsc::UnboundedReceiver<LinkEvent>) {
        let manager: Weak<Self> = Arc::downgrade(self);
        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                let Some(manager) = manager.upgrade() else {
                    return;
                };
                match event {
                    LinkEvent::Lost(reason) => {
                        manager.handle_link_lost(generation, &reason).await;
                        return;
                    }
                }
            }
        });
    }

    /// Unsolicited drop of link `generation`. Stale generations are ignored.
    async fn handle_link_lost(&self, generation: u64, reason: &str) {
        let lost = {
            let mut inner = self.lock_inner();
            let current = inner
                .active
                .as_ref()
                .is_some_and(|active| active.generation == generation);
            if !current {
                debug!("Ignoring loss of replaced link #{}", generation);
                return;
            }
            let lost = inner.active.take();
            // Environment event, not a user error: no error string
            self.set_state(&mut inner, ConnectionState::disconnected());
            lost
        };

        info!("Link lost: {}", reason);
        if let Some(active) = lost {
            best_effort("close lost link", active.link.close().await);
        }
    }

    async fn fail_link(&self, generation: u64, error: &TransportError) {
        let failed = {
            let mut inner = self.lock_inner();
            let current = inner
                .active
                .as_ref()
                .is_some_and(|active| active.generation == generation);
            if !current {
                return;
            }
            let failed = inner.active.take();
            self.set_state(&mut inner, ConnectionState::failed(error.to_string()));
            failed
        };

        warn!("Write failed, dropping link: {}", error);
        if let Some(active) = failed {
            best_effort("close failed link", active.link.close().await);
        }
    }

    async fn announce_identity(&self) {
        let name = resolve_controller_name(self.names.as_ref());
        best_effort(
            "announce controller name",
            self.send_line(&protocol::encode_device_name(&name)).await,
        );
    }

    /// Send one encoded line. Dropped without any write when not connected.
    pub async fn send_line(&self, line: &str) -> Result<Delivery, TransportError> {
        let (link, generation) = {
            let inner = self.lock_inner();
            match (inner.state.status, inner.active.as_ref()) {
                (ConnectionStatus::Connected, Some(active)) => {
                    (active.link.clone(), active.generation)
                }
                _ => {
                    debug!("Not connected, dropping {:?}", line.trim_end());
                    return Ok(Delivery::Dropped);
                }
            }
        };

        let result = {
            let _writer = self.writer.lock().await;
            write_chunked(link.as_ref(), line.as_bytes()).await
        };

        match result {
            Ok(()) => {
                trace!("Sent {:?}", line.trim_end());
                Ok(Delivery::Sent)
            }
            Err(e) => {
                self.fail_link(generation, &e).await;
                Err(e)
            }
        }
    }

    pub async fn send_command(&self, command: &Command) -> Result<Delivery, TransportError> {
        self.send_line(&command.encode()).await
    }

    pub async fn send_config(&self, config: &RobotConfig) -> Result<Delivery, TransportError> {
        self.send_line(&protocol::encode_config(config)).await
    }

    pub async fn start(&self) -> Result<Delivery, TransportError> {
        self.send_line(&protocol::encode_start()).await
    }

    pub async fn stop(&self) -> Result<Delivery, TransportError> {
        self.send_line(&protocol::encode_stop()).await
    }

    pub async fn send_live_aim(&self, aim: AimPoint) -> Result<Delivery, TransportError> {
        self.send_line(&protocol::encode_live_aim(aim.pan, aim.tilt))
            .await
    }
}
