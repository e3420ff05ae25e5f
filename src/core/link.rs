//! GATT link lifecycle
//!
//! `Disconnected -> Connecting -> Connected -> Disconnected`. Concurrent
//! `connect()` calls share one attempt. Every disconnect, intentional or not,
//! clears the operation queue, aborts an active transfer and publishes exactly
//! one [`LinkEvent::Disconnected`].

use std::sync::{
    Arc, Mutex, Weak,
    atomic::{AtomicBool, AtomicU64, Ordering},
};

use tokio::{
    sync::{broadcast, mpsc, oneshot},
    task::JoinHandle,
};
use tracing::{debug, info, warn};

use crate::{
    backend::GattBackend,
    core::{
        error::{GattResult, LinkError, LinkResult},
        queue::{OperationQueue, QueuedResult},
        types::{
            CharacteristicRole, Characteristics, ConnectOutcome, LinkEvent, LinkIdentity,
            LinkStatus,
        },
    },
    protocol::decode_status,
    util::lock,
};

const EVENT_CAPACITY: usize = 64;

/// Receiver of data-transfer notifications
pub trait NotificationSink: Send + Sync {
    /// A data-transfer notification arrived
    fn on_notification(&self, value: &[u8]);

    /// The link went down; any in-flight work must fail with `error`
    fn on_link_down(&self, error: LinkError);
}

struct ActiveLink<B: GattBackend> {
    id: u64,
    identity: LinkIdentity,
    device: B::Device,
    characteristics: Characteristics<B::Characteristic>,
    tasks: Vec<JoinHandle<()>>,
}

enum LinkState<B: GattBackend> {
    Disconnected,
    Connecting {
        waiters: Vec<oneshot::Sender<LinkResult<LinkIdentity>>>,
        /// `disconnect()` arrived before the attempt finished
        cancelled: bool,
    },
    Connected(ActiveLink<B>),
}

/// A freshly opened link before it is published as connected
struct OpenedLink<B: GattBackend> {
    identity: LinkIdentity,
    device: B::Device,
    characteristics: Characteristics<B::Characteristic>,
    lost: oneshot::Receiver<()>,
    data: mpsc::UnboundedReceiver<Vec<u8>>,
    status: mpsc::UnboundedReceiver<Vec<u8>>,
}

struct LinkInner<B: GattBackend> {
    backend: Arc<B>,
    queue: OperationQueue,
    state: Mutex<LinkState<B>>,
    intentional_disconnect: AtomicBool,
    next_link_id: AtomicU64,
    events: broadcast::Sender<LinkEvent>,
    data_sink: Mutex<Option<Arc<dyn NotificationSink>>>,
}

/// Handle to the single GATT link
pub struct LinkConnection<B: GattBackend> {
    inner: Arc<LinkInner<B>>,
}

impl<B: GattBackend> Clone for LinkConnection<B> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<B: GattBackend> LinkConnection<B> {
    pub fn new(backend: Arc<B>) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            inner: Arc::new(LinkInner {
                backend,
                queue: OperationQueue::new(),
                state: Mutex::new(LinkState::Disconnected),
                intentional_disconnect: AtomicBool::new(false),
                next_link_id: AtomicU64::new(1),
                events,
                data_sink: Mutex::new(None),
            }),
        }
    }

    /// Connect to a device, or join the attempt already in flight
    pub async fn connect(&self) -> LinkResult<ConnectOutcome> {
        let (waiter, leader) = {
            let mut state = lock(&self.inner.state);
            if let LinkState::Connected(link) = &*state {
                return Ok(ConnectOutcome::AlreadyConnected(link.identity.clone()));
            }

            let (waiter_tx, waiter) = oneshot::channel();
            let leader = if let LinkState::Connecting { waiters, cancelled } = &mut *state {
                waiters.push(waiter_tx);
                *cancelled = false;
                false
            } else {
                *state = LinkState::Connecting {
                    waiters: vec![waiter_tx],
                    cancelled: false,
                };
                true
            };
            (waiter, leader)
        };

        if leader {
            info!("Requesting Sneak32 device");
            let this = self.clone();
            tokio::spawn(async move { this.establish().await });
        } else {
            debug!("Joining connection attempt in progress");
        }

        let identity = waiter.await.unwrap_or(Err(LinkError::Abandoned))?;
        Ok(if leader {
            ConnectOutcome::Established(identity)
        } else {
            ConnectOutcome::Joined(identity)
        })
    }

    /// Run one connection attempt and settle all its waiters
    async fn establish(&self) {
        let result = self.open().await;

        let (waiters, outcome, discarded) = {
            let mut state = lock(&self.inner.state);
            let (waiters, cancelled) =
                match std::mem::replace(&mut *state, LinkState::Disconnected) {
                    LinkState::Connecting { waiters, cancelled } => (waiters, cancelled),
                    other => {
                        *state = other;
                        (Vec::new(), false)
                    }
                };

            let mut discarded = None;
            let outcome = match result {
                Ok(opened) if cancelled => {
                    discarded = Some(opened.device);
                    Err(LinkError::Abandoned)
                }
                Ok(opened) => {
                    let id = self.inner.next_link_id.fetch_add(1, Ordering::Relaxed);
                    let identity = opened.identity.clone();
                    let tasks = self.spawn_link_tasks(id, opened.lost, opened.data, opened.status);
                    *state = LinkState::Connected(ActiveLink {
                        id,
                        identity: opened.identity,
                        device: opened.device,
                        characteristics: opened.characteristics,
                        tasks,
                    });
                    Ok(identity)
                }
                Err(error) => Err(error),
            };
            (waiters, outcome, discarded)
        };

        if let Some(device) = discarded {
            let closed = self.inner.backend.disconnect(&device).await;
            if let Err(e) = closed {
                warn!("Failed to close cancelled link: {}", e);
            }
        }

        match &outcome {
            Ok(identity) => {
                info!("Connected to {}", identity.device_name);
                self.emit(LinkEvent::Connected {
                    device_name: identity.device_name.clone(),
                });
            }
            Err(LinkError::ConnectionRejected) => info!("Device selection cancelled"),
            Err(LinkError::Abandoned) => info!("Connection attempt cancelled by disconnect"),
            Err(error) => warn!("Connection failed: {}", error),
        }

        for waiter in waiters {
            let _ = waiter.send(outcome.clone());
        }
    }

    /// Select, connect and resolve the service; nothing is published here
    async fn open(&self) -> LinkResult<OpenedLink<B>> {
        let backend = &self.inner.backend;

        let device = backend
            .request_device()
            .await
            .map_err(|e| LinkError::ConnectionFailed(e.to_string()))?
            .ok_or(LinkError::ConnectionRejected)?;
        let device_name = backend
            .device_name(&device)
            .await
            .map_err(|e| LinkError::ConnectionFailed(e.to_string()))?;

        debug!("Connecting to GATT server of {}", device_name);
        let lost = backend
            .connect(&device)
            .await
            .map_err(|e| LinkError::ConnectionFailed(e.to_string()))?;

        match self.resolve(&device).await {
            Ok((characteristics, data, status)) => Ok(OpenedLink {
                identity: LinkIdentity { device_name },
                device,
                characteristics,
                lost,
                data,
                status,
            }),
            Err(error) => {
                if let Err(e) = backend.disconnect(&device).await {
                    warn!("Failed to close half-open link: {}", e);
                }
                Err(LinkError::ConnectionFailed(error.to_string()))
            }
        }
    }

    #[allow(clippy::type_complexity)]
    async fn resolve(
        &self,
        device: &B::Device,
    ) -> GattResult<(
        Characteristics<B::Characteristic>,
        mpsc::UnboundedReceiver<Vec<u8>>,
        mpsc::UnboundedReceiver<Vec<u8>>,
    )> {
        let backend = &self.inner.backend;
        let characteristics = Characteristics {
            firmware_info: backend
                .characteristic(device, CharacteristicRole::FirmwareInfo.uuid())
                .await?,
            settings: backend
                .characteristic(device, CharacteristicRole::Settings.uuid())
                .await?,
            data_transfer: backend
                .characteristic(device, CharacteristicRole::DataTransfer.uuid())
                .await?,
            commands: backend
                .characteristic(device, CharacteristicRole::Commands.uuid())
                .await?,
            device_status: backend
                .characteristic(device, CharacteristicRole::DeviceStatus.uuid())
                .await?,
        };

        let data = backend.notifications(&characteristics.data_transfer).await?;
        let status = backend
            .notifications(&characteristics.device_status)
            .await?;
        Ok((characteristics, data, status))
    }

    /// Spawn the link-loss watcher and notification pumps for link `id`
    fn spawn_link_tasks(
        &self,
        id: u64,
        lost: oneshot::Receiver<()>,
        mut data: mpsc::UnboundedReceiver<Vec<u8>>,
        mut status: mpsc::UnboundedReceiver<Vec<u8>>,
    ) -> Vec<JoinHandle<()>> {
        let weak: Weak<LinkInner<B>> = Arc::downgrade(&self.inner);
        let watcher = {
            let weak = weak.clone();
            tokio::spawn(async move {
                let _ = lost.await;
                if let Some(inner) = weak.upgrade() {
                    LinkConnection { inner }.handle_disconnection(id);
                }
            })
        };

        let data_pump = {
            let weak = weak.clone();
            tokio::spawn(async move {
                while let Some(value) = data.recv().await {
                    let Some(inner) = weak.upgrade() else { break };
                    let sink = lock(&inner.data_sink).clone();
                    match sink {
                        Some(sink) => sink.on_notification(&value),
                        None => debug!(
                            "Discarding data notification ({} bytes), no listener",
                            value.len()
                        ),
                    }
                }
            })
        };

        let status_pump = tokio::spawn(async move {
            while let Some(value) = status.recv().await {
                let Some(inner) = weak.upgrade() else { break };
                match decode_status(&String::from_utf8_lossy(&value)) {
                    Ok(device_status) => {
                        debug!("Device status updated: {:?}", device_status);
                        let _ = inner.events.send(LinkEvent::StatusUpdated(device_status));
                    }
                    Err(e) => warn!("Discarding status notification: {}", e),
                }
            }
        });

        vec![watcher, data_pump, status_pump]
    }

    /// Tear down link `id` if it is still the current one
    ///
    /// Returns false if another path already handled this link.
    fn handle_disconnection(&self, id: u64) -> bool {
        let link = {
            let mut state = lock(&self.inner.state);
            match &*state {
                LinkState::Connected(link) if link.id == id => {}
                _ => return false,
            }
            match std::mem::replace(&mut *state, LinkState::Disconnected) {
                LinkState::Connected(link) => link,
                _ => return false,
            }
        };

        let unexpected = !self.inner.intentional_disconnect.load(Ordering::SeqCst);
        let cause = if unexpected {
            warn!("Connection to {} lost", link.identity.device_name);
            LinkError::LinkLost
        } else {
            info!("Disconnected from {}", link.identity.device_name);
            LinkError::Abandoned
        };

        self.inner.queue.clear_with(cause.clone());
        let sink = lock(&self.inner.data_sink).clone();
        if let Some(sink) = sink {
            sink.on_link_down(cause);
        }
        for task in link.tasks {
            task.abort();
        }

        self.emit(LinkEvent::Disconnected { unexpected });
        true
    }

    /// Close the link
    ///
    /// A connection attempt in flight is cancelled: its callers get
    /// [`LinkError::Abandoned`] and the link is closed as soon as it opens.
    /// Returns `Ok(false)` if there was no link or attempt to close.
    pub async fn disconnect(&self) -> LinkResult<bool> {
        let (id, device) = {
            let mut state = lock(&self.inner.state);
            match &mut *state {
                LinkState::Connected(link) => (link.id, link.device.clone()),
                LinkState::Connecting { cancelled, .. } => {
                    info!("Cancelling connection attempt in progress");
                    *cancelled = true;
                    return Ok(true);
                }
                LinkState::Disconnected => return Ok(false),
            }
        };

        self.inner
            .intentional_disconnect
            .store(true, Ordering::SeqCst);
        let result = self.inner.backend.disconnect(&device).await;
        self.handle_disconnection(id);
        self.inner
            .intentional_disconnect
            .store(false, Ordering::SeqCst);

        result.map_err(|e| LinkError::DisconnectFailed(e.to_string()))?;
        Ok(true)
    }

    pub fn status(&self) -> LinkStatus {
        match &*lock(&self.inner.state) {
            LinkState::Disconnected => LinkStatus::Disconnected,
            LinkState::Connecting { .. } => LinkStatus::Connecting,
            LinkState::Connected(_) => LinkStatus::Connected,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.status() == LinkStatus::Connected
    }

    pub fn device_name(&self) -> Option<String> {
        match &*lock(&self.inner.state) {
            LinkState::Connected(link) => Some(link.identity.device_name.clone()),
            _ => None,
        }
    }

    /// Resolved handle for a characteristic of the current link
    pub fn characteristic(&self, role: CharacteristicRole) -> LinkResult<B::Characteristic> {
        match &*lock(&self.inner.state) {
            LinkState::Connected(link) => Ok(link.characteristics.get(role).clone()),
            _ => Err(LinkError::NotConnected),
        }
    }

    pub fn queue(&self) -> &OperationQueue {
        &self.inner.queue
    }

    pub fn backend(&self) -> &Arc<B> {
        &self.inner.backend
    }

    /// Subscribe to link events
    pub fn subscribe(&self) -> broadcast::Receiver<LinkEvent> {
        self.inner.events.subscribe()
    }

    /// Route data-transfer notifications to `sink`
    pub fn attach_data_sink(&self, sink: Arc<dyn NotificationSink>) {
        *lock(&self.inner.data_sink) = Some(sink);
    }

    /// Queued characteristic read
    pub fn read(
        &self,
        role: CharacteristicRole,
        description: impl Into<String>,
    ) -> QueuedResult<Vec<u8>> {
        let this = self.clone();
        self.inner.queue.enqueue(description, move || async move {
            let characteristic = this.characteristic(role)?;
            Ok(this.inner.backend.read(&characteristic).await?)
        })
    }

    /// Queued characteristic write
    pub fn write(
        &self,
        role: CharacteristicRole,
        value: Vec<u8>,
        description: impl Into<String>,
    ) -> QueuedResult<()> {
        let this = self.clone();
        self.inner.queue.enqueue(description, move || async move {
            let characteristic = this.characteristic(role)?;
            Ok(this.inner.backend.write(&characteristic, &value).await?)
        })
    }

    pub(crate) fn emit(&self, event: LinkEvent) {
        // No subscribers is fine
        let _ = self.inner.events.send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MockGattBackend;
    use pretty_assertions::assert_eq;
    use std::time::Duration;
    use tokio::sync::broadcast::error::TryRecvError;

    fn link() -> (Arc<MockGattBackend>, LinkConnection<MockGattBackend>) {
        let backend = Arc::new(MockGattBackend::new());
        (backend.clone(), LinkConnection::new(backend))
    }

    #[tokio::test]
    async fn test_connect_resolves_characteristics() {
        let (backend, link) = link();
        let mut events = link.subscribe();

        let outcome = link.connect().await.unwrap();

        assert!(outcome.is_established());
        assert_eq!(outcome.identity().device_name, "Sneak32");
        assert_eq!(link.status(), LinkStatus::Connected);
        assert_eq!(link.device_name(), Some("Sneak32".into()));
        assert_eq!(
            link.characteristic(CharacteristicRole::Commands),
            Ok(CharacteristicRole::Commands)
        );
        assert!(backend.is_connected().await);
        assert_eq!(
            events.recv().await.unwrap(),
            LinkEvent::Connected {
                device_name: "Sneak32".into()
            }
        );
    }

    #[tokio::test]
    async fn test_concurrent_connects_share_one_attempt() {
        let (backend, link) = link();
        backend.set_connect_delay(Duration::from_millis(20)).await;

        let (first, second) = tokio::join!(link.connect(), link.connect());

        let first = first.unwrap();
        let second = second.unwrap();
        assert!(first.is_established());
        assert_eq!(second, ConnectOutcome::Joined(first.identity().clone()));
        assert_eq!(backend.device_requests().await, 1);
    }

    #[tokio::test]
    async fn test_disconnect_cancels_attempt_in_flight() {
        let (backend, link) = link();
        backend.set_connect_delay(Duration::from_millis(20)).await;
        let mut events = link.subscribe();

        let attempt = tokio::spawn({
            let link = link.clone();
            async move { link.connect().await }
        });
        while link.status() != LinkStatus::Connecting {
            tokio::task::yield_now().await;
        }

        assert_eq!(link.disconnect().await, Ok(true));
        let result = attempt.await.unwrap();

        assert_eq!(result, Err(LinkError::Abandoned));
        assert_eq!(link.status(), LinkStatus::Disconnected);
        assert!(!backend.is_connected().await);
        assert!(events.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_connect_when_connected_returns_identity() {
        let (backend, link) = link();
        link.connect().await.unwrap();

        let again = link.connect().await.unwrap();

        assert!(matches!(again, ConnectOutcome::AlreadyConnected(_)));
        assert_eq!(backend.device_requests().await, 1);
    }

    #[tokio::test]
    async fn test_cancelled_selection_is_rejected() {
        let (backend, link) = link();
        backend.set_selection_cancelled(true).await;

        let result = link.connect().await;

        assert_eq!(result, Err(LinkError::ConnectionRejected));
        assert_eq!(link.status(), LinkStatus::Disconnected);
    }

    #[tokio::test]
    async fn test_missing_characteristic_leaves_link_down() {
        let (backend, link) = link();
        backend
            .set_missing_characteristic(CharacteristicRole::DeviceStatus)
            .await;

        let result = link.connect().await;

        assert!(matches!(result, Err(LinkError::ConnectionFailed(_))));
        assert_eq!(link.status(), LinkStatus::Disconnected);
        assert_eq!(
            link.characteristic(CharacteristicRole::Settings),
            Err(LinkError::NotConnected)
        );
        assert!(!backend.is_connected().await);
    }

    #[tokio::test]
    async fn test_unexpected_loss_fails_pending_operations() {
        let (backend, link) = link();
        link.connect().await.unwrap();
        let mut events = link.subscribe();

        let blocked: QueuedResult<()> = link
            .queue()
            .enqueue("blocked", || futures::future::pending());
        backend.drop_link().await;

        assert_eq!(blocked.await, Err(LinkError::LinkLost));
        assert_eq!(
            events.recv().await.unwrap(),
            LinkEvent::Disconnected { unexpected: true }
        );
        assert_eq!(link.status(), LinkStatus::Disconnected);
        assert!(link.queue().is_empty());
    }

    #[tokio::test]
    async fn test_intentional_disconnect_emits_one_event() {
        let (backend, link) = link();
        link.connect().await.unwrap();
        let mut events = link.subscribe();

        assert_eq!(link.disconnect().await, Ok(true));

        assert_eq!(
            events.recv().await.unwrap(),
            LinkEvent::Disconnected { unexpected: false }
        );
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(events.try_recv(), Err(TryRecvError::Empty));
        assert!(!backend.is_connected().await);
        assert_eq!(link.disconnect().await, Ok(false));
    }

    #[tokio::test]
    async fn test_reconnect_after_loss() {
        let (backend, link) = link();
        link.connect().await.unwrap();
        backend.drop_link().await;
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(link.status(), LinkStatus::Disconnected);

        let outcome = link.connect().await.unwrap();

        assert!(outcome.is_established());
        assert_eq!(backend.device_requests().await, 2);
        let settings = link.read(CharacteristicRole::Settings, "Read settings").await;
        assert!(settings.is_ok());
    }

    #[tokio::test]
    async fn test_status_notification_is_published() {
        let (backend, link) = link();
        link.connect().await.unwrap();
        let mut events = link.subscribe();

        backend.push_status("not a status line").await;
        backend.push_status("3:4:5:0:0:0:1:9000:42").await;

        match events.recv().await.unwrap() {
            LinkEvent::StatusUpdated(status) => {
                assert_eq!(status.wifi_networks, 3);
                assert!(status.alarm);
                assert_eq!(status.uptime_secs, 42);
            }
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_queued_io_requires_link() {
        let (_backend, link) = link();

        let result = link
            .write(CharacteristicRole::Settings, b"x".to_vec(), "Update settings")
            .await;

        assert_eq!(result, Err(LinkError::NotConnected));
    }
}
