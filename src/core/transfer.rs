//! Chunked record-set transfer over the data-transfer characteristic
//!
//! The host writes a request token, the device answers `START:<hex count>`,
//! then the host pulls packets `0001..=count` one at a time through the
//! operation queue. The device closes the session with `END[:<timestamp>]`.
//!
//! Each chunk's 4-byte header must carry the ordinal just requested; anything
//! else aborts the session with [`LinkError::CorruptTransfer`].

use std::{
    sync::{Arc, Mutex},
    time::{Duration, SystemTime},
};

use tokio::{sync::mpsc, time::Instant};
use tracing::{debug, info, warn};

use crate::{
    backend::GattBackend,
    core::{
        error::{LinkError, LinkResult},
        link::{LinkConnection, NotificationSink},
        types::{CharacteristicRole, LinkEvent, RecordKind, RecordSet},
    },
    protocol::{Record, TransferMessage, decode_records, packet_request},
    util::lock,
};

/// Silence allowed between two notifications of one session
pub const CHUNK_TIMEOUT: Duration = Duration::from_millis(5000);

/// Reassembled payload of one session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferOutput {
    pub data: Vec<u8>,
    /// Device clock carried by `END`
    pub timestamp: Option<u64>,
    /// Host clock when `END` arrived
    pub received_at: SystemTime,
}

#[derive(Debug)]
enum SessionEvent {
    RequestPacket(u16),
    Progress,
    Completed(TransferOutput),
    Failed(LinkError),
}

enum Step {
    Continue(SessionEvent),
    Done(TransferOutput),
}

struct TransferSession {
    kind: RecordKind,
    buffer: Vec<u8>,
    /// Wider than the `u16` packet count so the last packet of a full session fits
    next_ordinal: u32,
    total: Option<u16>,
    events: mpsc::UnboundedSender<SessionEvent>,
}

impl TransferSession {
    fn received(&self) -> u32 {
        self.next_ordinal - 1
    }

    fn advance(&mut self, message: TransferMessage) -> LinkResult<Step> {
        match message {
            TransferMessage::Start { total } => {
                if self.total.is_some() {
                    return Err(LinkError::CorruptTransfer("repeated START".into()));
                }
                debug!("{} transfer announced {} packets", self.kind, total);
                self.total = Some(total);
                Ok(Step::Continue(if total == 0 {
                    SessionEvent::Progress
                } else {
                    SessionEvent::RequestPacket(1)
                }))
            }
            TransferMessage::Chunk { ordinal, payload } => {
                let total = self
                    .total
                    .ok_or_else(|| LinkError::CorruptTransfer("chunk before START".into()))?;
                if self.next_ordinal > u32::from(total) {
                    return Err(LinkError::CorruptTransfer(format!(
                        "chunk beyond announced total of {}",
                        total
                    )));
                }
                if ordinal.map(u32::from) != Some(self.next_ordinal) {
                    return Err(LinkError::CorruptTransfer(format!(
                        "expected packet {:04x}, got header {:?}",
                        self.next_ordinal,
                        ordinal.map(packet_request)
                    )));
                }

                self.buffer.extend_from_slice(&payload);
                debug!(
                    "Received packet {}/{} ({} bytes)",
                    self.next_ordinal,
                    total,
                    payload.len()
                );
                self.next_ordinal += 1;
                let next = u16::try_from(self.next_ordinal)
                    .ok()
                    .filter(|next| *next <= total);
                Ok(Step::Continue(match next {
                    Some(next) => SessionEvent::RequestPacket(next),
                    None => SessionEvent::Progress,
                }))
            }
            TransferMessage::End { timestamp } => {
                let total = self
                    .total
                    .ok_or_else(|| LinkError::CorruptTransfer("END before START".into()))?;
                if self.received() < u32::from(total) {
                    return Err(LinkError::CorruptTransfer(format!(
                        "END after {} of {} packets",
                        self.received(),
                        total
                    )));
                }
                Ok(Step::Done(TransferOutput {
                    data: std::mem::take(&mut self.buffer),
                    timestamp,
                    received_at: SystemTime::now(),
                }))
            }
        }
    }
}

enum TransferState {
    Idle,
    Awaiting(TransferSession),
}

/// Notification-driven session state machine
struct SessionSlot {
    state: Mutex<TransferState>,
}

impl SessionSlot {
    fn new() -> Self {
        Self {
            state: Mutex::new(TransferState::Idle),
        }
    }

    fn begin(&self, kind: RecordKind) -> mpsc::UnboundedReceiver<SessionEvent> {
        let (events, receiver) = mpsc::unbounded_channel();
        *lock(&self.state) = TransferState::Awaiting(TransferSession {
            kind,
            buffer: Vec::new(),
            next_ordinal: 1,
            total: None,
            events,
        });
        receiver
    }

    fn reset(&self) {
        *lock(&self.state) = TransferState::Idle;
    }

    fn finish(&self, event: SessionEvent) {
        let previous = std::mem::replace(&mut *lock(&self.state), TransferState::Idle);
        if let TransferState::Awaiting(session) = previous {
            let _ = session.events.send(event);
        }
    }
}

impl NotificationSink for SessionSlot {
    fn on_notification(&self, value: &[u8]) {
        let step = {
            let mut state = lock(&self.state);
            let TransferState::Awaiting(session) = &mut *state else {
                debug!(
                    "Discarding data notification ({} bytes), no transfer in progress",
                    value.len()
                );
                return;
            };
            let step = TransferMessage::parse(value)
                .map_err(LinkError::from)
                .and_then(|message| session.advance(message));
            match step {
                Ok(Step::Continue(event)) => {
                    let _ = session.events.send(event);
                    return;
                }
                other => other,
            }
        };

        match step {
            Ok(Step::Done(output)) => self.finish(SessionEvent::Completed(output)),
            Ok(Step::Continue(_)) => {}
            Err(error) => self.finish(SessionEvent::Failed(error)),
        }
    }

    fn on_link_down(&self, error: LinkError) {
        self.finish(SessionEvent::Failed(error));
    }
}

/// Returns the slot to idle when a fetch ends for any reason
struct SessionGuard<'a>(&'a SessionSlot);

impl Drop for SessionGuard<'_> {
    fn drop(&mut self) {
        self.0.reset();
    }
}

/// Pulls record sets from the device
pub struct ChunkedTransfer<B: GattBackend> {
    link: LinkConnection<B>,
    slot: Arc<SessionSlot>,
    exclusive: Arc<tokio::sync::Mutex<()>>,
}

impl<B: GattBackend> Clone for ChunkedTransfer<B> {
    fn clone(&self) -> Self {
        Self {
            link: self.link.clone(),
            slot: self.slot.clone(),
            exclusive: self.exclusive.clone(),
        }
    }
}

impl<B: GattBackend> ChunkedTransfer<B> {
    /// Create the transfer engine and route data notifications to it
    pub fn new(link: LinkConnection<B>) -> Self {
        let slot = Arc::new(SessionSlot::new());
        link.attach_data_sink(slot.clone());
        Self {
            link,
            slot,
            exclusive: Arc::new(tokio::sync::Mutex::new(())),
        }
    }

    /// Fetch and decode one record set
    pub async fn records<R: Record>(&self) -> LinkResult<RecordSet<R>> {
        let output = self.fetch(R::KIND).await?;
        let records = decode_records::<R>(&output.data)?;
        info!("Received {} {} records", records.len(), R::KIND);

        self.link.emit(LinkEvent::TransferCompleted {
            kind: R::KIND,
            records: records.len(),
        });
        Ok(RecordSet {
            records,
            timestamp: output.timestamp,
            received_at: output.received_at,
        })
    }

    /// Run one transfer session and return the raw reassembled buffer
    ///
    /// Sessions never interleave; a second caller waits for the first.
    pub async fn fetch(&self, kind: RecordKind) -> LinkResult<TransferOutput> {
        let _exclusive = self.exclusive.lock().await;
        if !self.link.is_connected() {
            return Err(LinkError::NotConnected);
        }

        let mut events = self.slot.begin(kind);
        let _guard = SessionGuard(&self.slot);

        info!("Starting {} transfer", kind);
        self.link
            .write(
                CharacteristicRole::DataTransfer,
                kind.token().as_bytes().to_vec(),
                format!("Request {}", kind),
            )
            .await?;

        let mut deadline = Instant::now() + CHUNK_TIMEOUT;
        loop {
            let event = match tokio::time::timeout_at(deadline, events.recv()).await {
                Ok(Some(event)) => event,
                Ok(None) => return Err(LinkError::Abandoned),
                Err(_) => {
                    warn!("{} transfer timed out", kind);
                    return Err(LinkError::TransferTimeout);
                }
            };
            deadline = Instant::now() + CHUNK_TIMEOUT;

            match event {
                SessionEvent::RequestPacket(ordinal) => {
                    let request = packet_request(ordinal);
                    self.link
                        .write(
                            CharacteristicRole::DataTransfer,
                            request.clone().into_bytes(),
                            format!("Request packet {}", request),
                        )
                        .await?;
                }
                SessionEvent::Progress => {}
                SessionEvent::Completed(output) => {
                    info!("{} transfer complete ({} bytes)", kind, output.data.len());
                    return Ok(output);
                }
                SessionEvent::Failed(error) => {
                    warn!("{} transfer failed: {}", kind, error);
                    return Err(error);
                }
            }
        }
    }
}
