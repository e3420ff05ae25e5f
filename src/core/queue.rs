//! FIFO operation queue guarding the single GATT link
//!
//! Exactly one operation runs at a time. Each active operation is bounded by
//! [`OPERATION_TIMEOUT`]; on expiry its caller sees
//! [`LinkError::OperationTimeout`], the body is dropped and the next
//! operation starts.

use std::{
    collections::VecDeque,
    future::Future,
    pin::Pin,
    sync::{
        Arc, Mutex,
        atomic::{AtomicU64, Ordering},
    },
    task::{Context, Poll},
    time::Duration,
};

use tokio::sync::oneshot;
use tracing::{debug, warn};

use crate::{
    core::error::{LinkError, LinkResult},
    util::lock,
};

/// Deadline for a single queued operation
pub const OPERATION_TIMEOUT: Duration = Duration::from_millis(1000);

type OperationBody = Pin<Box<dyn Future<Output = ()> + Send>>;

/// Type-erased failure path of a completion handle
trait Settle: Send + Sync {
    fn fail(&self, error: LinkError);
}

/// One-shot completion handle; the first settle wins
struct Completion<T> {
    sender: Mutex<Option<oneshot::Sender<LinkResult<T>>>>,
}

impl<T> Completion<T> {
    fn new(sender: oneshot::Sender<LinkResult<T>>) -> Self {
        Self {
            sender: Mutex::new(Some(sender)),
        }
    }

    /// Returns false if the handle was already settled
    fn settle(&self, result: LinkResult<T>) -> bool {
        match lock(&self.sender).take() {
            Some(sender) => {
                let _ = sender.send(result);
                true
            }
            None => false,
        }
    }
}

impl<T: Send> Settle for Completion<T> {
    fn fail(&self, error: LinkError) {
        self.settle(Err(error));
    }
}

struct QueuedOperation {
    id: u64,
    description: String,
    body: OperationBody,
    completion: Arc<dyn Settle>,
}

struct ActiveOperation {
    id: u64,
    description: String,
    completion: Arc<dyn Settle>,
    // Dropping the sender cancels the running body
    _cancel: oneshot::Sender<()>,
}

#[derive(Default)]
struct QueueState {
    pending: VecDeque<QueuedOperation>,
    active: Option<ActiveOperation>,
}

struct QueueShared {
    state: Mutex<QueueState>,
    timeout: Duration,
    next_id: AtomicU64,
}

/// Result of a queued operation
///
/// Resolves with [`LinkError::Abandoned`] if the operation is dropped without
/// being settled.
pub struct QueuedResult<T> {
    receiver: oneshot::Receiver<LinkResult<T>>,
}

impl<T> Future for QueuedResult<T> {
    type Output = LinkResult<T>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.receiver)
            .poll(cx)
            .map(|result| result.unwrap_or(Err(LinkError::Abandoned)))
    }
}

/// Serialization point for all GATT traffic
#[derive(Clone)]
pub struct OperationQueue {
    shared: Arc<QueueShared>,
}

impl Default for OperationQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl OperationQueue {
    pub fn new() -> Self {
        Self::with_timeout(OPERATION_TIMEOUT)
    }

    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            shared: Arc::new(QueueShared {
                state: Mutex::new(QueueState::default()),
                timeout,
                next_id: AtomicU64::new(1),
            }),
        }
    }

    /// Submit an operation
    ///
    /// The operation is queued at call time, so FIFO order follows the order
    /// of `enqueue` calls even if the returned futures are polled later. The
    /// body is not invoked until the operation becomes active.
    pub fn enqueue<F, Fut, T>(&self, description: impl Into<String>, operation: F) -> QueuedResult<T>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = LinkResult<T>> + Send + 'static,
        T: Send + 'static,
    {
        let description = description.into();
        let (sender, receiver) = oneshot::channel();
        let completion = Arc::new(Completion::new(sender));

        let settle = completion.clone();
        let body: OperationBody = Box::pin(async move {
            let result = operation().await;
            if !settle.settle(result) {
                debug!("Ignoring late completion of settled operation");
            }
        });

        let id = self.shared.next_id.fetch_add(1, Ordering::Relaxed);
        lock(&self.shared.state).pending.push_back(QueuedOperation {
            id,
            description,
            body,
            completion,
        });

        Self::advance(&self.shared);
        QueuedResult { receiver }
    }

    /// Abandon every queued and the active operation
    pub fn clear(&self) {
        self.clear_with(LinkError::Abandoned);
    }

    /// Abandon every queued and the active operation with `cause`
    ///
    /// Queued bodies are dropped without being invoked.
    pub(crate) fn clear_with(&self, cause: LinkError) {
        let (pending, active) = {
            let mut state = lock(&self.shared.state);
            (std::mem::take(&mut state.pending), state.active.take())
        };

        if pending.is_empty() && active.is_none() {
            return;
        }
        debug!(
            "Clearing operation queue ({} pending, active: {})",
            pending.len(),
            active.as_ref().map_or("none", |a| a.description.as_str())
        );

        if let Some(active) = active {
            active.completion.fail(cause.clone());
        }
        for operation in pending {
            operation.completion.fail(cause.clone());
        }
    }

    /// Number of queued operations, including the active one
    pub fn len(&self) -> usize {
        let state = lock(&self.shared.state);
        state.pending.len() + usize::from(state.active.is_some())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// True if no operation is active
    pub fn is_idle(&self) -> bool {
        lock(&self.shared.state).active.is_none()
    }

    /// Start the next operation if none is active
    fn advance(shared: &Arc<QueueShared>) {
        let (operation, cancelled) = {
            let mut state = lock(&shared.state);
            if state.active.is_some() {
                return;
            }
            let Some(operation) = state.pending.pop_front() else {
                return;
            };
            let (cancel, cancelled) = oneshot::channel::<()>();
            state.active = Some(ActiveOperation {
                id: operation.id,
                description: operation.description.clone(),
                completion: operation.completion.clone(),
                _cancel: cancel,
            });
            (operation, cancelled)
        };

        let QueuedOperation {
            id,
            description,
            body,
            completion,
        } = operation;
        debug!("Running operation: {}", description);

        let shared = shared.clone();
        tokio::spawn(async move {
            // A cleared operation must not make progress once cancelled
            tokio::select! {
                biased;
                _ = cancelled => {
                    debug!("Operation cancelled: {}", description);
                }
                _ = body => {}
                _ = tokio::time::sleep(shared.timeout) => {
                    warn!("Operation timed out: {}", description);
                    completion.fail(LinkError::OperationTimeout(description.clone()));
                }
            }

            {
                let mut state = lock(&shared.state);
                if state.active.as_ref().is_some_and(|active| active.id == id) {
                    state.active = None;
                }
            }
            Self::advance(&shared);
        });
    }
}
