//! Channel-RPC bridge between a script context and its host.
//!
//! Every call is sent as a [`BridgeMessage`] on a channel keyed by the
//! operation and the extension context. The caller then suspends until the
//! host answers on that same key. Replies are matched to waiters in the order
//! the requests were issued for each key.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use serde_json::Value;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::types::{BridgeMessage, ChannelKey, HostError, HostReply, Operation};

/// Failure of a single bridge call.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BridgeError {
    #[error("{0}")]
    Host(HostError),

    #[error("{operation} was cancelled")]
    Cancelled { operation: Operation },

    #[error("{operation} got no reply within {deadline:?}")]
    DeadlineExceeded {
        operation: Operation,
        deadline: Duration,
    },

    #[error("bridge closed before {operation} was answered")]
    Closed { operation: Operation },
}

/// Result type for bridge calls.
pub type BridgeResult<T> = Result<T, BridgeError>;

/// Per-call limits.
#[derive(Debug, Clone, Default)]
pub struct InvokeOptions {
    /// Maximum time to wait for the reply.
    pub deadline: Option<Duration>,

    /// Token that aborts the wait when cancelled.
    pub cancel: Option<CancellationToken>,
}

impl InvokeOptions {
    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn with_cancel(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }
}

type Waiter = oneshot::Sender<HostReply>;

/// Waiters per channel, oldest first.
#[derive(Default)]
struct PendingReplies {
    channels: HashMap<ChannelKey, VecDeque<Waiter>>,
}

fn lock(pending: &Mutex<PendingReplies>) -> MutexGuard<'_, PendingReplies> {
    pending.lock().unwrap_or_else(|e| e.into_inner())
}

/// Script-side handle of the bridge.
#[derive(Clone)]
pub struct Bridge {
    context: Arc<str>,
    outbound: mpsc::UnboundedSender<BridgeMessage>,
    pending: Arc<Mutex<PendingReplies>>,
    defaults: InvokeOptions,
}

impl std::fmt::Debug for Bridge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Bridge")
            .field("context", &self.context)
            .field("deadline", &self.defaults.deadline)
            .finish()
    }
}

/// Host-side end of the bridge.
pub struct BridgeReceiver {
    context: Arc<str>,
    inbound: mpsc::UnboundedReceiver<BridgeMessage>,
    pending: Arc<Mutex<PendingReplies>>,
}

impl Bridge {
    /// Create a bridge for one extension context.
    pub fn channel(context: impl Into<String>) -> (Bridge, BridgeReceiver) {
        let context: Arc<str> = Arc::from(context.into());
        let (tx, rx) = mpsc::unbounded_channel();
        let pending = Arc::new(Mutex::new(PendingReplies::default()));

        let bridge = Bridge {
            context: context.clone(),
            outbound: tx,
            pending: pending.clone(),
            defaults: InvokeOptions::default(),
        };
        let receiver = BridgeReceiver {
            context,
            inbound: rx,
            pending,
        };
        (bridge, receiver)
    }

    /// Replace the options applied by [`Bridge::invoke`].
    pub fn with_defaults(mut self, defaults: InvokeOptions) -> Self {
        self.defaults = defaults;
        self
    }

    /// Extension context this bridge routes for.
    pub fn context(&self) -> &str {
        &self.context
    }

    /// Invoke an operation with the bridge's default options.
    pub async fn invoke(&self, operation: Operation, args: Vec<Value>) -> BridgeResult<Value> {
        let options = self.defaults.clone();
        self.invoke_with(operation, args, &options).await
    }

    /// Invoke an operation and wait for exactly one reply.
    pub async fn invoke_with(
        &self,
        operation: Operation,
        args: Vec<Value>,
        options: &InvokeOptions,
    ) -> BridgeResult<Value> {
        let message = BridgeMessage::new(operation, &self.context, args);
        let channel = message.channel.clone();
        let (tx, rx) = oneshot::channel();

        {
            // Enqueue and send under one lock so queue order matches send order.
            let mut pending = lock(&self.pending);
            pending
                .channels
                .entry(channel.clone())
                .or_default()
                .push_back(tx);

            if self.outbound.send(message).is_err() {
                if let Some(queue) = pending.channels.get_mut(&channel) {
                    queue.pop_back();
                }
                return Err(BridgeError::Closed { operation });
            }
        }
        debug!(channel = %channel, "bridge call sent");

        let reply = async {
            match options.deadline {
                Some(deadline) => tokio::time::timeout(deadline, rx)
                    .await
                    .map_err(|_| BridgeError::DeadlineExceeded {
                        operation,
                        deadline,
                    })?
                    .map_err(|_| BridgeError::Closed { operation }),
                None => rx.await.map_err(|_| BridgeError::Closed { operation }),
            }
        };

        tokio::select! {
            biased;
            _ = cancelled(options.cancel.as_ref()) => Err(BridgeError::Cancelled { operation }),
            result = reply => result?.map_err(BridgeError::Host),
        }
    }
}

async fn cancelled(token: Option<&CancellationToken>) {
    match token {
        Some(token) => token.cancelled().await,
        None => std::future::pending().await,
    }
}

impl BridgeReceiver {
    pub fn context(&self) -> &str {
        &self.context
    }

    /// Next message sent by the script side, `None` once every bridge handle is gone.
    pub async fn recv(&mut self) -> Option<BridgeMessage> {
        self.inbound.recv().await
    }

    /// Deliver a reply to the oldest waiter on `channel`.
    ///
    /// Returns `false` when nobody was waiting or the waiter gave up.
    pub fn respond(&self, channel: &ChannelKey, reply: HostReply) -> bool {
        let waiter = {
            let mut pending = lock(&self.pending);
            let waiter = pending
                .channels
                .get_mut(channel)
                .and_then(VecDeque::pop_front);
            if pending.channels.get(channel).is_some_and(VecDeque::is_empty) {
                pending.channels.remove(channel);
            }
            waiter
        };

        match waiter {
            Some(waiter) => {
                let delivered = waiter.send(reply).is_ok();
                if !delivered {
                    debug!(channel = %channel, "reply dropped, caller stopped waiting");
                }
                delivered
            }
            None => {
                warn!(channel = %channel, "unsolicited bridge reply dropped");
                false
            }
        }
    }

    /// Number of callers still waiting on `channel`.
    pub fn waiting(&self, channel: &ChannelKey) -> usize {
        lock(&self.pending)
            .channels
            .get(channel)
            .map_or(0, VecDeque::len)
    }
}

impl Drop for BridgeReceiver {
    fn drop(&mut self) {
        // Dropping the senders wakes every waiter with `Closed`.
        lock(&self.pending).channels.clear();
    }
}
