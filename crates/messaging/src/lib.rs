//! The message service: delivers signed-state payloads and vouchers to a
//! named peer.
//!
//! Delivery is unordered and may duplicate. Objectives are idempotent under
//! duplicate signatures, so the test service is free to delay and reorder.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use alloy_primitives::Address;
use async_trait::async_trait;
use conduit_protocols::Message;
use rand::Rng;
use thiserror::Error;
use tokio::sync::{mpsc, RwLock};
use tracing::{trace, warn};

/// Errors raised by message submission.
#[derive(Debug, Clone, Error)]
pub enum MessageError {
    /// The recipient is not registered with the broker.
    #[error("no route to peer {0}")]
    UnknownPeer(Address),

    /// The recipient's inbox has been dropped.
    #[error("peer {0} is no longer receiving")]
    PeerGone(Address),
}

/// A message service delivers a [`Message`] to the peer it names.
#[async_trait]
pub trait MessageService: Send + Sync {
    /// Submits a message for delivery. Non-blocking; the service retries
    /// internally.
    async fn send(&self, message: Message) -> Result<(), MessageError>;
}

/// An in-process message broker connecting test clients by address.
#[derive(Clone, Debug, Default)]
pub struct Broker {
    inboxes: Arc<RwLock<HashMap<Address, mpsc::UnboundedSender<Message>>>>,
}

impl Broker {
    /// An empty broker.
    pub fn new() -> Self {
        Broker::default()
    }

    async fn register(&self, address: Address) -> mpsc::UnboundedReceiver<Message> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.inboxes.write().await.insert(address, tx);
        rx
    }

    async fn route(&self, message: Message) -> Result<(), MessageError> {
        let inboxes = self.inboxes.read().await;
        let to = message.to;
        let sender = inboxes.get(&to).ok_or(MessageError::UnknownPeer(to))?;
        sender.send(message).map_err(|_| MessageError::PeerGone(to))
    }
}

/// A [`MessageService`] for one test client, wired through a shared
/// [`Broker`]. An optional mean delay exercises reordering tolerance.
#[derive(Clone, Debug)]
pub struct TestMessageService {
    address: Address,
    broker: Broker,
    mean_delay: Duration,
}

impl TestMessageService {
    /// Registers `address` with `broker` and returns the service together
    /// with the inbox receiver the engine will drain.
    pub async fn new(
        address: Address,
        broker: Broker,
        mean_delay: Duration,
    ) -> (Self, mpsc::UnboundedReceiver<Message>) {
        let inbox = broker.register(address).await;
        (
            TestMessageService {
                address,
                broker,
                mean_delay,
            },
            inbox,
        )
    }

    /// The address this service sends from.
    pub fn address(&self) -> Address {
        self.address
    }
}

#[async_trait]
impl MessageService for TestMessageService {
    async fn send(&self, message: Message) -> Result<(), MessageError> {
        trace!(from = %self.address, to = %message.to, objective = %message.objective_id, "sending message");
        let broker = self.broker.clone();
        let delay = if self.mean_delay.is_zero() {
            Duration::ZERO
        } else {
            // jitter in [0, 2 * mean)
            let micros = self.mean_delay.as_micros() as u64 * 2;
            Duration::from_micros(rand::thread_rng().gen_range(0..micros.max(1)))
        };
        tokio::spawn(async move {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            if let Err(err) = broker.route(message).await {
                warn!(%err, "message dropped");
            }
        });
        Ok(())
    }
}
