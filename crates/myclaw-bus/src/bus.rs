use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use myclaw_core::{InboundMessage, OutboundMessage};

use crate::error::{BusError, Result};

/// Receives outbound deliveries for exactly one channel name.
///
/// Registered via [`MessageBus::subscribe_outbound`]; invoked by
/// [`MessageBus::dispatch_outbound`] for every message enqueued under its
/// channel name. A delivery failure is logged and does not stop the
/// dispatch loop (§4.1).
#[async_trait]
pub trait OutboundSubscriber: Send + Sync {
    async fn deliver(&self, msg: OutboundMessage) -> std::result::Result<(), String>;
}

#[async_trait]
impl<F> OutboundSubscriber for F
where
    F: Fn(OutboundMessage) -> futures_util::future::BoxFuture<'static, std::result::Result<(), String>>
        + Send
        + Sync,
{
    async fn deliver(&self, msg: OutboundMessage) -> std::result::Result<(), String> {
        (self)(msg).await
    }
}

/// One bounded inbound queue, one bounded outbound queue, and a table of
/// outbound subscribers keyed by channel name (§3, §4.1).
///
/// There is at most one consumer of the inbound queue (the gateway's
/// process loop) and at most one subscriber per outbound channel name;
/// re-registering a channel name replaces its prior subscriber.
pub struct MessageBus {
    inbound_tx: mpsc::Sender<InboundMessage>,
    inbound_rx: tokio::sync::Mutex<Option<mpsc::Receiver<InboundMessage>>>,
    outbound_tx: mpsc::Sender<OutboundMessage>,
    outbound_rx: tokio::sync::Mutex<Option<mpsc::Receiver<OutboundMessage>>>,
    subscribers: DashMap<String, Arc<dyn OutboundSubscriber>>,
}

impl MessageBus {
    /// Create a bus with the given queue capacity (default 100, §3).
    pub fn new(capacity: usize) -> Self {
        let (inbound_tx, inbound_rx) = mpsc::channel(capacity.max(1));
        let (outbound_tx, outbound_rx) = mpsc::channel(capacity.max(1));
        Self {
            inbound_tx,
            inbound_rx: tokio::sync::Mutex::new(Some(inbound_rx)),
            outbound_tx,
            outbound_rx: tokio::sync::Mutex::new(Some(outbound_rx)),
            subscribers: DashMap::new(),
        }
    }

    /// Publish an inbound message. Blocks (propagating backpressure to the
    /// calling channel) when the queue is full.
    pub async fn publish_inbound(&self, msg: InboundMessage) -> Result<()> {
        self.inbound_tx
            .send(msg)
            .await
            .map_err(|_| BusError::Closed)
    }

    /// Publish an outbound message. Blocks when the queue is full.
    pub async fn publish_outbound(&self, msg: OutboundMessage) -> Result<()> {
        self.outbound_tx
            .send(msg)
            .await
            .map_err(|_| BusError::Closed)
    }

    /// Take ownership of the inbound receiver. Only the gateway's single
    /// process loop should call this; a second call returns `None`.
    pub async fn take_inbound_receiver(&self) -> Option<mpsc::Receiver<InboundMessage>> {
        self.inbound_rx.lock().await.take()
    }

    /// Replace any prior subscriber registered for `channel`.
    pub fn subscribe_outbound(&self, channel: impl Into<String>, handler: Arc<dyn OutboundSubscriber>) {
        let channel = channel.into();
        debug!(%channel, "registering outbound subscriber");
        self.subscribers.insert(channel, handler);
    }

    /// Drain the outbound queue until `token` is cancelled, routing each
    /// message to its registered subscriber. Messages with no subscriber are
    /// dropped with a warning. Delivery failures are logged; the loop keeps
    /// running (§4.1).
    pub async fn dispatch_outbound(&self, token: CancellationToken) {
        let mut rx = match self.outbound_rx.lock().await.take() {
            Some(rx) => rx,
            None => {
                warn!("dispatch_outbound called more than once");
                return;
            }
        };

        loop {
            tokio::select! {
                _ = token.cancelled() => {
                    debug!("outbound dispatcher cancelled");
                    break;
                }
                maybe_msg = rx.recv() => {
                    match maybe_msg {
                        Some(msg) => self.route_one(msg).await,
                        None => break,
                    }
                }
            }
        }
    }

    async fn route_one(&self, msg: OutboundMessage) {
        let Some(subscriber) = self.subscribers.get(&msg.channel).map(|e| e.value().clone()) else {
            warn!(channel = %msg.channel, "no subscriber registered, dropping outbound message");
            return;
        };
        if let Err(e) = subscriber.deliver(msg.clone()).await {
            error!(channel = %msg.channel, error = %e, "outbound delivery failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    struct CountingSubscriber(Arc<AtomicUsize>);

    #[async_trait]
    impl OutboundSubscriber for CountingSubscriber {
        async fn deliver(&self, _msg: OutboundMessage) -> std::result::Result<(), String> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[tokio::test]
    async fn dispatch_routes_to_registered_subscriber() {
        let bus = Arc::new(MessageBus::new(10));
        let count = Arc::new(AtomicUsize::new(0));
        bus.subscribe_outbound("wecom", Arc::new(CountingSubscriber(count.clone())));

        let token = CancellationToken::new();
        let dispatch_bus = bus.clone();
        let dispatch_token = token.clone();
        let handle = tokio::spawn(async move { dispatch_bus.dispatch_outbound(dispatch_token).await });

        bus.publish_outbound(OutboundMessage::new("wecom", "c1", "hi"))
            .await
            .unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        token.cancel();
        handle.await.unwrap();

        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn dispatch_drops_message_with_no_subscriber() {
        let bus = Arc::new(MessageBus::new(10));
        let token = CancellationToken::new();
        let dispatch_bus = bus.clone();
        let dispatch_token = token.clone();
        let handle = tokio::spawn(async move { dispatch_bus.dispatch_outbound(dispatch_token).await });

        bus.publish_outbound(OutboundMessage::new("telegram", "c1", "hi"))
            .await
            .unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        token.cancel();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn inbound_receiver_can_only_be_taken_once() {
        let bus = MessageBus::new(10);
        assert!(bus.take_inbound_receiver().await.is_some());
        assert!(bus.take_inbound_receiver().await.is_none());
    }
}
