//! Cross-node message bus.

use crate::gateway::CacheGateway;
use async_trait::async_trait;
use keystone_redis::Subscription;
use parking_lot::Mutex;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, warn};

/// Receives messages published on a subscribed channel.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    /// Handle one message.
    async fn handle(&self, channel: &str, message: &str);

    /// Delivery on `channel` started, either for the first time or after the
    /// previous subscription was lost. Messages published in between are gone.
    async fn on_subscribed(&self, _channel: &str) {}

    /// The subscription on `channel` ended, usually because the backend went away.
    async fn on_unsubscribed(&self, _channel: &str) {}
}

type BoxedHandlerFn =
    dyn Fn(String, String) -> Pin<Box<dyn Future<Output = ()> + Send>> + Send + Sync;

/// Adapter turning an async closure into a [`MessageHandler`].
pub struct FnHandler(Box<BoxedHandlerFn>);

impl FnHandler {
    /// Wrap a closure receiving `(channel, message)`.
    pub fn new<F, Fut>(f: F) -> Self
    where
        F: Fn(String, String) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        Self(Box::new(move |channel, message| Box::pin(f(channel, message))))
    }
}

#[async_trait]
impl MessageHandler for FnHandler {
    async fn handle(&self, channel: &str, message: &str) {
        (self.0)(channel.to_string(), message.to_string()).await
    }
}

/// Channel based publish/subscribe across every node of a deployment.
///
/// Delivery is fire-and-forget and at most once per subscribed node. Nodes
/// offline at publish time never see the message. The publisher receives its
/// own messages when it is subscribed.
#[async_trait]
pub trait MessageBus: Send + Sync {
    /// Register a handler for every message arriving on `channel`.
    ///
    /// The registration outlives backend outages: it is re-established by
    /// [`MessageBus::resubscribe`].
    async fn subscribe(&self, channel: &str, handler: Arc<dyn MessageHandler>);

    /// Broadcast `message` on `channel`.
    async fn publish(&self, channel: &str, message: &str);

    /// Subscribe every registration that has no live subscription, provided
    /// the transport is reachable.
    async fn resubscribe(&self);
}

struct Registration {
    channel: String,
    handler: Arc<dyn MessageHandler>,
    live: AtomicBool,
}

/// [`MessageBus`] over a [`CacheGateway`]'s pub/sub primitive.
///
/// Subscriptions are opened lazily: when the gateway is already connected at
/// registration time, otherwise on the next [`MessageBus::publish`] or
/// [`MessageBus::resubscribe`] that finds the backend reachable. Lost
/// subscriptions are reopened the same way.
pub struct GatewayMessageBus {
    gateway: Arc<dyn CacheGateway>,
    registrations: Mutex<Vec<Arc<Registration>>>,
}

impl GatewayMessageBus {
    /// Create a bus.
    pub fn new(gateway: Arc<dyn CacheGateway>) -> Self {
        Self {
            gateway,
            registrations: Mutex::new(Vec::new()),
        }
    }

    fn dormant(&self) -> Vec<Arc<Registration>> {
        self.registrations
            .lock()
            .iter()
            .filter(|r| !r.live.load(Ordering::Acquire))
            .cloned()
            .collect()
    }
}

#[async_trait]
impl MessageBus for GatewayMessageBus {
    async fn subscribe(&self, channel: &str, handler: Arc<dyn MessageHandler>) {
        self.registrations.lock().push(Arc::new(Registration {
            channel: channel.to_string(),
            handler,
            live: AtomicBool::new(false),
        }));

        if self.gateway.is_connected() {
            self.resubscribe().await;
        } else {
            debug!(channel = %channel, "Bus subscription deferred until the backend is reachable");
        }
    }

    async fn publish(&self, channel: &str, message: &str) {
        if !self.gateway.connect().await {
            debug!(channel = %channel, "Cache backend unavailable, publish skipped");
            return;
        }

        self.resubscribe().await;
        if let Err(e) = self.gateway.publish(channel, message).await {
            warn!(channel = %channel, error = %e, "Unable to publish bus message");
        }
    }

    async fn resubscribe(&self) {
        let dormant = self.dormant();
        if dormant.is_empty() || !self.gateway.connect().await {
            return;
        }

        for registration in dormant {
            // Claimed by a concurrent call.
            if registration.live.swap(true, Ordering::AcqRel) {
                continue;
            }

            match self.gateway.subscribe(&registration.channel).await {
                Ok(subscription) => {
                    debug!(channel = %registration.channel, "Bus subscription established");
                    registration.handler.on_subscribed(&registration.channel).await;
                    listen(registration, subscription);
                }
                Err(e) => {
                    registration.live.store(false, Ordering::Release);
                    warn!(channel = %registration.channel, error = %e, "Unable to subscribe to bus channel");
                }
            }
        }
    }
}

fn listen(registration: Arc<Registration>, mut subscription: Subscription) {
    tokio::spawn(async move {
        while let Some(message) = subscription.recv().await {
            registration
                .handler
                .handle(&registration.channel, &message.payload)
                .await;
        }

        registration.live.store(false, Ordering::Release);
        warn!(channel = %registration.channel, "Bus subscription lost");
        registration
            .handler
            .on_unsubscribed(&registration.channel)
            .await;
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::{InMemoryBackend, InMemoryGateway};
    use tokio::sync::mpsc;

    fn recording_handler() -> (Arc<dyn MessageHandler>, mpsc::UnboundedReceiver<(String, String)>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let handler = FnHandler::new(move |channel, message| {
            let tx = tx.clone();
            async move {
                let _ = tx.send((channel, message));
            }
        });
        (Arc::new(handler), rx)
    }

    #[tokio::test]
    async fn test_publish_reaches_peers_and_self() {
        let backend = InMemoryBackend::new();
        let bus_a = GatewayMessageBus::new(Arc::new(InMemoryGateway::new(backend.clone())));
        let bus_b = GatewayMessageBus::new(Arc::new(InMemoryGateway::new(backend.clone())));

        let (handler_a, mut rx_a) = recording_handler();
        let (handler_b, mut rx_b) = recording_handler();
        bus_a.subscribe("invalidate", handler_a).await;
        bus_b.subscribe("invalidate", handler_b).await;
        bus_b.resubscribe().await;

        bus_a.publish("invalidate", "roles").await;

        assert_eq!(
            rx_a.recv().await.unwrap(),
            ("invalidate".to_string(), "roles".to_string())
        );
        assert_eq!(
            rx_b.recv().await.unwrap(),
            ("invalidate".to_string(), "roles".to_string())
        );
    }

    #[tokio::test]
    async fn test_disconnected_bus_is_a_no_op() {
        let backend = InMemoryBackend::new();
        backend.set_available(false);
        let bus = GatewayMessageBus::new(Arc::new(InMemoryGateway::new(backend.clone())));

        let (handler, mut rx) = recording_handler();
        bus.subscribe("invalidate", handler).await;
        bus.publish("invalidate", "roles").await;

        assert!(rx.try_recv().is_err());
    }

    struct LifecycleHandler {
        events: Arc<Mutex<Vec<String>>>,
    }

    #[async_trait]
    impl MessageHandler for LifecycleHandler {
        async fn handle(&self, _channel: &str, message: &str) {
            self.events.lock().push(format!("message:{message}"));
        }

        async fn on_subscribed(&self, _channel: &str) {
            self.events.lock().push("subscribed".to_string());
        }

        async fn on_unsubscribed(&self, _channel: &str) {
            self.events.lock().push("unsubscribed".to_string());
        }
    }

    async fn settle() {
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    }

    #[tokio::test]
    async fn test_subscribe_does_not_connect() {
        let gateway = Arc::new(InMemoryGateway::new(InMemoryBackend::new()));
        let bus = GatewayMessageBus::new(gateway.clone());

        let (handler, _rx) = recording_handler();
        bus.subscribe("invalidate", handler).await;

        assert!(!gateway.is_connected());
    }

    #[tokio::test]
    async fn test_subscription_survives_backend_restart() {
        let backend = InMemoryBackend::new();
        let listener = GatewayMessageBus::new(Arc::new(InMemoryGateway::new(backend.clone())));
        let publisher = GatewayMessageBus::new(Arc::new(InMemoryGateway::new(backend.clone())));
        let events = Arc::new(Mutex::new(Vec::new()));

        listener
            .subscribe(
                "invalidate",
                Arc::new(LifecycleHandler {
                    events: events.clone(),
                }),
            )
            .await;
        listener.resubscribe().await;
        publisher.publish("invalidate", "one").await;
        settle().await;

        backend.set_available(false);
        settle().await;
        listener.resubscribe().await;
        backend.set_available(true);

        publisher.publish("invalidate", "lost").await;
        listener.resubscribe().await;
        publisher.publish("invalidate", "two").await;
        settle().await;

        assert_eq!(
            *events.lock(),
            vec![
                "subscribed",
                "message:one",
                "unsubscribed",
                "subscribed",
                "message:two",
            ]
        );
    }

    #[tokio::test]
    async fn test_unreachable_at_registration_subscribes_later() {
        let backend = InMemoryBackend::new();
        backend.set_available(false);
        let bus = GatewayMessageBus::new(Arc::new(InMemoryGateway::new(backend.clone())));

        let (handler, mut rx) = recording_handler();
        bus.subscribe("invalidate", handler).await;
        bus.publish("invalidate", "dropped").await;

        backend.set_available(true);
        bus.publish("invalidate", "roles").await;

        assert_eq!(
            rx.recv().await.unwrap(),
            ("invalidate".to_string(), "roles".to_string())
        );
        assert!(rx.try_recv().is_err());
    }
}
