//! Broker seam and in-process implementation.
//!
//! # Purpose
//! The real AMQP broker lives outside this process; the service only depends
//! on the small consuming surface below. The in-process implementation models
//! the production topology for tests and local runs: a shared ingress
//! exchange routes on a fixed key to an untenanted pre-dispatch queue, whose
//! consumer reads the tenant header and republishes to the tenant's durable
//! queue. Per-tenant queues are authoritative; the pre-dispatch queue is an
//! ingress shim.
//!
//! Queues buffer while no consumer is attached, so replacing a tenant route
//! never loses messages: the broker holds them until the new loop subscribes.
use async_trait::async_trait;
use bytes::Bytes;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use tokio::sync::{Notify, RwLock};
use tokio_util::sync::CancellationToken;

/// Shared ingress exchange all producers publish to.
pub const INGRESS_EXCHANGE: &str = "message.processing.exchange";
/// Routing key bound to the pre-dispatch queue.
pub const INGRESS_ROUTING_KEY: &str = "message.process";
/// Untenanted pre-dispatch queue read by the dispatch shim.
pub const PREDISPATCH_QUEUE: &str = "message.processing.queue";

/// A message as consumed from a broker queue.
#[derive(Debug, Clone, PartialEq)]
pub struct Delivery {
    pub headers: HashMap<String, String>,
    pub payload: Bytes,
}

impl Delivery {
    pub fn new(payload: Bytes) -> Self {
        Self {
            headers: HashMap::new(),
            payload,
        }
    }

    pub fn for_tenant(tenant_id: &str, payload: Bytes) -> Self {
        let mut delivery = Self::new(payload);
        delivery
            .headers
            .insert(courier_core::TENANT_HEADER.to_string(), tenant_id.to_string());
        delivery
    }

    pub fn tenant_id(&self) -> Option<&str> {
        self.headers
            .get(courier_core::TENANT_HEADER)
            .map(|value| value.as_str())
            .filter(|value| !value.trim().is_empty())
    }
}

#[async_trait]
pub trait MessageConsumer: Send + Sync {
    /// Next delivery, or `None` when the queue was deleted.
    async fn recv(&mut self) -> Option<Delivery>;
}

#[async_trait]
pub trait MessageBroker: Send + Sync + 'static {
    /// Idempotently creates a durable queue.
    async fn declare_queue(&self, queue: &str) -> anyhow::Result<()>;
    /// Publishes directly to a queue.
    async fn publish(&self, queue: &str, delivery: Delivery) -> anyhow::Result<()>;
    /// Publishes through an exchange binding.
    async fn publish_exchange(
        &self,
        exchange: &str,
        routing_key: &str,
        delivery: Delivery,
    ) -> anyhow::Result<()>;
    /// Attaches a consumer to a queue, creating the queue if needed.
    async fn subscribe(&self, queue: &str) -> anyhow::Result<Box<dyn MessageConsumer>>;
}

#[derive(Default)]
struct QueueState {
    buffer: Mutex<VecDeque<Delivery>>,
    notify: Notify,
}

impl QueueState {
    fn push(&self, delivery: Delivery) {
        self.buffer.lock().expect("queue buffer lock").push_back(delivery);
        self.notify.notify_one();
    }

    async fn pop(&self) -> Delivery {
        loop {
            // Register interest before checking the buffer so a concurrent
            // push cannot be missed.
            let notified = self.notify.notified();
            if let Some(delivery) = self.buffer.lock().expect("queue buffer lock").pop_front() {
                return delivery;
            }
            notified.await;
        }
    }
}

struct InMemoryConsumer {
    state: Arc<QueueState>,
}

#[async_trait]
impl MessageConsumer for InMemoryConsumer {
    async fn recv(&mut self) -> Option<Delivery> {
        Some(self.state.pop().await)
    }
}

/// Process-local broker with exchange bindings and buffering queues.
pub struct InMemoryBroker {
    queues: RwLock<HashMap<String, Arc<QueueState>>>,
    bindings: RwLock<HashMap<(String, String), String>>,
}

impl InMemoryBroker {
    pub fn new() -> Self {
        Self {
            queues: RwLock::new(HashMap::new()),
            bindings: RwLock::new(HashMap::new()),
        }
    }

    /// Installs the production ingress topology.
    pub async fn with_ingress_topology() -> Self {
        let broker = Self::new();
        broker
            .bind(INGRESS_EXCHANGE, INGRESS_ROUTING_KEY, PREDISPATCH_QUEUE)
            .await;
        let _ = broker.declare_queue(PREDISPATCH_QUEUE).await;
        broker
    }

    pub async fn bind(&self, exchange: &str, routing_key: &str, queue: &str) {
        self.bindings.write().await.insert(
            (exchange.to_string(), routing_key.to_string()),
            queue.to_string(),
        );
    }

    pub async fn queue_depth(&self, queue: &str) -> usize {
        match self.queues.read().await.get(queue) {
            Some(state) => state.buffer.lock().expect("queue buffer lock").len(),
            None => 0,
        }
    }

    async fn queue(&self, name: &str) -> Arc<QueueState> {
        if let Some(state) = self.queues.read().await.get(name) {
            return Arc::clone(state);
        }
        let mut queues = self.queues.write().await;
        Arc::clone(
            queues
                .entry(name.to_string())
                .or_insert_with(|| Arc::new(QueueState::default())),
        )
    }
}

impl Default for InMemoryBroker {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MessageBroker for InMemoryBroker {
    async fn declare_queue(&self, queue: &str) -> anyhow::Result<()> {
        self.queue(queue).await;
        Ok(())
    }

    async fn publish(&self, queue: &str, delivery: Delivery) -> anyhow::Result<()> {
        self.queue(queue).await.push(delivery);
        Ok(())
    }

    async fn publish_exchange(
        &self,
        exchange: &str,
        routing_key: &str,
        delivery: Delivery,
    ) -> anyhow::Result<()> {
        let queue = self
            .bindings
            .read()
            .await
            .get(&(exchange.to_string(), routing_key.to_string()))
            .cloned();
        match queue {
            Some(queue) => self.publish(&queue, delivery).await,
            None => anyhow::bail!("no binding for {exchange}/{routing_key}"),
        }
    }

    async fn subscribe(&self, queue: &str) -> anyhow::Result<Box<dyn MessageConsumer>> {
        let state = self.queue(queue).await;
        Ok(Box::new(InMemoryConsumer { state }))
    }
}

/// Runs the pre-dispatch shim: consumes the shared ingress queue and hands
/// each message to the owning tenant's queue based on the tenant header.
/// Messages without a usable tenant header are dropped with a warning; the
/// per-tenant pipeline never sees them.
pub async fn run_predispatch(broker: Arc<dyn MessageBroker>, cancel: CancellationToken) {
    let mut consumer = match broker.subscribe(PREDISPATCH_QUEUE).await {
        Ok(consumer) => consumer,
        Err(err) => {
            tracing::error!(error = %err, "failed to subscribe to pre-dispatch queue");
            return;
        }
    };
    loop {
        let delivery = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            delivery = consumer.recv() => delivery,
        };
        let Some(delivery) = delivery else { break };
        match delivery.tenant_id() {
            Some(tenant_id) => {
                let queue = courier_core::tenant_queue_name(tenant_id);
                if let Err(err) = broker.publish(&queue, delivery).await {
                    tracing::warn!(error = %err, queue = %queue, "pre-dispatch handoff failed");
                }
            }
            None => {
                tracing::warn!("dropping ingress message without CBUSINESSUNIT header");
            }
        }
    }
    tracing::debug!("pre-dispatch consumer stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn queues_buffer_until_subscribed() {
        let broker = InMemoryBroker::new();
        broker
            .publish("partner.A.queue", Delivery::for_tenant("A", Bytes::from("one")))
            .await
            .expect("publish");
        assert_eq!(broker.queue_depth("partner.A.queue").await, 1);
        let mut consumer = broker.subscribe("partner.A.queue").await.expect("subscribe");
        let delivery = consumer.recv().await.expect("delivery");
        assert_eq!(delivery.payload, Bytes::from("one"));
    }

    #[tokio::test]
    async fn consumer_replacement_keeps_backlog() {
        let broker = InMemoryBroker::new();
        let first = broker.subscribe("partner.A.queue").await.expect("subscribe");
        drop(first);
        broker
            .publish("partner.A.queue", Delivery::for_tenant("A", Bytes::from("kept")))
            .await
            .expect("publish");
        let mut second = broker.subscribe("partner.A.queue").await.expect("resubscribe");
        let delivery = second.recv().await.expect("delivery");
        assert_eq!(delivery.payload, Bytes::from("kept"));
    }

    #[tokio::test]
    async fn predispatch_routes_by_tenant_header() {
        let broker: Arc<dyn MessageBroker> = Arc::new(InMemoryBroker::with_ingress_topology().await);
        let cancel = CancellationToken::new();
        let shim = tokio::spawn(run_predispatch(Arc::clone(&broker), cancel.clone()));

        broker
            .publish_exchange(
                INGRESS_EXCHANGE,
                INGRESS_ROUTING_KEY,
                Delivery::for_tenant("AMAZON", Bytes::from("payload")),
            )
            .await
            .expect("publish");

        let mut consumer = broker
            .subscribe("partner.AMAZON.queue")
            .await
            .expect("subscribe");
        let delivery = tokio::time::timeout(Duration::from_secs(1), consumer.recv())
            .await
            .expect("handed off")
            .expect("delivery");
        assert_eq!(delivery.tenant_id(), Some("AMAZON"));
        cancel.cancel();
        let _ = shim.await;
    }

    #[tokio::test]
    async fn unbound_exchange_publish_fails() {
        let broker = InMemoryBroker::new();
        let err = broker
            .publish_exchange("missing.exchange", "key", Delivery::new(Bytes::new()))
            .await
            .expect_err("no binding");
        assert!(err.to_string().contains("no binding"));
    }
}
