//! Integration tests for devbus core functionality
//! Covers pub/sub delivery, RPC correlation and the reconnect lifecycle

use crate::*;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

/// Test subscriber collecting everything delivered to it
#[derive(Default)]
pub struct TestSubscriber {
    pub received: Mutex<Vec<Message>>,
}

impl TestSubscriber {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub async fn count(&self) -> usize {
        self.received.lock().await.len()
    }
}

#[async_trait::async_trait]
impl Listener for TestSubscriber {
    async fn on_receive(&self, msg: Message) {
        self.received.lock().await.push(msg);
    }
}

/// Calculator-style RPC handler: adds a pair of numbers from the payload
pub struct AddHandler;

#[async_trait::async_trait]
impl RpcListener for AddHandler {
    async fn on_invoke(&self, request: Message, reply: ReplySlot) {
        match bincode::deserialize::<(i32, i32)>(&request.payload) {
            Ok((a, b)) => {
                let sum = a + b;
                reply
                    .complete(bincode::serialize(&sum).unwrap_or_default())
                    .await;
            }
            Err(_) => reply.fail(Code::InvalidArgument).await,
        }
    }
}

/// Handler that refuses every call
pub struct DenyHandler;

#[async_trait::async_trait]
impl RpcListener for DenyHandler {
    async fn on_invoke(&self, _request: Message, reply: ReplySlot) {
        reply.fail(Code::Unauthenticated).await;
    }
}

/// Poll a condition until it holds or the guard elapses
async fn wait_until(what: &str, mut condition: impl FnMut() -> bool) {
    for _ in 0..40 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    panic!("timed out waiting for {what}");
}

/// Poll a subscriber until it has seen the expected number of deliveries
async fn wait_for_deliveries(subscriber: &Arc<TestSubscriber>, expected: usize) {
    for _ in 0..40 {
        if subscriber.count().await >= expected {
            return;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    panic!(
        "timed out waiting for {expected} deliveries, got {}",
        subscriber.count().await
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_pubsub_roundtrip() {
        let bus = LoopbackBus::new();
        let publisher = BusClient::new(bus.endpoint("sensors"), "device", "sensors")
            .await
            .unwrap();
        let display = BusClient::new(bus.endpoint("display"), "device", "display")
            .await
            .unwrap();
        publisher.connect().await.unwrap();
        display.connect().await.unwrap();

        let topic = Address::topic("device", "sensors", "cabin/temperature");
        let subscriber = TestSubscriber::new();
        display
            .register_listener(&topic, subscriber.clone())
            .await
            .unwrap();

        publisher
            .publish(&topic, bincode::serialize(&25.5f64).unwrap())
            .await
            .unwrap();

        wait_for_deliveries(&subscriber, 1).await;
        let received = subscriber.received.lock().await;
        assert_eq!(received.len(), 1);
        assert_eq!(received[0].source, topic);
        let value: f64 = bincode::deserialize(&received[0].payload).unwrap();
        assert_eq!(value, 25.5);
        drop(received);

        publisher.shutdown().await.unwrap();
        display.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_notification_roundtrip() {
        let bus = LoopbackBus::new();
        let sensors = BusClient::new(bus.endpoint("sensors"), "device", "sensors")
            .await
            .unwrap();
        let display = BusClient::new(bus.endpoint("display"), "device", "display")
            .await
            .unwrap();
        sensors.connect().await.unwrap();
        display.connect().await.unwrap();

        let topic = Address::topic("device", "sensors", "door/open");
        let subscriber = TestSubscriber::new();
        display
            .register_listener(&topic, subscriber.clone())
            .await
            .unwrap();

        sensors
            .notify(&topic, display.reply_address(), b"open".to_vec())
            .await
            .unwrap();

        wait_for_deliveries(&subscriber, 1).await;
        assert_eq!(subscriber.received.lock().await[0].payload, b"open".to_vec());

        sensors.shutdown().await.unwrap();
        display.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_rpc_roundtrip() {
        let bus = LoopbackBus::new();
        let server = BusClient::new(bus.endpoint("calculator"), "device", "calculator")
            .await
            .unwrap();
        let caller = BusClient::new(bus.endpoint("dash"), "device", "dash")
            .await
            .unwrap();
        server.connect().await.unwrap();
        caller.connect().await.unwrap();

        let method = Address::method("device", "calculator", "add");
        server
            .register_rpc_listener(&method, Arc::new(AddHandler))
            .await
            .unwrap();

        let response = caller
            .invoke_method(
                method,
                bincode::serialize(&(10, 5)).unwrap(),
                CallOptions::with_timeout(Duration::from_secs(2)),
            )
            .await
            .unwrap();

        assert_eq!(response.msg_type, MessageType::Response);
        assert!(response.request_id.is_some());
        let sum: i32 = bincode::deserialize(&response.payload).unwrap();
        assert_eq!(sum, 15);

        server.shutdown().await.unwrap();
        caller.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_rpc_remote_failure_surfaces_code() {
        let bus = LoopbackBus::new();
        let server = BusClient::new(bus.endpoint("vault"), "device", "vault")
            .await
            .unwrap();
        let caller = BusClient::new(bus.endpoint("dash"), "device", "dash")
            .await
            .unwrap();
        server.connect().await.unwrap();
        caller.connect().await.unwrap();

        let method = Address::method("device", "vault", "unlock");
        server
            .register_rpc_listener(&method, Arc::new(DenyHandler))
            .await
            .unwrap();

        let err = caller
            .invoke_method(
                method,
                Vec::new(),
                CallOptions::with_timeout(Duration::from_secs(2)),
            )
            .await
            .unwrap_err();
        assert_eq!(err.code(), Code::Unauthenticated);

        server.shutdown().await.unwrap();
        caller.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_invoke_times_out_without_server() {
        let bus = LoopbackBus::new();
        let caller = BusClient::new(bus.endpoint("dash"), "device", "dash")
            .await
            .unwrap();
        caller.connect().await.unwrap();

        let err = caller
            .invoke_method(
                Address::method("device", "ghost", "noop"),
                Vec::new(),
                CallOptions::with_timeout(Duration::from_millis(200)),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, Error::DeadlineExceeded { .. }));

        caller.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_late_joiner_catches_up_from_retained() {
        let bus = LoopbackBus::new();
        let publisher = BusClient::new(bus.endpoint("sensors"), "device", "sensors")
            .await
            .unwrap();
        let display = BusClient::new(bus.endpoint("display"), "device", "display")
            .await
            .unwrap();
        publisher.connect().await.unwrap();
        display.connect().await.unwrap();

        let topic = Address::topic("device", "sensors", "cabin/temperature");
        publisher
            .publish(&topic, b"cached".to_vec())
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;

        // The first listener only arms dispatching
        let first = TestSubscriber::new();
        display
            .register_listener(&topic, first.clone())
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(first.count().await, 0);

        // The second listener is caught up with the retained message
        let second = TestSubscriber::new();
        display
            .register_listener(&topic, second.clone())
            .await
            .unwrap();
        wait_for_deliveries(&second, 1).await;
        assert_eq!(second.received.lock().await[0].payload, b"cached".to_vec());
        assert_eq!(first.count().await, 0);

        publisher.shutdown().await.unwrap();
        display.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_interruption_preserves_registrations_and_replays() {
        let bus = LoopbackBus::new();
        let endpoint = bus.endpoint("display");
        let display = BusClient::new(endpoint.clone(), "device", "display")
            .await
            .unwrap();
        display.connect().await.unwrap();

        let topic = Address::topic("device", "sensors", "cabin/temperature");
        let subscriber = TestSubscriber::new();
        display
            .register_listener(&topic, subscriber.clone())
            .await
            .unwrap();
        assert_eq!(endpoint.enable_count(&topic), 1);

        // The broker loses its dispatch state; the client must win it back
        endpoint.inject_interruption().await;
        wait_until("rebind after interruption", || display.is_connected()).await;

        assert_eq!(
            endpoint.enable_count(&topic),
            1,
            "each registered address is replayed exactly once"
        );

        // Traffic flows again without re-registering
        let publisher = BusClient::new(bus.endpoint("sensors"), "device", "sensors")
            .await
            .unwrap();
        publisher.connect().await.unwrap();
        publisher.publish(&topic, b"again".to_vec()).await.unwrap();
        wait_for_deliveries(&subscriber, 1).await;

        publisher.shutdown().await.unwrap();
        display.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_disconnect_cancels_pending_and_clears_registrations() {
        let bus = LoopbackBus::new();
        let display = BusClient::new(bus.endpoint("display"), "device", "display")
            .await
            .unwrap();
        display.connect().await.unwrap();

        let topic = Address::topic("device", "sensors", "cabin/temperature");
        let subscriber = TestSubscriber::new();
        display
            .register_listener(&topic, subscriber.clone())
            .await
            .unwrap();

        let call = tokio::spawn({
            let display = display.clone();
            async move {
                display
                    .invoke_method(
                        Address::method("device", "ghost", "noop"),
                        Vec::new(),
                        CallOptions::with_timeout(Duration::from_secs(5)),
                    )
                    .await
            }
        });
        tokio::time::sleep(Duration::from_millis(100)).await;

        display.disconnect().await.unwrap();

        let err = call.await.unwrap().unwrap_err();
        assert!(matches!(err, Error::Cancelled { .. }));
        assert!(display.is_disconnected());

        // Registrations did not survive the explicit teardown
        display.connect().await.unwrap();
        let publisher = BusClient::new(bus.endpoint("sensors"), "device", "sensors")
            .await
            .unwrap();
        publisher.connect().await.unwrap();
        publisher.publish(&topic, b"gone".to_vec()).await.unwrap();
        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(subscriber.count().await, 0);

        publisher.shutdown().await.unwrap();
        display.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_connect_is_idempotent() {
        let bus = LoopbackBus::new();
        let client = BusClient::new(bus.endpoint("display"), "device", "display")
            .await
            .unwrap();

        let (a, b) = tokio::join!(client.connect(), client.connect());
        a.unwrap();
        b.unwrap();
        assert!(client.is_connected());
        assert!(!client.is_disconnected());

        client.connect().await.unwrap();
        assert!(client.is_connected());

        client.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_ready_watch_follows_lifecycle() {
        let bus = LoopbackBus::new();
        let endpoint = bus.endpoint("display");
        let client = BusClient::new(endpoint.clone(), "device", "display")
            .await
            .unwrap();
        let ready = client.subscribe_ready();
        assert!(!*ready.borrow());

        client.connect().await.unwrap();
        assert!(*ready.borrow());

        endpoint.inject_interruption().await;
        wait_until("not-ready after interruption", || !*ready.borrow()).await;
        wait_until("ready after rebind", || *ready.borrow()).await;

        client.disconnect().await.unwrap();
        assert!(!*ready.borrow());

        client.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_facade_validation() {
        let bus = LoopbackBus::new();
        let err = BusClient::new(bus.endpoint("nameless"), "device", "")
            .await
            .err()
            .expect("empty entity must be rejected");
        assert!(matches!(err, Error::InvalidArgument { .. }));

        let client = BusClient::new(bus.endpoint("display"), "device", "display")
            .await
            .unwrap();
        client.connect().await.unwrap();

        let method = Address::method("device", "engine", "start");
        let err = client.publish(&method, Vec::new()).await.unwrap_err();
        assert!(matches!(err, Error::InvalidArgument { .. }));

        let err = client
            .register_listener(&method, TestSubscriber::new())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidArgument { .. }));

        client.shutdown().await.unwrap();
    }
}
