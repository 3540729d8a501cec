//! Client facade
//!
//! One registry, one [`ConnectionManager`], one dispatcher, behind the same
//! publish/subscribe API the server hub exposes.

use std::sync::Arc;

use serde_json::Value;

use herald_broker::{Broker, ConnectionState, Subscriber, SubscriberRegistry, SubscriptionId};
use herald_utils::Result;

use crate::config::ClientConfig;
use crate::connection::{ConnectionManager, ServerAddr};

pub struct Client {
    broker: Broker<Arc<ConnectionManager>>,
}

impl Client {
    /// Build a client from config; nothing is dialed until [`connect`](Self::connect)
    pub fn new(config: &ClientConfig) -> Result<Self> {
        let addr = match &config.server.addr {
            Some(addr) => ServerAddr::parse(addr)?,
            None => ServerAddr::default(),
        };
        Ok(Self::with_addr(addr, config))
    }

    pub fn with_addr(addr: ServerAddr, config: &ClientConfig) -> Self {
        let registry = Arc::new(SubscriberRegistry::new());
        let manager = Arc::new(ConnectionManager::new(
            addr,
            config.reconnect,
            config.outbound_buffer,
            Arc::clone(&registry),
        ));

        Self {
            broker: Broker::with_registry(registry, manager),
        }
    }

    pub fn subscribe<S>(&self, handler: S, actions: Option<Vec<String>>) -> SubscriptionId
    where
        S: Subscriber + 'static,
    {
        self.broker.subscribe(handler, actions)
    }

    pub fn subscribe_actions<S, I, A>(&self, actions: I, handler: S) -> SubscriptionId
    where
        S: Subscriber + 'static,
        I: IntoIterator<Item = A>,
        A: Into<String>,
    {
        self.broker.subscribe_actions(actions, handler)
    }

    pub fn unsubscribe(&self, id: SubscriptionId, actions: Option<&[&str]>) -> bool {
        self.broker.unsubscribe(id, actions)
    }

    /// Queue `{action, data}` for the server. `false` if not connected or
    /// the outbound queue is full.
    pub fn publish(&self, action: &str, payload: Value) -> bool {
        self.broker.publish(action, payload)
    }

    pub fn is_connection_open(&self) -> bool {
        self.broker.is_connection_open()
    }

    // ==================== Lifecycle ====================

    pub fn connect(&self) -> bool {
        self.manager().connect()
    }

    pub fn disconnect(&self) {
        self.manager().disconnect()
    }

    pub async fn close(&self) {
        self.manager().close().await
    }

    pub fn state(&self) -> ConnectionState {
        self.manager().state()
    }

    pub async fn wait_for_state(&self, target: ConnectionState) -> Result<()> {
        self.manager().wait_for_state(target).await
    }

    pub async fn wait_connected(&self) -> Result<()> {
        self.manager().wait_connected().await
    }

    pub fn manager(&self) -> &Arc<ConnectionManager> {
        self.broker.transport()
    }

    pub fn registry(&self) -> &Arc<SubscriberRegistry> {
        self.broker.registry()
    }
}

impl Drop for Client {
    fn drop(&mut self) {
        self.manager().disconnect();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ReconnectPolicy;
    use futures::{SinkExt, StreamExt};
    use herald_broker::callback;
    use herald_protocol::{Message, MessageCodec};
    use parking_lot::Mutex;
    use serde_json::json;
    use std::time::Duration;
    use tempfile::tempdir;
    use tokio::net::UnixListener;
    use tokio::time::timeout;
    use tokio_util::codec::Framed;

    const WAIT: Duration = Duration::from_secs(5);

    fn config(addr: &str) -> ClientConfig {
        let mut config = ClientConfig::default();
        config.server.addr = Some(addr.to_string());
        config.reconnect = ReconnectPolicy {
            initial_delay_ms: 5,
            max_delay_ms: 20,
            max_attempts: 3,
        };
        config
    }

    #[test]
    fn test_new_rejects_bad_addr() {
        assert!(Client::new(&config("ftp://nowhere")).is_err());
    }

    #[test]
    fn test_publish_while_disconnected() {
        let client = Client::new(&config("/nonexistent/herald.sock")).unwrap();
        let hits: Arc<Mutex<usize>> = Arc::default();
        let sink = Arc::clone(&hits);
        client.subscribe(callback(move |_| *sink.lock() += 1), None);

        assert!(!client.is_connection_open());
        assert!(!client.publish("x", json!({ "v": 1 })));
        assert_eq!(*hits.lock(), 0);
    }

    #[tokio::test]
    async fn test_round_trip_through_server() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.sock");
        let listener = UnixListener::bind(&path).unwrap();
        let client = Client::new(&config(&format!("unix://{}", path.display()))).unwrap();

        let all: Arc<Mutex<Vec<Message>>> = Arc::default();
        let only_x: Arc<Mutex<Vec<Message>>> = Arc::default();
        let sink = Arc::clone(&all);
        client.subscribe(callback(move |m| sink.lock().push(m.clone())), None);
        let sink = Arc::clone(&only_x);
        client.subscribe_actions(["x"], callback(move |m| sink.lock().push(m.clone())));

        assert!(client.connect());
        let (stream, _) = timeout(WAIT, listener.accept()).await.unwrap().unwrap();
        let mut server = Framed::new(stream, MessageCodec::new());
        timeout(WAIT, client.wait_connected()).await.unwrap().unwrap();

        assert!(client.publish("up", json!("from client")));
        let frame = timeout(WAIT, server.next()).await.unwrap().unwrap().unwrap();
        assert_eq!(frame.decode().unwrap(), Message::new("up", json!("from client")));

        server.send(Message::new("x", json!({ "v": 1 }))).await.unwrap();
        server.send(Message::new("y", json!({ "v": 2 }))).await.unwrap();

        timeout(WAIT, async {
            while all.lock().iter().filter(|m| m.action == "y").count() == 0 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();

        let remote: Vec<Message> = all
            .lock()
            .iter()
            .filter(|m| m.action != herald_protocol::actions::CONNECTION_STATE)
            .cloned()
            .collect();
        assert_eq!(
            remote,
            vec![
                Message::new("x", json!({ "v": 1 })),
                Message::new("y", json!({ "v": 2 })),
            ]
        );
        assert_eq!(*only_x.lock(), vec![Message::new("x", json!({ "v": 1 }))]);

        client.disconnect();
        assert_eq!(client.state(), ConnectionState::Disconnected);
    }
}
