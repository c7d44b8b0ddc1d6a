//! Deterministic in-memory transport for driving the connection manager.

#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use huddle_link::{
    ClientConfig, Connection, ConnectionManager, ConnectionState, Connector, CredentialResolver,
    StaticEnvironment, StaticToken, Transport, TransportError, TransportEvent,
};
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::time::timeout;
use url::Url;

/// One opened fake connection, as seen from the server side.
#[derive(Clone)]
pub struct FakeLink {
    sent: Arc<Mutex<Vec<String>>>,
    open: Arc<AtomicBool>,
    fail_sends: Arc<AtomicBool>,
    events: mpsc::Sender<TransportEvent>,
}

impl FakeLink {
    /// Deliver a JSON frame to the client.
    pub async fn push(&self, frame: Value) {
        self.push_raw(frame.to_string()).await;
    }

    pub async fn push_raw(&self, text: impl Into<String>) {
        self.events
            .send(TransportEvent::Frame(text.into()))
            .await
            .expect("client stopped listening");
    }

    /// Server-side close.
    pub async fn close(&self) {
        self.open.store(false, Ordering::SeqCst);
        let _ = self.events.send(TransportEvent::Closed).await;
    }

    pub async fn error(&self, reason: &str) {
        let _ = self.events.send(TransportEvent::Error(reason.to_string())).await;
    }

    /// Stop working without telling anyone.
    pub fn go_ghost(&self) {
        self.open.store(false, Ordering::SeqCst);
    }

    pub fn set_fail_sends(&self, fail: bool) {
        self.fail_sends.store(fail, Ordering::SeqCst);
    }

    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    pub fn sent(&self) -> Vec<String> {
        self.sent.lock().clone()
    }

    pub fn sent_json(&self) -> Vec<Value> {
        self.sent()
            .iter()
            .map(|s| serde_json::from_str(s).expect("client sent invalid JSON"))
            .collect()
    }

    /// The `type` of every frame the client sent, in order.
    pub fn sent_types(&self) -> Vec<String> {
        self.sent_json()
            .iter()
            .map(|v| v["type"].as_str().unwrap_or("").to_string())
            .collect()
    }
}

struct FakeTransport {
    link: FakeLink,
}

impl Transport for FakeTransport {
    fn send(&mut self, text: &str) -> Result<(), TransportError> {
        if !self.link.is_open() || self.link.fail_sends.load(Ordering::SeqCst) {
            return Err(TransportError::Closed);
        }
        self.link.sent.lock().push(text.to_string());
        Ok(())
    }

    fn close(&mut self) {
        self.link.open.store(false, Ordering::SeqCst);
    }

    fn is_open(&self) -> bool {
        self.link.is_open()
    }
}

#[derive(Default)]
struct ConnectorState {
    urls: Vec<Url>,
    links: Vec<FakeLink>,
    failures_remaining: usize,
    open_delay: Duration,
}

/// Connector that hands out [`FakeLink`]s and can be scripted to fail.
#[derive(Clone, Default)]
pub struct FakeConnector {
    state: Arc<Mutex<ConnectorState>>,
}

impl FakeConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `n` open attempts fail.
    pub fn fail_next(&self, n: usize) {
        self.state.lock().failures_remaining = n;
    }

    /// Make every open attempt take `delay`.
    pub fn set_open_delay(&self, delay: Duration) {
        self.state.lock().open_delay = delay;
    }

    /// Open attempts so far, failed ones included.
    pub fn attempts(&self) -> usize {
        self.state.lock().urls.len()
    }

    /// Successfully opened links so far.
    pub fn opened(&self) -> usize {
        self.state.lock().links.len()
    }

    pub fn urls(&self) -> Vec<Url> {
        self.state.lock().urls.clone()
    }

    pub fn link(&self, index: usize) -> FakeLink {
        self.state.lock().links[index].clone()
    }

    pub fn last_link(&self) -> FakeLink {
        self.state.lock().links.last().cloned().expect("nothing opened yet")
    }

    pub fn open_links(&self) -> usize {
        self.state.lock().links.iter().filter(|l| l.is_open()).count()
    }
}

#[async_trait]
impl Connector for FakeConnector {
    async fn open(&self, url: &Url) -> Result<Connection, TransportError> {
        let delay = {
            let mut state = self.state.lock();
            state.urls.push(url.clone());
            if state.failures_remaining > 0 {
                state.failures_remaining -= 1;
                return Err(TransportError::Connect("connection refused".into()));
            }
            state.open_delay
        };
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let (events_tx, events_rx) = mpsc::channel(64);
        let link = FakeLink {
            sent: Arc::new(Mutex::new(Vec::new())),
            open: Arc::new(AtomicBool::new(true)),
            fail_sends: Arc::new(AtomicBool::new(false)),
            events: events_tx,
        };
        self.state.lock().links.push(link.clone());

        Ok(Connection {
            transport: Box::new(FakeTransport { link }),
            events: events_rx,
        })
    }
}

/// Config with jitter off so timings are exact.
pub fn test_config() -> ClientConfig {
    let mut config = ClientConfig::new("live.test");
    config.backoff.jitter_ms = 0;
    config
}

pub struct Harness {
    pub manager: ConnectionManager,
    pub connector: FakeConnector,
    pub env: Arc<StaticEnvironment>,
}

pub fn harness() -> Harness {
    harness_with(test_config(), Arc::new(StaticToken("tok".into())))
}

pub fn harness_with(config: ClientConfig, resolver: Arc<dyn CredentialResolver>) -> Harness {
    let connector = FakeConnector::new();
    let env = Arc::new(StaticEnvironment::new());
    let manager = ConnectionManager::new(
        config,
        Arc::new(connector.clone()),
        resolver,
        env.clone(),
    );
    Harness { manager, connector, env }
}

pub async fn wait_for_state(manager: &ConnectionManager, wanted: ConnectionState) {
    let mut rx = manager.watch();
    let reached = timeout(Duration::from_secs(120), rx.wait_for(|v| v.state == wanted))
        .await
        .map(|r| r.is_ok())
        .unwrap_or(false);
    assert!(reached, "timed out waiting for {wanted:?}, state is {:?}", manager.state());
}

pub fn roster_ids(manager: &ConnectionManager) -> Vec<String> {
    manager.roster().into_iter().map(|p| p.user_id).collect()
}
