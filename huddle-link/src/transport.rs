//! Abstract duplex transport plus the WebSocket implementation.
//!
//! A [`Connector`] opens a [`Connection`]: a [`Transport`] handle for the
//! outbound direction and a channel of [`TransportEvent`]s for the inbound
//! one. The connection manager only ever talks to these traits, so tests
//! substitute a deterministic fake for the socket.
//!
//! ```text
//!            ┌──────────── WsTransport::send ───────────┐
//!            ▼                                          │
//!   writer task ──► WebSocket sink       ConnectionManager
//!                                                       ▲
//!   reader task ◄── WebSocket stream ── TransportEvent ─┘
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use url::Url;

/// Inbound capacity per connection.
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Something that happened on the inbound side of a transport.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    /// A text frame.
    Frame(String),
    /// The transport failed; a `Closed` may or may not follow.
    Error(String),
    /// The transport is gone.
    Closed,
}

/// Outbound half of an open transport.
pub trait Transport: Send {
    /// Queue a text frame for transmission.
    fn send(&mut self, text: &str) -> Result<(), TransportError>;

    /// Close the transport. Idempotent.
    fn close(&mut self);

    /// Whether the transport still believes it is open.
    fn is_open(&self) -> bool;
}

/// An opened transport and its inbound event stream.
pub struct Connection {
    pub transport: Box<dyn Transport>,
    pub events: mpsc::Receiver<TransportEvent>,
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("open", &self.transport.is_open())
            .finish()
    }
}

/// Opens transports.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn open(&self, url: &Url) -> Result<Connection, TransportError>;
}

/// Connector backed by tokio-tungstenite.
#[derive(Debug, Clone, Copy, Default)]
pub struct WsConnector;

enum WriterCommand {
    Text(String),
    Close,
}

/// WebSocket transport. Frames are handed to a writer task.
pub struct WsTransport {
    outgoing: mpsc::UnboundedSender<WriterCommand>,
    open: Arc<AtomicBool>,
}

impl Transport for WsTransport {
    fn send(&mut self, text: &str) -> Result<(), TransportError> {
        if !self.is_open() {
            return Err(TransportError::Closed);
        }
        self.outgoing
            .send(WriterCommand::Text(text.to_owned()))
            .map_err(|_| TransportError::Closed)
    }

    fn close(&mut self) {
        if self.open.swap(false, Ordering::SeqCst) {
            let _ = self.outgoing.send(WriterCommand::Close);
        }
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst) && !self.outgoing.is_closed()
    }
}

impl Drop for WsTransport {
    fn drop(&mut self) {
        self.close();
    }
}

#[async_trait]
impl Connector for WsConnector {
    async fn open(&self, url: &Url) -> Result<Connection, TransportError> {
        let (ws_stream, _) = tokio_tungstenite::connect_async(url.as_str())
            .await
            .map_err(|e| TransportError::Connect(e.to_string()))?;
        let (mut ws_writer, mut ws_reader) = ws_stream.split();

        let open = Arc::new(AtomicBool::new(true));
        let (out_tx, mut out_rx) = mpsc::unbounded_channel::<WriterCommand>();
        let (event_tx, event_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);

        // Writer task: forward outgoing frames to the socket.
        let writer_open = open.clone();
        let writer_events = event_tx.clone();
        tokio::spawn(async move {
            while let Some(cmd) = out_rx.recv().await {
                match cmd {
                    WriterCommand::Text(text) => {
                        if let Err(e) = ws_writer.send(Message::Text(text.into())).await {
                            writer_open.store(false, Ordering::SeqCst);
                            let _ = writer_events.send(TransportEvent::Error(e.to_string())).await;
                            break;
                        }
                    }
                    WriterCommand::Close => {
                        let _ = ws_writer.close().await;
                        break;
                    }
                }
            }
        });

        // Reader task: translate socket messages into transport events.
        let reader_open = open.clone();
        tokio::spawn(async move {
            while let Some(msg) = ws_reader.next().await {
                let event = match msg {
                    Ok(Message::Text(text)) => TransportEvent::Frame(text.as_str().to_owned()),
                    Ok(Message::Binary(data)) => match String::from_utf8(data.to_vec()) {
                        Ok(text) => TransportEvent::Frame(text),
                        Err(_) => {
                            log::debug!("Dropping non-UTF-8 binary frame");
                            continue;
                        }
                    },
                    Ok(Message::Close(_)) => break,
                    Ok(_) => continue,
                    Err(e) => {
                        reader_open.store(false, Ordering::SeqCst);
                        let _ = event_tx.send(TransportEvent::Error(e.to_string())).await;
                        break;
                    }
                };
                if event_tx.send(event).await.is_err() {
                    break;
                }
            }
            reader_open.store(false, Ordering::SeqCst);
            let _ = event_tx.send(TransportEvent::Closed).await;
        });

        log::debug!("WebSocket open: {}", redact(url));
        Ok(Connection {
            transport: Box::new(WsTransport {
                outgoing: out_tx,
                open,
            }),
            events: event_rx,
        })
    }
}

/// URL with its query stripped, for logs. The query carries credentials.
pub fn redact(url: &Url) -> String {
    let mut clean = url.clone();
    clean.set_query(None);
    clean.to_string()
}

/// Transport failures. Never fatal while reconnection is desired.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportError {
    /// Opening the transport failed.
    Connect(String),
    /// The endpoint URL could not be built.
    InvalidUrl(String),
    /// The transport is no longer open.
    Closed,
}

impl std::fmt::Display for TransportError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Connect(e) => write!(f, "Connect failed: {e}"),
            Self::InvalidUrl(e) => write!(f, "Invalid endpoint URL: {e}"),
            Self::Closed => write!(f, "Transport closed"),
        }
    }
}

impl std::error::Error for TransportError {}
