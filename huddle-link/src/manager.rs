//! Connection manager: owns the transport, the state machine and the
//! public `connect / disconnect / send` contract.
//!
//! ## Architecture
//!
//! ```text
//!  ConnectionManager (handle)           Engine (one spawned task)
//!  ──────────────────────────           ─────────────────────────
//!  connect / disconnect / send ──┐
//!  notify(lifecycle)             ├──► command channel ──┐
//!  timers (watchdog, keepalive,  │                      ▼
//!          reconnect) ───────────┤             ┌─────────────────┐
//!  open task (credentials +      │             │ state machine   │──► watch: SessionView
//!             connector) ────────┘             │ roster          │    (state + roster)
//!                                              │ outgoing queue  │
//!  transport events ──────────────────────────►│ backoff         │──► broadcast: relay
//!                                              └─────────────────┘
//! ```
//!
//! The engine handles one input at a time and never awaits while holding
//! state, so every mutation is atomic with respect to every other input.
//! Anything asynchronous (credential resolution, opening, timers) runs in
//! its own task and reports back through the command channel, stamped with
//! the generation it started under. Each teardown bumps the generation,
//! which silently invalidates every report from before it.
//!
//! State and roster are published together as one [`SessionView`], once
//! per handled input, so an observer never sees a half-applied teardown.
//!
//! None of the public operations fail: transport and credential problems
//! turn into retries, malformed frames are dropped, and queue overflow
//! evicts the oldest frame. The connection state is the only failure signal.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use serde::Serialize;
use tokio::sync::{broadcast, mpsc, oneshot, watch};

use crate::backoff::Backoff;
use crate::config::ClientConfig;
use crate::environment::{Environment, LifecycleSignal};
use crate::identity::{resolve_identity, stream_url, CredentialResolver};
use crate::protocol::{self, InboundMessage, LocalSnapshot, OutboundMessage};
use crate::queue::OutgoingQueue;
use crate::relay::{EventRelay, RelayedEvent};
use crate::roster::{Participant, Roster};
use crate::state::{ConnectionState, Transition};
use crate::timers::{self, TimerSet, WatchdogAction};
use crate::transport::{redact, Connection, Connector, Transport, TransportError, TransportEvent};

/// Counters for monitoring connection health.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClientStats {
    pub frames_in: u64,
    pub frames_out: u64,
    pub malformed_dropped: u64,
    pub queue_overflow_dropped: u64,
    pub reconnects: u64,
    /// Frames currently waiting in the outgoing queue.
    pub queued: usize,
}

#[derive(Debug, Default)]
struct AtomicClientStats {
    frames_in: AtomicU64,
    frames_out: AtomicU64,
    malformed_dropped: AtomicU64,
    queue_overflow_dropped: AtomicU64,
    reconnects: AtomicU64,
    queued: AtomicUsize,
}

impl AtomicClientStats {
    fn snapshot(&self) -> ClientStats {
        ClientStats {
            frames_in: self.frames_in.load(Ordering::Relaxed),
            frames_out: self.frames_out.load(Ordering::Relaxed),
            malformed_dropped: self.malformed_dropped.load(Ordering::Relaxed),
            queue_overflow_dropped: self.queue_overflow_dropped.load(Ordering::Relaxed),
            reconnects: self.reconnects.load(Ordering::Relaxed),
            queued: self.queued.load(Ordering::Relaxed),
        }
    }
}

/// Connection state and roster as of the last handled input.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionView {
    pub state: ConnectionState,
    /// Participants in display order.
    pub roster: Vec<Participant>,
}

impl Default for SessionView {
    fn default() -> Self {
        Self {
            state: ConnectionState::Idle,
            roster: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Tick {
    Watchdog(u64),
    Keepalive(u64),
    Reconnect(u64),
}

enum Command {
    Connect(String, oneshot::Sender<()>),
    Disconnect(oneshot::Sender<()>),
    Send(String),
    Lifecycle(LifecycleSignal),
    Settle(oneshot::Sender<()>),
    Opened { generation: u64, connection: Connection },
    OpenFailed { generation: u64, error: TransportError },
    Tick(Tick),
}

/// Handle to a stream session.
///
/// Every method enqueues a command for the engine task. `send` and `notify`
/// return immediately; `connect`, `disconnect` and `settled` wait for the
/// engine to finish the command. Dropping the handle shuts the engine down
/// and closes the transport.
pub struct ConnectionManager {
    commands: mpsc::UnboundedSender<Command>,
    view: watch::Receiver<SessionView>,
    relay: EventRelay,
    stats: Arc<AtomicClientStats>,
}

impl ConnectionManager {
    /// Create a manager and spawn its engine. Must be called inside a tokio runtime.
    pub fn new(
        config: ClientConfig,
        connector: Arc<dyn Connector>,
        resolver: Arc<dyn CredentialResolver>,
        env: Arc<dyn Environment>,
    ) -> Self {
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let (view_tx, view_rx) = watch::channel(SessionView::default());
        let relay = EventRelay::new(config.event_capacity);
        let stats = Arc::new(AtomicClientStats::default());

        let engine = Engine {
            queue: OutgoingQueue::new(config.queue_capacity),
            backoff: Backoff::new(config.backoff.clone()),
            config,
            connector,
            resolver,
            env,
            commands: commands_rx,
            mailbox: commands_tx.downgrade(),
            state: ConnectionState::Idle,
            roster: Roster::new(),
            view_tx,
            view_dirty: false,
            timers: TimerSet::new(),
            relay: relay.clone(),
            stats: stats.clone(),
            stream_id: None,
            reconnect_desired: false,
            connecting: false,
            generation: 0,
            transport: None,
            inbound: None,
        };
        tokio::spawn(engine.run());

        Self {
            commands: commands_tx,
            view: view_rx,
            relay,
            stats,
        }
    }

    /// Join `stream_id`, replacing any current session. No-op if already on it.
    ///
    /// Resolves once the previous session is torn down and the first open
    /// attempt has started.
    pub async fn connect(&self, stream_id: impl Into<String>) {
        let (done_tx, done_rx) = oneshot::channel();
        self.command(Command::Connect(stream_id.into(), done_tx));
        let _ = done_rx.await;
    }

    /// Leave the session and stop reconnecting. Idempotent.
    ///
    /// Resolves once the transport is closed and the empty roster and
    /// `Disconnected` state are visible to every observer.
    pub async fn disconnect(&self) {
        let (done_tx, done_rx) = oneshot::channel();
        self.command(Command::Disconnect(done_tx));
        let _ = done_rx.await;
    }

    /// Send a message now, or queue it until the next successful open.
    ///
    /// A message that cannot be serialized is logged and dropped.
    pub fn send<M: Serialize + ?Sized>(&self, message: &M) {
        match protocol::encode(message) {
            Ok(frame) => self.command(Command::Send(frame)),
            Err(e) => log::warn!("Dropping unserializable outgoing message: {e}"),
        }
    }

    /// Send an already serialized frame.
    pub fn send_raw(&self, frame: impl Into<String>) {
        self.command(Command::Send(frame.into()));
    }

    /// Report a platform lifecycle transition.
    pub fn notify(&self, signal: LifecycleSignal) {
        self.command(Command::Lifecycle(signal));
    }

    /// Current connection state.
    pub fn state(&self) -> ConnectionState {
        self.view.borrow().state
    }

    /// Snapshot of the roster, in display order.
    pub fn roster(&self) -> Vec<Participant> {
        self.view.borrow().roster.clone()
    }

    /// Observe state and roster changes.
    pub fn watch(&self) -> watch::Receiver<SessionView> {
        self.view.clone()
    }

    /// Subscribe to inbound messages of kinds the core does not handle.
    pub fn subscribe_events(&self) -> broadcast::Receiver<RelayedEvent> {
        self.relay.subscribe()
    }

    pub fn stats(&self) -> ClientStats {
        self.stats.snapshot()
    }

    /// Resolves once every command issued before this call has been handled.
    pub async fn settled(&self) {
        let (done_tx, done_rx) = oneshot::channel();
        self.command(Command::Settle(done_tx));
        let _ = done_rx.await;
    }

    fn command(&self, command: Command) {
        if self.commands.send(command).is_err() {
            log::debug!("Connection engine has stopped; command ignored");
        }
    }
}

struct Engine {
    config: ClientConfig,
    connector: Arc<dyn Connector>,
    resolver: Arc<dyn CredentialResolver>,
    env: Arc<dyn Environment>,

    commands: mpsc::UnboundedReceiver<Command>,
    /// Weak so that timers and open tasks never keep the engine alive.
    mailbox: mpsc::WeakUnboundedSender<Command>,

    state: ConnectionState,
    roster: Roster,
    view_tx: watch::Sender<SessionView>,
    /// State or roster changed since the last publish.
    view_dirty: bool,
    queue: OutgoingQueue,
    backoff: Backoff,
    timers: TimerSet,
    relay: EventRelay,
    stats: Arc<AtomicClientStats>,

    stream_id: Option<String>,
    reconnect_desired: bool,
    /// An open attempt is in flight for the current generation.
    connecting: bool,
    generation: u64,
    transport: Option<Box<dyn Transport>>,
    inbound: Option<mpsc::Receiver<TransportEvent>>,
}

impl Engine {
    async fn run(mut self) {
        loop {
            tokio::select! {
                biased;
                event = next_event(&mut self.inbound) => self.on_transport_event(event),
                command = self.commands.recv() => match command {
                    Some(command) => self.handle(command),
                    None => break,
                },
            }
            self.publish_view();
        }
        log::debug!("All handles dropped, shutting down");
        self.disconnect();
        self.publish_view();
    }

    fn handle(&mut self, command: Command) {
        match command {
            Command::Connect(stream_id, done) => {
                self.connect(stream_id);
                self.publish_view();
                let _ = done.send(());
            }
            Command::Disconnect(done) => {
                self.disconnect();
                self.publish_view();
                let _ = done.send(());
            }
            Command::Send(frame) => self.send(frame),
            Command::Lifecycle(signal) => self.on_lifecycle(signal),
            Command::Settle(done) => {
                let _ = done.send(());
            }
            Command::Opened { generation, connection } => self.on_opened(generation, connection),
            Command::OpenFailed { generation, error } => self.on_open_failed(generation, error),
            Command::Tick(tick) => self.on_tick(tick),
        }
    }

    // ── Public contract ─────────────────────────────────────────────

    fn connect(&mut self, stream_id: String) {
        if self.reconnect_desired && self.stream_id.as_deref() == Some(stream_id.as_str()) {
            log::debug!("Already on stream {stream_id}");
            return;
        }
        if let Some(previous) = &self.stream_id {
            log::info!("Leaving stream {previous} for {stream_id}");
        }

        self.teardown_transport();
        self.clear_roster();
        self.backoff.reset();
        self.stream_id = Some(stream_id);
        self.reconnect_desired = true;
        self.transition(Transition::Connect);
        self.open();
    }

    fn disconnect(&mut self) {
        self.reconnect_desired = false;
        self.teardown_transport();
        self.clear_roster();
        self.queue.clear();
        self.sync_queue_stat();
        self.backoff.reset();
        if let Some(stream_id) = self.stream_id.take() {
            log::info!("Disconnected from stream {stream_id}");
        }
        self.transition(Transition::Disconnect);
    }

    fn send(&mut self, frame: String) {
        if self.state.is_open() && self.transport.is_some() {
            match self.transmit(&frame) {
                Ok(()) => return,
                Err(e) => {
                    // Queue first so the frame is replayed ahead of anything sent later.
                    self.enqueue(frame);
                    self.force_close(&format!("send failed: {e}"));
                    return;
                }
            }
        }
        self.enqueue(frame);
    }

    // ── Opening ─────────────────────────────────────────────────────

    fn open(&mut self) {
        if self.connecting {
            log::debug!("Open already in flight");
            return;
        }
        if !self.reconnect_desired {
            return;
        }
        let Some(stream_id) = self.stream_id.clone() else {
            return;
        };

        self.connecting = true;
        if self.state == ConnectionState::Reconnecting {
            self.transition(Transition::Retry);
        }

        let generation = self.generation;
        let connector = self.connector.clone();
        let resolver = self.resolver.clone();
        let env = self.env.clone();
        let host = self.config.host.clone();
        let secure = self.config.secure;
        let timeout = self.config.connect_timeout();
        let mailbox = self.mailbox.clone();

        tokio::spawn(async move {
            let identity = resolve_identity(resolver.as_ref(), env.as_ref(), timeout).await;
            let command = match stream_url(&host, secure, &stream_id, &identity) {
                Ok(url) => {
                    log::info!("Opening {}", redact(&url));
                    match tokio::time::timeout(timeout, connector.open(&url)).await {
                        Ok(Ok(connection)) => Command::Opened { generation, connection },
                        Ok(Err(error)) => Command::OpenFailed { generation, error },
                        Err(_) => Command::OpenFailed {
                            generation,
                            error: TransportError::Connect(format!("timed out after {timeout:?}")),
                        },
                    }
                }
                Err(e) => Command::OpenFailed {
                    generation,
                    error: TransportError::InvalidUrl(e.to_string()),
                },
            };

            let undelivered = match mailbox.upgrade() {
                Some(tx) => tx.send(command).err().map(|e| e.0),
                None => Some(command),
            };
            if let Some(Command::Opened { mut connection, .. }) = undelivered {
                connection.transport.close();
            }
        });
    }

    fn on_opened(&mut self, generation: u64, mut connection: Connection) {
        if generation != self.generation {
            log::debug!("Discarding transport from a superseded attempt");
            connection.transport.close();
            return;
        }

        let Connection { transport, events } = connection;
        self.connecting = false;
        self.transport = Some(transport);
        self.inbound = Some(events);
        self.backoff.reset();

        let handshake = [
            OutboundMessage::resume(self.local_snapshot()),
            OutboundMessage::request_full_state(),
        ];
        for message in &handshake {
            let frame = match message.encode() {
                Ok(frame) => frame,
                Err(e) => {
                    log::error!("Failed to encode handshake: {e}");
                    continue;
                }
            };
            if let Err(e) = self.transmit(&frame) {
                self.force_close(&format!("handshake failed: {e}"));
                return;
            }
        }

        if !self.flush_queue() {
            return;
        }

        self.start_periodic();
        self.transition(Transition::Opened);
    }

    fn on_open_failed(&mut self, generation: u64, error: TransportError) {
        if generation != self.generation {
            return;
        }
        log::warn!("Open failed: {error}");
        self.on_closed();
    }

    fn local_snapshot(&self) -> LocalSnapshot {
        let markers = self.env.playback_markers();
        LocalSnapshot {
            last_known_playback_time: markers.time,
            last_playback_state: markers.state,
            identity: self.env.load_profile(),
        }
    }

    /// Replay the outgoing queue in order. Returns `false` if the transport died.
    fn flush_queue(&mut self) -> bool {
        if !self.queue.is_empty() {
            log::info!("Replaying {} queued frames", self.queue.len());
        }
        while let Some(frame) = self.queue.pop_front() {
            if let Err(e) = self.transmit(&frame) {
                self.queue.push_front(frame);
                self.sync_queue_stat();
                self.force_close(&format!("replay failed: {e}"));
                return false;
            }
        }
        self.sync_queue_stat();
        true
    }

    fn start_periodic(&mut self) {
        let generation = self.generation;
        self.timers.arm_watchdog(timers::spawn_periodic(
            self.config.watchdog_interval(),
            self.mailbox.clone(),
            move || Command::Tick(Tick::Watchdog(generation)),
        ));
        self.timers.arm_keepalive(timers::spawn_periodic(
            self.config.keepalive_interval(),
            self.mailbox.clone(),
            move || Command::Tick(Tick::Keepalive(generation)),
        ));
    }

    // ── Inbound ─────────────────────────────────────────────────────

    fn on_transport_event(&mut self, event: Option<TransportEvent>) {
        match event {
            Some(TransportEvent::Frame(text)) => self.on_frame(&text),
            Some(TransportEvent::Error(e)) => self.force_close(&format!("transport error: {e}")),
            Some(TransportEvent::Closed) | None => {
                log::info!("Transport closed");
                self.on_closed();
            }
        }
    }

    fn on_frame(&mut self, text: &str) {
        self.stats.frames_in.fetch_add(1, Ordering::Relaxed);

        let message = match InboundMessage::parse(text) {
            Ok(message) => message,
            Err(e) => {
                self.stats.malformed_dropped.fetch_add(1, Ordering::Relaxed);
                log::warn!("Dropping malformed frame: {e}");
                return;
            }
        };

        match message {
            InboundMessage::Pong => log::trace!("pong"),
            InboundMessage::Other { kind, payload } => {
                let reached = self.relay.relay(kind.as_str(), payload);
                log::debug!("Relayed {kind} to {reached} subscribers");
            }
            message => {
                if self.roster.apply(&message) {
                    log::debug!("Roster {} applied, {} present", message.kind(), self.roster.len());
                    self.view_dirty = true;
                }
            }
        }
    }

    // ── Closing ─────────────────────────────────────────────────────

    /// Invalidate everything tied to the current transport and close it.
    fn teardown_transport(&mut self) {
        self.generation = self.generation.wrapping_add(1);
        self.connecting = false;
        self.timers.cancel_all();
        self.inbound = None;
        if let Some(mut transport) = self.transport.take() {
            transport.close();
        }
    }

    fn force_close(&mut self, reason: &str) {
        log::warn!("Force-closing transport: {reason}");
        if let Some(transport) = self.transport.as_mut() {
            transport.close();
        }
        self.on_closed();
    }

    /// Close handler: every path that loses the transport ends here.
    fn on_closed(&mut self) {
        self.teardown_transport();

        if !self.reconnect_desired {
            self.clear_roster();
            self.transition(Transition::Disconnect);
            return;
        }

        self.transition(Transition::Dropped);
        let delay = self.backoff.next_delay();
        self.stats.reconnects.fetch_add(1, Ordering::Relaxed);
        log::info!(
            "Reconnecting to {} in {delay:?} (attempt {})",
            self.stream_id.as_deref().unwrap_or("?"),
            self.backoff.attempt()
        );
        self.timers.arm_reconnect(timers::spawn_once(
            delay,
            self.mailbox.clone(),
            Command::Tick(Tick::Reconnect(self.generation)),
        ));
    }

    /// Drop whatever is current and open again without waiting for backoff.
    fn reconnect_now(&mut self, reason: &str) {
        log::info!("Reconnecting immediately: {reason}");
        self.teardown_transport();
        self.stats.reconnects.fetch_add(1, Ordering::Relaxed);
        if self.state == ConnectionState::Open {
            self.transition(Transition::Dropped);
        }
        self.open();
    }

    // ── Timers and lifecycle ────────────────────────────────────────

    fn on_tick(&mut self, tick: Tick) {
        match tick {
            Tick::Reconnect(generation) if generation == self.generation => self.open(),
            Tick::Watchdog(generation) if generation == self.generation => self.on_watchdog(),
            Tick::Keepalive(generation) if generation == self.generation => {
                if let Ok(frame) = OutboundMessage::ping().encode() {
                    self.send(frame);
                }
            }
            stale => log::trace!("Ignoring stale {stale:?}"),
        }
    }

    fn on_watchdog(&mut self) {
        let open = self.transport.as_ref().is_some_and(|t| t.is_open());
        match timers::watchdog_action(open, self.reconnect_desired) {
            WatchdogAction::Reconnect => self.reconnect_now("watchdog found a dead transport"),
            WatchdogAction::Ping => self.check_liveness(),
            WatchdogAction::Idle => {}
        }
    }

    /// Ping the transport directly; a failed send means it is dead.
    fn check_liveness(&mut self) {
        let frame = match OutboundMessage::ping().encode() {
            Ok(frame) => frame,
            Err(_) => return,
        };
        if let Err(e) = self.transmit(&frame) {
            self.force_close(&format!("liveness ping failed: {e}"));
        }
    }

    fn on_lifecycle(&mut self, signal: LifecycleSignal) {
        log::info!("Lifecycle: {signal:?}");
        if !signal.revalidates() || !self.reconnect_desired || self.connecting {
            return;
        }
        if !self.env.is_foreground() || !self.env.is_online() {
            log::debug!("Not foreground and online; leaving recovery to backoff");
            return;
        }

        let open = self.transport.as_ref().is_some_and(|t| t.is_open());
        if open {
            self.check_liveness();
        } else {
            self.reconnect_now("lifecycle revalidation");
        }
    }

    // ── Helpers ─────────────────────────────────────────────────────

    fn transmit(&mut self, frame: &str) -> Result<(), TransportError> {
        let transport = self.transport.as_mut().ok_or(TransportError::Closed)?;
        transport.send(frame)?;
        self.stats.frames_out.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn enqueue(&mut self, frame: String) {
        if let Some(evicted) = self.queue.push(frame) {
            self.stats.queue_overflow_dropped.fetch_add(1, Ordering::Relaxed);
            log::debug!("Outgoing queue full, dropped oldest frame ({} bytes)", evicted.len());
        }
        self.sync_queue_stat();
    }

    fn sync_queue_stat(&self) {
        self.stats.queued.store(self.queue.len(), Ordering::Relaxed);
    }

    fn clear_roster(&mut self) {
        if self.roster.clear() {
            self.view_dirty = true;
        }
    }

    /// Publish state and roster as one value if either changed.
    fn publish_view(&mut self) {
        if !self.view_dirty {
            return;
        }
        self.view_dirty = false;
        self.view_tx.send_replace(SessionView {
            state: self.state,
            roster: self.roster.snapshot(),
        });
    }

    fn transition(&mut self, transition: Transition) {
        match self.state.on(transition) {
            Some(next) if next != self.state => {
                log::info!("Connection state: {} -> {next}", self.state);
                self.state = next;
                self.view_dirty = true;
            }
            Some(_) => {}
            None => log::debug!("Ignoring {transition:?} in state {}", self.state),
        }
    }
}

async fn next_event(inbound: &mut Option<mpsc::Receiver<TransportEvent>>) -> Option<TransportEvent> {
    match inbound {
        Some(events) => events.recv().await,
        None => std::future::pending().await,
    }
}
