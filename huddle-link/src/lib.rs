//! # huddle-link: live stream presence client
//!
//! Keeps a local roster of a stream's participants consistent with the
//! server over an unreliable WebSocket, reconnecting as needed.
//!
//! ## Architecture
//!
//! ```text
//!   application
//!       │ connect / disconnect / send / notify
//!       ▼
//! ┌──────────────────┐  open   ┌───────────────┐   wss://host/realtime/stream/<id>
//! │ConnectionManager │ ──────► │ Connector     │ ─────────────────────────────────►
//! │  state machine   │ ◄────── │ (WebSocket)   │ ◄─────────────────────────────────
//! │  outgoing queue  │ events  └───────────────┘
//! │  backoff, timers │
//! └──┬────────────┬──┘
//!    │ roster     │ other kinds
//!    ▼            ▼
//!  Roster     EventRelay ──► subscribers
//! ```
//!
//! ## Modules
//!
//! - [`manager`]: connection lifecycle and the public contract
//! - [`roster`]: participant reconciliation
//! - [`protocol`]: JSON text envelope
//! - [`transport`]: transport abstraction and WebSocket implementation
//! - [`identity`]: credentials, profile fallback and endpoint URL
//! - [`environment`]: injected platform view
//! - [`backoff`], [`queue`], [`timers`], [`relay`], [`state`], [`config`]

pub mod backoff;
pub mod config;
pub mod environment;
pub mod identity;
pub mod manager;
pub mod protocol;
pub mod queue;
pub mod relay;
pub mod roster;
pub mod state;
pub mod timers;
pub mod transport;

// Re-exports for convenience
pub use backoff::{Backoff, BackoffConfig};
pub use config::{ClientConfig, ConfigError};
pub use environment::{Environment, LifecycleSignal, PlaybackMarkers, StaticEnvironment};
pub use identity::{AuthError, CredentialResolver, Identity, NoCredentials, StaticToken};
pub use manager::{ClientStats, ConnectionManager, SessionView};
pub use protocol::{InboundMessage, LocalSnapshot, OutboundMessage, ProtocolError};
pub use queue::OutgoingQueue;
pub use relay::{EventRelay, RelayedEvent};
pub use roster::{Participant, Roster};
pub use state::{ConnectionState, Transition};
pub use transport::{Connection, Connector, Transport, TransportError, TransportEvent, WsConnector};
