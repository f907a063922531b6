//! # Scoreboard Sync
//!
//! Live-status synchronization for location-based team game scoreboards.
//!
//! The crate keeps a spectator's view of a running game current. A push
//! channel delivers property-list snapshots of the whole game; when it is
//! unavailable a polling fallback pulls the same information over REST. Both
//! are folded into one [`ReconciledView`].
//!
//! ## Layers
//!
//! - [`decoder`]: property-list documents to [`GameStatus`] and back
//! - [`client`]: [`TransportClient`], one socket per game instance, with
//!   [`heartbeat`] pings and bounded [`reconnect`]ion
//! - [`publisher`]: decoded snapshots fanned out to subscribers
//! - [`registry`]: clients shared per instance id
//! - [`api`] and [`polling`]: the pull channel
//! - [`team_match`], [`view`] and [`reconcile`]: merging everything into one view
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use scoreboard_sync::{
//!     ApiConfig, ConnectionRegistry, HttpObserverApi, ScoreboardSession, SessionConfig, SyncConfig,
//! };
//!
//! let registry = ConnectionRegistry::websocket(SyncConfig::default());
//! let connection = registry.acquire("48213").await?;
//!
//! let api = Arc::new(HttpObserverApi::new(ApiConfig::default())?);
//! let session = ScoreboardSession::new(SessionConfig::new("ABC123").with_team(7), api);
//! let _attached = session.attach(connection.publisher());
//! session.load().await;
//!
//! let mut views = session.watch();
//! while views.changed().await.is_ok() {
//!     for team in views.borrow().top_teams(5) {
//!         println!("{:>4}  {}", team.score, team.name);
//!     }
//! }
//! ```

pub mod api;
pub mod client;
pub mod decoder;
pub mod error;
pub mod heartbeat;
pub mod polling;
pub mod protocol;
pub mod publisher;
pub mod reconcile;
pub mod reconnect;
pub mod registry;
pub mod status;
pub mod team_match;
pub mod transport;
pub mod transports;
pub mod view;

// Re-export primary types for ergonomic imports.
pub use api::{ApiConfig, ApiResponse, Endpoint, ObserverApi, PullKind};
pub use client::{ConnectionState, SyncConfig, TransportClient};
pub use decoder::{decode_game_status, encode_game_status};
pub use error::{DecodeError, Result, ScoreboardError};
pub use polling::{PollHandle, PollSink, PollingConfig, PollingFallback, RoundOutcome};
pub use protocol::{InboundFrame, OutboundFrame};
pub use publisher::{FrameOutcome, StatusPublisher, Subscription};
pub use reconcile::{ScoreboardSession, SessionConfig, SessionPhase};
pub use reconnect::ReconnectPolicy;
pub use registry::{ConnectionRegistry, GameConnection};
pub use status::{GameStatus, TeamInfo, TreasureRef, WireFlag, WireNumber};
pub use transport::{Connector, Transport};
pub use view::{FocusTeam, FocusTeamView, ReconciledView};

#[cfg(feature = "http-api")]
pub use api::HttpObserverApi;

#[cfg(feature = "transport-websocket")]
pub use transports::{WebSocketConnector, WebSocketTransport};
