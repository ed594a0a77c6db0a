//! Real-time collaboration core for the Mawa dashboard.
//!
//! Multiple browser clients share one mutable CRDT document per room,
//! relayed through a WebSocket server (the `mawa_relay` crate). This crate
//! provides the client side and the pieces shared with the relay:
//!
//! - [`SharedDoc`]: the CRDT document wrapper (yrs-backed)
//! - [`Connector`]: per-room connection lifecycle, `connected`/`synced`
//!   flags, reconnection with bounded exponential backoff
//! - [`CollabProvider`] and [`CollabStore`]: the hand-off contract that
//!   binds a synced replica into the application's domain stores
//! - [`IndicatorState`]: connectivity surfaced to the user, localized for
//!   text direction
//!
//! The collaboration layer is best-effort: every failure mode degrades to
//! "not yet synced / reconnecting" rather than surfacing a hard error.

pub mod connector;
pub mod doc;
pub mod error;
pub mod indicator;
pub mod provider;

pub use connector::{ConnectionStatus, Connector, ConnectorConfig};
pub use doc::{SharedDoc, UpdateOrigin};
pub use error::{CollabError, Result};
pub use indicator::{IndicatorState, TextDirection};
pub use provider::{CollabProvider, CollabStore};
