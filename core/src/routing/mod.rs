//! Flood routing over advertisement broadcasts
//!
//! - Presence: throttled peer bookkeeping from presence-only advertisements
//! - Router: dedup, hop accounting, persistence and relay decisions
//! - Events: notifications to the presentation layer

pub mod events;
pub mod presence;
pub mod router;

pub use events::{EventSink, RouterEvent};
pub use presence::{PeerPresenceTracker, PresenceUpdate};
pub use router::{FloodRouter, Origin, RelayDecision, RouteOutcome, UNSIGNED_SIGNATURE};
