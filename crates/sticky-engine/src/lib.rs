//! Adaptive sticky-message resend engine.
//!
//! A sticky message is re-posted near the bottom of a channel once enough
//! traffic has pushed it out of view. How long the engine waits and how much
//! traffic it requires both scale with the channel's observed chat rate.
//!
//! The pieces, leaves first:
//!
//! * [`RateTracker`] keeps a trailing 60 second window of arrivals per channel.
//! * [`ThresholdPolicy`] maps a rate to a cooldown and a message threshold.
//! * [`StickyStore`] holds one [`StickyRecord`] per channel.
//! * [`ResendController`] is the state machine that reacts to inbound messages
//!   and talks to a [`MessagingGateway`].
//!
//! Nothing here knows about a concrete chat platform; adapters implement
//! [`MessagingGateway`] and feed [`InboundMessage`]s in.

pub mod clock;
pub mod content;
pub mod controller;
pub mod error;
pub mod gateway;
pub mod persistence;
pub mod policy;
pub mod rate;
pub mod store;
mod types;

pub use clock::{Clock, ManualClock, SystemClock};
pub use content::{EmbedSpec, RenderedMessage, STICKY_MARKER, StickyContent};
pub use controller::{
    Decision, EngineSettings, FailedStage, ResendController, ResendReason, StickyStatus,
};
pub use error::{GatewayError, PersistenceError, StickyError};
pub use gateway::{InboundMessage, MessagingGateway, RecentMessage, SentMessage};
pub use persistence::{JsonFilePersistence, Persistence, spawn_autosave};
pub use policy::{ThresholdPolicy, ThresholdSnapshot};
pub use rate::{RATE_WINDOW, RateTracker};
pub use store::{StickyRecord, StickySnapshot, StickyStore};
pub use types::{ChannelId, MessageId, Timestamp, UserId};
