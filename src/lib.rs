//! Client side of a translation arena.
//!
//! A translate request asks several models for a translation of the same
//! text. Results stream back over server-sent events in whatever order the
//! models finish; [`reconciler`] maps them onto one slot per model, and the
//! user rates the slots blind before the votes go back to the backend.
//!
//! - [`reconciler`] and [`slot`]: pure session state, no I/O
//! - [`client`]: HTTP calls and SSE decoding
//! - [`controller`]: runs the stream and retries as tokio tasks
//! - [`render`] and [`cli`]: terminal front-end

pub mod cli;
pub mod client;
pub mod config;
pub mod controller;
pub mod error;
pub mod protocol;
pub mod reconciler;
pub mod render;
pub mod slot;

pub use client::ArenaClient;
pub use config::ArenaConfig;
pub use controller::Controller;
pub use error::ArenaError;
pub use protocol::{ModelInfo, TranslationResult, Vote, VoteRequest};
pub use reconciler::{
    Applied, Notice, Phase, Reconciler, SessionEvent, SessionToken, StreamSession, Submission,
    Tagged, TranslationRequest, AUTH_REQUIRED_MESSAGE, CONNECTION_LOST_MESSAGE, MIN_MODELS,
    NO_RESULT_MESSAGE,
};
pub use slot::{Rating, Slot, SlotState, SlotStatus};
