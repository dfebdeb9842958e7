//! Scenes: what to show and how to compose it.
//!
//! A [`Scene`] is built from a [`SceneDescriptor`] (JSON from the UI), from a
//! bare COG URL pushed over the session channel, or restored alongside a
//! [`Permalink`]. Scenes never change after creation.

mod channel;
mod model;
mod permalink;

pub use channel::{parse_channel_message, session_id_from_path, ChannelCommand};
pub use model::{BandRef, Scene, SceneDescriptor, SceneKind};
pub use permalink::Permalink;

/// Errors building scenes or reading channel input.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SceneError {
    #[error("scene has no id")]
    MissingId,

    #[error("scene {0} cannot be both RGB and single-file multiband")]
    ConflictingKinds(String),

    #[error("scene {scene} has no {channel} band")]
    MissingBandRef {
        scene: String,
        channel: &'static str,
    },

    #[error("scene {scene} references band '{band}' which has no URL")]
    MissingBand { scene: String, band: String },

    #[error("scene {scene}: {channel} band '{value}' is not a sample index")]
    InvalidSampleIndex {
        scene: String,
        channel: &'static str,
        value: String,
    },

    #[error("invalid scene JSON: {0}")]
    InvalidJson(String),

    #[error("invalid channel message: {0}")]
    InvalidMessage(String),

    #[error("invalid permalink: {0}")]
    InvalidPermalink(String),
}
