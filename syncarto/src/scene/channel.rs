//! Messages pushed over the live session channel.
//!
//! A message is a JSON object `{"command": "...", "data": ...}`. Only the
//! `update` command is acted on; its `data` is the URL of a COG to show.

use std::sync::OnceLock;

use regex::Regex;
use serde::Deserialize;

use super::SceneError;

/// A parsed session channel message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelCommand {
    /// Show the COG at `url` as a new scene.
    Update { url: String },
    /// Any other command, by name.
    Other(String),
}

#[derive(Deserialize)]
struct ChannelMessage {
    command: String,
    #[serde(default)]
    data: serde_json::Value,
}

/// Parse one channel message.
pub fn parse_channel_message(text: &str) -> Result<ChannelCommand, SceneError> {
    let message: ChannelMessage =
        serde_json::from_str(text).map_err(|e| SceneError::InvalidMessage(e.to_string()))?;

    match message.command.as_str() {
        "update" => match message.data {
            serde_json::Value::String(url) if !url.trim().is_empty() => {
                Ok(ChannelCommand::Update { url })
            }
            other => Err(SceneError::InvalidMessage(format!(
                "update command needs a URL string, got {}",
                other
            ))),
        },
        _ => Ok(ChannelCommand::Other(message.command)),
    }
}

fn session_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"(?i)[0-9a-f]{8}-[0-9a-f]{4}-[1-5][0-9a-f]{3}-[89ab][0-9a-f]{3}-[0-9a-f]{12}")
            .expect("valid session id regex")
    })
}

/// Session id (a UUID) embedded in a page path, if any.
pub fn session_id_from_path(path: &str) -> Option<&str> {
    session_pattern().find(path).map(|m| m.as_str())
}
