//! Helpers shared across CLI commands.

use std::path::Path;

use syncarto::scene::Scene;

use crate::error::CliError;

/// Human-readable byte count.
pub fn format_size(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["B", "KB", "MB", "GB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{} B", bytes)
    } else {
        format!("{:.1} {}", value, UNITS[unit])
    }
}

/// Whether `arg` names a remote resource rather than a local file.
pub fn is_url(arg: &str) -> bool {
    arg.contains("://")
}

/// Scene from a COG URL or a scene JSON file.
pub fn load_scene(arg: &str) -> Result<Scene, CliError> {
    if is_url(arg) {
        return Ok(Scene::from_cog_url(arg));
    }
    let path = Path::new(arg);
    let json = std::fs::read_to_string(path).map_err(|e| CliError::ReadScene {
        path: path.to_path_buf(),
        message: e.to_string(),
    })?;
    Ok(Scene::from_json(&json)?)
}
