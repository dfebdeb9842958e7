//! Render command - draw one tile of a scene to a PNG file.

use std::path::PathBuf;
use std::sync::Arc;

use image::RgbaImage;
use syncarto::adapter::CogAdapter;
use syncarto::map::MapHost;
use syncarto::render::Pipeline;
use syncarto::tile::TileCoord;
use tracing::info;

use super::common::load_scene;
use crate::error::CliError;
use crate::headless::HeadlessMap;
use crate::runner::CliRunner;

/// Arguments for the render command.
pub struct RenderArgs {
    /// Scene JSON file or COG URL
    pub scene: String,
    pub tile: String,
    pub out: PathBuf,
    /// Compact pipeline overriding the scene's own
    pub pipeline: Option<String>,
}

/// Run the render command.
pub fn run(runner: &CliRunner, args: RenderArgs) -> Result<(), CliError> {
    runner.log_startup("render");
    let tile: TileCoord = args.tile.parse()?;
    let mut scene = load_scene(&args.scene)?;
    if let Some(compact) = &args.pipeline {
        scene = scene.with_pipeline(compact.parse::<Pipeline>()?);
    }
    let scene_id = scene.id().to_string();

    let config = runner.config().clone();
    let map = Arc::new(HeadlessMap::new(&config.view));
    let adapter = CogAdapter::new(config, Arc::clone(&map) as Arc<dyn MapHost>)?;

    let image = runner.block_on(async {
        adapter.add_scene(scene).await?;
        let layer = map
            .layer(&scene_id)
            .ok_or_else(|| CliError::EmptyTile(tile.to_string()))?;

        let mut target = RgbaImage::new(0, 0);
        if !layer.source.load_tile(&mut target, tile).await? {
            return Err(CliError::EmptyTile(tile.to_string()));
        }
        Ok::<_, CliError>(target)
    })?;

    image.save(&args.out).map_err(|e| CliError::WriteImage {
        path: args.out.clone(),
        message: e.to_string(),
    })?;

    info!(scene = %scene_id, tile = %tile, metrics = %adapter.metrics(), "Tile rendered");
    println!(
        "Wrote {} ({}x{}) for tile {} of {}",
        args.out.display(),
        image.width(),
        image.height(),
        tile,
        scene_id
    );
    Ok(())
}
