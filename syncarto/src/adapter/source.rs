//! Tile source handed to the map for each scene layer.

use std::sync::{Arc, Weak};

use image::RgbaImage;

use super::{AdapterError, Session};
use crate::map::TileSource;
use crate::tile::TileCoord;
use crate::BoxFuture;

/// Draws the tiles of one scene.
///
/// Holds the session weakly: a layer outliving its session draws nothing.
pub struct SceneTileSource {
    session: Weak<Session>,
    scene_id: Arc<str>,
}

impl SceneTileSource {
    pub(crate) fn new(session: &Arc<Session>, scene_id: &str) -> Self {
        Self {
            session: Arc::downgrade(session),
            scene_id: Arc::from(scene_id),
        }
    }

    pub fn scene_id(&self) -> &str {
        &self.scene_id
    }
}

impl TileSource for SceneTileSource {
    fn load_tile<'a>(
        &'a self,
        target: &'a mut RgbaImage,
        tile: TileCoord,
    ) -> BoxFuture<'a, Result<bool, AdapterError>> {
        Box::pin(async move {
            let Some(session) = self.session.upgrade() else {
                return Ok(false);
            };
            match session.renderer.render(&self.scene_id, tile).await? {
                Some(canvas) => {
                    target.clone_from(&canvas);
                    Ok(true)
                }
                None => Ok(false),
            }
        })
    }
}
