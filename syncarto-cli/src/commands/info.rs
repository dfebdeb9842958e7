//! Info command - print the pyramid of a COG.

use console::style;
use syncarto::adapter::pyramid_grid;
use syncarto::cog::{build_http_client, BlockCache, CogResource, HttpCogOpener, ResourceOpener};
use syncarto::projection::epsg_name;

use super::common::format_size;
use crate::error::CliError;
use crate::runner::CliRunner;

/// Arguments for the info command.
pub struct InfoArgs {
    pub url: String,
    pub overviews: bool,
}

/// Run the info command.
pub fn run(runner: &CliRunner, args: InfoArgs) -> Result<(), CliError> {
    runner.log_startup("info");
    let config = runner.config();

    let resource = runner.block_on(async {
        let client = build_http_client(config.http_timeout)?;
        let opener = HttpCogOpener::new(
            client,
            BlockCache::new(config.block_cache_bytes, config.block_size),
        );
        opener.open(args.url.clone(), args.overviews).await
    })?;

    print_info(resource.as_ref());
    Ok(())
}

fn print_info(resource: &dyn CogResource) {
    let images = resource.images();

    println!("{}", style(resource.key()).bold());
    println!();
    println!("Levels: {}", images.len());
    for (level, image) in images.iter().enumerate() {
        println!(
            "  [{}] {}x{} px, tiles {}x{} ({}x{}), {} x {}-bit, compression {}",
            level,
            image.width,
            image.height,
            image.tile_width,
            image.tile_height,
            image.tiles_across(),
            image.tiles_down(),
            image.samples_per_pixel,
            image.bits_per_sample,
            image.compression,
        );
    }

    let Some(first) = images.first() else {
        return;
    };
    let raw: u64 = images
        .iter()
        .map(|i| {
            i.width as u64 * i.height as u64 * i.samples_per_pixel as u64 * i.bits_per_sample as u64
                / 8
        })
        .sum();
    println!("Uncompressed size: {}", format_size(raw));
    println!();

    match first.geo_keys.epsg_code() {
        Some(code) => println!("CRS: {}", epsg_name(code)),
        None => println!("CRS: {}", style("none (no usable EPSG code)").yellow()),
    }

    match pyramid_grid(images) {
        Ok(grid) => {
            println!("Extent: {}", grid.extent());
            println!("Tile grid ({} zooms, coarsest first):", grid.zoom_count());
            for (z, (resolution, (w, h))) in grid
                .resolutions()
                .iter()
                .zip(grid.tile_sizes())
                .enumerate()
            {
                println!("  z{}: {} units/px, {}x{} tiles", z, resolution, w, h);
            }
        }
        Err(e) => println!("Tile grid: {}", style(e).yellow()),
    }
}
