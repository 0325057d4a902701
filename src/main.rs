use std::path::Path;

use anyhow::{bail, Context, Result};
use tracing::{info, warn};

use rust_radar_map::config::MapperConfig;
use rust_radar_map::estimation::{PoseCache, PoseEstimator, PoseSource};
use rust_radar_map::io::export;
use rust_radar_map::io::ScanDataset;
use rust_radar_map::logging;
use rust_radar_map::mapping::RadarMap;

fn main() -> Result<()> {
    logging::init_logging("info");

    let args: Vec<String> = std::env::args().collect();
    let dataset_path = args.get(1).map(String::as_str).unwrap_or("data/radar");
    let config = match args.get(2) {
        Some(path) => MapperConfig::load(Path::new(path))
            .with_context(|| format!("Failed to load config {}", path))?,
        None => MapperConfig::default(),
    };

    let dataset = ScanDataset::new(dataset_path, config.dataset.resolution)?;
    if dataset.is_empty() {
        bail!("Dataset {} has no scans", dataset_path);
    }
    info!(path = dataset_path, scans = dataset.len(), "loaded dataset");

    let cache = PoseCache::new(&config.cache.path);
    let namespace = config.cache.dataset.clone().unwrap_or_else(|| dataset.name());
    cache.set_active_dataset(&namespace)?;
    let estimator = PoseEstimator::new(config.registration.clone()).with_cache(cache);

    let first = dataset.scan(0)?;
    let map = RadarMap::create_in_maps_dir(&first, &config.map)?;

    let mut previous = first;
    let mut fallbacks = 0usize;
    for idx in 1..dataset.len() {
        let scan = dataset.scan(idx)?;
        if scan.resolution() != map.resolution() {
            warn!(
                scan = ?scan.id(),
                resolution = scan.resolution(),
                "skipping scan with foreign resolution"
            );
            continue;
        }

        let estimated = estimator.image_position_from(&previous, &scan)?;
        if estimated.source == PoseSource::Fallback {
            fallbacks += 1;
        }
        let corrected = scan.with_pose(estimated.position, estimated.attitude);
        map.add_scan(&corrected)?;
        previous = corrected;
    }
    info!(scans = dataset.len(), fallbacks, "map built");

    let overview_path = map.path().with_extension("png");
    write_overview(&map, &overview_path)?;
    info!(map = %map.path().display(), overview = %overview_path.display(), "done");
    Ok(())
}

/// Render every materialized tile, seen from the anchor frame, to a PNG.
fn write_overview(map: &RadarMap, path: &Path) -> Result<()> {
    let store = map.store();
    let coords = store.tile_coords()?;
    let (Some(i_min), Some(i_max)) = (
        coords.iter().map(|c| c.0).min(),
        coords.iter().map(|c| c.0).max(),
    ) else {
        bail!("Map {} has no tiles", map.path().display());
    };
    let j_min = coords.iter().map(|c| c.1).min().unwrap_or(0);
    let j_max = coords.iter().map(|c| c.1).max().unwrap_or(0);

    let cs = store.chunk_size();
    let shape = (
        (i_max - i_min + 1) as usize * cs,
        (j_max - j_min + 1) as usize * cs,
    );
    let origin = store.chunk_origin((i_min, j_min));
    let (values, _) = map.extract(&origin, &map.anchor().attitude, shape, 1.0)?;
    export::save_raster_png(&values, path)
}
