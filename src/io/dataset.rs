use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use csv::ReaderBuilder;
use nalgebra::Vector3;
use tracing::warn;

use crate::geometry::attitude::{self, Attitude};
use crate::imaging::Raster;
use crate::scan::{Scan, ScanId};

/// Manifest file expected at the dataset root.
pub const MANIFEST: &str = "scans.csv";
/// Directory holding the scan images, relative to the dataset root.
pub const IMAGE_DIR: &str = "images";

#[derive(Debug, Clone)]
pub struct ScanEntry {
    pub timestamp: u64,
    pub filename: String,
    pub position: Vector3<f64>,
    pub attitude: Attitude,
    /// Meters per pixel, when the row overrides the dataset default.
    pub resolution: Option<f64>,
}

/// Scans recorded in one directory:
///
/// ```text
/// <root>/scans.csv     timestamp,filename,x,y,z,qx,qy,qz,qw[,resolution]
/// <root>/images/*.png  8-bit grayscale intensity images
/// ```
#[derive(Debug)]
pub struct ScanDataset {
    root: PathBuf,
    pub entries: Vec<ScanEntry>,
    default_resolution: f64,
}

impl ScanDataset {
    pub fn new<P: AsRef<Path>>(root: P, default_resolution: f64) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        if !(default_resolution.is_finite() && default_resolution > 0.0) {
            bail!("default resolution must be positive, got {}", default_resolution);
        }
        let entries = load_manifest(&root.join(MANIFEST))?;
        Ok(Self {
            root,
            entries,
            default_resolution,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory name, used as the pose-cache namespace.
    pub fn name(&self) -> String {
        self.root
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "default".to_string())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Load scan `idx`; its id is the capture timestamp.
    pub fn scan(&self, idx: usize) -> Result<Scan> {
        let entry = self
            .entries
            .get(idx)
            .with_context(|| format!("No scan at index {}", idx))?;
        let path = self.root.join(IMAGE_DIR).join(&entry.filename);
        let samples = load_gray_png(&path)?;
        let scan = Scan::new(
            ScanId::new(entry.timestamp),
            samples,
            entry.position,
            entry.attitude,
            entry.resolution.unwrap_or(self.default_resolution),
        )
        .with_context(|| format!("Invalid scan {}", path.display()))?;
        Ok(scan)
    }
}

/// Decode an image file into an intensity raster (converted to 8-bit gray).
pub fn load_gray_png(path: &Path) -> Result<Raster> {
    let img = image::open(path)
        .with_context(|| format!("Failed to read image {}", path.display()))?
        .to_luma8();
    let (width, height) = img.dimensions();
    Ok(Raster::from_fn(height as usize, width as usize, |r, c| {
        img.get_pixel(c as u32, r as u32)[0] as f32
    }))
}

fn load_manifest(csv_path: &Path) -> Result<Vec<ScanEntry>> {
    let mut rdr = ReaderBuilder::new()
        .has_headers(false)
        .comment(Some(b'#'))
        .flexible(true)
        .from_path(csv_path)
        .with_context(|| format!("Failed to open {}", csv_path.display()))?;

    let mut entries = Vec::new();
    for (line, rec) in rdr.records().enumerate() {
        let rec = rec?;
        if rec.len() < 9 {
            warn!(line, fields = rec.len(), "skipping short manifest row");
            continue;
        }
        let field = |i: usize| -> Result<f64> {
            rec[i]
                .trim()
                .parse()
                .with_context(|| format!("Bad number {:?} in manifest row {}", &rec[i], line))
        };

        let timestamp: u64 = rec[0]
            .trim()
            .parse()
            .with_context(|| format!("Bad timestamp in manifest row {}", line))?;
        let position = Vector3::new(field(2)?, field(3)?, field(4)?);
        // Quaternion stored x, y, z, w.
        let attitude = attitude::from_quat_array([field(5)?, field(6)?, field(7)?, field(8)?]);
        let resolution = match rec.get(9).map(str::trim) {
            Some(s) if !s.is_empty() => Some(field(9)?),
            _ => None,
        };

        entries.push(ScanEntry {
            timestamp,
            filename: rec[1].trim().to_string(),
            position,
            attitude,
            resolution,
        });
    }
    Ok(entries)
}
