//! On-disk map file with tiles addressed by offset.
//!
//! ```text
//! [0, HEADER_SIZE)          header: magic, version, chunk size, attributes,
//!                           tile count, index length (bincode, zero padded)
//! HEADER_SIZE + k·record    slot k: chunk_size² values, then chunk_size²
//!                           variances, f32 little-endian, row-major
//! after the last slot       index: "{i}/{j}" key of every slot, in slot order
//! ```
//!
//! Reads touch the header, the index and the requested slots only. Every
//! write is a redo journal (`<file>.journal`) committed atomically, applied
//! in place, then removed; opening a file replays a journal left behind by an
//! interrupted write.

use std::collections::BTreeMap;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use nalgebra::Vector3;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{MapError, Result};
use crate::geometry::attitude::{self, Attitude};
use crate::io::atomic;

/// Chunk coordinate `(i, j)`: `i` counts chunks along local y, `j` along local x.
pub type ChunkCoord = (i64, i64);

const MAGIC: [u8; 8] = *b"RADARMAP";
const VERSION: u32 = 1;
/// Bytes reserved for the header at the start of the file.
pub const HEADER_SIZE: u64 = 128;

/// Immutable map-wide attributes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MapAttributes {
    pub resolution: f64,
    pub anchor_position: [f64; 3],
    /// Quaternion `[x, y, z, w]`.
    pub anchor_attitude: [f64; 4],
}

impl MapAttributes {
    pub fn new(resolution: f64, anchor_position: &Vector3<f64>, anchor_attitude: &Attitude) -> Self {
        Self {
            resolution,
            anchor_position: (*anchor_position).into(),
            anchor_attitude: attitude::to_quat_array(anchor_attitude),
        }
    }

    pub fn anchor_position(&self) -> Vector3<f64> {
        Vector3::from(self.anchor_position)
    }

    pub fn anchor_attitude(&self) -> Attitude {
        attitude::from_quat_array(self.anchor_attitude)
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct Header {
    magic: [u8; 8],
    version: u32,
    chunk_size: u64,
    attributes: MapAttributes,
    tile_count: u64,
    index_len: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct JournalWrite {
    offset: u64,
    bytes: Vec<u8>,
}

/// Byte writes of one commit plus the final file length.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Journal {
    writes: Vec<JournalWrite>,
    file_len: u64,
}

/// Values and variances of one tile, row-major.
#[derive(Debug, Clone, PartialEq)]
pub struct TileData {
    pub values: Vec<f32>,
    pub variances: Vec<f32>,
}

impl TileData {
    /// A tile with every pixel unknown.
    pub fn unknown(chunk_size: usize) -> Self {
        let blank = vec![f32::NAN; chunk_size * chunk_size];
        Self {
            values: blank.clone(),
            variances: blank,
        }
    }
}

pub fn chunk_key((i, j): ChunkCoord) -> String {
    format!("{i}/{j}")
}

pub fn parse_chunk_key(key: &str) -> Option<ChunkCoord> {
    let (i, j) = key.split_once('/')?;
    Some((i.parse().ok()?, j.parse().ok()?))
}

/// Handle on a map file: attributes and the tile index, no tile data.
#[derive(Debug, Clone)]
pub struct MapFile {
    path: PathBuf,
    attributes: MapAttributes,
    chunk_size: usize,
    slots: BTreeMap<ChunkCoord, u64>,
    order: Vec<ChunkCoord>,
    index_len: u64,
}

impl MapFile {
    /// Write an empty map file at `path`, replacing whatever is there.
    pub fn create(path: &Path, attributes: MapAttributes, chunk_size: usize) -> Result<Self> {
        check_layout(&attributes, chunk_size)?;
        let index = encode_index(&[])?;
        let file = Self {
            path: path.to_path_buf(),
            attributes,
            chunk_size,
            slots: BTreeMap::new(),
            order: Vec::new(),
            index_len: index.len() as u64,
        };
        let mut bytes = file.encode_header(0, file.index_len)?;
        bytes.extend_from_slice(&index);

        atomic::remove_if_exists(&journal_path(path))?;
        atomic::write_atomic(path, &bytes)?;
        Ok(file)
    }

    /// Read the header and tile index of an existing file.
    pub fn open(path: &Path) -> Result<Self> {
        recover(path)?;
        let io = |e: std::io::Error| MapError::io(path, e);
        let mut handle = File::open(path).map_err(io)?;
        let len = handle.metadata().map_err(io)?.len();
        if len < HEADER_SIZE {
            return Err(MapError::InvalidMapFile(format!(
                "{len} bytes is shorter than the {HEADER_SIZE} byte header"
            )));
        }
        let mut head = vec![0u8; HEADER_SIZE as usize];
        handle.read_exact(&mut head).map_err(io)?;
        let header: Header = bincode::deserialize(&head)?;
        if header.magic != MAGIC {
            return Err(MapError::InvalidMapFile("not a radar map file".to_string()));
        }
        if header.version != VERSION {
            return Err(MapError::InvalidMapFile(format!(
                "unsupported version {}",
                header.version
            )));
        }
        let chunk_size = usize::try_from(header.chunk_size)
            .map_err(|_| MapError::InvalidMapFile(format!("chunk_size {} too large", header.chunk_size)))?;
        check_layout(&header.attributes, chunk_size)?;

        let index_offset = header
            .tile_count
            .checked_mul(record_len(chunk_size))
            .and_then(|slots| slots.checked_add(HEADER_SIZE))
            .ok_or_else(|| MapError::InvalidMapFile("tile count overflows".to_string()))?;
        if index_offset.checked_add(header.index_len) != Some(len) {
            return Err(MapError::InvalidMapFile(format!(
                "file is {len} bytes, header describes {} tiles and a {} byte index",
                header.tile_count, header.index_len
            )));
        }
        handle.seek(SeekFrom::Start(index_offset)).map_err(io)?;
        let mut index = vec![0u8; header.index_len as usize];
        handle.read_exact(&mut index).map_err(io)?;
        let keys: Vec<String> = bincode::deserialize(&index)?;
        if keys.len() as u64 != header.tile_count {
            return Err(MapError::InvalidMapFile(format!(
                "index lists {} tiles, header {}",
                keys.len(),
                header.tile_count
            )));
        }

        let mut slots = BTreeMap::new();
        let mut order = Vec::with_capacity(keys.len());
        for (slot, key) in keys.iter().enumerate() {
            let coord = parse_chunk_key(key)
                .ok_or_else(|| MapError::InvalidMapFile(format!("bad tile key {key:?}")))?;
            if slots.insert(coord, slot as u64).is_some() {
                return Err(MapError::InvalidMapFile(format!("tile {key} stored twice")));
            }
            order.push(coord);
        }

        Ok(Self {
            path: path.to_path_buf(),
            attributes: header.attributes,
            chunk_size,
            slots,
            order,
            index_len: header.index_len,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn attributes(&self) -> &MapAttributes {
        &self.attributes
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    pub fn contains(&self, coord: ChunkCoord) -> bool {
        self.slots.contains_key(&coord)
    }

    /// Every stored tile, sorted.
    pub fn coords(&self) -> Vec<ChunkCoord> {
        self.slots.keys().copied().collect()
    }

    /// Load the stored tiles among `coords`; absent tiles are left out.
    pub fn read_tiles(&self, coords: &[ChunkCoord]) -> Result<BTreeMap<ChunkCoord, TileData>> {
        let mut tiles = BTreeMap::new();
        if !coords.iter().any(|c| self.contains(*c)) {
            return Ok(tiles);
        }
        let io = |e: std::io::Error| MapError::io(&self.path, e);
        let mut handle = File::open(&self.path).map_err(io)?;
        let mut record = vec![0u8; record_len(self.chunk_size) as usize];
        for coord in coords {
            let Some(&slot) = self.slots.get(coord) else {
                continue;
            };
            handle.seek(SeekFrom::Start(self.slot_offset(slot))).map_err(io)?;
            handle.read_exact(&mut record).map_err(io)?;
            tiles.insert(*coord, decode_record(&record, self.chunk_size));
        }
        Ok(tiles)
    }

    pub fn read_tile(&self, coord: ChunkCoord) -> Result<Option<TileData>> {
        Ok(self.read_tiles(&[coord])?.remove(&coord))
    }

    /// Store `tiles` as one journaled write. Existing tiles are overwritten in
    /// their slots, new tiles are appended; nothing else is rewritten.
    pub fn commit(&mut self, tiles: &[(ChunkCoord, TileData)]) -> Result<()> {
        if tiles.is_empty() {
            return Ok(());
        }
        let (journal, order) = self.plan(tiles)?;
        let journal_file = journal_path(&self.path);
        atomic::write_atomic(&journal_file, &bincode::serialize(&journal)?)?;
        apply(&self.path, &journal)?;
        atomic::remove_if_exists(&journal_file)?;

        let added = order.len() - self.order.len();
        for (slot, coord) in order.iter().enumerate().skip(self.order.len()) {
            self.slots.insert(*coord, slot as u64);
        }
        self.order = order;
        self.index_len = journal.file_len - self.index_offset(self.order.len());
        debug!(tiles = tiles.len(), added, "committed tiles");
        Ok(())
    }

    /// Byte writes for `tiles` and the slot order after them.
    fn plan(&self, tiles: &[(ChunkCoord, TileData)]) -> Result<(Journal, Vec<ChunkCoord>)> {
        let samples = self.chunk_size * self.chunk_size;
        let mut order = self.order.clone();
        let mut new_slots: BTreeMap<ChunkCoord, u64> = BTreeMap::new();
        let mut writes = Vec::with_capacity(tiles.len() + 2);

        for (coord, tile) in tiles {
            if tile.values.len() != samples || tile.variances.len() != samples {
                return Err(MapError::InvalidArgument(format!(
                    "tile {} has {} values and {} variances, expected {samples}",
                    chunk_key(*coord),
                    tile.values.len(),
                    tile.variances.len()
                )));
            }
            let slot = match self.slots.get(coord).or_else(|| new_slots.get(coord)) {
                Some(&slot) => slot,
                None => {
                    let slot = order.len() as u64;
                    order.push(*coord);
                    new_slots.insert(*coord, slot);
                    slot
                }
            };
            writes.push(JournalWrite {
                offset: self.slot_offset(slot),
                bytes: encode_record(tile),
            });
        }

        let file_len = if new_slots.is_empty() {
            self.index_offset(order.len()) + self.index_len
        } else {
            let index = encode_index(&order)?;
            let index_offset = self.index_offset(order.len());
            writes.push(JournalWrite {
                offset: 0,
                bytes: self.encode_header(order.len() as u64, index.len() as u64)?,
            });
            let file_len = index_offset + index.len() as u64;
            writes.push(JournalWrite {
                offset: index_offset,
                bytes: index,
            });
            file_len
        };
        Ok((Journal { writes, file_len }, order))
    }

    fn slot_offset(&self, slot: u64) -> u64 {
        HEADER_SIZE + slot * record_len(self.chunk_size)
    }

    fn index_offset(&self, tile_count: usize) -> u64 {
        self.slot_offset(tile_count as u64)
    }

    fn encode_header(&self, tile_count: u64, index_len: u64) -> Result<Vec<u8>> {
        let header = Header {
            magic: MAGIC,
            version: VERSION,
            chunk_size: self.chunk_size as u64,
            attributes: self.attributes.clone(),
            tile_count,
            index_len,
        };
        let mut bytes = bincode::serialize(&header)?;
        if bytes.len() as u64 > HEADER_SIZE {
            return Err(MapError::InvalidMapFile(format!(
                "header needs {} bytes",
                bytes.len()
            )));
        }
        bytes.resize(HEADER_SIZE as usize, 0);
        Ok(bytes)
    }
}

fn check_layout(attributes: &MapAttributes, chunk_size: usize) -> Result<()> {
    if chunk_size == 0 {
        return Err(MapError::InvalidMapFile("chunk_size is zero".to_string()));
    }
    if !(attributes.resolution.is_finite() && attributes.resolution > 0.0) {
        return Err(MapError::InvalidMapFile(format!(
            "resolution {} is not positive",
            attributes.resolution
        )));
    }
    Ok(())
}

/// Bytes of one slot: values and variances.
fn record_len(chunk_size: usize) -> u64 {
    2 * (chunk_size * chunk_size * std::mem::size_of::<f32>()) as u64
}

fn encode_record(tile: &TileData) -> Vec<u8> {
    tile.values
        .iter()
        .chain(tile.variances.iter())
        .flat_map(|v| v.to_le_bytes())
        .collect()
}

fn decode_record(bytes: &[u8], chunk_size: usize) -> TileData {
    let mut values: Vec<f32> = bytes
        .chunks_exact(4)
        .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect();
    let variances = values.split_off(chunk_size * chunk_size);
    TileData { values, variances }
}

fn encode_index(order: &[ChunkCoord]) -> Result<Vec<u8>> {
    let keys: Vec<String> = order.iter().map(|c| chunk_key(*c)).collect();
    Ok(bincode::serialize(&keys)?)
}

fn journal_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".journal");
    path.with_file_name(name)
}

fn apply(path: &Path, journal: &Journal) -> Result<()> {
    let io = |e: std::io::Error| MapError::io(path, e);
    let mut handle = OpenOptions::new().write(true).open(path).map_err(io)?;
    for write in &journal.writes {
        handle.seek(SeekFrom::Start(write.offset)).map_err(io)?;
        handle.write_all(&write.bytes).map_err(io)?;
    }
    handle.set_len(journal.file_len).map_err(io)?;
    handle.sync_all().map_err(io)
}

/// Finish a commit whose journal reached disk but may not have been applied.
fn recover(path: &Path) -> Result<()> {
    let journal_file = journal_path(path);
    let Some(bytes) = atomic::read_if_exists(&journal_file)? else {
        return Ok(());
    };
    let journal: Journal = bincode::deserialize(&bytes)?;
    warn!(
        path = %path.display(),
        writes = journal.writes.len(),
        "replaying interrupted map write"
    );
    apply(path, &journal)?;
    atomic::remove_if_exists(&journal_file)
}
