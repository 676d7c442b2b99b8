//! Anvil region files.
//!
//! Layout:
//! - 4 KiB location table: per chunk a big-endian 3-byte sector offset and
//!   a 1-byte sector count
//! - 4 KiB timestamp table: per chunk a big-endian `u32`
//! - 4 KiB sectors, each chunk entry starting with the 5-byte prefix read
//!   by [`TagReader::open_region_entry`](crate::stream::TagReader::open_region_entry)

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use byteorder::{BigEndian, ByteOrder};
use tagtree_common::{ChunkPos, NbtError, NbtResult};
use tracing::{debug, info};

use crate::config::TreeConfig;
use crate::encode::RegenerateHook;
use crate::stream::{COMPRESSION_ZLIB, REGION_PREFIX_LEN};
use crate::tree::NbtTree;

/// Chunks in one region (32x32).
pub const TOTAL_CHUNKS_PER_REGION: usize = 1024;

/// Sector size for chunk alignment (4KB).
pub const SECTOR_SIZE: usize = 4096;

/// Sector counts are stored in one byte.
pub const MAX_CHUNK_SECTORS: usize = 256;

/// Sectors taken by the location and timestamp tables.
const TABLE_SECTORS: u32 = 2;

/// Where a chunk lives in its region file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ChunkLocation {
    /// Sector offset from start of file.
    pub sector_offset: u32,
    /// Number of sectors used.
    pub sector_count: u8,
}

impl ChunkLocation {
    fn decode(raw: &[u8]) -> Self {
        Self {
            sector_offset: BigEndian::read_u24(raw),
            sector_count: raw[3],
        }
    }

    fn encode(self, raw: &mut [u8]) {
        BigEndian::write_u24(raw, self.sector_offset);
        raw[3] = self.sector_count;
    }

    /// Check if this location is empty (no chunk stored).
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.sector_offset == 0 || self.sector_count == 0
    }

    /// Byte offset in file.
    #[must_use]
    pub fn byte_offset(&self) -> u64 {
        u64::from(self.sector_offset) * SECTOR_SIZE as u64
    }

    fn end(self) -> u32 {
        self.sector_offset + u32::from(self.sector_count)
    }
}

/// An open region file.
#[derive(Debug)]
pub struct RegionFile {
    file: File,
    path: PathBuf,
    locations: Box<[ChunkLocation]>,
    timestamps: Box<[u32]>,
    config: TreeConfig,
    /// Tables changed since the last flush
    dirty: bool,
}

impl RegionFile {
    /// Opens an existing region file.
    pub fn open<P: AsRef<Path>>(path: P) -> NbtResult<Self> {
        Self::open_with(path, TreeConfig::default())
    }

    /// Opens an existing region file; chunks are decoded with `config`.
    pub fn open_with<P: AsRef<Path>>(path: P, config: TreeConfig) -> NbtResult<Self> {
        let path = path.as_ref();
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(path)
            .map_err(|e| NbtError::StreamOpen(format!("{}: {e}", path.display())))?;

        let mut tables = vec![0u8; 2 * SECTOR_SIZE];
        file.read_exact(&mut tables)
            .map_err(|e| NbtError::StreamOpen(format!("{}: region tables: {e}", path.display())))?;

        let (location_bytes, timestamp_bytes) = tables.split_at(SECTOR_SIZE);
        let locations = location_bytes.chunks_exact(4).map(ChunkLocation::decode).collect();
        let timestamps = timestamp_bytes.chunks_exact(4).map(BigEndian::read_u32).collect();

        debug!("Opened region {}", path.display());
        Ok(Self {
            file,
            path: path.to_path_buf(),
            locations,
            timestamps,
            config,
            dirty: false,
        })
    }

    /// Creates (or truncates) a region file with empty tables.
    pub fn create<P: AsRef<Path>>(path: P) -> NbtResult<Self> {
        let path = path.as_ref();
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)?;
        file.write_all(&[0u8; 2 * SECTOR_SIZE])?;
        file.sync_all()?;

        info!("Created region {}", path.display());
        Ok(Self {
            file,
            path: path.to_path_buf(),
            locations: vec![ChunkLocation::default(); TOTAL_CHUNKS_PER_REGION].into_boxed_slice(),
            timestamps: vec![0; TOTAL_CHUNKS_PER_REGION].into_boxed_slice(),
            config: TreeConfig::default(),
            dirty: false,
        })
    }

    /// Path of the region file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Location of a chunk, `None` if it is not stored.
    #[must_use]
    pub fn location(&self, pos: ChunkPos) -> Option<ChunkLocation> {
        let location = self.locations[pos.local_index()];
        (!location.is_empty()).then_some(location)
    }

    /// Last write time of a chunk, in seconds since the epoch.
    #[must_use]
    pub fn timestamp(&self, pos: ChunkPos) -> Option<u32> {
        self.location(pos).map(|_| self.timestamps[pos.local_index()])
    }

    /// Number of stored chunks.
    #[must_use]
    pub fn chunk_count(&self) -> usize {
        self.locations.iter().filter(|l| !l.is_empty()).count()
    }

    /// Decodes a chunk, `Ok(None)` if it is not stored.
    pub fn read_chunk(&mut self, pos: ChunkPos) -> NbtResult<Option<NbtTree>> {
        let Some(location) = self.location(pos) else {
            return Ok(None);
        };
        let tree = NbtTree::parse_region_entry_with(&mut self.file, location.byte_offset(), &self.config)?;
        Ok(Some(tree))
    }

    /// Compresses `tree` and stores it for `pos`.
    ///
    /// The old sectors are reused when the new entry fits in them; otherwise
    /// the entry is appended at the end of the file.
    pub fn write_chunk<H>(&mut self, pos: ChunkPos, tree: &NbtTree, hook: &mut H) -> NbtResult<()>
    where
        H: RegenerateHook + ?Sized,
    {
        let data = tree.compress(hook)?;
        let total = REGION_PREFIX_LEN + data.len();
        let sectors = total.div_ceil(SECTOR_SIZE);
        if sectors >= MAX_CHUNK_SECTORS {
            return Err(NbtError::ChunkTooLarge { sectors });
        }

        let index = pos.local_index();
        let sector_offset = self.find_free_space(index, sectors as u32);

        let mut entry = Vec::with_capacity(sectors * SECTOR_SIZE);
        entry.extend_from_slice(&(data.len() as u32 + 1).to_be_bytes());
        entry.push(COMPRESSION_ZLIB);
        entry.extend_from_slice(&data);
        entry.resize(sectors * SECTOR_SIZE, 0);

        let location = ChunkLocation {
            sector_offset,
            sector_count: sectors as u8,
        };
        self.file.seek(SeekFrom::Start(location.byte_offset()))?;
        self.file.write_all(&entry)?;

        self.locations[index] = location;
        self.timestamps[index] = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_secs() as u32)
            .unwrap_or(0);
        self.dirty = true;
        Ok(())
    }

    fn find_free_space(&self, index: usize, sectors: u32) -> u32 {
        let current = self.locations[index];
        if !current.is_empty() && u32::from(current.sector_count) >= sectors {
            return current.sector_offset;
        }

        let end = self
            .locations
            .iter()
            .filter(|l| !l.is_empty())
            .map(|l| l.end())
            .max()
            .unwrap_or(TABLE_SECTORS)
            .max(TABLE_SECTORS);
        if !current.is_empty() {
            debug!(
                "Chunk {index} grew to {sectors} sectors, moving from sector {} to {end}",
                current.sector_offset
            );
        }
        end
    }

    /// Forgets a chunk. Its sectors are not reclaimed.
    pub fn delete_chunk(&mut self, pos: ChunkPos) -> bool {
        let index = pos.local_index();
        if self.locations[index].is_empty() {
            return false;
        }
        self.locations[index] = ChunkLocation::default();
        self.timestamps[index] = 0;
        self.dirty = true;
        true
    }

    /// Writes the tables back if they changed.
    pub fn flush(&mut self) -> NbtResult<()> {
        if !self.dirty {
            return Ok(());
        }

        let mut tables = vec![0u8; 2 * SECTOR_SIZE];
        let (location_bytes, timestamp_bytes) = tables.split_at_mut(SECTOR_SIZE);
        for (location, raw) in self.locations.iter().zip(location_bytes.chunks_exact_mut(4)) {
            location.encode(raw);
        }
        for (&timestamp, raw) in self.timestamps.iter().zip(timestamp_bytes.chunks_exact_mut(4)) {
            BigEndian::write_u32(raw, timestamp);
        }

        self.file.seek(SeekFrom::Start(0))?;
        self.file.write_all(&tables)?;
        self.file.sync_all()?;
        self.dirty = false;

        Ok(())
    }
}

impl Drop for RegionFile {
    fn drop(&mut self) {
        let _ = self.flush();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encode::NoRegeneration;
    use tempfile::TempDir;

    fn chunk(x: i32, payload: usize) -> NbtTree {
        // Incompressible filler so the entry size tracks `payload`.
        let mut state = 0x2545_f491_u32.wrapping_add(x as u32);
        let filler: Vec<u8> = (0..payload)
            .map(|_| {
                state ^= state << 13;
                state ^= state >> 17;
                state ^= state << 5;
                state as u8
            })
            .collect();
        let mut tree = NbtTree::new();
        tree.builder()
            .begin_compound("")
            .and_then(|b| b.begin_compound("Level"))
            .and_then(|b| b.int("xPos", x))
            .and_then(|b| b.byte_array("Filler", &filler))
            .and_then(|b| b.end_compound())
            .and_then(|b| b.end_compound())
            .and_then(|b| b.finish())
            .expect("build");
        tree
    }

    #[test]
    fn test_write_read_chunks() {
        let dir = TempDir::new().expect("temp dir");
        let path = dir.path().join("r.0.0.mca");
        let mut region = RegionFile::create(&path).expect("create");

        let a = ChunkPos::new(0, 0);
        let b = ChunkPos::new(31, 5);
        region.write_chunk(a, &chunk(0, 100), &mut NoRegeneration).expect("write a");
        region.write_chunk(b, &chunk(31, 100), &mut NoRegeneration).expect("write b");

        assert_eq!(region.location(a).map(|l| l.sector_offset), Some(2));
        assert_eq!(region.location(b).map(|l| l.sector_offset), Some(3));
        assert_eq!(region.chunk_count(), 2);
        assert!(region.timestamp(a).is_some());

        let tree = region.read_chunk(b).expect("read").expect("stored");
        assert_eq!(tree.to_int(tree.find("Level.xPos"), -1), 31);
        assert!(region.read_chunk(ChunkPos::new(1, 1)).expect("read").is_none());
    }

    #[test]
    fn test_growing_chunk_moves_to_end() {
        let dir = TempDir::new().expect("temp dir");
        let mut region = RegionFile::create(dir.path().join("r.0.0.mca")).expect("create");
        let a = ChunkPos::new(0, 0);
        let b = ChunkPos::new(1, 0);
        region.write_chunk(a, &chunk(0, 100), &mut NoRegeneration).expect("write");
        region.write_chunk(b, &chunk(1, 100), &mut NoRegeneration).expect("write");

        // Still fits in one sector: stays put.
        region.write_chunk(a, &chunk(0, 200), &mut NoRegeneration).expect("rewrite");
        assert_eq!(region.location(a).map(|l| l.sector_offset), Some(2));

        region.write_chunk(a, &chunk(0, 9000), &mut NoRegeneration).expect("grow");
        let moved = region.location(a).expect("stored");
        assert_eq!(moved.sector_offset, 4);
        assert_eq!(moved.sector_count, 3);
        let tree = region.read_chunk(a).expect("read").expect("stored");
        assert_eq!(tree.byte_array(tree.find("Filler")).map(<[u8]>::len), Some(9000));
    }

    #[test]
    fn test_tables_persist_after_drop() {
        let dir = TempDir::new().expect("temp dir");
        let path = dir.path().join("r.-1.0.mca");
        let pos = ChunkPos::new(-1, 3);
        {
            let mut region = RegionFile::create(&path).expect("create");
            region.write_chunk(pos, &chunk(-1, 10), &mut NoRegeneration).expect("write");
            region.write_chunk(ChunkPos::new(-2, 3), &chunk(-2, 10), &mut NoRegeneration).expect("write");
            assert!(region.delete_chunk(ChunkPos::new(-2, 3)));
            assert!(!region.delete_chunk(ChunkPos::new(-2, 3)));
        }
        let mut region = RegionFile::open(&path).expect("open");
        assert_eq!(region.chunk_count(), 1);
        let tree = region.read_chunk(pos).expect("read").expect("stored");
        assert_eq!(tree.to_int(tree.find("xPos"), 0), -1);
    }

    #[test]
    fn test_chunk_too_large() {
        let dir = TempDir::new().expect("temp dir");
        let mut region = RegionFile::create(dir.path().join("r.0.0.mca")).expect("create");
        let err = region
            .write_chunk(ChunkPos::new(0, 0), &chunk(0, MAX_CHUNK_SECTORS * SECTOR_SIZE), &mut NoRegeneration)
            .expect_err("too large");
        assert!(matches!(err, NbtError::ChunkTooLarge { .. }));
        assert_eq!(region.chunk_count(), 0);
    }

    #[test]
    fn test_open_rejects_short_file() {
        let dir = TempDir::new().expect("temp dir");
        let path = dir.path().join("short.mca");
        std::fs::write(&path, [0u8; 100]).expect("write");
        assert!(matches!(RegionFile::open(&path), Err(NbtError::StreamOpen(_))));
    }
}
