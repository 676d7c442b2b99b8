//! Coordinate types for blocks, chunks and region files.

use bytemuck::{Pod, Zeroable};
use serde::{Deserialize, Serialize};

/// Chunks along one side of a region file.
pub const CHUNKS_PER_REGION: i32 = 32;

/// Blocks along one side of a chunk.
pub const BLOCKS_PER_CHUNK: i32 = 16;

/// Chunk coordinate (identifies a 16x16 column in the world grid).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Pod, Zeroable)]
#[repr(C)]
pub struct ChunkPos {
    /// X coordinate in chunk space
    pub x: i32,
    /// Z coordinate in chunk space
    pub z: i32,
}

impl ChunkPos {
    /// Creates a new chunk coordinate.
    #[must_use]
    pub const fn new(x: i32, z: i32) -> Self {
        Self { x, z }
    }

    /// Chunk containing the given block coordinates.
    #[must_use]
    pub const fn from_block(x: i32, z: i32) -> Self {
        Self {
            x: x.div_euclid(BLOCKS_PER_CHUNK),
            z: z.div_euclid(BLOCKS_PER_CHUNK),
        }
    }

    /// Region file holding this chunk.
    #[must_use]
    pub const fn region(self) -> RegionPos {
        RegionPos {
            x: self.x.div_euclid(CHUNKS_PER_REGION),
            z: self.z.div_euclid(CHUNKS_PER_REGION),
        }
    }

    /// Index of this chunk in its region's location table (0..1024).
    #[must_use]
    pub const fn local_index(self) -> usize {
        let local_x = self.x.rem_euclid(CHUNKS_PER_REGION) as usize;
        let local_z = self.z.rem_euclid(CHUNKS_PER_REGION) as usize;
        local_z * CHUNKS_PER_REGION as usize + local_x
    }
}

/// Region coordinate (one region file covers 32x32 chunks).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Pod, Zeroable)]
#[repr(C)]
pub struct RegionPos {
    /// X coordinate in region space
    pub x: i32,
    /// Z coordinate in region space
    pub z: i32,
}

impl RegionPos {
    /// Creates a new region coordinate.
    #[must_use]
    pub const fn new(x: i32, z: i32) -> Self {
        Self { x, z }
    }

    /// File name of the region, e.g. `r.-1.0.mca`.
    #[must_use]
    pub fn filename(self) -> String {
        format!("r.{}.{}.mca", self.x, self.z)
    }
}
