//! The tree handle: parse entry points, save paths and edit delegates.

use std::fs::File;
use std::io::{BufWriter, Read, Seek, Write};
use std::path::Path;

use flate2::write::{GzEncoder, ZlibEncoder};
use flate2::Compression;
use tagtree_common::{NbtError, NbtResult, TagType};
use tracing::{debug, info};

use crate::arena::{Arena, FILE_PAGE_SIZE};
use crate::builder::NodeBuilder;
use crate::config::TreeConfig;
use crate::decode::{decode_node, DecodeContext};
use crate::encode::{encode_body, RegenerateHook};
use crate::header::NodeRef;
use crate::iter::NodeIter;
use crate::mutate;
use crate::placement::{AppendOnly, Placement, SectionLayout};
use crate::query::find_node;
use crate::stream::TagReader;

/// An NBT tree held in a single arena.
///
/// The root node, when present, sits at offset 0. All node references are
/// plain offsets and stay valid until the next structural edit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NbtTree {
    arena: Arena,
    compression_level: u32,
}

/// A loose body of nodes, usually ending in a terminator, used to insert
/// or regenerate content. Same storage as a tree.
pub type Fragment = NbtTree;

impl Default for NbtTree {
    fn default() -> Self {
        Self::new()
    }
}

impl NbtTree {
    /// Creates an empty tree.
    #[must_use]
    pub fn new() -> Self {
        Self {
            arena: Arena::new(FILE_PAGE_SIZE),
            compression_level: TreeConfig::default().compression_level,
        }
    }

    /// Wraps bytes already in arena layout.
    #[must_use]
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self {
            arena: Arena::from_bytes(bytes, FILE_PAGE_SIZE),
            ..Self::new()
        }
    }

    /// Raw arena bytes.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        self.arena.as_slice()
    }

    /// Consumes the tree, returning the arena bytes.
    #[must_use]
    pub fn into_bytes(self) -> Vec<u8> {
        self.arena.into_bytes()
    }

    /// Bytes in use.
    #[must_use]
    pub fn len(&self) -> usize {
        self.arena.len()
    }

    /// True if the tree holds no node.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.arena.is_empty()
    }

    /// The backing arena.
    #[must_use]
    pub const fn arena(&self) -> &Arena {
        &self.arena
    }

    pub(crate) fn arena_mut(&mut self) -> &mut Arena {
        &mut self.arena
    }

    /// Header view of the node at `offset`.
    #[must_use]
    pub fn node(&self, offset: usize) -> Option<NodeRef<'_>> {
        NodeRef::new(self.as_bytes(), offset)
    }

    /// Starts appending nodes at the end of the tree.
    pub fn builder(&mut self) -> NodeBuilder<'_> {
        NodeBuilder::new(self)
    }

    /// Level used by [`Self::save`] and [`Self::compress`].
    #[must_use]
    pub const fn compression_level(&self) -> u32 {
        self.compression_level
    }

    /// Sets the save compression level (clamped to 0-9).
    pub fn set_compression_level(&mut self, level: u32) {
        self.compression_level = level.min(9);
    }

    // === Parsing ===

    /// Parses a gzip-compressed file with the default configuration.
    pub fn parse_file<P: AsRef<Path>>(path: P) -> NbtResult<Self> {
        Self::parse_file_with(path, &TreeConfig::default())
    }

    /// Parses a gzip-compressed file.
    pub fn parse_file_with<P: AsRef<Path>>(path: P, config: &TreeConfig) -> NbtResult<Self> {
        let path = path.as_ref();
        let mut reader = TagReader::open_gzip(path)?;
        let tree = Self::parse_with(&mut reader, config, &AppendOnly)?;
        info!("Parsed {} ({} bytes in memory)", path.display(), tree.len());
        Ok(tree)
    }

    /// Parses the region entry at byte `offset` of `source`.
    pub fn parse_region_entry<S: Read + Seek>(source: S, offset: u64) -> NbtResult<Self> {
        Self::parse_region_entry_with(source, offset, &TreeConfig::default())
    }

    /// Parses a region entry, placing chunk sections at fixed offsets when
    /// `config.section_layout` is set.
    pub fn parse_region_entry_with<S: Read + Seek>(source: S, offset: u64, config: &TreeConfig) -> NbtResult<Self> {
        let mut reader = TagReader::open_region_entry(source, offset)?;
        let arena = Arena::with_capacity(config.region_page_size, config.region_initial_capacity)?;
        let mut tree = Self {
            arena,
            compression_level: config.compression_level,
        };
        if config.section_layout {
            tree.decode_into(&mut reader, config, &SectionLayout::default())?;
        } else {
            tree.decode_into(&mut reader, config, &AppendOnly)?;
        }
        tree.arena.shrink_to_page();
        Ok(tree)
    }

    /// Parses an in-memory zlib block.
    pub fn parse_deflated(bytes: &[u8]) -> NbtResult<Self> {
        let mut reader = TagReader::open_deflated(bytes)?;
        Self::parse_with(&mut reader, &TreeConfig::default(), &AppendOnly)
    }

    /// Parses one root node from an opened reader.
    pub fn parse_with<R: Read>(
        reader: &mut TagReader<R>,
        config: &TreeConfig,
        placement: &dyn Placement,
    ) -> NbtResult<Self> {
        let mut tree = Self {
            arena: Arena::new(config.file_page_size),
            compression_level: config.compression_level,
        };
        tree.decode_into(reader, config, placement)?;
        Ok(tree)
    }

    fn decode_into<R: Read>(
        &mut self,
        reader: &mut TagReader<R>,
        config: &TreeConfig,
        placement: &dyn Placement,
    ) -> NbtResult<()> {
        let mut ctx = DecodeContext::new(placement, config.max_depth);
        let size = decode_node(reader, &mut self.arena, &mut ctx)?
            .ok_or_else(|| NbtError::StreamCorrupt("no root node".to_string()))?;
        debug!(
            "Decoded root: {size} bytes, {} stream bytes, {} list(s) dropped",
            reader.consumed(),
            ctx.skipped()
        );
        Ok(())
    }

    // === Output ===

    /// Encodes the tree into `writer`; returns the bytes written.
    pub fn encode_to<W, H>(&self, writer: W, hook: &mut H) -> NbtResult<u64>
    where
        W: Write,
        H: RegenerateHook + ?Sized,
    {
        let mut out = crate::stream::TagWriter::new(writer);
        encode_body(self.as_bytes(), &mut out, hook)?;
        Ok(out.written())
    }

    /// Writes the tree to a gzip file.
    pub fn save<P, H>(&self, path: P, hook: &mut H) -> NbtResult<u64>
    where
        P: AsRef<Path>,
        H: RegenerateHook + ?Sized,
    {
        let path = path.as_ref();
        let file = File::create(path).map_err(|e| NbtError::Write(format!("{}: {e}", path.display())))?;
        let mut gz = GzEncoder::new(BufWriter::new(file), Compression::new(self.compression_level));
        let written = self.encode_to(&mut gz, hook)?;
        let mut inner = gz.finish().map_err(|e| NbtError::from_write(&e))?;
        inner.flush().map_err(|e| NbtError::from_write(&e))?;
        info!("Saved {} ({written} bytes uncompressed)", path.display());
        Ok(written)
    }

    /// Encodes the tree into a zlib block, as stored in region entries.
    pub fn compress<H>(&self, hook: &mut H) -> NbtResult<Vec<u8>>
    where
        H: RegenerateHook + ?Sized,
    {
        let mut zlib = ZlibEncoder::new(Vec::new(), Compression::new(self.compression_level));
        self.encode_to(&mut zlib, hook)?;
        zlib.finish().map_err(|e| NbtError::from_write(&e))
    }

    // === Queries ===

    /// Resolves a dotted path from the root.
    #[must_use]
    pub fn find(&self, path: &str) -> Option<usize> {
        self.find_from(0, path)
    }

    /// Resolves a dotted path from the node at `start`.
    #[must_use]
    pub fn find_from(&self, start: usize, path: &str) -> Option<usize> {
        if start >= self.len() {
            return None;
        }
        find_node(self.as_bytes(), start, path)
    }

    /// Children of a compound, repetitions of a list of compounds, or the
    /// rest of a body when `offset` is any other node.
    #[must_use]
    pub fn iter(&self, offset: usize) -> NodeIter<'_> {
        NodeIter::new(self.as_bytes(), offset)
    }

    // === Edits ===

    /// See [`mutate::delete_node`].
    pub fn delete(&mut self, offset: usize, nth: Option<u32>) -> Option<usize> {
        mutate::delete_node(self, offset, nth)
    }

    /// See [`mutate::insert_fragment`].
    pub fn insert(&mut self, path: &str, tag: TagType, fragment: &Fragment) -> NbtResult<Option<usize>> {
        mutate::insert_fragment(self, path, tag, fragment)
    }

    /// See [`mutate::append_list_item`].
    pub fn append_list_item(&mut self, list: usize, fragment: &Fragment) -> NbtResult<Option<usize>> {
        mutate::append_list_item(self, list, fragment)
    }

    /// Flags a compound or list of compounds for regeneration on save.
    pub fn mark_for_update(&mut self, offset: usize, tag: u8) -> bool {
        mutate::mark_for_update(self, offset, tag)
    }

    /// Copies the node at `offset` and its following siblings into a fragment.
    #[must_use]
    pub fn copy_subtree(&self, offset: usize) -> Fragment {
        Self::from_bytes(mutate::copy_subtree(self.as_bytes(), offset))
    }

    /// See [`mutate::refresh_sizes`].
    pub fn refresh_sizes(&mut self, offset: usize) -> Option<usize> {
        mutate::refresh_sizes(self, offset)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encode::NoRegeneration;
    use crate::stream::{COMPRESSION_ZLIB, REGION_PREFIX_LEN};
    use std::io::Cursor;
    use tagtree_common::TagKind;
    use tempfile::TempDir;

    fn sample() -> NbtTree {
        let mut tree = NbtTree::new();
        tree.builder()
            .begin_compound("")
            .and_then(|b| b.string("Name", "Foo"))
            .and_then(|b| b.short("Health", 20))
            .and_then(|b| b.list_floats("Pos", &[1.0, 2.5, -3.0]))
            .and_then(|b| b.end_compound())
            .and_then(|b| b.finish())
            .expect("build");
        tree
    }

    #[test]
    fn test_save_and_parse_file() {
        let dir = TempDir::new().expect("temp dir");
        let path = dir.path().join("level.dat");
        let tree = sample();
        tree.save(&path, &mut NoRegeneration).expect("save");

        let loaded = NbtTree::parse_file(&path).expect("parse");
        assert_eq!(loaded.as_bytes(), tree.as_bytes());
    }

    #[test]
    fn test_compress_and_parse_deflated() {
        let tree = sample();
        let block = tree.compress(&mut NoRegeneration).expect("compress");
        let loaded = NbtTree::parse_deflated(&block).expect("parse");
        assert_eq!(loaded.as_bytes(), tree.as_bytes());
    }

    #[test]
    fn test_parse_region_entry() {
        let tree = sample();
        let block = tree.compress(&mut NoRegeneration).expect("compress");
        let mut file = vec![0u8; 8192];
        file.extend_from_slice(&(block.len() as u32 + 1).to_be_bytes());
        file.push(COMPRESSION_ZLIB);
        file.extend_from_slice(&block);
        assert_eq!(file.len(), 8192 + REGION_PREFIX_LEN + block.len());

        let loaded = NbtTree::parse_region_entry(Cursor::new(file), 8192).expect("parse");
        assert_eq!(loaded.as_bytes(), tree.as_bytes());
    }

    #[test]
    fn test_empty_stream_has_no_root() {
        let mut zlib = ZlibEncoder::new(Vec::new(), Compression::default());
        zlib.write_all(&[0]).expect("write");
        let block = zlib.finish().expect("finish");
        assert!(matches!(NbtTree::parse_deflated(&block), Err(NbtError::StreamCorrupt(_))));
    }

    #[test]
    fn test_missing_file() {
        let err = NbtTree::parse_file("/nonexistent/level.dat").expect_err("missing");
        assert!(matches!(err, NbtError::StreamOpen(_)));
    }

    #[test]
    fn test_find_and_iter() {
        let tree = sample();
        let health = tree.find("Health").expect("Health");
        let node = tree.node(health).expect("node");
        assert_eq!(node.kind(), Some(TagKind::Short));
        assert_eq!(tree.iter(0).count(), 3);
        assert_eq!(tree.find_from(1 << 20, "Health"), None);
    }

    #[test]
    fn test_copy_subtree_round_trips_through_insert() {
        let mut tree = sample();
        let health = tree.find("Health").expect("Health");
        let copy = tree.copy_subtree(health);
        let before = tree.len();
        let at = tree
            .insert("Health", TagType::of(TagKind::Short), &copy)
            .expect("insert")
            .expect("placed");
        assert_eq!(at, health);
        // Health and Pos were copied over Health.
        assert!(tree.len() > before);
        assert_eq!(tree.iter(0).count(), 4);
    }

    #[test]
    fn test_compression_level_is_clamped() {
        let mut tree = NbtTree::new();
        tree.set_compression_level(42);
        assert_eq!(tree.compression_level(), 9);
    }
}
