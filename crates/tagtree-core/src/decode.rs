//! Stream to arena decoding.
//!
//! One call decodes one node: the header and name go into the arena first,
//! then the payload is dispatched on the node kind. Multi-byte values are
//! big-endian on the wire and stored native-endian in the arena.

use std::io::Read;

use byteorder::{BigEndian, ByteOrder, NativeEndian};
use tagtree_common::{NbtError, NbtResult, TagKind, TagType};
use tracing::warn;

use crate::arena::Arena;
use crate::header::{self, header_len, END_MARKER};
use crate::placement::{FixedSchema, Placement};
use crate::stream::TagReader;

/// Default nesting limit for compounds and lists.
pub const MAX_DEPTH: usize = 512;

/// Largest payload read straight into the arena; longer ones are staged.
const READ_STEP: usize = 64 * 1024;

/// State carried through one decode pass.
pub struct DecodeContext<'p> {
    placement: &'p dyn Placement,
    max_depth: usize,
    depth: usize,
    skipped: usize,
}

impl std::fmt::Debug for DecodeContext<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DecodeContext")
            .field("max_depth", &self.max_depth)
            .field("depth", &self.depth)
            .field("skipped", &self.skipped)
            .finish_non_exhaustive()
    }
}

impl<'p> DecodeContext<'p> {
    /// Creates a context using `placement` for list-of-compound repetitions.
    pub fn new(placement: &'p dyn Placement, max_depth: usize) -> Self {
        Self {
            placement,
            max_depth,
            depth: 0,
            skipped: 0,
        }
    }

    /// Number of unsupported list shapes that were dropped.
    #[must_use]
    pub const fn skipped(&self) -> usize {
        self.skipped
    }

    fn enter(&mut self) -> NbtResult<()> {
        if self.depth >= self.max_depth {
            return Err(NbtError::StreamCorrupt(format!(
                "nesting deeper than {} levels",
                self.max_depth
            )));
        }
        self.depth += 1;
        Ok(())
    }

    fn leave(&mut self) {
        self.depth -= 1;
    }
}

/// Decodes one node into `arena`.
///
/// Returns `None` when the stream holds the end marker of the enclosing
/// compound, otherwise the total size of the node in the arena.
pub fn decode_node<R: Read>(
    reader: &mut TagReader<R>,
    arena: &mut Arena,
    ctx: &mut DecodeContext<'_>,
) -> NbtResult<Option<usize>> {
    let raw = reader.read_u8()?;
    if raw == 0 {
        return Ok(None);
    }
    let kind = TagKind::from_wire(raw).ok_or_else(|| {
        NbtError::StreamCorrupt(format!(
            "unknown tag {raw} at stream byte {}",
            reader.consumed() - 1
        ))
    })?;

    let name_len = reader.read_u16()? as usize;
    let start = arena.allocate(header_len(name_len))?;
    let name_at = start + header::HEADER_FIXED;
    reader.read_bytes(&mut arena.as_mut_slice()[name_at..name_at + name_len])?;
    header::stamp_header(arena.as_mut_slice(), start, TagType::of(kind), name_len);

    decode_payload(reader, arena, ctx, start, kind)?;

    let size = arena.len() - start;
    header::set_size(arena.as_mut_slice(), start, size);
    Ok(Some(size))
}

fn decode_payload<R: Read>(
    reader: &mut TagReader<R>,
    arena: &mut Arena,
    ctx: &mut DecodeContext<'_>,
    start: usize,
    kind: TagKind,
) -> NbtResult<()> {
    match kind {
        TagKind::Byte | TagKind::Short | TagKind::Int | TagKind::Long | TagKind::Float | TagKind::Double => {
            let width = kind.scalar_size().unwrap_or(1);
            read_swapped(reader, arena, width, 1)?;
        },
        TagKind::ByteArray | TagKind::IntArray | TagKind::LongArray => {
            let count = reader.read_u32()?;
            let width = match kind {
                TagKind::IntArray => 4,
                TagKind::LongArray => 8,
                _ => 1,
            };
            header::set_count(arena.as_mut_slice(), start, count);
            read_swapped(reader, arena, width, count as usize)?;
        },
        TagKind::String => {
            let len = reader.read_u16()?;
            header::set_count(arena.as_mut_slice(), start, u32::from(len));
            let at = arena.allocate(len as usize + 1)?;
            reader.read_bytes(&mut arena.as_mut_slice()[at..at + len as usize])?;
        },
        TagKind::List => decode_list(reader, arena, ctx, start)?,
        TagKind::Compound => {
            ctx.enter()?;
            while decode_node(reader, arena, ctx)?.is_some() {}
            arena.allocate(END_MARKER)?;
            ctx.leave();
        },
        TagKind::End | TagKind::Handle => {},
    }
    Ok(())
}

fn decode_list<R: Read>(
    reader: &mut TagReader<R>,
    arena: &mut Arena,
    ctx: &mut DecodeContext<'_>,
    start: usize,
) -> NbtResult<()> {
    let raw = reader.read_u8()?;
    let element = TagKind::from_wire(raw)
        .ok_or_else(|| NbtError::StreamCorrupt(format!("unknown list element tag {raw}")))?;
    let count = reader.read_u32()?;

    let name_len = header::name_len_at(arena.as_slice(), start);
    let mem = arena.as_mut_slice();
    header::stamp_header(mem, start, TagType::list_of(element), name_len);
    header::set_count(mem, start, count);

    match element {
        TagKind::Compound => {
            let placement = ctx.placement;
            let schema = placement.schema_for(header::name_at(arena.as_slice(), start));
            ctx.enter()?;
            for _ in 0..count {
                decode_repetition(reader, arena, ctx, schema)?;
            }
            ctx.leave();
        },
        TagKind::String => {
            let mut packed = Vec::new();
            for _ in 0..count {
                let len = reader.read_u16()? as usize;
                let at = packed.len();
                packed.resize(at + len, 0);
                reader.read_bytes(&mut packed[at..])?;
                packed.push(0);
            }
            arena.push_bytes(&packed)?;
        },
        TagKind::End => {},
        TagKind::List | TagKind::ByteArray | TagKind::IntArray | TagKind::LongArray => {
            let name = String::from_utf8_lossy(header::name_at(arena.as_slice(), start)).into_owned();
            warn!("Dropping unsupported list of {element} {name:?} ({count} items)");
            for _ in 0..count {
                skip_payload(reader, element, ctx.depth)?;
            }
            header::set_count(arena.as_mut_slice(), start, 0);
            ctx.skipped += 1;
        },
        scalar => {
            let width = scalar.scalar_size().unwrap_or(1);
            read_swapped(reader, arena, width, count as usize)?;
        },
    }
    Ok(())
}

/// Decodes one repetition of a list-of-compound, terminator included.
fn decode_repetition<R: Read>(
    reader: &mut TagReader<R>,
    arena: &mut Arena,
    ctx: &mut DecodeContext<'_>,
    schema: Option<&FixedSchema>,
) -> NbtResult<()> {
    let Some(schema) = schema else {
        while decode_node(reader, arena, ctx)?.is_some() {}
        arena.allocate(END_MARKER)?;
        return Ok(());
    };

    let region = arena.allocate(schema.region_size())?;
    let mut filled = vec![false; schema.len()];
    loop {
        let child = arena.len();
        if decode_node(reader, arena, ctx)?.is_none() {
            break;
        }
        let slot = schema
            .match_slot(arena.as_slice(), child)
            .filter(|&index| !filled[index]);
        if let Some(index) = slot {
            let at = region + schema.slot_offset(index);
            let end = arena.len();
            arena.as_mut_slice().copy_within(child..end, at);
            arena.truncate(child);
            filled[index] = true;
        }
    }

    // Last slot first so the offsets of earlier slots stay valid.
    for index in (0..schema.len()).rev() {
        if !filled[index] {
            let size = schema.slots()[index].node_size();
            arena.remove(region + schema.slot_offset(index), size);
        }
    }
    arena.allocate(END_MARKER)?;
    Ok(())
}

/// Reads `count` values of `width` bytes and converts them to native order.
fn read_swapped<R: Read>(
    reader: &mut TagReader<R>,
    arena: &mut Arena,
    width: usize,
    count: usize,
) -> NbtResult<()> {
    let len = width
        .checked_mul(count)
        .ok_or_else(|| NbtError::StreamCorrupt(format!("array of {count} items overflows")))?;
    if len > READ_STEP {
        // Declared lengths are untrusted: only grow as far as the stream delivers.
        let mut staged = Vec::new();
        while staged.len() < len {
            let done = staged.len();
            staged.resize(done + (len - done).min(READ_STEP), 0);
            reader.read_bytes(&mut staged[done..])?;
        }
        to_native(&mut staged, width);
        arena.push_bytes(&staged)?;
        return Ok(());
    }
    let at = arena.allocate(len)?;
    let bytes = &mut arena.as_mut_slice()[at..at + len];
    reader.read_bytes(bytes)?;
    to_native(bytes, width);
    Ok(())
}

/// Converts big-endian values of `width` bytes to native order in place.
pub(crate) fn to_native(bytes: &mut [u8], width: usize) {
    match width {
        2 => bytes.chunks_exact_mut(2).for_each(|v| {
            let x = BigEndian::read_u16(v);
            NativeEndian::write_u16(v, x);
        }),
        4 => bytes.chunks_exact_mut(4).for_each(|v| {
            let x = BigEndian::read_u32(v);
            NativeEndian::write_u32(v, x);
        }),
        8 => bytes.chunks_exact_mut(8).for_each(|v| {
            let x = BigEndian::read_u64(v);
            NativeEndian::write_u64(v, x);
        }),
        _ => {},
    }
}

/// Consumes the payload of a `kind` value without storing it.
fn skip_payload<R: Read>(reader: &mut TagReader<R>, kind: TagKind, depth: usize) -> NbtResult<()> {
    if depth >= MAX_DEPTH {
        return Err(NbtError::StreamCorrupt(format!("nesting deeper than {MAX_DEPTH} levels")));
    }
    match kind {
        TagKind::End => Ok(()),
        TagKind::ByteArray => {
            let n = reader.read_u32()? as usize;
            reader.skip(n)
        },
        TagKind::IntArray => {
            let n = reader.read_u32()? as usize;
            reader.skip(n * 4)
        },
        TagKind::LongArray => {
            let n = reader.read_u32()? as usize;
            reader.skip(n * 8)
        },
        TagKind::String => {
            let n = reader.read_u16()? as usize;
            reader.skip(n)
        },
        TagKind::List => {
            let raw = reader.read_u8()?;
            let element = TagKind::from_wire(raw)
                .ok_or_else(|| NbtError::StreamCorrupt(format!("unknown list element tag {raw}")))?;
            let count = reader.read_u32()? as usize;
            if let Some(width) = element.scalar_size() {
                return reader.skip(count * width);
            }
            for _ in 0..count {
                skip_payload(reader, element, depth + 1)?;
            }
            Ok(())
        },
        TagKind::Compound => loop {
            let raw = reader.read_u8()?;
            if raw == 0 {
                return Ok(());
            }
            let child = TagKind::from_wire(raw)
                .ok_or_else(|| NbtError::StreamCorrupt(format!("unknown tag {raw}")))?;
            let name_len = reader.read_u16()? as usize;
            reader.skip(name_len)?;
            skip_payload(reader, child, depth + 1)?;
        },
        TagKind::Handle => Err(NbtError::StreamCorrupt("handle tag in stream".to_string())),
        scalar => reader.skip(scalar.scalar_size().unwrap_or(0)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::placement::{AppendOnly, SectionLayout};
    use crate::stream::StreamMode;

    fn reader(bytes: &[u8]) -> TagReader<&[u8]> {
        TagReader::new(bytes, StreamMode::Deflated)
    }

    fn decode(bytes: &[u8], placement: &dyn Placement) -> NbtResult<Arena> {
        let mut arena = Arena::new(64);
        let mut ctx = DecodeContext::new(placement, MAX_DEPTH);
        decode_node(&mut reader(bytes), &mut arena, &mut ctx)?;
        Ok(arena)
    }

    #[test]
    fn test_int_is_stored_native() {
        let arena = decode(&[3, 0, 1, b'v', 0x01, 0x02, 0x03, 0x04], &AppendOnly).expect("decode");
        let mem = arena.as_slice();
        assert_eq!(header::size_at(mem, 0), 20);
        let payload = header::payload_offset(mem, 0);
        assert_eq!(NativeEndian::read_u32(&mem[payload..]), 0x0102_0304);
    }

    #[test]
    fn test_compound_with_string() {
        let bytes = [
            10, 0, 0, // compound ""
            8, 0, 4, b'N', b'a', b'm', b'e', 0, 3, b'F', b'o', b'o', // string
            0,
        ];
        let arena = decode(&bytes, &AppendOnly).expect("decode");
        let mem = arena.as_slice();
        let child = header::payload_offset(mem, 0);
        assert_eq!(header::name_at(mem, child), b"Name");
        assert_eq!(header::count_at(mem, child), 3);
        let text = header::payload_offset(mem, child);
        assert_eq!(&mem[text..text + 4], b"Foo\0");
        assert_eq!(header::size_at(mem, 0), 16 + 20 + 4 + 4);
        assert_eq!(header::size_at(mem, 0), mem.len());
    }

    #[test]
    fn test_end_marker_returns_none() {
        let mut arena = Arena::new(64);
        let mut ctx = DecodeContext::new(&AppendOnly, MAX_DEPTH);
        let out = decode_node(&mut reader(&[0]), &mut arena, &mut ctx).expect("decode");
        assert_eq!(out, None);
        assert!(arena.is_empty());
    }

    #[test]
    fn test_unknown_tag_is_corrupt() {
        let err = decode(&[42, 0, 0], &AppendOnly).expect_err("must fail");
        assert!(matches!(err, NbtError::StreamCorrupt(_)));
    }

    #[test]
    fn test_truncated_payload() {
        let err = decode(&[3, 0, 0, 0x01], &AppendOnly).expect_err("must fail");
        assert!(matches!(err, NbtError::StreamTruncated(_)));
    }

    #[test]
    fn test_oversized_array_length_fails_without_reserving_it() {
        let bytes = [7, 0, 1, b'a', 0xFF, 0xFF, 0xFF, 0xF0, 1, 2, 3];
        let mut arena = Arena::new(64);
        let mut ctx = DecodeContext::new(&AppendOnly, MAX_DEPTH);
        let err = decode_node(&mut reader(&bytes), &mut arena, &mut ctx).expect_err("truncated");
        assert!(matches!(err, NbtError::StreamTruncated(_)));
        assert!(arena.capacity() < 1 << 20);
    }

    #[test]
    fn test_large_int_array_is_staged() {
        let count = 20_000u32;
        let mut bytes = vec![11, 0, 1, b'i'];
        bytes.extend_from_slice(&count.to_be_bytes());
        for v in 0..count as i32 {
            bytes.extend_from_slice(&(-v).to_be_bytes());
        }
        let arena = decode(&bytes, &AppendOnly).expect("decode");
        let mem = arena.as_slice();
        let payload = header::payload_offset(mem, 0);
        assert_eq!(header::count_at(mem, 0), count);
        assert_eq!(header::size_at(mem, 0), 16 + 4 * count as usize);
        let last = payload + 4 * (count as usize - 1);
        assert_eq!(NativeEndian::read_i32(&mem[last..]), -(count as i32 - 1));
    }

    #[test]
    fn test_nested_list_is_dropped() {
        let bytes = [
            10, 0, 0,
            9, 0, 1, b'L', 9, 0, 0, 0, 1, // list of lists, 1 item
            1, 0, 0, 0, 2, 7, 8, // inner list of 2 bytes
            1, 0, 1, b'b', 5, // trailing byte survives
            0,
        ];
        let mut arena = Arena::new(64);
        let mut ctx = DecodeContext::new(&AppendOnly, MAX_DEPTH);
        decode_node(&mut reader(&bytes), &mut arena, &mut ctx).expect("decode");
        assert_eq!(ctx.skipped(), 1);

        let mem = arena.as_slice();
        let list = header::payload_offset(mem, 0);
        assert_eq!(header::count_at(mem, list), 0);
        assert_eq!(header::size_at(mem, list), 16);
        let byte = header::next_sibling(mem, list).expect("sibling");
        assert_eq!(header::name_at(mem, byte), b"b");
        assert_eq!(mem[header::payload_offset(mem, byte)], 5);
    }

    #[test]
    fn test_depth_limit() {
        let mut bytes = Vec::new();
        for _ in 0..8 {
            bytes.extend_from_slice(&[10, 0, 0]);
        }
        bytes.extend(std::iter::repeat(0).take(8));
        let mut arena = Arena::new(64);
        let mut ctx = DecodeContext::new(&AppendOnly, 4);
        let err = decode_node(&mut reader(&bytes), &mut arena, &mut ctx).expect_err("too deep");
        assert!(matches!(err, NbtError::StreamCorrupt(_)));
    }

    fn section_bytes(reversed: bool, with_extra: bool) -> Vec<u8> {
        let mut fields: Vec<Vec<u8>> = Vec::new();
        for (name, len) in [("Blocks", 4096u32), ("Data", 2048), ("SkyLight", 2048), ("BlockLight", 2048)] {
            let mut f = vec![7, 0, name.len() as u8];
            f.extend_from_slice(name.as_bytes());
            f.extend_from_slice(&len.to_be_bytes());
            f.extend(std::iter::repeat(name.len() as u8).take(len as usize));
            fields.push(f);
        }
        fields.push(vec![1, 0, 1, b'Y', 4]);
        if reversed {
            fields.reverse();
        }
        let mut out = vec![9, 0, 8];
        out.extend_from_slice(b"Sections");
        out.extend_from_slice(&[10, 0, 0, 0, 1]);
        if with_extra {
            out.extend_from_slice(&[3, 0, 3, b'A', b'd', b'd', 0, 0, 0, 9]);
        }
        for f in fields {
            out.extend_from_slice(&f);
        }
        out.push(0);
        out
    }

    #[test]
    fn test_section_fields_land_in_fixed_slots() {
        let layout = SectionLayout::default();
        let schema = layout.schema();
        let arena = decode(&section_bytes(true, true), &layout).expect("decode");
        let mem = arena.as_slice();
        let rep = header::payload_offset(mem, 0);

        for (index, slot) in schema.slots().iter().enumerate() {
            let at = rep + schema.slot_offset(index);
            assert_eq!(header::name_at(mem, at), slot.name.as_bytes());
        }
        let y = rep + schema.payload_offset("Y").expect("Y");
        assert_eq!(mem[y], 4);

        // The unmatched field follows the fixed region.
        let extra = rep + schema.region_size();
        assert_eq!(header::name_at(mem, extra), b"Add");
        assert_eq!(header::size_at(mem, 0), mem.len());
        assert!(header::tag_at(mem, mem.len() - 4).is_end());
    }

    #[test]
    fn test_unfilled_slots_are_compacted() {
        let layout = SectionLayout::default();
        let bytes = [
            9, 0, 8, b'S', b'e', b'c', b't', b'i', b'o', b'n', b's', 10, 0, 0, 0, 1,
            1, 0, 1, b'Y', 2,
            0,
        ];
        let arena = decode(&bytes, &layout).expect("decode");
        let mem = arena.as_slice();
        let rep = header::payload_offset(mem, 0);
        assert_eq!(header::name_at(mem, rep), b"Y");
        assert_eq!(header::next_sibling(mem, rep), Some(rep + 20));
        assert!(header::tag_at(mem, rep + 20).is_end());
        assert_eq!(mem.len(), rep + 24);
    }

    #[test]
    fn test_same_tree_without_layout() {
        let plain = decode(&section_bytes(false, false), &AppendOnly).expect("decode");
        let fixed = decode(&section_bytes(false, false), &SectionLayout::default()).expect("decode");
        assert_eq!(plain.as_slice(), fixed.as_slice());
    }
}
