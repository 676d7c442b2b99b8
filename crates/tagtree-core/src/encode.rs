//! Arena to stream encoding, with save-time regeneration.
//!
//! Compounds and lists of compounds flagged with [`NODE_CHANGED`] ask a
//! [`RegenerateHook`] for extra fragments once per pending tag bit; those
//! fragments are written after the physical children, before the node is
//! closed.

use std::io::Write;

use byteorder::{ByteOrder, NativeEndian};
use tagtree_common::{wire_len, NbtError, NbtResult, TagKind, TagType};

use crate::header::{self, NODE_CHANGED, TAG_MASK};
use crate::iter::{repetition_end, NodeIter};
use crate::stream::TagWriter;
use crate::tree::Fragment;

/// Supplies fragments for nodes marked for regeneration.
pub trait RegenerateHook {
    /// Next fragment for `tag`, or `None` once that tag is exhausted.
    fn regenerate(&mut self, tag: u8) -> Option<Fragment>;
}

impl<F> RegenerateHook for F
where
    F: FnMut(u8) -> Option<Fragment>,
{
    fn regenerate(&mut self, tag: u8) -> Option<Fragment> {
        self(tag)
    }
}

/// Hook that never adds anything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoRegeneration;

impl RegenerateHook for NoRegeneration {
    fn regenerate(&mut self, _tag: u8) -> Option<Fragment> {
        None
    }
}

/// Encodes the node at `offset` and returns its size in the arena.
pub fn encode_node<W, H>(
    mem: &[u8],
    offset: usize,
    writer: &mut TagWriter<W>,
    hook: &mut H,
) -> NbtResult<usize>
where
    W: Write,
    H: RegenerateHook + ?Sized,
{
    let tag = header::tag_at(mem, offset);
    let kind = tag
        .kind()
        .ok_or_else(|| corrupt(offset, format!("unknown type byte {:#04x}", tag.0)))?;
    let size = header::size_at(mem, offset);
    if kind == TagKind::Handle || kind == TagKind::End {
        return Ok(size);
    }

    let name = header::name_at(mem, offset);
    writer.write_u8(kind as u8)?;
    writer.write_u16(wire_len("name", name.len())?)?;
    writer.write_bytes(name)?;

    let payload = header::payload_offset(mem, offset);
    let count = header::count_at(mem, offset) as usize;
    match kind {
        TagKind::Byte => writer.write_u8(bytes(mem, payload, 1)?[0])?,
        TagKind::Short | TagKind::Int | TagKind::Long | TagKind::Float | TagKind::Double => {
            let width = kind.scalar_size().unwrap_or(4);
            write_swapped(writer, bytes(mem, payload, width)?, width)?;
        },
        TagKind::ByteArray => {
            writer.write_u32(count as u32)?;
            writer.write_bytes(bytes(mem, payload, count)?)?;
        },
        TagKind::IntArray => {
            writer.write_u32(count as u32)?;
            write_swapped(writer, bytes(mem, payload, count * 4)?, 4)?;
        },
        TagKind::LongArray => {
            writer.write_u32(count as u32)?;
            write_swapped(writer, bytes(mem, payload, count * 8)?, 8)?;
        },
        TagKind::String => {
            writer.write_u16(wire_len("string", count)?)?;
            writer.write_bytes(bytes(mem, payload, count)?)?;
        },
        TagKind::List if tag == TagType::LIST_COMPOUND => {
            encode_compound_list(mem, offset, payload, writer, hook)?;
        },
        TagKind::List => encode_list(mem, tag, payload, count, writer)?,
        TagKind::Compound => {
            for child in NodeIter::siblings(mem, payload) {
                encode_node(mem, child, writer, hook)?;
            }
            if header::flags_at(mem, offset) & NODE_CHANGED != 0 {
                for fragment in pending_fragments(mem, offset, hook) {
                    encode_body(fragment.as_bytes(), writer, hook)?;
                }
            }
            writer.write_u8(0)?;
        },
        TagKind::End | TagKind::Handle => {},
    }
    Ok(size)
}

/// Encodes every top-level node of a body, without a trailing end marker.
pub fn encode_body<W, H>(mem: &[u8], writer: &mut TagWriter<W>, hook: &mut H) -> NbtResult<usize>
where
    W: Write,
    H: RegenerateHook + ?Sized,
{
    let mut total = 0;
    for at in NodeIter::body(mem) {
        total += encode_node(mem, at, writer, hook)?;
    }
    Ok(total)
}

/// Collects the regenerated fragments of a flagged node, tags in ascending order.
fn pending_fragments<H>(mem: &[u8], offset: usize, hook: &mut H) -> Vec<Fragment>
where
    H: RegenerateHook + ?Sized,
{
    let pending = header::flags_at(mem, offset) & TAG_MASK;
    let mut fragments = Vec::new();
    for bit in 0..8 {
        let tag = 1u8 << bit;
        if pending & u16::from(tag) == 0 {
            continue;
        }
        while let Some(fragment) = hook.regenerate(tag) {
            fragments.push(fragment);
        }
    }
    fragments
}

fn encode_compound_list<W, H>(
    mem: &[u8],
    offset: usize,
    payload: usize,
    writer: &mut TagWriter<W>,
    hook: &mut H,
) -> NbtResult<()>
where
    W: Write,
    H: RegenerateHook + ?Sized,
{
    let physical = header::count_at(mem, offset);
    let extra = if header::flags_at(mem, offset) & NODE_CHANGED != 0 {
        pending_fragments(mem, offset, hook)
    } else {
        Vec::new()
    };

    writer.write_u8(TagKind::Compound as u8)?;
    writer.write_u32(physical + extra.len() as u32)?;

    let mut cursor = payload;
    for _ in 0..physical {
        for child in NodeIter::siblings(mem, cursor) {
            encode_node(mem, child, writer, hook)?;
        }
        cursor = repetition_end(mem, cursor)
            .ok_or_else(|| corrupt(cursor, "unterminated list repetition".to_string()))?;
        writer.write_u8(0)?;
    }
    for fragment in extra {
        encode_body(fragment.as_bytes(), writer, hook)?;
        writer.write_u8(0)?;
    }
    Ok(())
}

fn encode_list<W: Write>(
    mem: &[u8],
    tag: TagType,
    payload: usize,
    count: usize,
    writer: &mut TagWriter<W>,
) -> NbtResult<()> {
    let element = tag
        .element()
        .ok_or_else(|| corrupt(payload, format!("unknown list type {:#04x}", tag.0)))?;
    writer.write_u8(element as u8)?;
    writer.write_u32(count as u32)?;

    match element {
        TagKind::String => {
            let mut cursor = payload;
            for _ in 0..count {
                let rest = mem.get(cursor..).unwrap_or(&[]);
                let len = rest
                    .iter()
                    .position(|&b| b == 0)
                    .ok_or_else(|| corrupt(cursor, "unterminated list string".to_string()))?;
                writer.write_u16(wire_len("list string", len)?)?;
                writer.write_bytes(&rest[..len])?;
                cursor += len + 1;
            }
        },
        scalar => {
            if let Some(width) = scalar.scalar_size() {
                write_swapped(writer, bytes(mem, payload, count * width)?, width)?;
            }
        },
    }
    Ok(())
}

/// Writes native values of `width` bytes in big-endian order.
fn write_swapped<W: Write>(writer: &mut TagWriter<W>, values: &[u8], width: usize) -> NbtResult<()> {
    match width {
        2 => values
            .chunks_exact(2)
            .try_for_each(|v| writer.write_u16(NativeEndian::read_u16(v))),
        4 => values
            .chunks_exact(4)
            .try_for_each(|v| writer.write_u32(NativeEndian::read_u32(v))),
        8 => values
            .chunks_exact(8)
            .try_for_each(|v| writer.write_u64(NativeEndian::read_u64(v))),
        _ => writer.write_bytes(values),
    }
}

fn bytes(mem: &[u8], at: usize, len: usize) -> NbtResult<&[u8]> {
    mem.get(at..at + len)
        .ok_or_else(|| corrupt(at, format!("payload of {len} bytes past arena end")))
}

fn corrupt(offset: usize, what: String) -> NbtError {
    NbtError::StreamCorrupt(format!("{what} (node at {offset})"))
}
