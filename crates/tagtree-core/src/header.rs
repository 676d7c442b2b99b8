//! In-arena node header layout.
//!
//! ```text
//! offset  size  field
//!      0     1  type      low nibble: kind, high nibble: list element kind
//!      1     1  name_len  255 means "scan the name up to its NUL"
//!      2     2  flags     bit 15: changed since load, bits 0-7: application tags
//!      4     4  count     array/string length or list item count
//!      8     4  size      bytes from this header to the next sibling
//!     12     n  name      name bytes + NUL, padded to a multiple of 4
//! ```
//!
//! All integers are stored native-endian. A compound body ends with a 4-byte
//! zero marker that is included in the compound's `size`.
//!
//! `count` and `flags` are separate fields: the regeneration marker never
//! changes an item count.

use crate::arena::align4;
use tagtree_common::{TagKind, TagType};

/// Fixed part of a header, before the name.
pub const HEADER_FIXED: usize = 12;

/// Size of the compound terminator.
pub const END_MARKER: usize = 4;

/// `name_len` value meaning "name is 255 bytes or longer".
pub const LONG_NAME: u8 = 255;

/// Flag bit: node was modified and must be regenerated on save.
pub const NODE_CHANGED: u16 = 0x8000;

/// Mask of the application-defined tag bits.
pub const TAG_MASK: u16 = 0x00ff;

const TYPE_AT: usize = 0;
const NAME_LEN_AT: usize = 1;
const FLAGS_AT: usize = 2;
const COUNT_AT: usize = 4;
const SIZE_AT: usize = 8;

/// Header length (fixed part + padded name) for a name of `name_len` bytes.
#[must_use]
pub const fn header_len(name_len: usize) -> usize {
    HEADER_FIXED + align4(name_len + 1)
}

fn read_u16(mem: &[u8], at: usize) -> u16 {
    mem.get(at..at + 2)
        .map_or(0, bytemuck::pod_read_unaligned::<u16>)
}

fn read_u32(mem: &[u8], at: usize) -> u32 {
    mem.get(at..at + 4)
        .map_or(0, bytemuck::pod_read_unaligned::<u32>)
}

fn write_u16(mem: &mut [u8], at: usize, value: u16) {
    mem[at..at + 2].copy_from_slice(bytemuck::bytes_of(&value));
}

fn write_u32(mem: &mut [u8], at: usize, value: u32) {
    mem[at..at + 4].copy_from_slice(bytemuck::bytes_of(&value));
}

/// Type byte at `off`. Reading past the end yields the terminator.
#[must_use]
pub fn tag_at(mem: &[u8], off: usize) -> TagType {
    TagType(mem.get(off + TYPE_AT).copied().unwrap_or(0))
}

/// Name length of the node at `off`.
#[must_use]
pub fn name_len_at(mem: &[u8], off: usize) -> usize {
    let short = mem.get(off + NAME_LEN_AT).copied().unwrap_or(0);
    if short < LONG_NAME {
        return short as usize;
    }
    let start = off + HEADER_FIXED;
    mem.get(start..)
        .and_then(|rest| rest.iter().position(|&b| b == 0))
        .unwrap_or(0)
}

/// Name bytes of the node at `off`.
#[must_use]
pub fn name_at(mem: &[u8], off: usize) -> &[u8] {
    let start = off + HEADER_FIXED;
    let len = name_len_at(mem, off);
    mem.get(start..start + len).unwrap_or(&[])
}

/// Dirty flags of the node at `off`.
#[must_use]
pub fn flags_at(mem: &[u8], off: usize) -> u16 {
    read_u16(mem, off + FLAGS_AT)
}

/// Item count of the node at `off`.
#[must_use]
pub fn count_at(mem: &[u8], off: usize) -> u32 {
    read_u32(mem, off + COUNT_AT)
}

/// Total byte size of the node at `off`.
#[must_use]
pub fn size_at(mem: &[u8], off: usize) -> usize {
    read_u32(mem, off + SIZE_AT) as usize
}

/// Overwrites the dirty flags.
pub fn set_flags(mem: &mut [u8], off: usize, flags: u16) {
    write_u16(mem, off + FLAGS_AT, flags);
}

/// Overwrites the item count.
pub fn set_count(mem: &mut [u8], off: usize, count: u32) {
    write_u32(mem, off + COUNT_AT, count);
}

/// Overwrites the total size.
pub fn set_size(mem: &mut [u8], off: usize, size: usize) {
    write_u32(mem, off + SIZE_AT, size as u32);
}

/// Adds `delta` to the total size.
pub fn adjust_size(mem: &mut [u8], off: usize, delta: isize) {
    let size = size_at(mem, off).saturating_add_signed(delta);
    set_size(mem, off, size);
}

/// Offset of the payload of the node at `off`.
#[must_use]
pub fn payload_offset(mem: &[u8], off: usize) -> usize {
    off + header_len(name_len_at(mem, off))
}

/// Offset of the node that follows `off`, or `None` at a terminator or a
/// damaged size.
#[must_use]
pub fn next_sibling(mem: &[u8], off: usize) -> Option<usize> {
    if tag_at(mem, off).is_end() {
        return None;
    }
    let size = size_at(mem, off);
    (size >= HEADER_FIXED && off + size <= mem.len()).then_some(off + size)
}

/// Writes a header (with its padded, NUL-terminated name) into `mem` at `off`.
///
/// `mem[off..]` must hold at least `header_len(name.len())` bytes.
pub fn write_header(mem: &mut [u8], off: usize, tag: TagType, name: &[u8], count: u32, size: usize) {
    let len = header_len(name.len());
    let slot = &mut mem[off..off + len];
    slot.fill(0);
    slot[TYPE_AT] = tag.0;
    slot[NAME_LEN_AT] = name.len().min(LONG_NAME as usize) as u8;
    write_u32(slot, COUNT_AT, count);
    write_u32(slot, SIZE_AT, size as u32);
    slot[HEADER_FIXED..HEADER_FIXED + name.len()].copy_from_slice(name);
}

/// Sets the type byte and name length of a header whose name bytes are
/// already in place.
pub fn stamp_header(mem: &mut [u8], off: usize, tag: TagType, name_len: usize) {
    mem[off + TYPE_AT] = tag.0;
    mem[off + NAME_LEN_AT] = name_len.min(LONG_NAME as usize) as u8;
}

/// Builds a standalone header, used when a node is synthesized.
#[must_use]
pub fn encode_header(tag: TagType, name: &[u8], count: u32, size: usize) -> Vec<u8> {
    let mut bytes = vec![0; header_len(name.len())];
    write_header(&mut bytes, 0, tag, name, count, size);
    bytes
}

/// Read-only view of one node, re-derived from `(buffer, offset)`.
#[derive(Debug, Clone, Copy)]
pub struct NodeRef<'a> {
    mem: &'a [u8],
    offset: usize,
}

impl<'a> NodeRef<'a> {
    /// Views the node at `offset`, or `None` if no header fits there.
    #[must_use]
    pub fn new(mem: &'a [u8], offset: usize) -> Option<Self> {
        (offset + HEADER_FIXED <= mem.len()).then_some(Self { mem, offset })
    }

    /// Offset of the node in its buffer.
    #[must_use]
    pub const fn offset(&self) -> usize {
        self.offset
    }

    /// Packed type byte.
    #[must_use]
    pub fn tag(&self) -> TagType {
        tag_at(self.mem, self.offset)
    }

    /// Node kind, `None` for an unknown type byte.
    #[must_use]
    pub fn kind(&self) -> Option<TagKind> {
        self.tag().kind()
    }

    /// Raw name bytes.
    #[must_use]
    pub fn name(&self) -> &'a [u8] {
        name_at(self.mem, self.offset)
    }

    /// Name as text, lossily decoded.
    #[must_use]
    pub fn name_lossy(&self) -> std::borrow::Cow<'a, str> {
        String::from_utf8_lossy(self.name())
    }

    /// Item count.
    #[must_use]
    pub fn count(&self) -> u32 {
        count_at(self.mem, self.offset)
    }

    /// Total byte size.
    #[must_use]
    pub fn size(&self) -> usize {
        size_at(self.mem, self.offset)
    }

    /// Dirty flags.
    #[must_use]
    pub fn flags(&self) -> u16 {
        flags_at(self.mem, self.offset)
    }

    /// True if the node waits for regeneration on save.
    #[must_use]
    pub fn is_dirty(&self) -> bool {
        self.flags() & NODE_CHANGED != 0
    }

    /// Bytes from the payload start to the end of the node.
    #[must_use]
    pub fn payload(&self) -> &'a [u8] {
        let start = payload_offset(self.mem, self.offset);
        let end = (self.offset + self.size()).min(self.mem.len());
        self.mem.get(start..end).unwrap_or(&[])
    }
}
