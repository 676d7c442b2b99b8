//! Typed reads and in-place writes of node payloads.
//!
//! Offsets are taken as `Option<usize>` so the result of a lookup can be
//! passed straight in; a miss yields the default, `None` or `false`.

use bytemuck::{pod_read_unaligned, Pod};
use tagtree_common::{TagKind, TagType};

use crate::header::{self, NodeRef};
use crate::tree::NbtTree;

fn read<T: Pod>(bytes: &[u8]) -> Option<T> {
    bytes.get(..std::mem::size_of::<T>()).map(pod_read_unaligned)
}

fn write<T: Pod>(bytes: &mut [u8], value: T) -> bool {
    let raw = bytemuck::bytes_of(&value);
    match bytes.get_mut(..raw.len()) {
        Some(dst) => {
            dst.copy_from_slice(raw);
            true
        },
        None => false,
    }
}

/// A scalar read as a float.
fn scalar_f32(kind: TagKind, bytes: &[u8]) -> Option<f32> {
    Some(match kind {
        TagKind::Byte => f32::from(read::<i8>(bytes)?),
        TagKind::Short => f32::from(read::<i16>(bytes)?),
        TagKind::Int => read::<i32>(bytes)? as f32,
        TagKind::Long => read::<i64>(bytes)? as f32,
        TagKind::Float => read::<f32>(bytes)?,
        TagKind::Double => read::<f64>(bytes)? as f32,
        _ => return None,
    })
}

fn store_f32(kind: TagKind, bytes: &mut [u8], value: f32) -> bool {
    match kind {
        TagKind::Byte => write(bytes, value as i8),
        TagKind::Short => write(bytes, value as i16),
        TagKind::Int => write(bytes, value as i32),
        TagKind::Float => write(bytes, value),
        TagKind::Double => write(bytes, f64::from(value)),
        _ => false,
    }
}

impl NbtTree {
    fn node_at(&self, off: Option<usize>) -> Option<NodeRef<'_>> {
        self.node(off?)
    }

    /// Payload bytes of a node, `None` on a miss.
    #[must_use]
    pub fn payload(&self, off: Option<usize>) -> Option<&[u8]> {
        self.node_at(off).map(|node| node.payload())
    }

    /// Item count and payload of an array, string or list.
    #[must_use]
    pub fn array_start(&self, off: Option<usize>) -> Option<(u32, &[u8])> {
        self.node_at(off).map(|node| (node.count(), node.payload()))
    }

    /// Reads a scalar as an integer. Floats are truncated, strings parsed
    /// as decimal. Anything else yields `default`.
    #[must_use]
    pub fn to_int(&self, off: Option<usize>, default: i64) -> i64 {
        let Some(node) = self.node_at(off) else {
            return default;
        };
        let bytes = node.payload();
        let kind = node.kind().filter(|_| !node.tag().is_list());
        let value = match kind {
            Some(TagKind::Byte) => read::<i8>(bytes).map(i64::from),
            Some(TagKind::Short) => read::<i16>(bytes).map(i64::from),
            Some(TagKind::Int) => read::<i32>(bytes).map(i64::from),
            Some(TagKind::Long) => read::<i64>(bytes),
            Some(TagKind::Float) => read::<f32>(bytes).map(|v| v as i64),
            Some(TagKind::Double) => read::<f64>(bytes).map(|v| v as i64),
            Some(TagKind::String) => self.string(off).and_then(|s| s.trim().parse().ok()),
            _ => None,
        };
        value.unwrap_or(default)
    }

    /// Fills `out` from a numeric scalar (at most one value) or a numeric
    /// list (at most `count` values).
    pub fn to_floats(&self, off: Option<usize>, out: &mut [f32]) -> bool {
        let Some(node) = self.node_at(off) else {
            return false;
        };
        let Some((element, limit)) = numeric_shape(node.tag(), node.count()) else {
            return false;
        };
        if out.len() > limit {
            return false;
        }
        let Some(width) = element.scalar_size() else {
            return false;
        };
        let bytes = node.payload();
        for (i, slot) in out.iter_mut().enumerate() {
            match bytes.get(i * width..).and_then(|b| scalar_f32(element, b)) {
                Some(value) => *slot = value,
                None => return false,
            }
        }
        true
    }

    /// Text of a string node.
    #[must_use]
    pub fn string(&self, off: Option<usize>) -> Option<&str> {
        let node = self.node_at(off)?;
        if node.kind()? != TagKind::String {
            return None;
        }
        let text = node.payload().get(..node.count() as usize)?;
        std::str::from_utf8(text).ok()
    }

    /// Bytes of a byte array.
    #[must_use]
    pub fn byte_array(&self, off: Option<usize>) -> Option<&[u8]> {
        let node = self.node_at(off)?;
        if node.tag() != TagType::of(TagKind::ByteArray) {
            return None;
        }
        node.payload().get(..node.count() as usize)
    }

    /// Values of an int array.
    #[must_use]
    pub fn int_array(&self, off: Option<usize>) -> Option<Vec<i32>> {
        let node = self.node_at(off)?;
        if node.tag() != TagType::of(TagKind::IntArray) {
            return None;
        }
        let bytes = node.payload().get(..node.count() as usize * 4)?;
        Some(bytes.chunks_exact(4).map(pod_read_unaligned).collect())
    }

    /// Items of a list of strings.
    #[must_use]
    pub fn list_strings(&self, off: Option<usize>) -> Option<Vec<&str>> {
        let node = self.node_at(off)?;
        if node.tag() != TagType::list_of(TagKind::String) {
            return None;
        }
        node.payload()
            .split(|&b| b == 0)
            .take(node.count() as usize)
            .map(|item| std::str::from_utf8(item).ok())
            .collect()
    }

    /// Overwrites a numeric scalar, truncating `value` to the node's width.
    pub fn set_int(&mut self, off: Option<usize>, value: i64) -> bool {
        let Some(off) = off.filter(|&o| o < self.len()) else {
            return false;
        };
        let mem = self.arena_mut().as_mut_slice();
        let tag = header::tag_at(mem, off);
        let at = header::payload_offset(mem, off);
        let Some(bytes) = mem.get_mut(at..) else {
            return false;
        };
        match tag.kind().filter(|_| !tag.is_list()) {
            Some(TagKind::Byte) => write(bytes, value as i8),
            Some(TagKind::Short) => write(bytes, value as i16),
            Some(TagKind::Int) => write(bytes, value as i32),
            Some(TagKind::Long) => write(bytes, value),
            Some(TagKind::Float) => write(bytes, value as f32),
            Some(TagKind::Double) => write(bytes, value as f64),
            _ => false,
        }
    }

    /// Overwrites a numeric scalar (one value) or the first values of a
    /// numeric list. Longs are not written.
    pub fn set_floats(&mut self, off: Option<usize>, values: &[f32]) -> bool {
        let Some(off) = off.filter(|&o| o < self.len()) else {
            return false;
        };
        let mem = self.arena_mut().as_mut_slice();
        let Some((element, limit)) = numeric_shape(header::tag_at(mem, off), header::count_at(mem, off)) else {
            return false;
        };
        if values.len() > limit || element == TagKind::Long {
            return false;
        }
        let Some(width) = element.scalar_size() else {
            return false;
        };
        let at = header::payload_offset(mem, off);
        for (i, &value) in values.iter().enumerate() {
            let Some(bytes) = mem.get_mut(at + i * width..) else {
                return false;
            };
            if !store_f32(element, bytes, value) {
                return false;
            }
        }
        true
    }

    /// Mutable bytes of a byte array.
    pub fn byte_array_mut(&mut self, off: Option<usize>) -> Option<&mut [u8]> {
        let off = off.filter(|&o| o < self.len())?;
        let mem = self.arena_mut().as_mut_slice();
        if header::tag_at(mem, off) != TagType::of(TagKind::ByteArray) {
            return None;
        }
        let at = header::payload_offset(mem, off);
        let len = header::count_at(mem, off) as usize;
        mem.get_mut(at..at + len)
    }
}

/// Element kind and maximum value count of a numeric scalar or list.
fn numeric_shape(tag: TagType, count: u32) -> Option<(TagKind, usize)> {
    if tag.is_list() {
        let element = tag.element()?;
        element.is_scalar().then_some((element, count as usize))
    } else {
        let kind = tag.kind()?;
        kind.is_scalar().then_some((kind, 1))
    }
}
