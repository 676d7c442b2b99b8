//! Linear node builder.
//!
//! Appends nodes to a tree's arena in one pass. Containers are opened and
//! closed explicitly; each container's size is back-patched when it closes.
//!
//! ```ignore
//! NodeBuilder::new(&mut tree)
//!     .begin_compound("")?
//!     .string("Name", "Foo")?
//!     .short("Health", 20)?
//!     .end_compound()?
//!     .finish()?;
//! ```

use tagtree_common::{wire_len, NbtError, NbtResult, TagKind, TagType};

use crate::arena::{align4, Arena};
use crate::header::{self, header_len, END_MARKER};
use crate::tree::NbtTree;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Open {
    Compound(usize),
    List(usize),
    Item,
}

/// Appends typed nodes to a tree.
#[derive(Debug)]
pub struct NodeBuilder<'t> {
    arena: &'t mut Arena,
    open: Vec<Open>,
}

impl<'t> NodeBuilder<'t> {
    /// Starts appending at the end of `tree`.
    pub fn new(tree: &'t mut NbtTree) -> Self {
        Self {
            arena: tree.arena_mut(),
            open: Vec::new(),
        }
    }

    /// Containers not closed yet.
    #[must_use]
    pub fn depth(&self) -> usize {
        self.open.len()
    }

    /// Checks that every container was closed.
    pub fn finish(&mut self) -> NbtResult<()> {
        match self.open.last() {
            None => Ok(()),
            Some(open) => Err(NbtError::Unbalanced(format!(
                "{} container(s) still open, innermost {open:?}",
                self.open.len()
            ))),
        }
    }

    fn expect_body(&self) -> NbtResult<()> {
        if let Some(Open::List(at)) = self.open.last() {
            return Err(NbtError::Unbalanced(format!(
                "node added to list at {at} outside of begin_item()"
            )));
        }
        Ok(())
    }

    /// Appends one complete node.
    fn node(&mut self, tag: TagType, name: &str, count: u32, payload: &[u8]) -> NbtResult<&mut Self> {
        self.expect_body()?;
        let start = self.write_header(tag, name, count, align4(payload.len()))?;
        let at = header::payload_offset(self.arena.as_slice(), start);
        self.arena.as_mut_slice()[at..at + payload.len()].copy_from_slice(payload);
        Ok(self)
    }

    fn write_header(&mut self, tag: TagType, name: &str, count: u32, payload: usize) -> NbtResult<usize> {
        wire_len("name", name.len())?;
        let size = header_len(name.len()) + payload;
        let start = self.arena.allocate(size)?;
        header::write_header(self.arena.as_mut_slice(), start, tag, name.as_bytes(), count, size);
        Ok(start)
    }

    fn close(&mut self, start: usize) {
        let size = self.arena.len() - start;
        header::set_size(self.arena.as_mut_slice(), start, size);
    }

    /// Signed byte.
    pub fn byte(&mut self, name: &str, value: i8) -> NbtResult<&mut Self> {
        self.node(TagType::of(TagKind::Byte), name, 0, &value.to_ne_bytes())
    }

    /// Signed 16-bit integer.
    pub fn short(&mut self, name: &str, value: i16) -> NbtResult<&mut Self> {
        self.node(TagType::of(TagKind::Short), name, 0, &value.to_ne_bytes())
    }

    /// Signed 32-bit integer.
    pub fn int(&mut self, name: &str, value: i32) -> NbtResult<&mut Self> {
        self.node(TagType::of(TagKind::Int), name, 0, &value.to_ne_bytes())
    }

    /// Signed 64-bit integer.
    pub fn long(&mut self, name: &str, value: i64) -> NbtResult<&mut Self> {
        self.node(TagType::of(TagKind::Long), name, 0, &value.to_ne_bytes())
    }

    /// 32-bit float.
    pub fn float(&mut self, name: &str, value: f32) -> NbtResult<&mut Self> {
        self.node(TagType::of(TagKind::Float), name, 0, &value.to_ne_bytes())
    }

    /// 64-bit float.
    pub fn double(&mut self, name: &str, value: f64) -> NbtResult<&mut Self> {
        self.node(TagType::of(TagKind::Double), name, 0, &value.to_ne_bytes())
    }

    /// Byte array copied from `values`.
    pub fn byte_array(&mut self, name: &str, values: &[u8]) -> NbtResult<&mut Self> {
        self.node(TagType::of(TagKind::ByteArray), name, values.len() as u32, values)
    }

    /// Byte array of `len` copies of `fill`.
    pub fn byte_array_filled(&mut self, name: &str, len: usize, fill: u8) -> NbtResult<&mut Self> {
        self.expect_body()?;
        let start = self.write_header(TagType::of(TagKind::ByteArray), name, len as u32, align4(len))?;
        let at = header::payload_offset(self.arena.as_slice(), start);
        self.arena.as_mut_slice()[at..at + len].fill(fill);
        Ok(self)
    }

    /// Int array.
    pub fn int_array(&mut self, name: &str, values: &[i32]) -> NbtResult<&mut Self> {
        let payload: &[u8] = bytemuck::cast_slice(values);
        self.node(TagType::of(TagKind::IntArray), name, values.len() as u32, payload)
    }

    /// Long array.
    pub fn long_array(&mut self, name: &str, values: &[i64]) -> NbtResult<&mut Self> {
        let payload: &[u8] = bytemuck::cast_slice(values);
        self.node(TagType::of(TagKind::LongArray), name, values.len() as u32, payload)
    }

    /// String; stored with a trailing NUL.
    pub fn string(&mut self, name: &str, value: &str) -> NbtResult<&mut Self> {
        wire_len("string", value.len())?;
        let mut payload = Vec::with_capacity(value.len() + 1);
        payload.extend_from_slice(value.as_bytes());
        payload.push(0);
        self.node(TagType::of(TagKind::String), name, value.len() as u32, &payload)
    }

    fn scalar_list(&mut self, name: &str, element: TagKind, count: usize, payload: &[u8]) -> NbtResult<&mut Self> {
        self.node(TagType::list_of(element), name, count as u32, payload)
    }

    /// List of bytes.
    pub fn list_bytes(&mut self, name: &str, values: &[i8]) -> NbtResult<&mut Self> {
        self.scalar_list(name, TagKind::Byte, values.len(), bytemuck::cast_slice(values))
    }

    /// List of shorts.
    pub fn list_shorts(&mut self, name: &str, values: &[i16]) -> NbtResult<&mut Self> {
        self.scalar_list(name, TagKind::Short, values.len(), bytemuck::cast_slice(values))
    }

    /// List of ints.
    pub fn list_ints(&mut self, name: &str, values: &[i32]) -> NbtResult<&mut Self> {
        self.scalar_list(name, TagKind::Int, values.len(), bytemuck::cast_slice(values))
    }

    /// List of longs.
    pub fn list_longs(&mut self, name: &str, values: &[i64]) -> NbtResult<&mut Self> {
        self.scalar_list(name, TagKind::Long, values.len(), bytemuck::cast_slice(values))
    }

    /// List of floats.
    pub fn list_floats(&mut self, name: &str, values: &[f32]) -> NbtResult<&mut Self> {
        self.scalar_list(name, TagKind::Float, values.len(), bytemuck::cast_slice(values))
    }

    /// List of doubles.
    pub fn list_doubles(&mut self, name: &str, values: &[f64]) -> NbtResult<&mut Self> {
        self.scalar_list(name, TagKind::Double, values.len(), bytemuck::cast_slice(values))
    }

    /// List of strings, packed and NUL-separated.
    pub fn list_strings(&mut self, name: &str, values: &[&str]) -> NbtResult<&mut Self> {
        let mut payload = Vec::new();
        for value in values {
            wire_len("list string", value.len())?;
            if value.contains('\0') {
                return Err(NbtError::InvalidString((*value).to_string()));
            }
            payload.extend_from_slice(value.as_bytes());
            payload.push(0);
        }
        self.node(TagType::list_of(TagKind::String), name, values.len() as u32, &payload)
    }

    /// Opens a compound.
    pub fn begin_compound(&mut self, name: &str) -> NbtResult<&mut Self> {
        self.expect_body()?;
        let start = self.write_header(TagType::of(TagKind::Compound), name, 0, 0)?;
        self.open.push(Open::Compound(start));
        Ok(self)
    }

    /// Closes the innermost compound.
    pub fn end_compound(&mut self) -> NbtResult<&mut Self> {
        let Some(Open::Compound(start)) = self.open.last().copied() else {
            return Err(self.mismatch("end_compound"));
        };
        self.open.pop();
        self.arena.allocate(END_MARKER)?;
        self.close(start);
        Ok(self)
    }

    /// Opens a list of compounds.
    pub fn begin_list(&mut self, name: &str) -> NbtResult<&mut Self> {
        self.expect_body()?;
        let start = self.write_header(TagType::LIST_COMPOUND, name, 0, 0)?;
        self.open.push(Open::List(start));
        Ok(self)
    }

    /// Opens the next repetition of the innermost list.
    pub fn begin_item(&mut self) -> NbtResult<&mut Self> {
        let Some(Open::List(start)) = self.open.last().copied() else {
            return Err(self.mismatch("begin_item"));
        };
        let mem = self.arena.as_mut_slice();
        let count = header::count_at(mem, start);
        header::set_count(mem, start, count + 1);
        self.open.push(Open::Item);
        Ok(self)
    }

    /// Closes the current repetition.
    pub fn end_item(&mut self) -> NbtResult<&mut Self> {
        if self.open.last() != Some(&Open::Item) {
            return Err(self.mismatch("end_item"));
        }
        self.open.pop();
        self.arena.allocate(END_MARKER)?;
        Ok(self)
    }

    /// Closes the innermost list.
    pub fn end_list(&mut self) -> NbtResult<&mut Self> {
        let Some(Open::List(start)) = self.open.last().copied() else {
            return Err(self.mismatch("end_list"));
        };
        self.open.pop();
        self.close(start);
        Ok(self)
    }

    /// Writes a bare terminator closing a fragment body.
    pub fn end_body(&mut self) -> NbtResult<&mut Self> {
        if !self.open.is_empty() {
            return Err(self.mismatch("end_body"));
        }
        self.arena.allocate(END_MARKER)?;
        Ok(self)
    }

    /// Copies already laid out nodes (e.g. a fragment body without its terminator).
    pub fn raw(&mut self, bytes: &[u8]) -> NbtResult<&mut Self> {
        self.expect_body()?;
        self.arena.push_bytes(bytes)?;
        Ok(self)
    }

    /// In-memory handle; skipped when the tree is encoded.
    pub fn handle(&mut self, name: &str, value: u64) -> NbtResult<&mut Self> {
        self.node(TagType::of(TagKind::Handle), name, 0, &value.to_ne_bytes())
    }

    fn mismatch(&self, call: &str) -> NbtError {
        NbtError::Unbalanced(format!("{call}() with open containers {:?}", self.open))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::iter::NodeIter;

    #[test]
    fn test_compound_size_is_back_patched() {
        let mut tree = NbtTree::new();
        NodeBuilder::new(&mut tree)
            .begin_compound("root")
            .and_then(|b| b.string("Name", "Foo"))
            .and_then(|b| b.short("Health", 20))
            .and_then(|b| b.end_compound())
            .expect("build");
        let mem = tree.as_bytes();
        assert_eq!(header::size_at(mem, 0), mem.len());
        assert_eq!(NodeIter::new(mem, 0).count(), 2);
    }

    #[test]
    fn test_list_counts_items() {
        let mut tree = NbtTree::new();
        let mut builder = NodeBuilder::new(&mut tree);
        builder.begin_list("Items").expect("list");
        for slot in 0..3 {
            builder
                .begin_item()
                .and_then(|b| b.byte("Slot", slot))
                .and_then(|b| b.end_item())
                .expect("item");
        }
        builder.end_list().and_then(|b| b.finish()).expect("close");

        let mem = tree.as_bytes();
        assert_eq!(header::count_at(mem, 0), 3);
        assert_eq!(header::size_at(mem, 0), mem.len());
        assert_eq!(NodeIter::new(mem, 0).count(), 3);
    }

    #[test]
    fn test_filled_arrays_and_raw() {
        let mut tree = NbtTree::new();
        NodeBuilder::new(&mut tree)
            .byte_array_filled("Blocks", 6, 0xAB)
            .and_then(|b| b.int_array("I", &[1, -2]))
            .expect("build");
        let copy = tree.as_bytes().to_vec();
        NodeBuilder::new(&mut tree).raw(&copy).expect("raw");

        let mem = tree.as_bytes();
        let payload = header::payload_offset(mem, 0);
        assert_eq!(&mem[payload..payload + 6], &[0xAB; 6]);
        assert_eq!(header::size_at(mem, 0), 28);
        assert_eq!(NodeIter::body(mem).count(), 4);
    }

    #[test]
    fn test_wire_limits_are_enforced() {
        let mut tree = NbtTree::new();
        let mut builder = NodeBuilder::new(&mut tree);
        let long = "x".repeat(70_000);
        assert!(matches!(builder.string("s", &long), Err(NbtError::TooLong { len: 70_000, .. })));
        assert!(matches!(builder.int(&long, 1), Err(NbtError::TooLong { .. })));
        assert!(matches!(builder.list_strings("l", &["ok", long.as_str()]), Err(NbtError::TooLong { .. })));
        assert!(matches!(builder.list_strings("l", &["a\0b"]), Err(NbtError::InvalidString(_))));
        builder.string("max", &"y".repeat(usize::from(u16::MAX))).expect("max length fits");
        assert_eq!(NodeIter::body(tree.as_bytes()).count(), 1);
    }

    #[test]
    fn test_unbalanced_calls_fail() {
        let mut tree = NbtTree::new();
        let mut builder = NodeBuilder::new(&mut tree);
        assert!(builder.end_compound().is_err());
        builder.begin_list("L").expect("list");
        assert!(matches!(builder.int("x", 1), Err(NbtError::Unbalanced(_))));
        assert!(builder.end_item().is_err());
        assert!(builder.finish().is_err());
        builder.end_list().expect("end");
        assert!(builder.finish().is_ok());
    }
}
