//! Placement policies for list-of-compound repetitions.
//!
//! A policy may attach a [`FixedSchema`] to a list by name. While decoding a
//! repetition of such a list, children matching a slot (name, kind, length)
//! are written at the slot's fixed offset instead of being appended, so the
//! per-section voxel tables always sit at known offsets from the repetition
//! start. Slots left unfilled are compacted away when the repetition ends.

use tagtree_common::{TagKind, TagType};

use crate::arena::align4;
use crate::header::{self, header_len, END_MARKER};

/// One reserved field of a fixed layout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FixedSlot {
    /// Field name, compared case-insensitively
    pub name: String,
    /// Field kind
    pub kind: TagKind,
    /// Array length; ignored for scalar kinds
    pub len: u32,
}

impl FixedSlot {
    /// Creates a slot.
    pub fn new(name: impl Into<String>, kind: TagKind, len: u32) -> Self {
        Self {
            name: name.into(),
            kind,
            len,
        }
    }

    /// Payload bytes of the field, padded.
    #[must_use]
    pub fn payload_size(&self) -> usize {
        match self.kind {
            TagKind::ByteArray => align4(self.len as usize),
            TagKind::IntArray => 4 * self.len as usize,
            TagKind::LongArray => 8 * self.len as usize,
            TagKind::String => align4(self.len as usize + 1),
            kind => kind.scalar_size().map_or(0, align4),
        }
    }

    /// Header plus payload.
    #[must_use]
    pub fn node_size(&self) -> usize {
        header_len(self.name.len()) + self.payload_size()
    }

    fn count(&self) -> u32 {
        if self.kind.is_scalar() {
            0
        } else {
            self.len
        }
    }
}

/// Field to offset table for one repetition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FixedSchema {
    slots: Vec<FixedSlot>,
    offsets: Vec<usize>,
    region: usize,
}

impl FixedSchema {
    /// Lays out `slots` back to back in the given order.
    pub fn new(slots: impl IntoIterator<Item = FixedSlot>) -> Self {
        let slots: Vec<FixedSlot> = slots.into_iter().collect();
        let mut offsets = Vec::with_capacity(slots.len());
        let mut region = 0;
        for slot in &slots {
            offsets.push(region);
            region += slot.node_size();
        }
        Self {
            slots,
            offsets,
            region,
        }
    }

    /// Slots in layout order.
    #[must_use]
    pub fn slots(&self) -> &[FixedSlot] {
        &self.slots
    }

    /// Number of slots.
    #[must_use]
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// True for a schema without slots.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Bytes reserved at the start of each repetition.
    #[must_use]
    pub const fn region_size(&self) -> usize {
        self.region
    }

    /// Offset of slot `index` within the region.
    #[must_use]
    pub fn slot_offset(&self, index: usize) -> usize {
        self.offsets[index]
    }

    /// Offset of a field's payload within the region.
    #[must_use]
    pub fn payload_offset(&self, field: &str) -> Option<usize> {
        let index = self
            .slots
            .iter()
            .position(|slot| slot.name.eq_ignore_ascii_case(field))?;
        Some(self.offsets[index] + header_len(self.slots[index].name.len()))
    }

    /// Slot the node at `off` fits exactly, if any.
    #[must_use]
    pub fn match_slot(&self, mem: &[u8], off: usize) -> Option<usize> {
        let name = header::name_at(mem, off);
        let tag = header::tag_at(mem, off);
        let count = header::count_at(mem, off);
        let size = header::size_at(mem, off);
        self.slots.iter().position(|slot| {
            tag == TagType::of(slot.kind)
                && name.eq_ignore_ascii_case(slot.name.as_bytes())
                && count == slot.count()
                && size == slot.node_size()
        })
    }

    /// Writes an empty repetition in this layout, followed by its terminator.
    #[must_use]
    pub fn empty_repetition(&self) -> Vec<u8> {
        let mut out = vec![0; self.region + END_MARKER];
        for (slot, &at) in self.slots.iter().zip(&self.offsets) {
            header::write_header(
                &mut out,
                at,
                TagType::of(slot.kind),
                slot.name.as_bytes(),
                slot.count(),
                slot.node_size(),
            );
        }
        out
    }
}

/// Decides, per list-of-compound name, whether repetitions use a fixed layout.
pub trait Placement {
    /// Schema for the list named `list_name`, or `None` to append normally.
    fn schema_for(&self, list_name: &[u8]) -> Option<&FixedSchema>;
}

/// Every node is appended where it is decoded.
#[derive(Debug, Clone, Copy, Default)]
pub struct AppendOnly;

impl Placement for AppendOnly {
    fn schema_for(&self, _list_name: &[u8]) -> Option<&FixedSchema> {
        None
    }
}

/// Name of the list whose repetitions are chunk sections.
pub const SECTIONS_LIST: &str = "Sections";

/// Voxel tables of a chunk section at fixed offsets.
#[derive(Debug, Clone)]
pub struct SectionLayout {
    schema: FixedSchema,
}

impl Default for SectionLayout {
    fn default() -> Self {
        Self {
            schema: FixedSchema::new([
                FixedSlot::new("Blocks", TagKind::ByteArray, 4096),
                FixedSlot::new("Data", TagKind::ByteArray, 2048),
                FixedSlot::new("SkyLight", TagKind::ByteArray, 2048),
                FixedSlot::new("BlockLight", TagKind::ByteArray, 2048),
                FixedSlot::new("Y", TagKind::Byte, 0),
            ]),
        }
    }
}

impl SectionLayout {
    /// The section schema.
    #[must_use]
    pub const fn schema(&self) -> &FixedSchema {
        &self.schema
    }

    /// Empty section at height `y`, terminated and ready to append to a
    /// `Sections` list.
    #[must_use]
    pub fn format_section(&self, y: i8) -> Vec<u8> {
        let mut out = self.schema.empty_repetition();
        if let Some(at) = self.schema.payload_offset("Y") {
            out[at] = y as u8;
        }
        out
    }
}

impl Placement for SectionLayout {
    fn schema_for(&self, list_name: &[u8]) -> Option<&FixedSchema> {
        list_name
            .eq_ignore_ascii_case(SECTIONS_LIST.as_bytes())
            .then_some(&self.schema)
    }
}
