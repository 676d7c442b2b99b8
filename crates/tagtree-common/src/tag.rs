//! Tag kinds and the packed node type byte.

use serde::{Deserialize, Serialize};

/// The type discriminator of a node.
///
/// Values 0 to 12 match the wire format. [`TagKind::Handle`] only exists in
/// memory and is never written out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum TagKind {
    /// Compound terminator
    End = 0,
    /// Signed 8-bit integer
    Byte = 1,
    /// Signed 16-bit integer
    Short = 2,
    /// Signed 32-bit integer
    Int = 3,
    /// Signed 64-bit integer
    Long = 4,
    /// 32-bit IEEE float
    Float = 5,
    /// 64-bit IEEE float
    Double = 6,
    /// Length-prefixed raw bytes
    ByteArray = 7,
    /// Length-prefixed UTF-8 (modified) string
    String = 8,
    /// Homogeneous list, element kind stored in the high nibble
    List = 9,
    /// Ordered set of named children
    Compound = 10,
    /// Length-prefixed array of 32-bit integers
    IntArray = 11,
    /// Length-prefixed array of 64-bit integers
    LongArray = 12,
    /// Opaque in-memory handle added by the builder
    Handle = 13,
}

impl TagKind {
    /// Decodes a kind from its numeric value (low nibble of a type byte).
    #[must_use]
    pub const fn from_u8(value: u8) -> Option<Self> {
        Some(match value {
            0 => Self::End,
            1 => Self::Byte,
            2 => Self::Short,
            3 => Self::Int,
            4 => Self::Long,
            5 => Self::Float,
            6 => Self::Double,
            7 => Self::ByteArray,
            8 => Self::String,
            9 => Self::List,
            10 => Self::Compound,
            11 => Self::IntArray,
            12 => Self::LongArray,
            13 => Self::Handle,
            _ => return None,
        })
    }

    /// Decodes a kind read from a stream. Builder-only kinds are rejected.
    #[must_use]
    pub const fn from_wire(value: u8) -> Option<Self> {
        match Self::from_u8(value) {
            Some(Self::Handle) | None => None,
            kind => kind,
        }
    }

    /// Byte width of a scalar kind, `None` for everything else.
    #[must_use]
    pub const fn scalar_size(self) -> Option<usize> {
        match self {
            Self::Byte => Some(1),
            Self::Short => Some(2),
            Self::Int | Self::Float => Some(4),
            Self::Long | Self::Double => Some(8),
            _ => None,
        }
    }

    /// Returns true for fixed-width numeric kinds.
    #[must_use]
    pub const fn is_scalar(self) -> bool {
        self.scalar_size().is_some()
    }

    /// Human-readable tag name as used by dumps.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::End => "TAG_End",
            Self::Byte => "TAG_Byte",
            Self::Short => "TAG_Short",
            Self::Int => "TAG_Int",
            Self::Long => "TAG_Long",
            Self::Float => "TAG_Float",
            Self::Double => "TAG_Double",
            Self::ByteArray => "TAG_Byte_Array",
            Self::String => "TAG_String",
            Self::List => "TAG_List",
            Self::Compound => "TAG_Compound",
            Self::IntArray => "TAG_Int_Array",
            Self::LongArray => "TAG_Long_Array",
            Self::Handle => "TAG_Handle",
        }
    }
}

impl std::fmt::Display for TagKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// A node's packed type byte: kind in the low nibble, list element kind in
/// the high nibble.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TagType(pub u8);

impl TagType {
    /// Terminator type byte.
    pub const END: Self = Self(0);

    /// List of compounds, the only list kind that nests further nodes.
    pub const LIST_COMPOUND: Self = Self::list_of(TagKind::Compound);

    /// Type byte for a plain (non-list) kind.
    #[must_use]
    pub const fn of(kind: TagKind) -> Self {
        Self(kind as u8)
    }

    /// Type byte for a list holding `element` items.
    #[must_use]
    pub const fn list_of(element: TagKind) -> Self {
        Self(TagKind::List as u8 | ((element as u8) << 4))
    }

    /// Node kind (low nibble).
    #[must_use]
    pub const fn kind(self) -> Option<TagKind> {
        TagKind::from_u8(self.0 & 15)
    }

    /// List element kind (high nibble); only meaningful for lists.
    #[must_use]
    pub const fn element(self) -> Option<TagKind> {
        TagKind::from_u8(self.0 >> 4)
    }

    /// True for the terminator.
    #[must_use]
    pub const fn is_end(self) -> bool {
        self.0 == 0
    }

    /// True for any list type byte.
    #[must_use]
    pub const fn is_list(self) -> bool {
        self.0 & 15 == TagKind::List as u8
    }

    /// True for compounds and lists of compounds, the nodes that own children.
    #[must_use]
    pub const fn is_container(self) -> bool {
        self.0 == TagKind::Compound as u8 || self.0 == Self::LIST_COMPOUND.0
    }
}

impl From<TagKind> for TagType {
    fn from(kind: TagKind) -> Self {
        Self::of(kind)
    }
}
