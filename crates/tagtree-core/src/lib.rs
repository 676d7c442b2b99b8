//! # Tagtree Core
//!
//! In-place NBT trees for Project Tagtree.
//!
//! This crate handles:
//! - Decoding gzip files and region entries into a single-buffer arena
//! - Dotted-path lookup and iteration over offsets
//! - In-place edits with ancestor size cascading
//! - Encoding back out, with save-time regeneration of flagged nodes
//! - Anvil region files

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(clippy::unwrap_used)]

pub mod access;
pub mod arena;
pub mod builder;
pub mod config;
pub mod decode;
pub mod dump;
pub mod encode;
pub mod header;
pub mod iter;
pub mod mutate;
pub mod placement;
pub mod query;
pub mod region;
pub mod stream;
pub mod tree;

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::builder::NodeBuilder;
    pub use crate::config::TreeConfig;
    pub use crate::dump::{dump, dump_to_string};
    pub use crate::encode::{NoRegeneration, RegenerateHook};
    pub use crate::iter::NodeIter;
    pub use crate::placement::{AppendOnly, FixedSchema, FixedSlot, Placement, SectionLayout};
    pub use crate::query::{find_node, payload_of};
    pub use crate::region::{ChunkLocation, RegionFile};
    pub use crate::tree::{Fragment, NbtTree};
    pub use tagtree_common::{NbtError, NbtResult, TagKind, TagType};
}

pub use prelude::*;
