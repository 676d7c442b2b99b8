//! # Tagtree Common
//!
//! Shared vocabulary for the tagtree crates.
//!
//! This crate provides:
//! - Tag kinds and the packed node type byte
//! - The error taxonomy used by parsing, encoding and mutation
//! - Chunk and region coordinates
//! - Prelude for convenient imports

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(clippy::unwrap_used)]

pub mod coords;
pub mod error;
pub mod tag;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::coords::*;
    pub use crate::error::*;
    pub use crate::tag::*;
}

pub use prelude::*;
