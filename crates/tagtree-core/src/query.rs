//! Dotted-path lookup.
//!
//! Each `.`-separated component is resolved from the previous result. Within
//! one compound the direct children are scanned first, then the search
//! recurses into child compounds and lists of compounds. A leading `/` on a
//! component keeps that component's search to direct children. Names compare
//! ASCII case-insensitively.

use tagtree_common::TagType;

use crate::header::{self, NodeRef};
use crate::iter::NodeIter;

/// Resolves `path` starting at the node at `start`.
///
/// Works on any tree buffer, including a raw copied body. A start node that
/// is neither a compound nor a list of compounds is taken as a position
/// inside a compound body.
#[must_use]
pub fn find_node(mem: &[u8], start: usize, path: &str) -> Option<usize> {
    path.split('.')
        .try_fold(start, |at, component| find_component(mem, at, component))
}

/// Payload bytes of the node found at `path`.
#[must_use]
pub fn payload_of<'a>(mem: &'a [u8], start: usize, path: &str) -> Option<&'a [u8]> {
    let at = find_node(mem, start, path)?;
    NodeRef::new(mem, at).map(|node| node.payload())
}

fn find_component(mem: &[u8], offset: usize, component: &str) -> Option<usize> {
    let (name, recursive) = match component.strip_prefix('/') {
        Some(rest) => (rest.as_bytes(), false),
        None => (component.as_bytes(), true),
    };
    search(mem, offset, name, recursive)
}

fn search(mem: &[u8], offset: usize, name: &[u8], recursive: bool) -> Option<usize> {
    let tag = header::tag_at(mem, offset);
    if tag.is_end() {
        return None;
    }
    if header::name_at(mem, offset).eq_ignore_ascii_case(name) {
        return Some(offset);
    }

    if tag == TagType::LIST_COMPOUND {
        return NodeIter::new(mem, offset).find_map(|rep| search_body(mem, rep, name, recursive));
    }
    let body = if tag.is_container() {
        header::payload_offset(mem, offset)
    } else {
        offset
    };
    search_body(mem, body, name, recursive)
}

/// Direct children of the body at `body` first, then their subtrees.
fn search_body(mem: &[u8], body: usize, name: &[u8], recursive: bool) -> Option<usize> {
    let direct = NodeIter::siblings(mem, body).find(|&at| header::name_at(mem, at).eq_ignore_ascii_case(name));
    if direct.is_some() || !recursive {
        return direct;
    }
    NodeIter::siblings(mem, body)
        .filter(|&at| header::tag_at(mem, at).is_container())
        .find_map(|at| search(mem, at, name, true))
}
