//! In-place structural edits.
//!
//! Every edit that changes the byte length of a node walks the tree again
//! from offset 0 and fixes the `size` of each node enclosing the edit point.

use tagtree_common::{NbtError, NbtResult, TagKind, TagType};
use tracing::debug;

use crate::arena::align4;
use crate::header::{self, header_len, END_MARKER, HEADER_FIXED, NODE_CHANGED, TAG_MASK};
use crate::iter::{body_size, repetition_end, NodeIter};
use crate::query::find_node;
use crate::tree::{Fragment, NbtTree};

/// Adds `diff` to the size of every container enclosing `target`.
///
/// Must run on the layout as it was before the edit; only headers placed
/// before `target` are read.
fn cascade(mem: &mut [u8], target: usize, diff: isize) {
    let mut at = 0;
    while at < target && at < mem.len() {
        let tag = header::tag_at(mem, at);
        if tag.is_end() {
            at += END_MARKER;
            continue;
        }
        let size = header::size_at(mem, at);
        if size < HEADER_FIXED {
            return;
        }
        if at + size > target {
            if !tag.is_container() {
                return;
            }
            header::adjust_size(mem, at, diff);
            at = header::payload_offset(mem, at);
        } else {
            at += size;
        }
    }
}

fn signed(len: usize) -> isize {
    len as isize
}

/// Removes the node at `offset`, or with `nth = Some(n)` the n-th (1-based)
/// repetition of the list-of-compound at `offset`.
///
/// Returns the number of bytes removed, `None` if there was nothing to remove.
pub fn delete_node(tree: &mut NbtTree, offset: usize, nth: Option<u32>) -> Option<usize> {
    let arena = tree.arena_mut();
    let mem = arena.as_slice();
    if offset >= mem.len() || header::tag_at(mem, offset).is_end() {
        return None;
    }

    let (start, len) = match nth {
        None => {
            let size = header::size_at(mem, offset);
            if size < HEADER_FIXED || offset + size > mem.len() {
                return None;
            }
            (offset, size)
        },
        Some(n) => {
            let count = header::count_at(mem, offset);
            if header::tag_at(mem, offset) != TagType::LIST_COMPOUND || n == 0 || n > count {
                return None;
            }
            let start = NodeIter::new(mem, offset).nth(n as usize - 1)?;
            let end = repetition_end(mem, start)?;
            header::set_count(arena.as_mut_slice(), offset, count - 1);
            (start, end - start)
        },
    };

    cascade(arena.as_mut_slice(), start, -signed(len));
    arena.remove(start, len);
    debug!("Deleted {len} bytes at {start}");
    Some(len)
}

/// Writes `fragment` at the dotted `path`.
///
/// - Every component exists: the node found is replaced by the fragment's
///   nodes.
/// - Only the last component is missing: a node of type `tag` named after
///   it, with the fragment's bytes as payload, is appended to the parent.
/// - The last two components are missing: a compound named after the parent
///   is appended to the grandparent, holding the fragment. The fragment must
///   contain a node named after the last component with type `tag`.
///
/// Returns the offset of the node written, `None` when the path cannot be
/// satisfied.
pub fn insert_fragment(tree: &mut NbtTree, path: &str, tag: TagType, fragment: &Fragment) -> NbtResult<Option<usize>> {
    let components: Vec<&str> = path.split('.').collect();
    if components.iter().any(|c| c.trim_start_matches('/').is_empty()) {
        return Err(NbtError::InvalidPath(path.to_string()));
    }

    let mem = tree.as_bytes();
    let mut resolved = Vec::with_capacity(components.len());
    let mut at = 0;
    for component in &components {
        match find_node(mem, at, component) {
            Some(found) => {
                resolved.push(found);
                at = found;
            },
            None => break,
        }
    }

    let raw = fragment.as_bytes();
    let missing = components.len() - resolved.len();
    let last = components[components.len() - 1].trim_start_matches('/');

    match missing {
        0 => {
            let target = at;
            let old = header::size_at(mem, target);
            let nodes = &raw[..body_size(raw)];
            splice(tree, target, old, nodes)?;
            Ok(Some(target))
        },
        1 => {
            let parent = resolved.last().copied().unwrap_or(0);
            let Some(node) = synthesize(tag, last.as_bytes(), raw) else {
                return Ok(None);
            };
            append_to_compound(tree, parent, &node)
        },
        2 if components.len() >= 2 => {
            let grandparent = resolved.last().copied().unwrap_or(0);
            let parent_name = components[components.len() - 2].trim_start_matches('/');
            let Some(inner) = NodeIter::body(raw).find(|&node| {
                header::tag_at(raw, node) == tag && header::name_at(raw, node).eq_ignore_ascii_case(last.as_bytes())
            }) else {
                return Ok(None);
            };

            let body = terminated(raw);
            let mut node = header::encode_header(TagType::of(TagKind::Compound), parent_name.as_bytes(), 0, 0);
            let hdr = node.len();
            node.extend_from_slice(&body);
            let size = node.len();
            header::set_size(&mut node, 0, size);

            Ok(append_to_compound(tree, grandparent, &node)?.map(|at| at + hdr + inner))
        },
        _ => Ok(None),
    }
}

/// Appends a complete node at the end of the compound at `parent`.
fn append_to_compound(tree: &mut NbtTree, parent: usize, node: &[u8]) -> NbtResult<Option<usize>> {
    let mem = tree.as_bytes();
    if header::tag_at(mem, parent) != TagType::of(TagKind::Compound) {
        return Ok(None);
    }
    let end = parent + header::size_at(mem, parent);
    if end < END_MARKER || end > mem.len() || !header::tag_at(mem, end - END_MARKER).is_end() {
        return Ok(None);
    }
    let at = end - END_MARKER;
    splice(tree, at, 0, node)?;
    Ok(Some(at))
}

/// Replaces `old_len` bytes at `at` and fixes the enclosing sizes.
fn splice(tree: &mut NbtTree, at: usize, old_len: usize, bytes: &[u8]) -> NbtResult<()> {
    let arena = tree.arena_mut();
    let diff = signed(bytes.len()) - signed(old_len);
    arena.splice(at, old_len, bytes)?;
    // The headers before `at` did not move.
    cascade(arena.as_mut_slice(), at, diff);
    debug!("Spliced {} bytes over {old_len} at {at}", bytes.len());
    Ok(())
}

/// A fragment body with exactly one terminator.
fn terminated(raw: &[u8]) -> Vec<u8> {
    let nodes = body_size(raw);
    let mut body = Vec::with_capacity(nodes + END_MARKER);
    body.extend_from_slice(&raw[..nodes]);
    body.extend_from_slice(&[0; END_MARKER]);
    body
}

/// Builds a node of type `tag` whose payload comes from `raw`.
fn synthesize(tag: TagType, name: &[u8], raw: &[u8]) -> Option<Vec<u8>> {
    let (count, payload): (usize, Vec<u8>) = match tag.kind()? {
        TagKind::Compound => (0, terminated(raw)),
        TagKind::List if tag == TagType::LIST_COMPOUND => {
            let mut reps = 0;
            let mut at = 0;
            while at < raw.len() {
                at = repetition_end(raw, at)?;
                reps += 1;
            }
            (reps, raw.to_vec())
        },
        TagKind::List => match tag.element()? {
            TagKind::String => {
                let end = raw.iter().rposition(|&b| b == 0).map_or(0, |i| i + 1);
                let strings = raw[..end].iter().filter(|&&b| b == 0).count();
                (strings, raw[..end].to_vec())
            },
            TagKind::End => (0, Vec::new()),
            element => {
                let width = element.scalar_size()?;
                let n = raw.len() / width;
                (n, raw[..n * width].to_vec())
            },
        },
        TagKind::String => {
            let len = raw.iter().position(|&b| b == 0).unwrap_or(raw.len());
            let mut text = raw[..len].to_vec();
            text.push(0);
            (len, text)
        },
        TagKind::ByteArray => (raw.len(), raw.to_vec()),
        TagKind::IntArray => (raw.len() / 4, raw[..raw.len() / 4 * 4].to_vec()),
        TagKind::LongArray => (raw.len() / 8, raw[..raw.len() / 8 * 8].to_vec()),
        TagKind::End | TagKind::Handle => return None,
        scalar => {
            let width = scalar.scalar_size()?;
            (0, raw.get(..width)?.to_vec())
        },
    };

    let size = header_len(name.len()) + align4(payload.len());
    let mut node = header::encode_header(tag, name, count as u32, size);
    node.extend_from_slice(&payload);
    node.resize(size, 0);
    Some(node)
}

/// Appends `fragment` as a new repetition of the list-of-compound at `list`.
pub fn append_list_item(tree: &mut NbtTree, list: usize, fragment: &Fragment) -> NbtResult<Option<usize>> {
    let mem = tree.as_bytes();
    if list >= mem.len() || header::tag_at(mem, list) != TagType::LIST_COMPOUND {
        return Ok(None);
    }
    let body = terminated(fragment.as_bytes());
    let size = header::size_at(mem, list);
    let count = header::count_at(mem, list);
    let at = list + size;

    let arena = tree.arena_mut();
    arena.splice(at, 0, &body)?;
    let mem = arena.as_mut_slice();
    cascade(mem, list, signed(body.len()));
    header::set_size(mem, list, size + body.len());
    header::set_count(mem, list, count + 1);
    Ok(Some(at))
}

/// Flags a compound or list-of-compound for regeneration with `tag`.
///
/// Returns false for any other node.
pub fn mark_for_update(tree: &mut NbtTree, offset: usize, tag: u8) -> bool {
    let mem = tree.arena_mut().as_mut_slice();
    if offset >= mem.len() || !header::tag_at(mem, offset).is_container() {
        return false;
    }
    let flags = header::flags_at(mem, offset) | NODE_CHANGED | (u16::from(tag) & TAG_MASK);
    header::set_flags(mem, offset, flags);
    true
}

/// Copies the node at `start` and its following siblings into a terminated
/// fragment body.
#[must_use]
pub fn copy_subtree(mem: &[u8], start: usize) -> Vec<u8> {
    let mut end = start;
    for at in NodeIter::siblings(mem, start) {
        end = at + header::size_at(mem, at);
    }
    let end = end.min(mem.len());
    let mut out = Vec::with_capacity(end.saturating_sub(start) + END_MARKER);
    out.extend_from_slice(mem.get(start..end).unwrap_or(&[]));
    out.extend_from_slice(&[0; END_MARKER]);
    out
}

/// Recomputes the sizes of every container at or below `offset`, then fixes
/// the enclosing nodes. Returns the new size of the node at `offset`.
pub fn refresh_sizes(tree: &mut NbtTree, offset: usize) -> Option<usize> {
    let mem = tree.arena_mut().as_mut_slice();
    if offset >= mem.len() || header::tag_at(mem, offset).is_end() {
        return None;
    }
    let old = header::size_at(mem, offset);
    let new = recompute(mem, offset)?;
    if new != old {
        cascade(mem, offset, signed(new) - signed(old));
    }
    Some(new)
}

fn recompute(mem: &mut [u8], offset: usize) -> Option<usize> {
    let tag = header::tag_at(mem, offset);
    let mut at = header::payload_offset(mem, offset);
    if tag == TagType::of(TagKind::Compound) {
        at = recompute_body(mem, at)?;
    } else if tag == TagType::LIST_COMPOUND {
        for _ in 0..header::count_at(mem, offset) {
            at = recompute_body(mem, at)?;
        }
    } else {
        return Some(header::size_at(mem, offset));
    }
    let size = at - offset;
    header::set_size(mem, offset, size);
    Some(size)
}

/// Recomputes every node of the body at `at`; returns the offset past its terminator.
fn recompute_body(mem: &mut [u8], mut at: usize) -> Option<usize> {
    loop {
        if at >= mem.len() {
            return None;
        }
        if header::tag_at(mem, at).is_end() {
            return Some(at + END_MARKER);
        }
        let size = recompute(mem, at)?;
        if size < HEADER_FIXED {
            return None;
        }
        at += size;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::NodeBuilder;

    fn build(tree: &mut NbtTree) -> NbtResult<()> {
        NodeBuilder::new(tree)
            .begin_compound("")?
            .begin_compound("Level")?
            .int("xPos", 3)?
            .begin_list("Entities")?
            .begin_item()?
            .string("id", "Pig")?
            .end_item()?
            .begin_item()?
            .string("id", "Cow")?
            .byte("Age", 2)?
            .end_item()?
            .end_list()?
            .end_compound()?
            .byte("version", 1)?
            .end_compound()?
            .finish()
    }

    fn sample() -> NbtTree {
        let mut tree = NbtTree::new();
        build(&mut tree).expect("build");
        tree
    }

    fn fragment(build: impl FnOnce(&mut NodeBuilder<'_>) -> NbtResult<()>) -> Fragment {
        let mut tree = NbtTree::new();
        let mut builder = NodeBuilder::new(&mut tree);
        build(&mut builder).expect("fragment");
        builder.end_body().expect("end");
        tree
    }

    /// Sizes stored in the tree match a full recomputation.
    fn assert_consistent(tree: &NbtTree) {
        let mut copy = tree.clone();
        refresh_sizes(&mut copy, 0).expect("refresh");
        assert_eq!(copy.as_bytes(), tree.as_bytes());
        assert_eq!(header::size_at(tree.as_bytes(), 0), tree.len());
    }

    #[test]
    fn test_delete_leaf_shrinks_ancestors() {
        let mut tree = sample();
        let before = tree.len();
        let x = tree.find("xPos").expect("xPos");
        assert_eq!(delete_node(&mut tree, x, None), Some(24));
        assert_eq!(tree.len(), before - 24);
        assert_eq!(tree.find("xPos"), None);
        assert_consistent(&tree);
    }

    #[test]
    fn test_delete_repetition() {
        let mut tree = sample();
        let list = tree.find("Entities").expect("list");
        assert!(delete_node(&mut tree, list, Some(1)).is_some());
        let list = tree.find("Entities").expect("list");
        assert_eq!(header::count_at(tree.as_bytes(), list), 1);
        assert!(tree.find("Age").is_some());
        assert_consistent(&tree);
    }

    #[test]
    fn test_delete_misses() {
        let mut tree = sample();
        let list = tree.find("Entities").expect("list");
        let x = tree.find("xPos").expect("xPos");
        assert_eq!(delete_node(&mut tree, list, Some(3)), None);
        assert_eq!(delete_node(&mut tree, list, Some(0)), None);
        assert_eq!(delete_node(&mut tree, x, Some(1)), None);
        assert_eq!(delete_node(&mut tree, 1 << 20, None), None);
        assert_consistent(&tree);
    }

    #[test]
    fn test_delete_root_empties_tree() {
        let mut tree = sample();
        let len = tree.len();
        assert_eq!(delete_node(&mut tree, 0, None), Some(len));
        assert!(tree.is_empty());
    }

    #[test]
    fn test_delete_first_top_level_node_keeps_siblings() {
        let mut tree = NbtTree::new();
        NodeBuilder::new(&mut tree)
            .int("a", 1)
            .and_then(|b| b.int("b", 2))
            .expect("build");
        let before = tree.len();
        assert_eq!(delete_node(&mut tree, 0, None), Some(20));
        assert_eq!(tree.len(), before - 20);
        assert_eq!(tree.find("a"), None);
        let b = tree.find("b");
        assert_eq!(b, Some(0));
        assert_eq!(tree.to_int(b, 0), 2);
    }

    #[test]
    fn test_insert_replaces_existing_node() {
        let mut tree = sample();
        let frag = fragment(|b| b.long("xPos", 1 << 40).map(|_| ()));
        let at = insert_fragment(&mut tree, "Level.xPos", TagType::of(TagKind::Long), &frag)
            .expect("insert")
            .expect("placed");
        assert_eq!(Some(at), tree.find("Level.xPos"));
        assert_eq!(tree.to_int(Some(at), 0), 1 << 40);
        assert_consistent(&tree);
    }

    #[test]
    fn test_insert_missing_leaf_synthesizes_header() {
        let mut tree = sample();
        let frag = NbtTree::from_bytes(b"hello".to_vec());
        let at = insert_fragment(&mut tree, "Level.Motd", TagType::of(TagKind::String), &frag)
            .expect("insert")
            .expect("placed");
        assert_eq!(tree.find("Level.Motd"), Some(at));
        assert_eq!(tree.string(Some(at)), Some("hello"));
        assert_consistent(&tree);
    }

    #[test]
    fn test_insert_missing_list_counts_repetitions() {
        let mut tree = sample();
        let mut frag = NbtTree::new();
        NodeBuilder::new(&mut frag)
            .byte("a", 1)
            .and_then(|b| b.end_body())
            .and_then(|b| b.end_body())
            .expect("reps");
        let at = insert_fragment(&mut tree, "Level.Ticks", TagType::LIST_COMPOUND, &frag)
            .expect("insert")
            .expect("placed");
        assert_eq!(header::count_at(tree.as_bytes(), at), 2);
        assert_eq!(tree.iter(at).count(), 2);
        assert_consistent(&tree);
    }

    #[test]
    fn test_insert_deeper_miss_and_bad_paths() {
        let mut tree = sample();
        let frag = fragment(|b| b.int("z", 1).map(|_| ()));
        let out = insert_fragment(&mut tree, "A.B.z", TagType::of(TagKind::Int), &frag).expect("insert");
        assert_eq!(out, None);
        assert!(matches!(
            insert_fragment(&mut tree, "Level..z", TagType::of(TagKind::Int), &frag),
            Err(NbtError::InvalidPath(_))
        ));
        // Parent synthesized but the fragment lacks the named node.
        let out = insert_fragment(&mut tree, "Level.Data.q", TagType::of(TagKind::Int), &frag).expect("insert");
        assert_eq!(out, None);
    }

    #[test]
    fn test_append_list_item() {
        let mut tree = sample();
        let list = tree.find("Entities").expect("list");
        let frag = fragment(|b| b.string("id", "Sheep").map(|_| ()));
        let at = append_list_item(&mut tree, list, &frag).expect("append").expect("placed");
        let list = tree.find("Entities").expect("list");
        assert_eq!(header::count_at(tree.as_bytes(), list), 3);
        assert_eq!(tree.iter(list).last(), Some(at));
        assert_consistent(&tree);
    }

    #[test]
    fn test_mark_for_update_only_on_containers() {
        let mut tree = sample();
        let list = tree.find("Entities").expect("list");
        let x = tree.find("xPos").expect("xPos");
        assert!(mark_for_update(&mut tree, list, 0x04));
        assert!(!mark_for_update(&mut tree, x, 0x04));
        let node = tree.node(list).expect("node");
        assert!(node.is_dirty());
        assert_eq!(node.count(), 2);
        assert_eq!(node.flags() & TAG_MASK, 0x04);
    }

    #[test]
    fn test_copy_subtree_is_terminated() {
        let tree = sample();
        let level = tree.find("Level").expect("Level");
        let body = header::payload_offset(tree.as_bytes(), level);
        let copy = copy_subtree(tree.as_bytes(), body);
        assert!(header::tag_at(&copy, copy.len() - 4).is_end());
        assert_eq!(body_size(&copy), copy.len() - 4);
        assert!(find_node(&copy, 0, "Age").is_some());
        assert!(find_node(&copy, 0, "Entities").is_some());
    }

    #[test]
    fn test_refresh_repairs_sizes() {
        let mut tree = sample();
        let level = tree.find("Level").expect("Level");
        let good = header::size_at(tree.as_bytes(), level);
        header::set_size(tree.arena_mut().as_mut_slice(), level, good + 8);
        header::set_size(tree.arena_mut().as_mut_slice(), 0, 1);
        assert_eq!(refresh_sizes(&mut tree, 0), Some(tree.len()));
        assert_eq!(header::size_at(tree.as_bytes(), level), good);
    }
}
