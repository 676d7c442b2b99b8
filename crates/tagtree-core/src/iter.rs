//! Restartable traversal of compound children and list repetitions.

use tagtree_common::TagType;

use crate::header::{self, END_MARKER};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    /// Walking siblings until a terminator
    Children,
    /// Walking list repetitions, `left` still to go
    Repetitions { left: u32 },
    Done,
}

/// Iterator over node offsets.
///
/// Yields the direct children of a compound, the repetitions of a
/// list-of-compound, or the rest of a body when started on any other node.
#[derive(Debug, Clone)]
pub struct NodeIter<'a> {
    mem: &'a [u8],
    cursor: usize,
    mode: Mode,
}

impl<'a> NodeIter<'a> {
    /// Starts iterating at the node at `offset`.
    #[must_use]
    pub fn new(mem: &'a [u8], offset: usize) -> Self {
        let tag = header::tag_at(mem, offset);
        let (cursor, mode) = if tag.is_end() {
            (offset, Mode::Done)
        } else if tag == TagType::LIST_COMPOUND {
            let left = header::count_at(mem, offset);
            (header::payload_offset(mem, offset), Mode::Repetitions { left })
        } else if tag.is_container() {
            (header::payload_offset(mem, offset), Mode::Children)
        } else {
            (offset, Mode::Children)
        };
        Self { mem, cursor, mode }
    }

    /// Walks the siblings starting at `offset`, whatever node sits there.
    #[must_use]
    pub const fn siblings(mem: &'a [u8], offset: usize) -> Self {
        Self {
            mem,
            cursor: offset,
            mode: Mode::Children,
        }
    }

    /// Walks the top-level nodes of a fragment body.
    #[must_use]
    pub const fn body(mem: &'a [u8]) -> Self {
        Self::siblings(mem, 0)
    }

    /// Current cursor. Once exhausted this is just past the terminator.
    #[must_use]
    pub const fn position(&self) -> usize {
        self.cursor
    }
}

impl Iterator for NodeIter<'_> {
    type Item = usize;

    fn next(&mut self) -> Option<usize> {
        match self.mode {
            Mode::Done => None,
            Mode::Children => {
                let at = self.cursor;
                if at >= self.mem.len() {
                    self.mode = Mode::Done;
                    return None;
                }
                if header::tag_at(self.mem, at).is_end() {
                    self.cursor = at + END_MARKER;
                    self.mode = Mode::Done;
                    return None;
                }
                match header::next_sibling(self.mem, at) {
                    Some(next) => self.cursor = next,
                    None => self.mode = Mode::Done,
                }
                Some(at)
            },
            Mode::Repetitions { left } => {
                if left == 0 {
                    self.mode = Mode::Done;
                    return None;
                }
                let at = self.cursor;
                match repetition_end(self.mem, at) {
                    Some(end) => {
                        self.cursor = end;
                        self.mode = Mode::Repetitions { left: left - 1 };
                        Some(at)
                    },
                    None => {
                        self.mode = Mode::Done;
                        None
                    },
                }
            },
        }
    }
}

/// Offset just past the terminator of the body starting at `offset`.
#[must_use]
pub fn repetition_end(mem: &[u8], mut offset: usize) -> Option<usize> {
    loop {
        if offset >= mem.len() {
            return None;
        }
        if header::tag_at(mem, offset).is_end() {
            return Some(offset + END_MARKER);
        }
        offset = header::next_sibling(mem, offset)?;
    }
}

/// Bytes taken by the nodes of a body, terminator excluded.
#[must_use]
pub fn body_size(mem: &[u8]) -> usize {
    let mut end = 0;
    for at in NodeIter::body(mem) {
        end = at + header::size_at(mem, at);
    }
    end.min(mem.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::NodeBuilder;
    use crate::tree::NbtTree;
    use tagtree_common::NbtResult;

    fn build(tree: &mut NbtTree) -> NbtResult<()> {
        NodeBuilder::new(tree)
            .begin_compound("")?
            .int("a", 1)?
            .begin_list("L")?
            .begin_item()?
            .byte("x", 1)?
            .end_item()?
            .begin_item()?
            .end_item()?
            .begin_item()?
            .byte("x", 3)?
            .end_item()?
            .end_list()?
            .string("s", "hi")?
            .end_compound()?
            .finish()
    }

    fn sample() -> NbtTree {
        let mut tree = NbtTree::new();
        build(&mut tree).expect("build");
        tree
    }

    #[test]
    fn test_compound_children() {
        let tree = sample();
        let mem = tree.as_bytes();
        let names: Vec<&[u8]> = NodeIter::new(mem, 0).map(|at| header::name_at(mem, at)).collect();
        assert_eq!(names, vec![&b"a"[..], b"L", b"s"]);
    }

    #[test]
    fn test_list_repetitions() {
        let tree = sample();
        let mem = tree.as_bytes();
        let list = NodeIter::new(mem, 0).nth(1).expect("list");
        let reps: Vec<usize> = NodeIter::new(mem, list).collect();
        assert_eq!(reps.len(), 3);
        // The empty repetition points straight at its terminator.
        assert!(header::tag_at(mem, reps[1]).is_end());
        assert_eq!(NodeIter::new(mem, reps[1]).count(), 0);
        assert_eq!(NodeIter::new(mem, reps[2]).count(), 1);
    }

    #[test]
    fn test_mid_body_resumes_at_node() {
        let tree = sample();
        let mem = tree.as_bytes();
        let first = header::payload_offset(mem, 0);
        let list = header::next_sibling(mem, first).expect("list");
        assert_eq!(NodeIter::new(mem, list).count(), 3);
        let string = header::next_sibling(mem, list).expect("string");
        let mut iter = NodeIter::new(mem, string);
        assert_eq!(iter.next(), Some(string));
        assert_eq!(iter.next(), None);
        assert_eq!(iter.position(), mem.len());
    }

    #[test]
    fn test_body_size() {
        let mut body = header::encode_header(TagType::of(tagtree_common::TagKind::Int), b"x", 0, 20);
        body.extend_from_slice(&[0; 8]);
        assert_eq!(body_size(&body), 20);
        assert_eq!(repetition_end(&body, 0), Some(24));
    }
}
