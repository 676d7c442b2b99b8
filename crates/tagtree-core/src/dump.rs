//! Human-readable tree listing, for debugging and the `dump` command.

use std::fmt::{self, Write};

use bytemuck::pod_read_unaligned;
use tagtree_common::{TagKind, TagType};

use crate::header::{self, NodeRef};
use crate::iter::NodeIter;

const INDENT: usize = 3;
const ARRAY_PREVIEW: usize = 10;

/// Writes the node at `offset` and everything below it.
pub fn dump<W: Write>(mem: &[u8], offset: usize, out: &mut W) -> fmt::Result {
    dump_node(mem, offset, 0, out)
}

/// Dump into a fresh string.
#[must_use]
pub fn dump_to_string(mem: &[u8], offset: usize) -> String {
    let mut out = String::new();
    // Writing into a String cannot fail.
    let _ = dump(mem, offset, &mut out);
    out
}

fn dump_node<W: Write>(mem: &[u8], offset: usize, level: usize, out: &mut W) -> fmt::Result {
    let Some(node) = NodeRef::new(mem, offset) else {
        return Ok(());
    };
    let tag = node.tag();
    let Some(kind) = tag.kind() else {
        return writeln!(out, "{:level$}<unknown type {:#04x}> [{}]", "", tag.0, node.size());
    };
    if kind == TagKind::End {
        return Ok(());
    }

    let name = node.name_lossy();
    let size = node.size();
    let payload = node.payload();
    write!(out, "{:level$}{kind}(\"{name}\"): ", "")?;

    match kind {
        TagKind::Compound => {
            writeln!(out, "[{size}]")?;
            dump_body(mem, header::payload_offset(mem, offset), level, out)
        },
        TagKind::List => dump_list(mem, node, level, out),
        TagKind::String => {
            let text = payload.get(..node.count() as usize).unwrap_or(&[]);
            writeln!(out, "{} [{size}]", String::from_utf8_lossy(text))
        },
        TagKind::ByteArray => {
            write!(out, "[{} bytes/{size}] ", node.count())?;
            preview(out, node.count(), payload.iter().copied())
        },
        TagKind::IntArray => {
            write!(out, "[{} ints/{size}] ", node.count())?;
            preview(out, node.count(), payload.chunks_exact(4).map(pod_read_unaligned::<i32>))
        },
        TagKind::LongArray => {
            write!(out, "[{} longs/{size}] ", node.count())?;
            preview(out, node.count(), payload.chunks_exact(8).map(pod_read_unaligned::<i64>))
        },
        TagKind::Handle => writeln!(out, "{:#x} [{size}]", read_u64(payload)),
        scalar => {
            write_scalar(out, scalar, payload)?;
            writeln!(out, " [{size}]")
        },
    }
}

fn dump_body<W: Write>(mem: &[u8], body: usize, level: usize, out: &mut W) -> fmt::Result {
    writeln!(out, "{:level$}{{", "")?;
    for child in NodeIter::siblings(mem, body) {
        dump_node(mem, child, level + INDENT, out)?;
    }
    writeln!(out, "{:level$}}}", "")
}

fn dump_list<W: Write>(mem: &[u8], node: NodeRef<'_>, level: usize, out: &mut W) -> fmt::Result {
    let tag = node.tag();
    let element = tag.element().unwrap_or(TagKind::End);
    writeln!(out, "{} entries of type {element} [{}]", node.count(), node.size())?;
    writeln!(out, "{:level$}{{", "")?;
    let inner = level + INDENT;
    let payload = node.payload();

    if tag == TagType::LIST_COMPOUND {
        for rep in NodeIter::new(mem, node.offset()) {
            writeln!(out, "{:inner$}{}(\"\"):", "", TagKind::Compound)?;
            dump_body(mem, rep, inner, out)?;
        }
    } else if element == TagKind::String {
        for item in payload.split(|&b| b == 0).take(node.count() as usize) {
            writeln!(out, "{:inner$}{element}: {}", "", String::from_utf8_lossy(item))?;
        }
    } else if let Some(width) = element.scalar_size() {
        for value in payload.chunks_exact(width).take(node.count() as usize) {
            write!(out, "{:inner$}{element}: ", "")?;
            write_scalar(out, element, value)?;
            writeln!(out)?;
        }
    }
    writeln!(out, "{:level$}}}", "")
}

fn write_scalar<W: Write>(out: &mut W, kind: TagKind, bytes: &[u8]) -> fmt::Result {
    let Some(width) = kind.scalar_size() else {
        return Ok(());
    };
    let Some(bytes) = bytes.get(..width) else {
        return write!(out, "<truncated>");
    };
    match kind {
        TagKind::Byte => write!(out, "{}", pod_read_unaligned::<i8>(bytes)),
        TagKind::Short => write!(out, "{}", pod_read_unaligned::<i16>(bytes)),
        TagKind::Int => write!(out, "{}", pod_read_unaligned::<i32>(bytes)),
        TagKind::Long => write!(out, "{}", pod_read_unaligned::<i64>(bytes)),
        TagKind::Float => write!(out, "{}", pod_read_unaligned::<f32>(bytes)),
        _ => write!(out, "{}", pod_read_unaligned::<f64>(bytes)),
    }
}

fn read_u64(bytes: &[u8]) -> u64 {
    bytes.get(..8).map_or(0, pod_read_unaligned)
}

fn preview<W, T, I>(out: &mut W, count: u32, values: I) -> fmt::Result
where
    W: Write,
    T: fmt::Display,
    I: Iterator<Item = T>,
{
    out.write_char('{')?;
    for (i, value) in values.take((count as usize).min(ARRAY_PREVIEW)).enumerate() {
        if i > 0 {
            out.write_str(", ")?;
        }
        write!(out, "{value}")?;
    }
    if count as usize > ARRAY_PREVIEW {
        out.write_str(", ...")?;
    }
    writeln!(out, "}}")
}
