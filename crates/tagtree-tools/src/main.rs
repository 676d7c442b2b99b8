//! # Tagtree
//!
//! Command-line inspector for NBT data:
//! - dump a gzip file or one chunk of a region file
//! - read or overwrite a value by dotted path
//! - list the chunks stored in a region file

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(clippy::unwrap_used)]

use std::io::{self, Write};
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tagtree_common::{ChunkPos, TagKind};
use tagtree_core::prelude::*;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Inspect and edit NBT files in place.
#[derive(Parser)]
#[command(name = "tagtree")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// TOML configuration file (see `tagtree.toml`)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

/// Where a tree comes from.
#[derive(clap::Args, Clone, Debug)]
struct Source {
    /// Gzip file, or region file with --chunk
    file: PathBuf,

    /// Chunk coordinates inside a region file
    #[arg(long, num_args = 2, value_names = ["X", "Z"], allow_negative_numbers = true)]
    chunk: Option<Vec<i32>>,
}

impl Source {
    fn chunk_pos(&self) -> Option<ChunkPos> {
        self.chunk.as_deref().map(|xz| ChunkPos::new(xz[0], xz[1]))
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Print the whole tree, or the node at a path
    Dump {
        #[command(flatten)]
        source: Source,

        /// Dotted path of the node to print
        #[arg(short, long)]
        path: Option<String>,
    },

    /// Print one value
    Get {
        #[command(flatten)]
        source: Source,

        /// Dotted path, e.g. `Level.xPos`
        path: String,
    },

    /// Overwrite a numeric value and save
    SetInt {
        #[command(flatten)]
        source: Source,

        /// Dotted path, e.g. `Data.GameType`
        path: String,

        /// New value
        #[arg(allow_negative_numbers = true)]
        value: i64,
    },

    /// List the chunks stored in a region file
    Region {
        /// Region file (`r.X.Z.mca`)
        file: PathBuf,
    },
}

/// Main entry point.
fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env().add_directive("tagtree=info".parse()?))
        .init();

    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => TreeConfig::load_from(path),
        None => TreeConfig::default(),
    };

    let mut out = io::stdout().lock();
    run(cli.command, &config, &mut out)
}

fn run(command: Commands, config: &TreeConfig, out: &mut impl Write) -> Result<()> {
    match command {
        Commands::Dump { source, path } => {
            let tree = load(&source, config)?;
            let offset = match path {
                Some(path) => tree.find(&path).with_context(|| format!("no node at {path:?}"))?,
                None => 0,
            };
            write!(out, "{}", dump_to_string(tree.as_bytes(), offset))?;
        },
        Commands::Get { source, path } => {
            let tree = load(&source, config)?;
            let offset = tree.find(&path).with_context(|| format!("no node at {path:?}"))?;
            writeln!(out, "{}", describe(&tree, offset))?;
        },
        Commands::SetInt { source, path, value } => {
            let mut tree = load(&source, config)?;
            let offset = tree.find(&path);
            if !tree.set_int(offset, value) {
                bail!("{path:?} is not a numeric scalar");
            }
            store(&source, config, &tree)?;
            info!("Set {path} = {value}");
        },
        Commands::Region { file } => {
            let region = RegionFile::open(&file)?;
            writeln!(out, "{}: {} chunk(s)", file.display(), region.chunk_count())?;
            for z in 0..32 {
                for x in 0..32 {
                    let pos = ChunkPos::new(x, z);
                    if let Some(location) = region.location(pos) {
                        writeln!(
                            out,
                            "  ({x:2}, {z:2}) sector {} x{} written {}",
                            location.sector_offset,
                            location.sector_count,
                            region.timestamp(pos).unwrap_or(0)
                        )?;
                    }
                }
            }
        },
    }
    Ok(())
}

fn load(source: &Source, config: &TreeConfig) -> Result<NbtTree> {
    match source.chunk_pos() {
        Some(pos) => {
            let mut region = RegionFile::open_with(&source.file, config.clone())?;
            region
                .read_chunk(pos)?
                .with_context(|| format!("chunk ({}, {}) not stored in {}", pos.x, pos.z, source.file.display()))
        },
        None => NbtTree::parse_file_with(&source.file, config)
            .with_context(|| format!("failed to parse {}", source.file.display())),
    }
}

fn store(source: &Source, config: &TreeConfig, tree: &NbtTree) -> Result<()> {
    match source.chunk_pos() {
        Some(pos) => {
            let mut region = RegionFile::open_with(&source.file, config.clone())?;
            region.write_chunk(pos, tree, &mut NoRegeneration)?;
            region.flush()?;
        },
        None => {
            save_file(&source.file, tree)?;
        },
    }
    Ok(())
}

fn save_file(path: &Path, tree: &NbtTree) -> Result<()> {
    tree.save(path, &mut NoRegeneration)
        .with_context(|| format!("failed to save {}", path.display()))?;
    Ok(())
}

/// One-line rendering of a node's value.
fn describe(tree: &NbtTree, offset: usize) -> String {
    let Some(node) = tree.node(offset) else {
        return String::new();
    };
    let at = Some(offset);
    match node.kind() {
        Some(TagKind::String) => tree.string(at).unwrap_or_default().to_string(),
        Some(TagKind::Float | TagKind::Double) => {
            let mut value = [0.0];
            tree.to_floats(at, &mut value);
            value[0].to_string()
        },
        Some(TagKind::Byte | TagKind::Short | TagKind::Int | TagKind::Long) => tree.to_int(at, 0).to_string(),
        _ => dump_to_string(tree.as_bytes(), offset).trim_end().to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn level(dir: &TempDir) -> PathBuf {
        let path = dir.path().join("level.dat");
        let mut tree = NbtTree::new();
        tree.builder()
            .begin_compound("")
            .and_then(|b| b.begin_compound("Data"))
            .and_then(|b| b.string("LevelName", "World"))
            .and_then(|b| b.int("GameType", 0))
            .and_then(|b| b.end_compound())
            .and_then(|b| b.end_compound())
            .and_then(|b| b.finish())
            .expect("build");
        tree.save(&path, &mut NoRegeneration).expect("save");
        path
    }

    fn source(file: PathBuf) -> Source {
        Source { file, chunk: None }
    }

    fn output(command: Commands) -> String {
        let mut out = Vec::new();
        run(command, &TreeConfig::default(), &mut out).expect("run");
        String::from_utf8(out).expect("utf8")
    }

    #[test]
    fn test_get_and_set_int() {
        let dir = TempDir::new().expect("temp dir");
        let path = level(&dir);

        let name = output(Commands::Get {
            source: source(path.clone()),
            path: "Data.LevelName".to_string(),
        });
        assert_eq!(name, "World\n");

        output(Commands::SetInt {
            source: source(path.clone()),
            path: "GameType".to_string(),
            value: 1,
        });
        let game_type = output(Commands::Get {
            source: source(path),
            path: "GameType".to_string(),
        });
        assert_eq!(game_type, "1\n");
    }

    #[test]
    fn test_dump_and_region_listing() {
        let dir = TempDir::new().expect("temp dir");
        let path = level(&dir);
        let text = output(Commands::Dump {
            source: source(path.clone()),
            path: Some("Data".to_string()),
        });
        assert!(text.starts_with("TAG_Compound(\"Data\")"));

        let region_path = dir.path().join("r.0.0.mca");
        let tree = NbtTree::parse_file(&path).expect("parse");
        {
            let mut region = RegionFile::create(&region_path).expect("create");
            region.write_chunk(ChunkPos::new(2, 3), &tree, &mut NoRegeneration).expect("write");
        }
        let listing = output(Commands::Region { file: region_path.clone() });
        assert!(listing.contains("1 chunk(s)"));
        assert!(listing.contains("( 2,  3) sector 2 x1"));

        let chunk = output(Commands::Get {
            source: Source {
                file: region_path,
                chunk: Some(vec![2, 3]),
            },
            path: "LevelName".to_string(),
        });
        assert_eq!(chunk, "World\n");
    }

    #[test]
    fn test_missing_path_is_an_error() {
        let dir = TempDir::new().expect("temp dir");
        let command = Commands::Get {
            source: source(level(&dir)),
            path: "Nope".to_string(),
        };
        assert!(run(command, &TreeConfig::default(), &mut Vec::new()).is_err());
    }
}
