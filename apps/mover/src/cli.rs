use std::path::PathBuf;
use std::str::FromStr;

use bytemover_handle::{FileHandle, FileRangeHandle, Handle};
use clap::{Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(name = "bytemover", version = env!("CARGO_PKG_VERSION"), about, long_about = None, propagate_version = true)]
pub struct Cli {
    #[command(subcommand)]
    pub cmd: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Concatenate sources into one destination file.
    #[command(alias = "cp", name = "copy")]
    Copy(CopyArgs),

    /// Identify the content of a file from its first bytes.
    #[command(name = "sniff")]
    Sniff { file: PathBuf },

    /// Check whether two files hold the same bytes.
    #[command(alias = "cmp", name = "compare")]
    Compare { a: PathBuf, b: PathBuf },

    /// Print how the sources would be described to a remote mover.
    #[command(name = "describe")]
    Describe {
        #[arg(required = true)]
        sources: Vec<Source>,
    },
}

#[derive(Debug, Clone, clap::Args)]
pub struct CopyArgs {
    /// `PATH` or `PATH@OFFSET+LENGTH`.
    #[arg(required = true)]
    pub sources: Vec<Source>,

    #[arg(long, short)]
    pub to: PathBuf,

    /// Compare SHA-256 of what was read and what was written.
    #[arg(long)]
    pub verify: bool,

    /// Use the single-buffer loop instead of the buffered engine.
    #[arg(long)]
    pub single: bool,
}

/// A whole file or one byte range of it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Source {
    File(PathBuf),
    Range {
        path: PathBuf,
        offset: u64,
        length: u64,
    },
}

impl Source {
    pub fn open(&self) -> Box<dyn Handle> {
        match self {
            Self::File(path) => Box::new(FileHandle::new(path)),
            Self::Range {
                path,
                offset,
                length,
            } => Box::new(FileRangeHandle::new(path, *offset, *length)),
        }
    }
}

impl FromStr for Source {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() {
            return Err("empty source".into());
        }
        // A path may itself contain '@'; only a trailing "@N+M" is a range.
        let Some((path, range)) = s.rsplit_once('@') else {
            return Ok(Self::File(PathBuf::from(s)));
        };
        let Some((offset, length)) = range.split_once('+') else {
            return Ok(Self::File(PathBuf::from(s)));
        };
        let (Ok(offset), Ok(length)) = (offset.parse::<u64>(), length.parse::<u64>()) else {
            return Err(format!("bad range {range:?} in {s:?}, expected OFFSET+LENGTH"));
        };
        if path.is_empty() {
            return Err(format!("missing path in {s:?}"));
        }
        Ok(Self::Range {
            path: PathBuf::from(path),
            offset,
            length,
        })
    }
}
