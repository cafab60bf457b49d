//! Subcommand implementations.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use bytemover_handle::{CostMap, FileHandle, Handle, close_after};
use bytemover_multi::CompositeHandle;
use bytemover_peek::{PeekBuffer, sniff};
use bytemover_transfer::{
    ChecksumWatcher, ProgressTracker, TransferConfig, TransferError, TransferReport,
    TransferSession, checksum_handle, compare, save_into,
};
use tracing::info;

use crate::cli::{Command, CopyArgs, Source};
use crate::config::Config;

pub async fn run(cmd: Command, config: Config) -> anyhow::Result<()> {
    match cmd {
        Command::Copy(args) => {
            let summary = copy(args, config.transfer).await?;
            println!("{summary}");
            Ok(())
        }
        Command::Sniff { file } => {
            let kind = sniff_file(&file)?;
            println!(
                "{}: {}",
                file.display(),
                kind.map(sniff::ContentKind::name).unwrap_or("unknown")
            );
            Ok(())
        }
        Command::Compare { a, b } => {
            let same = compare(
                &mut FileHandle::new(&a),
                &mut FileHandle::new(&b),
                config.transfer.compare_buffer_size,
            )?;
            anyhow::ensure!(same, "{} and {} differ", a.display(), b.display());
            println!("{} and {} are identical", a.display(), b.display());
            Ok(())
        }
        Command::Describe { sources } => {
            println!("{}", describe(&sources)?);
            Ok(())
        }
    }
}

fn composite(sources: &[Source]) -> CompositeHandle {
    let mut composite = CompositeHandle::new();
    for source in sources {
        composite.append(source.open());
    }
    composite
}

/// Result of a `copy` subcommand.
#[derive(Debug)]
pub struct CopySummary {
    pub target: PathBuf,
    pub report: TransferReport,
    pub digest: Option<String>,
}

impl std::fmt::Display for CopySummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} bytes -> {} in {:.2}s ({:.1} MiB/s, {} attempt(s))",
            self.report.bytes,
            self.target.display(),
            self.report.elapsed.as_secs_f64(),
            self.report.rate() / (1024.0 * 1024.0),
            self.report.attempts
        )?;
        if let Some(digest) = &self.digest {
            write!(f, "\nsha256 {digest}")?;
        }
        Ok(())
    }
}

async fn copy(args: CopyArgs, mut transfer: TransferConfig) -> anyhow::Result<CopySummary> {
    if args.single {
        transfer.double_buffer = false;
    }
    let id = args.to.display().to_string();
    let session = Arc::new(TransferSession::new(id.clone()));

    let tracker = ProgressTracker::new(Some(transfer.progress_interval()));
    tracker.on_progress(Box::new(|p| {
        info!(
            id = %p.id,
            bytes = p.transferred_bytes,
            total = p.total_bytes,
            restarts = p.restarts,
            rate = format!("{:.0} B/s", p.bytes_per_second),
            "progress"
        );
    }));
    tracker.track(Arc::clone(&session));
    tracker.start();

    let worker_session = Arc::clone(&session);
    let outcome = tokio::task::spawn_blocking(move || {
        copy_blocking(&args, &transfer, worker_session)
    })
    .await;

    tracker.notify_progress(&id);
    tracker.stop();
    tracker.untrack(&id);
    Ok(outcome??)
}

fn copy_blocking(
    args: &CopyArgs,
    transfer: &TransferConfig,
    session: Arc<TransferSession>,
) -> anyhow::Result<CopySummary> {
    let mut source = composite(&args.sources);
    let mut target = FileHandle::new(&args.to);
    let mut watcher = ChecksumWatcher::new();
    let report = save_into(&mut source, &mut target, transfer, &mut watcher, Some(session))?;

    let digest = if args.verify {
        let written = checksum_handle(
            &mut FileHandle::new(&args.to),
            transfer.compare_buffer_size,
        )?;
        let read = watcher.hex_digest();
        if read != written {
            return Err(TransferError::ChecksumMismatch {
                expected: read,
                actual: written,
            }
            .into());
        }
        Some(written)
    } else {
        None
    };

    Ok(CopySummary {
        target: args.to.clone(),
        report,
        digest,
    })
}

fn sniff_file(path: &Path) -> anyhow::Result<Option<sniff::ContentKind>> {
    let mut peek = PeekBuffer::new(Box::new(FileHandle::new(path)));
    peek.open_for_read()?;
    let kind = sniff::detect(&mut peek);
    Ok(close_after(&mut peek, kind)?)
}

fn describe(sources: &[Source]) -> anyhow::Result<String> {
    let source = composite(sources);
    let mut costs = CostMap::new();
    source.cost(&mut costs, true)?;
    for (node, bytes) in &costs {
        info!(node = %node, bytes, "read cost");
    }
    Ok(source.to_remote()?.to_json()?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytemover_handle::HandleDescriptor;

    fn write(dir: &Path, name: &str, data: &[u8]) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, data).unwrap();
        path
    }

    fn small() -> TransferConfig {
        TransferConfig {
            buffer_count: 2,
            buffer_size: 4,
            single_buffer_size: 3,
            compare_buffer_size: 64,
            ..Default::default()
        }
    }

    fn args(sources: Vec<Source>, to: PathBuf, single: bool) -> CopyArgs {
        CopyArgs {
            sources,
            to,
            verify: true,
            single,
        }
    }

    #[tokio::test]
    async fn copy_concatenates_sources_and_ranges() {
        let tmp = tempfile::tempdir().unwrap();
        let a = write(tmp.path(), "a", b"hello ");
        let b = write(tmp.path(), "b", b"xxworldxx");
        let out = tmp.path().join("out");

        for single in [false, true] {
            let sources = vec![
                Source::File(a.clone()),
                Source::Range {
                    path: b.clone(),
                    offset: 2,
                    length: 5,
                },
            ];
            let summary = copy(args(sources, out.clone(), single), small())
                .await
                .unwrap();
            assert_eq!(summary.report.bytes, 11);
            assert_eq!(std::fs::read(&out).unwrap(), b"hello world");
            assert!(summary.digest.is_some());
            assert!(summary.to_string().contains("11 bytes"));
        }
    }

    #[tokio::test]
    async fn copy_of_missing_source_fails() {
        let tmp = tempfile::tempdir().unwrap();
        let sources = vec![Source::File(tmp.path().join("nope"))];
        let result = copy(
            args(sources, tmp.path().join("out"), false),
            small(),
        )
        .await;
        assert!(result.is_err());
    }

    #[test]
    fn sniff_gzip_file() {
        let tmp = tempfile::tempdir().unwrap();
        let gz = write(tmp.path(), "x.gz", &[0x1F, 0x8B, 0x08, 0x00]);
        assert_eq!(sniff_file(&gz).unwrap(), Some(sniff::ContentKind::Gzip));
        let txt = write(tmp.path(), "x.txt", b"plain");
        assert_eq!(sniff_file(&txt).unwrap(), None);
    }

    #[test]
    fn describe_merges_adjacent_ranges() {
        let tmp = tempfile::tempdir().unwrap();
        let f = write(tmp.path(), "f", b"0123456789");
        let sources = vec![
            Source::Range {
                path: f.clone(),
                offset: 0,
                length: 4,
            },
            Source::Range {
                path: f.clone(),
                offset: 4,
                length: 3,
            },
        ];
        let json = describe(&sources).unwrap();
        match HandleDescriptor::from_json(&json).unwrap() {
            HandleDescriptor::Composite { parts, .. } => assert_eq!(parts.len(), 1),
            other => panic!("unexpected descriptor {other:?}"),
        }
    }
}
