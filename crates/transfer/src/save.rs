//! Whole-stream operations: `save_into`, `copy_to` and `compare`.

use std::sync::Arc;
use std::time::{Duration, Instant};

use bytemover_handle::{Handle, close_after, read_fully, write_all};
use tracing::{error, info, warn};

use crate::retry::{Interrupt, Retry};
use crate::{TransferConfig, TransferError, TransferReport, TransferSession, TransferWatcher};

/// Timings accumulated over every attempt of one copy.
#[derive(Debug, Default, Clone, Copy)]
pub(crate) struct Stats {
    pub read_time: Duration,
    pub write_time: Duration,
    pub moved: u64,
}

/// Opens `source` for reading and `target` for writing with the source estimate.
pub(crate) fn open_pair(
    source: &mut dyn Handle,
    target: &mut dyn Handle,
    watcher: &mut dyn TransferWatcher,
) -> Result<u64, TransferError> {
    let estimate = source
        .open_for_read()
        .map_err(|source| TransferError::Source { offset: 0, source })?;
    watcher.from_opened(estimate);
    if let Err(err) = target.open_for_write(estimate) {
        return close_after(
            source,
            Err(TransferError::Target {
                offset: 0,
                source: err,
            }),
        );
    }
    watcher.to_opened(estimate);
    Ok(estimate)
}

/// Closes both handles, keeping the first error.
pub(crate) fn close_pair<T>(
    source: &mut dyn Handle,
    target: &mut dyn Handle,
    result: Result<T, TransferError>,
) -> Result<T, TransferError> {
    let result = close_after(target, result);
    close_after(source, result)
}

/// Logs `"<estimate> <source> => <target>"` before a copy starts.
pub(crate) fn announce(source: &dyn Handle, target: &dyn Handle) {
    info!("{} {} => {}", source.estimate(), source.title(), target.title());
}

/// Fails unless a known estimate matches what was copied.
pub(crate) fn check_length(copied: u64, estimate: u64) -> Result<(), TransferError> {
    if estimate != 0 && estimate != copied {
        return Err(TransferError::ShortTransfer { copied, estimate });
    }
    Ok(())
}

/// Records the outcome in `session` and logs failures.
pub(crate) fn conclude(
    result: Result<TransferReport, TransferError>,
    session: Option<&Arc<TransferSession>>,
) -> Result<TransferReport, TransferError> {
    match &result {
        Ok(report) => {
            info!(
                bytes = report.bytes,
                attempts = report.attempts,
                rate = format!("{:.0} B/s", report.rate()),
                "transfer complete"
            );
            if let Some(s) = session {
                s.complete();
            }
        }
        Err(err) => {
            error!(error = %err, "transfer failed");
            if let Some(s) = session {
                s.fail(&err.to_string());
            }
        }
    }
    result
}

/// Copies `source` into `target`, restarting on resumable failures.
///
/// The buffered engine is used when `config.double_buffer` is set and both
/// handles allow it; otherwise a single buffer is pumped on this thread.
pub fn save_into(
    source: &mut dyn Handle,
    target: &mut dyn Handle,
    config: &TransferConfig,
    watcher: &mut dyn TransferWatcher,
    session: Option<Arc<TransferSession>>,
) -> Result<TransferReport, TransferError> {
    if config.double_buffer && source.double_buffer_ok() && target.double_buffer_ok() {
        let mut engine = config.buffered();
        if let Some(session) = session {
            engine = engine.with_progress(session);
        }
        return engine.copy_watched(source, target, watcher);
    }

    source.compress(false)?;
    announce(source, target);
    let started = Instant::now();
    let result = single_buffer(source, target, config, watcher, session.as_ref(), started);
    conclude(result, session.as_ref())
}

fn single_buffer(
    source: &mut dyn Handle,
    target: &mut dyn Handle,
    config: &TransferConfig,
    watcher: &mut dyn TransferWatcher,
    session: Option<&Arc<TransferSession>>,
    started: Instant,
) -> Result<TransferReport, TransferError> {
    if config.single_buffer_size == 0 {
        return Err(TransferError::Contract("single buffer size is 0".into()));
    }
    let estimate = open_pair(source, target, watcher)?;
    if let Some(s) = session {
        s.start(estimate);
    }

    let mut buf = vec![0u8; config.single_buffer_size];
    let mut retry = Retry::new(config.max_restarts, session);
    let mut stats = Stats::default();
    let result = pump_all(source, target, &mut buf, watcher, &mut retry, &mut stats, session)
        .and_then(|copied| check_length(copied, estimate).map(|()| copied));
    let copied = close_pair(source, target, result)?;

    info!(
        read_rate = format!("{:.0} B/s", rate(copied, stats.read_time)),
        write_rate = format!("{:.0} B/s", rate(copied, stats.write_time)),
        "single buffer copy done"
    );
    Ok(TransferReport {
        bytes: copied,
        estimate,
        attempts: retry.attempts(),
        read_time: stats.read_time,
        write_time: stats.write_time,
        elapsed: started.elapsed(),
        moved: stats.moved,
    })
}

fn pump_all(
    source: &mut dyn Handle,
    target: &mut dyn Handle,
    buf: &mut [u8],
    watcher: &mut dyn TransferWatcher,
    retry: &mut Retry<'_>,
    stats: &mut Stats,
    session: Option<&Arc<TransferSession>>,
) -> Result<u64, TransferError> {
    let mut total = 0;
    loop {
        match pump(source, target, buf, watcher, &mut total, stats, session) {
            Ok(()) => return Ok(total),
            Err(Interrupt::Restart(at)) => {
                let at = at.min(total);
                retry.resume(at, source, target, watcher)?;
                total = at;
            }
            Err(Interrupt::Fatal(err)) => return Err(err),
        }
    }
}

fn pump(
    source: &mut dyn Handle,
    target: &mut dyn Handle,
    buf: &mut [u8],
    watcher: &mut dyn TransferWatcher,
    total: &mut u64,
    stats: &mut Stats,
    session: Option<&Arc<TransferSession>>,
) -> Result<(), Interrupt> {
    loop {
        let t = Instant::now();
        let n = source
            .read(buf)
            .map_err(|e| Interrupt::from_source(e, *total))?;
        stats.read_time += t.elapsed();
        if n == 0 {
            return Ok(());
        }

        let t = Instant::now();
        write_all(target, &buf[..n]).map_err(|e| Interrupt::from_target(e, *total))?;
        stats.write_time += t.elapsed();

        *total += n as u64;
        stats.moved += n as u64;
        watcher.watch(&buf[..n]);
        if let Some(s) = session {
            s.add_progress(n as u64);
        }
    }
}

pub(crate) fn rate(bytes: u64, time: Duration) -> f64 {
    let secs = time.as_secs_f64();
    if secs > 0.0 { bytes as f64 / secs } else { 0.0 }
}

/// Plain copy without restarts or progress. Returns the bytes copied.
pub fn copy_to(
    source: &mut dyn Handle,
    target: &mut dyn Handle,
    buffer_size: usize,
) -> Result<u64, TransferError> {
    if buffer_size == 0 {
        return Err(TransferError::Contract("copy buffer size is 0".into()));
    }
    let estimate = open_pair(source, target, &mut crate::NoopWatcher)?;
    let mut buf = vec![0u8; buffer_size];
    let mut total = 0u64;
    let result = loop {
        let n = match source.read(&mut buf) {
            Ok(n) => n,
            Err(source) => break Err(TransferError::Source { offset: total, source }),
        };
        if n == 0 {
            break check_length(total, estimate).map(|()| total);
        }
        if let Err(source) = write_all(target, &buf[..n]) {
            break Err(TransferError::Target { offset: total, source });
        }
        total += n as u64;
    };
    close_pair(source, target, result)
}

/// Returns `true` if `a` and `b` produce the same bytes.
pub fn compare(
    a: &mut dyn Handle,
    b: &mut dyn Handle,
    buffer_size: usize,
) -> Result<bool, TransferError> {
    if buffer_size == 0 {
        return Err(TransferError::Contract("compare buffer size is 0".into()));
    }
    let estimate_a = a.open_for_read()?;
    let estimate_b = match b.open_for_read() {
        Ok(e) => e,
        Err(err) => return close_after(a, Err(err.into())),
    };
    let result = compare_open(a, b, estimate_a, estimate_b, buffer_size);
    let result = close_after(b, result);
    close_after(a, result)
}

fn compare_open(
    a: &mut dyn Handle,
    b: &mut dyn Handle,
    estimate_a: u64,
    estimate_b: u64,
    buffer_size: usize,
) -> Result<bool, TransferError> {
    if estimate_a != estimate_b {
        warn!(a = %a.title(), b = %b.title(), estimate_a, estimate_b, "compare: estimates differ");
        return Ok(false);
    }
    let mut buf_a = vec![0u8; buffer_size];
    let mut buf_b = vec![0u8; buffer_size];
    let mut total = 0u64;
    loop {
        let n_a = read_fully(a, &mut buf_a)?;
        let n_b = read_fully(b, &mut buf_b)?;
        if n_a != n_b {
            warn!(a = %a.title(), b = %b.title(), at = total, n_a, n_b, "compare: lengths differ");
            return Ok(false);
        }
        if n_a == 0 {
            info!(a = %a.title(), b = %b.title(), bytes = total, "compare: identical");
            return Ok(true);
        }
        if buf_a[..n_a] != buf_b[..n_b] {
            warn!(a = %a.title(), b = %b.title(), near = total, "compare: contents differ");
            return Ok(false);
        }
        total += n_a as u64;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::NoopWatcher;
    use crate::testing::{Flaky, mem, pattern};
    use bytemover_handle::{FileHandle, HandleError, MemoryHandle};
    use tempfile::TempDir;

    fn single() -> TransferConfig {
        TransferConfig {
            double_buffer: false,
            single_buffer_size: 7,
            ..Default::default()
        }
    }

    #[test]
    fn single_buffer_copies_everything() {
        let data = pattern(100);
        let mut src = mem(&data);
        let mut dst = MemoryHandle::new();
        let report = save_into(&mut src, &mut dst, &single(), &mut NoopWatcher, None).unwrap();
        assert_eq!(report.bytes, 100);
        assert_eq!(report.attempts, 1);
        assert_eq!(dst.data(), &data[..]);
    }

    #[test]
    fn single_buffer_restarts_from_target_offset() {
        let data = pattern(50);
        let mut src = mem(&data);
        let mut dst = Flaky::failing_after(20);
        let session = Arc::new(TransferSession::new("t"));
        let report = save_into(
            &mut src,
            &mut dst,
            &single(),
            &mut NoopWatcher,
            Some(Arc::clone(&session)),
        )
        .unwrap();
        assert_eq!(report.bytes, 50);
        assert_eq!(report.attempts, 2);
        assert_eq!(report.moved, 50);
        assert_eq!(dst.data(), &data[..]);
        assert_eq!(session.restarts(), 1);
        assert_eq!(session.status(), crate::TransferStatus::Completed);
    }

    #[test]
    fn buffered_path_is_used_when_allowed() {
        let data = pattern(3000);
        let mut src = mem(&data);
        let mut dst = MemoryHandle::new();
        let config = TransferConfig {
            buffer_count: 3,
            buffer_size: 256,
            ..Default::default()
        };
        let report = save_into(&mut src, &mut dst, &config, &mut NoopWatcher, None).unwrap();
        assert_eq!(report.bytes, 3000);
        assert_eq!(dst.data(), &data[..]);
    }

    #[test]
    fn fatal_write_error_reports_offset_and_closes() {
        let mut src = mem(&pattern(30));
        let mut dst = Flaky::broken_after(10);
        let err = save_into(&mut src, &mut dst, &single(), &mut NoopWatcher, None).unwrap_err();
        match err {
            TransferError::Target { offset, source } => {
                assert!(offset <= 10);
                assert!(matches!(source, HandleError::Write(_)));
            }
            other => panic!("unexpected error {other}"),
        }
        assert_eq!(dst.closes, 1);
    }

    #[test]
    fn copy_to_files() {
        let dir = TempDir::new().unwrap();
        let from = dir.path().join("from");
        let to = dir.path().join("to");
        std::fs::write(&from, pattern(1000)).unwrap();
        let copied = copy_to(&mut FileHandle::new(&from), &mut FileHandle::new(&to), 64).unwrap();
        assert_eq!(copied, 1000);
        assert_eq!(std::fs::read(&to).unwrap(), pattern(1000));
    }

    #[test]
    fn compare_detects_differences() {
        let a = pattern(100);
        let mut b = a.clone();
        assert!(compare(&mut mem(&a), &mut mem(&b), 16).unwrap());
        b[77] ^= 1;
        assert!(!compare(&mut mem(&a), &mut mem(&b), 16).unwrap());
        assert!(!compare(&mut mem(&a), &mut mem(&a[..99]), 16).unwrap());
    }

    #[test]
    fn zero_sized_buffers_are_refused() {
        let mut src = mem(b"x");
        let mut dst = MemoryHandle::new();
        assert!(matches!(copy_to(&mut src, &mut dst, 0), Err(TransferError::Contract(_))));
        assert!(matches!(compare(&mut src, &mut dst, 0), Err(TransferError::Contract(_))));
    }
}
