//! Buffered copy engine.
//!
//! A fixed pool of slots circulates between two pumps: the reader runs on
//! the caller's thread and fills free slots from the source, a scoped
//! writer thread drains filled slots into the target. Both channels are
//! bounded by the pool size, so slots are written in the order they were
//! read and neither side can run more than `count` slots ahead.
//!
//! The first failure on either side is recorded on a shared board and
//! stops both pumps. A resumable failure rewinds both handles to the
//! last offset known to be written and starts a new attempt; counters
//! and timings keep accumulating across attempts.

use std::fmt;
use std::sync::mpsc::{Receiver, SyncSender, sync_channel};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::{Duration, Instant};

use bytemover_handle::{Handle, write_all};
use tracing::{debug, info};

use crate::retry::{Interrupt, Retry};
use crate::save::{Stats, announce, check_length, close_pair, conclude, open_pair, rate};
use crate::{
    MetricValue, MetricsSink, NoopWatcher, TracingMetrics, TransferError, TransferReport,
    TransferSession, TransferWatcher,
};

enum Filled {
    Data(Vec<u8>, usize),
    End,
}

#[derive(Debug, Default)]
struct Counters {
    failure: Option<Interrupt>,
    read: u64,
    written: u64,
}

/// State shared by the two pumps of one attempt.
#[derive(Debug)]
struct Board {
    counters: Mutex<Counters>,
}

impl Board {
    fn starting_at(offset: u64) -> Self {
        Self {
            counters: Mutex::new(Counters {
                failure: None,
                read: offset,
                written: offset,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Counters> {
        self.counters.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn failed(&self) -> bool {
        self.lock().failure.is_some()
    }

    /// Keeps the first failure only.
    fn fail(&self, interrupt: Interrupt) {
        let mut c = self.lock();
        if c.failure.is_none() {
            c.failure = Some(interrupt);
        }
    }

    fn into_counters(self) -> Counters {
        self.counters
            .into_inner()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

/// Copies a source handle into a target through `count` slots of `slot_size` bytes.
pub struct BufferedTransfer {
    count: usize,
    slot_size: usize,
    metrics: Arc<dyn MetricsSink>,
    session: Option<Arc<TransferSession>>,
    max_restarts: Option<u32>,
}

impl fmt::Debug for BufferedTransfer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BufferedTransfer")
            .field("count", &self.count)
            .field("slot_size", &self.slot_size)
            .field("max_restarts", &self.max_restarts)
            .finish_non_exhaustive()
    }
}

impl BufferedTransfer {
    pub fn new(count: usize, slot_size: usize) -> Self {
        Self {
            count,
            slot_size,
            metrics: Arc::new(TracingMetrics),
            session: None,
            max_restarts: None,
        }
    }

    /// Where `size`, `read_time`, `write_time` and `time` go after a successful copy.
    pub fn with_metrics(mut self, metrics: Arc<dyn MetricsSink>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn with_progress(mut self, session: Arc<TransferSession>) -> Self {
        self.session = Some(session);
        self
    }

    pub fn with_max_restarts(mut self, max: u32) -> Self {
        self.max_restarts = Some(max);
        self
    }

    pub fn copy(
        &self,
        source: &mut dyn Handle,
        target: &mut dyn Handle,
    ) -> Result<TransferReport, TransferError> {
        self.copy_watched(source, target, &mut NoopWatcher)
    }

    /// Like [`copy`](Self::copy); `watcher` sees every chunk on this thread.
    pub fn copy_watched(
        &self,
        source: &mut dyn Handle,
        target: &mut dyn Handle,
        watcher: &mut dyn TransferWatcher,
    ) -> Result<TransferReport, TransferError> {
        let started = Instant::now();
        let result = self.run(source, target, watcher, started);
        if let Ok(report) = &result {
            self.metrics.set("size", MetricValue::Bytes(report.bytes));
            self.metrics.set("read_time", report.read_time.into());
            self.metrics.set("write_time", report.write_time.into());
            self.metrics.set("time", report.elapsed.into());
        }
        conclude(result, self.session.as_ref())
    }

    fn run(
        &self,
        source: &mut dyn Handle,
        target: &mut dyn Handle,
        watcher: &mut dyn TransferWatcher,
        started: Instant,
    ) -> Result<TransferReport, TransferError> {
        if self.count < 2 {
            return Err(TransferError::Contract(format!(
                "buffered transfer needs at least 2 slots, got {}",
                self.count
            )));
        }
        if self.slot_size == 0 {
            return Err(TransferError::Contract("buffer slot size is 0".into()));
        }

        source.compress(false)?;
        announce(source, target);
        let estimate = open_pair(source, target, watcher)?;
        if let Some(s) = &self.session {
            s.start(estimate);
        }

        let mut retry = Retry::new(self.max_restarts, self.session.as_ref());
        let mut stats = Stats::default();
        let result = self
            .pump_all(source, target, watcher, &mut retry, &mut stats)
            .and_then(|copied| check_length(copied, estimate).map(|()| copied));
        let copied = close_pair(source, target, result)?;

        info!(
            bytes = copied,
            read_rate = format!("{:.0} B/s", rate(copied, stats.read_time)),
            write_rate = format!("{:.0} B/s", rate(copied, stats.write_time)),
            "buffered copy done"
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
        &self,
        source: &mut dyn Handle,
        target: &mut dyn Handle,
        watcher: &mut dyn TransferWatcher,
        retry: &mut Retry<'_>,
        stats: &mut Stats,
    ) -> Result<u64, TransferError> {
        let mut offset = 0;
        loop {
            match self.attempt(source, target, watcher, offset, stats) {
                Ok(total) => return Ok(total),
                Err(Interrupt::Restart(at)) => {
                    retry.resume(at, source, target, watcher)?;
                    offset = at;
                }
                Err(Interrupt::Fatal(err)) => return Err(err),
            }
        }
    }

    /// Runs both pumps from `offset` until end of stream or the first failure.
    fn attempt(
        &self,
        source: &mut dyn Handle,
        target: &mut dyn Handle,
        watcher: &mut dyn TransferWatcher,
        offset: u64,
        stats: &mut Stats,
    ) -> Result<u64, Interrupt> {
        let board = Board::starting_at(offset);
        let (free_tx, free_rx) = sync_channel::<Vec<u8>>(self.count);
        let (full_tx, full_rx) = sync_channel::<Filled>(self.count);
        for _ in 0..self.count {
            if free_tx.send(vec![0u8; self.slot_size]).is_err() {
                break;
            }
        }
        debug!(offset, slots = self.count, slot_size = self.slot_size, "starting pumps");

        let session = self.session.as_ref();
        let (read_time, writer) = thread::scope(|scope| {
            let board = &board;
            let writer = scope.spawn(move || write_pump(target, full_rx, free_tx, board, session));
            let read_time = read_pump(source, watcher, free_rx, full_tx, board);
            (read_time, writer.join())
        });

        let write_time = match writer {
            Ok(t) => t,
            Err(_) => {
                return Err(Interrupt::Fatal(TransferError::Contract(
                    "writer thread panicked".into(),
                )));
            }
        };
        let counters = board.into_counters();
        stats.read_time += read_time;
        stats.write_time += write_time;
        stats.moved += counters.written - offset;

        match counters.failure {
            Some(Interrupt::Restart(at)) => Err(Interrupt::Restart(at.min(counters.written))),
            Some(fatal) => Err(fatal),
            None if counters.read != counters.written => {
                Err(Interrupt::Fatal(TransferError::Inconsistent {
                    read: counters.read,
                    written: counters.written,
                }))
            }
            None => Ok(counters.written),
        }
    }
}

fn read_pump(
    source: &mut dyn Handle,
    watcher: &mut dyn TransferWatcher,
    free: Receiver<Vec<u8>>,
    full: SyncSender<Filled>,
    board: &Board,
) -> Duration {
    let mut read_time = Duration::ZERO;
    while !board.failed() {
        // Err: the writer has stopped.
        let Ok(mut buf) = free.recv() else { break };
        let t = Instant::now();
        let result = source.read(&mut buf);
        read_time += t.elapsed();
        match result {
            Ok(0) => {
                let _ = full.send(Filled::End);
                break;
            }
            Ok(n) => {
                watcher.watch(&buf[..n]);
                board.lock().read += n as u64;
                if full.send(Filled::Data(buf, n)).is_err() {
                    break;
                }
            }
            Err(err) => {
                let at = board.lock().read;
                board.fail(Interrupt::from_source(err, at));
                break;
            }
        }
    }
    read_time
}

fn write_pump(
    target: &mut dyn Handle,
    full: Receiver<Filled>,
    free: SyncSender<Vec<u8>>,
    board: &Board,
    session: Option<&Arc<TransferSession>>,
) -> Duration {
    let mut write_time = Duration::ZERO;
    while !board.failed() {
        let Ok(Filled::Data(buf, n)) = full.recv() else {
            break;
        };
        let t = Instant::now();
        let result = write_all(target, &buf[..n]);
        write_time += t.elapsed();
        if let Err(err) = result {
            let at = board.lock().written;
            board.fail(Interrupt::from_target(err, at));
            break;
        }
        board.lock().written += n as u64;
        if let Some(s) = session {
            s.add_progress(n as u64);
        }
        // The reader may already be gone after sending `End`.
        let _ = free.send(buf);
    }
    write_time
}
