use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::{Duration, Instant};

use serde::Serialize;

/// Lifecycle of a transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TransferStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
}

/// Snapshot handed to progress callbacks.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TransferProgress {
    pub id: String,
    pub status: TransferStatus,
    pub total_bytes: u64,
    /// Bytes moved so far, re-sent bytes included.
    pub transferred_bytes: u64,
    pub restarts: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resume_offset: Option<u64>,
    /// Filled in by [`ProgressTracker`](crate::ProgressTracker); zero otherwise.
    pub bytes_per_second: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub eta: Option<Duration>,
    pub error: String,
}

/// Outcome of a successful copy.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TransferReport {
    /// Length of the stream that reached the target.
    pub bytes: u64,
    /// What the source announced when opened (`0` = unknown).
    pub estimate: u64,
    /// `1` plus the number of restarts.
    pub attempts: u32,
    pub read_time: Duration,
    pub write_time: Duration,
    pub elapsed: Duration,
    /// Every byte written, including those sent again after a restart.
    pub moved: u64,
}

impl TransferReport {
    /// Overall rate in bytes per second.
    pub fn rate(&self) -> f64 {
        let secs = self.elapsed.as_secs_f64();
        if secs > 0.0 {
            self.moved as f64 / secs
        } else {
            0.0
        }
    }
}

/// Status record of one transfer, shared between the engine and observers.
pub struct TransferSession {
    inner: RwLock<SessionInner>,
}

struct SessionInner {
    id: String,
    status: TransferStatus,
    total_bytes: u64,
    transferred_bytes: u64,
    restarts: u32,
    resume_offset: Option<u64>,
    started_at: Option<Instant>,
    updated_at: Instant,
    completed_at: Option<Instant>,
    error: String,
}

impl TransferSession {
    /// Creates a pending session.
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            inner: RwLock::new(SessionInner {
                id: id.into(),
                status: TransferStatus::Pending,
                total_bytes: 0,
                transferred_bytes: 0,
                restarts: 0,
                resume_offset: None,
                started_at: None,
                updated_at: Instant::now(),
                completed_at: None,
                error: String::new(),
            }),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, SessionInner> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, SessionInner> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Marks the session as in progress; `total_bytes` is the source estimate.
    pub fn start(&self, total_bytes: u64) {
        let mut s = self.write();
        s.status = TransferStatus::InProgress;
        s.total_bytes = total_bytes;
        let now = Instant::now();
        s.started_at = Some(now);
        s.updated_at = now;
    }

    /// Adds bytes that reached the target.
    pub fn add_progress(&self, bytes: u64) {
        let mut s = self.write();
        s.transferred_bytes += bytes;
        s.updated_at = Instant::now();
    }

    /// Records a restart. Counters keep running.
    pub fn restart_from(&self, offset: u64) {
        let mut s = self.write();
        s.restarts += 1;
        s.resume_offset = Some(offset);
        s.updated_at = Instant::now();
    }

    pub fn complete(&self) {
        let mut s = self.write();
        s.status = TransferStatus::Completed;
        let now = Instant::now();
        s.completed_at = Some(now);
        s.updated_at = now;
    }

    pub fn fail(&self, err: &str) {
        let mut s = self.write();
        s.status = TransferStatus::Failed;
        s.error = err.to_string();
        let now = Instant::now();
        s.completed_at = Some(now);
        s.updated_at = now;
    }

    pub fn progress(&self) -> TransferProgress {
        let s = self.read();
        TransferProgress {
            id: s.id.clone(),
            status: s.status,
            total_bytes: s.total_bytes,
            transferred_bytes: s.transferred_bytes,
            restarts: s.restarts,
            resume_offset: s.resume_offset,
            bytes_per_second: 0.0,
            eta: None,
            error: s.error.clone(),
        }
    }

    /// Returns `true` while pending or in progress.
    pub fn is_active(&self) -> bool {
        matches!(
            self.read().status,
            TransferStatus::Pending | TransferStatus::InProgress
        )
    }

    pub fn id(&self) -> String {
        self.read().id.clone()
    }

    pub fn status(&self) -> TransferStatus {
        self.read().status
    }

    pub fn total_bytes(&self) -> u64 {
        self.read().total_bytes
    }

    pub fn transferred_bytes(&self) -> u64 {
        self.read().transferred_bytes
    }

    pub fn restarts(&self) -> u32 {
        self.read().restarts
    }

    /// Time since `start`, frozen once the session completes or fails.
    pub fn elapsed(&self) -> Option<Duration> {
        let s = self.read();
        let started = s.started_at?;
        let end = s.completed_at.unwrap_or_else(Instant::now);
        Some(end.duration_since(started))
    }

    /// Time since the last update of any kind.
    pub fn idle_for(&self) -> Duration {
        self.read().updated_at.elapsed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_session_is_pending() {
        let session = TransferSession::new("t1");
        assert_eq!(session.status(), TransferStatus::Pending);
        assert!(session.is_active());
        assert_eq!(session.transferred_bytes(), 0);
        assert!(session.elapsed().is_none());
    }

    #[test]
    fn start_sets_in_progress() {
        let session = TransferSession::new("t1");
        session.start(4096);
        assert_eq!(session.status(), TransferStatus::InProgress);
        assert_eq!(session.total_bytes(), 4096);
        assert!(session.is_active());
        assert!(session.elapsed().is_some());
    }

    #[test]
    fn restarts_do_not_reset_counters() {
        let session = TransferSession::new("t1");
        session.start(1000);
        session.add_progress(600);
        session.restart_from(400);
        session.add_progress(600);
        let p = session.progress();
        assert_eq!(p.transferred_bytes, 1200);
        assert_eq!(p.restarts, 1);
        assert_eq!(p.resume_offset, Some(400));
    }

    #[test]
    fn complete_and_fail() {
        let session = TransferSession::new("t1");
        session.start(10);
        session.complete();
        assert_eq!(session.status(), TransferStatus::Completed);
        assert!(!session.is_active());

        let session = TransferSession::new("t2");
        session.start(10);
        session.fail("disk full");
        assert_eq!(session.status(), TransferStatus::Failed);
        assert_eq!(session.progress().error, "disk full");
    }

    #[test]
    fn progress_serializes_snake_case() {
        let session = TransferSession::new("t1");
        session.start(10);
        let json = serde_json::to_value(session.progress()).unwrap();
        assert_eq!(json["status"], "in_progress");
        assert_eq!(json["total_bytes"], 10);
        assert!(json.get("resume_offset").is_none());
    }

    #[test]
    fn report_rate() {
        let report = TransferReport {
            bytes: 100,
            estimate: 100,
            attempts: 1,
            read_time: Duration::ZERO,
            write_time: Duration::ZERO,
            elapsed: Duration::from_secs(2),
            moved: 100,
        };
        assert_eq!(report.rate(), 50.0);
    }

    #[test]
    fn concurrent_access() {
        use std::sync::Arc;
        use std::thread;

        let session = Arc::new(TransferSession::new("t1"));
        session.start(100_000);

        let mut handles = vec![];
        for _ in 0..10 {
            let s = Arc::clone(&session);
            handles.push(thread::spawn(move || {
                for _ in 0..100 {
                    s.add_progress(1);
                }
            }));
        }
        for _ in 0..10 {
            let s = Arc::clone(&session);
            handles.push(thread::spawn(move || {
                for _ in 0..100 {
                    let _ = s.progress();
                    let _ = s.is_active();
                }
            }));
        }
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(session.transferred_bytes(), 1000);
    }
}
