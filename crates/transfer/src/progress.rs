use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::{Duration, Instant};

use crate::{TransferProgress, TransferSession};

/// Default progress notification interval.
const DEFAULT_INTERVAL: Duration = Duration::from_millis(500);

/// Callback invoked with transfer progress.
pub type ProgressCallback = Box<dyn Fn(TransferProgress) + Send + Sync>;

/// Tracks transfer sessions and notifies callbacks periodically.
///
/// Each tick samples the bytes moved since the previous tick, so the rate
/// and ETA in the snapshot reflect recent throughput, restarts included.
pub struct ProgressTracker {
    inner: Arc<RwLock<TrackerInner>>,
    stop: Arc<Mutex<Option<tokio::sync::oneshot::Sender<()>>>>,
}

struct Tracked {
    session: Arc<TransferSession>,
    speed: SpeedCalculator,
    last_bytes: u64,
}

struct TrackerInner {
    callbacks: Vec<ProgressCallback>,
    sessions: HashMap<String, Tracked>,
    interval: Duration,
}

impl TrackerInner {
    /// Samples `id` and builds the snapshot passed to callbacks.
    fn sample(&mut self, id: &str) -> Option<TransferProgress> {
        let tracked = self.sessions.get_mut(id)?;
        let mut progress = tracked.session.progress();
        let delta = progress.transferred_bytes.saturating_sub(tracked.last_bytes);
        tracked.last_bytes = progress.transferred_bytes;
        tracked.speed.add_sample(delta);
        progress.bytes_per_second = tracked.speed.bytes_per_second();
        progress.eta = tracked
            .speed
            .eta(progress.total_bytes.saturating_sub(progress.transferred_bytes));
        Some(progress)
    }

    fn notify(&self, progress: &TransferProgress) {
        for cb in &self.callbacks {
            cb(progress.clone());
        }
    }
}

impl ProgressTracker {
    /// Creates a tracker with the given notification interval (500 ms if `None`).
    pub fn new(interval: Option<Duration>) -> Self {
        Self {
            inner: Arc::new(RwLock::new(TrackerInner {
                callbacks: Vec::new(),
                sessions: HashMap::new(),
                interval: interval.unwrap_or(DEFAULT_INTERVAL),
            })),
            stop: Arc::new(Mutex::new(None)),
        }
    }

    pub fn on_progress(&self, callback: ProgressCallback) {
        let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        inner.callbacks.push(callback);
    }

    /// Begins tracking a session.
    pub fn track(&self, session: Arc<TransferSession>) {
        let id = session.id();
        let last_bytes = session.transferred_bytes();
        let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        inner.sessions.insert(
            id,
            Tracked {
                session,
                speed: SpeedCalculator::new(None, None),
                last_bytes,
            },
        );
    }

    pub fn untrack(&self, id: &str) {
        let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        inner.sessions.remove(id);
    }

    pub fn get_session(&self, id: &str) -> Option<Arc<TransferSession>> {
        let inner = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        inner.sessions.get(id).map(|t| Arc::clone(&t.session))
    }

    /// Sends a one-time progress notification for a session.
    pub fn notify_progress(&self, id: &str) {
        let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(progress) = inner.sample(id) {
            inner.notify(&progress);
        }
    }

    /// Starts periodic notifications in a background tokio task.
    ///
    /// Call [`stop`](Self::stop) to cancel.
    pub fn start(&self) {
        let (tx, mut rx) = tokio::sync::oneshot::channel();
        {
            let mut stop = self.stop.lock().unwrap_or_else(PoisonError::into_inner);
            drop(stop.take());
            *stop = Some(tx);
        }

        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            let interval = inner.read().unwrap_or_else(PoisonError::into_inner).interval;
            let mut ticker = tokio::time::interval(interval);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let mut i = inner.write().unwrap_or_else(PoisonError::into_inner);
                        let active: Vec<String> = i
                            .sessions
                            .iter()
                            .filter(|(_, t)| t.session.is_active())
                            .map(|(id, _)| id.clone())
                            .collect();
                        for id in active {
                            if let Some(progress) = i.sample(&id) {
                                i.notify(&progress);
                            }
                        }
                    }
                    _ = &mut rx => {
                        break;
                    }
                }
            }
        });
    }

    /// Stops the periodic notification task.
    pub fn stop(&self) {
        let mut stop = self.stop.lock().unwrap_or_else(PoisonError::into_inner);
        // Dropping the sender signals the task to exit.
        drop(stop.take());
    }
}

// ---------------------------------------------------------------------------
// SpeedCalculator
// ---------------------------------------------------------------------------

struct SpeedSample {
    bytes: u64,
    timestamp: Instant,
}

/// Transfer speed over a sliding window of samples.
pub struct SpeedCalculator {
    inner: Mutex<SpeedInner>,
}

struct SpeedInner {
    samples: Vec<SpeedSample>,
    max_samples: usize,
    window_size: Duration,
}

impl SpeedCalculator {
    /// - `window_size`: time window for speed calculation (default 5 s).
    /// - `max_samples`: maximum retained samples (default 100).
    pub fn new(window_size: Option<Duration>, max_samples: Option<usize>) -> Self {
        Self {
            inner: Mutex::new(SpeedInner {
                samples: Vec::new(),
                max_samples: max_samples.unwrap_or(100),
                window_size: window_size.unwrap_or(Duration::from_secs(5)),
            }),
        }
    }

    /// Records `bytes` moved at the current instant.
    pub fn add_sample(&self, bytes: u64) {
        let mut s = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        let now = Instant::now();
        s.samples.push(SpeedSample {
            bytes,
            timestamp: now,
        });

        if let Some(cutoff) = now.checked_sub(s.window_size) {
            s.samples.retain(|sample| sample.timestamp >= cutoff);
        }

        if s.samples.len() > s.max_samples {
            let excess = s.samples.len() - s.max_samples;
            s.samples.drain(..excess);
        }
    }

    /// Average bytes per second within the window; 0.0 with fewer than 2 samples.
    pub fn bytes_per_second(&self) -> f64 {
        let s = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        let (Some(first), Some(last)) = (s.samples.first(), s.samples.last()) else {
            return 0.0;
        };
        let elapsed = last.timestamp.duration_since(first.timestamp);
        if s.samples.len() < 2 || elapsed.is_zero() {
            return 0.0;
        }

        let total_bytes: u64 = s.samples.iter().map(|sample| sample.bytes).sum();
        total_bytes as f64 / elapsed.as_secs_f64()
    }

    /// Time needed for `remaining_bytes` at the current speed.
    pub fn eta(&self, remaining_bytes: u64) -> Option<Duration> {
        let speed = self.bytes_per_second();
        if speed <= 0.0 {
            return None;
        }
        Some(Duration::from_secs_f64(remaining_bytes as f64 / speed))
    }

    pub fn reset(&self) {
        let mut s = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        s.samples.clear();
    }
}
