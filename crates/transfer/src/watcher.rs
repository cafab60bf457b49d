//! Observation hooks called by the copy engines on the caller's thread.

/// Observer of a running transfer.
///
/// `watch` sees every chunk read from the source in stream order. After
/// `restart_from` the chunks start again at that offset.
pub trait TransferWatcher {
    fn from_opened(&mut self, _estimate: u64) {}

    fn to_opened(&mut self, _estimate: u64) {}

    fn watch(&mut self, _data: &[u8]) {}

    fn restart_from(&mut self, _offset: u64) {}
}

/// Watcher that ignores everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopWatcher;

impl TransferWatcher for NoopWatcher {}
