//! Transfer tuning.
//!
//! Every field has a default so a partial TOML table is enough.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::BufferedTransfer;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferConfig {
    /// Use the buffered engine when both handles allow it.
    #[serde(default = "default_true")]
    pub double_buffer: bool,

    /// Number of slots of the buffered engine.
    #[serde(default = "default_buffer_count")]
    pub buffer_count: usize,

    /// Size of one slot in bytes.
    #[serde(default = "default_buffer_size")]
    pub buffer_size: usize,

    /// Buffer of the single-buffer loop and of `copy_to`.
    #[serde(default = "default_single_buffer_size")]
    pub single_buffer_size: usize,

    #[serde(default = "default_compare_buffer_size")]
    pub compare_buffer_size: usize,

    /// Restart limit; unlimited when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_restarts: Option<u32>,

    #[serde(default = "default_progress_interval_ms")]
    pub progress_interval_ms: u64,
}

fn default_true() -> bool {
    true
}

fn default_buffer_count() -> usize {
    20
}

fn default_buffer_size() -> usize {
    10 * 1024 * 1024 / 20
}

fn default_single_buffer_size() -> usize {
    64 * 1024 * 1024
}

fn default_compare_buffer_size() -> usize {
    10 * 1024 * 1024
}

fn default_progress_interval_ms() -> u64 {
    500
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            double_buffer: default_true(),
            buffer_count: default_buffer_count(),
            buffer_size: default_buffer_size(),
            single_buffer_size: default_single_buffer_size(),
            compare_buffer_size: default_compare_buffer_size(),
            max_restarts: None,
            progress_interval_ms: default_progress_interval_ms(),
        }
    }
}

impl TransferConfig {
    pub fn progress_interval(&self) -> Duration {
        Duration::from_millis(self.progress_interval_ms)
    }

    /// Buffered engine sized by this configuration.
    pub fn buffered(&self) -> BufferedTransfer {
        let engine = BufferedTransfer::new(self.buffer_count, self.buffer_size);
        match self.max_restarts {
            Some(max) => engine.with_max_restarts(max),
            None => engine,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let c = TransferConfig::default();
        assert!(c.double_buffer);
        assert_eq!(c.buffer_count, 20);
        assert_eq!(c.buffer_size, 524_288);
        assert_eq!(c.single_buffer_size, 67_108_864);
        assert_eq!(c.compare_buffer_size, 10_485_760);
        assert_eq!(c.max_restarts, None);
        assert_eq!(c.progress_interval(), Duration::from_millis(500));
    }

    #[test]
    fn missing_fields_take_defaults() {
        let c: TransferConfig = serde_json::from_str(r#"{"buffer_count": 4}"#).unwrap();
        assert_eq!(c.buffer_count, 4);
        assert_eq!(c.buffer_size, 524_288);
        assert!(c.double_buffer);
    }

    #[test]
    fn unset_restart_limit_is_not_serialized() {
        let json = serde_json::to_string(&TransferConfig::default()).unwrap();
        assert!(!json.contains("max_restarts"));
        let limited = TransferConfig {
            max_restarts: Some(3),
            ..Default::default()
        };
        let back: TransferConfig =
            serde_json::from_str(&serde_json::to_string(&limited).unwrap()).unwrap();
        assert_eq!(back, limited);
    }
}
