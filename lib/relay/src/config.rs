use chassis::wire::{HEADER_SIZE, MAX_MESSAGE_SIZE};
use serde_derive::{Deserialize, Serialize};
use std::time::Duration;

/// Server configuration. Every field has a default, so an empty JSON object
/// is a valid configuration file.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Config {
    pub port: u16,
    pub worker_threads: usize,
    pub identify_timeout_ms: u64,
    pub key_exchange_timeout_ms: u64,
    pub max_message_size: usize,
    pub read_buffer_size: usize,
}

impl Default for Config {
    fn default() -> Config {
        Config {
            port: 1666,
            worker_threads: default_workers(),
            identify_timeout_ms: 1_000,
            key_exchange_timeout_ms: 5_000,
            max_message_size: MAX_MESSAGE_SIZE,
            read_buffer_size: MAX_MESSAGE_SIZE + HEADER_SIZE,
        }
    }
}

pub fn default_workers() -> usize {
    num_cpus::get().max(2)
}

impl Config {
    #[inline]
    pub fn identify_timeout(&self) -> Duration {
        Duration::from_millis(self.identify_timeout_ms)
    }

    #[inline]
    pub fn key_exchange_timeout(&self) -> Duration {
        Duration::from_millis(self.key_exchange_timeout_ms)
    }

    /// Clamps pathological values: at least one worker, and a read buffer
    /// large enough to hold the biggest legal frame.
    pub fn normalized(mut self) -> Config {
        self.worker_threads = self.worker_threads.max(1);
        self.max_message_size = self.max_message_size.min(MAX_MESSAGE_SIZE);
        self.read_buffer_size = self.read_buffer_size.max(self.max_message_size + HEADER_SIZE);
        self
    }
}
