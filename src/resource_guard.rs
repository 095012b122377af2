//! Resource guard: OOM protection for the worker pool.
//!
//! Before handing a document to a worker, poll available system memory;
//! if it stays below the threshold for the whole guard window, the caller
//! treats this as an in-band error (not a crash) and the document is
//! marked `stopped`.

use std::time::{Duration, Instant};

use rand::Rng;
use sysinfo::System;
use tracing::warn;

/// Minimum free memory, in bytes, required before a new document is
/// handed to a worker.
pub const MIN_AVAILABLE_BYTES: u64 = 2 * 1024 * 1024 * 1024;

/// Total time the guard will wait for memory to free up before giving up.
pub const GUARD_TIMEOUT: Duration = Duration::from_secs(600);

/// Jittered sleep bounds between polls, seconds.
const POLL_SLEEP_MIN_SECS: f64 = 5.0;
const POLL_SLEEP_MAX_SECS: f64 = 15.0;

/// Reports available system memory. A trait so tests can simulate memory
/// pressure without depending on the actual host's state.
pub trait MemoryProbe: Send + Sync {
    fn available_bytes(&mut self) -> u64;
}

pub struct SystemMemoryProbe {
    system: System,
}

impl Default for SystemMemoryProbe {
    fn default() -> Self {
        Self {
            system: System::new(),
        }
    }
}

impl MemoryProbe for SystemMemoryProbe {
    fn available_bytes(&mut self) -> u64 {
        self.system.refresh_memory();
        self.system.available_memory()
    }
}

/// Blocks (via async sleep) until available memory clears
/// [`MIN_AVAILABLE_BYTES`] or [`GUARD_TIMEOUT`] elapses. Returns `true` if
/// memory became available, `false` if the guard timed out — the caller
/// is expected to translate a timeout into the "OOM protection" in-band
/// error per the fault supervisor's classification.
pub async fn wait_for_available_memory(probe: &mut dyn MemoryProbe) -> bool {
    let deadline = Instant::now() + GUARD_TIMEOUT;
    loop {
        let available = probe.available_bytes();
        if available >= MIN_AVAILABLE_BYTES {
            return true;
        }
        if Instant::now() >= deadline {
            warn!(available_bytes = available, "resource guard timed out waiting for free memory");
            return false;
        }
        let jitter = rand::thread_rng().gen_range(POLL_SLEEP_MIN_SECS..=POLL_SLEEP_MAX_SECS);
        tokio::time::sleep(Duration::from_secs_f64(jitter)).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct ScriptedProbe {
        readings: std::vec::IntoIter<u64>,
        last: u64,
    }

    impl ScriptedProbe {
        fn new(readings: Vec<u64>) -> Self {
            let mut iter = readings.into_iter();
            let last = iter.next().unwrap_or(0);
            Self { readings: iter, last }
        }
    }

    impl MemoryProbe for ScriptedProbe {
        fn available_bytes(&mut self) -> u64 {
            if let Some(next) = self.readings.next() {
                self.last = next;
            }
            self.last
        }
    }

    #[tokio::test]
    async fn returns_immediately_when_memory_is_already_available() {
        let mut probe = ScriptedProbe::new(vec![MIN_AVAILABLE_BYTES * 2]);
        assert!(wait_for_available_memory(&mut probe).await);
    }

    #[tokio::test(start_paused = true)]
    async fn retries_until_memory_clears_the_threshold() {
        let mut probe = ScriptedProbe::new(vec![
            MIN_AVAILABLE_BYTES / 2,
            MIN_AVAILABLE_BYTES / 2,
            MIN_AVAILABLE_BYTES * 2,
        ]);
        assert!(wait_for_available_memory(&mut probe).await);
    }
}
