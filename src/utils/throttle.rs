//! Log throttling for the forwarding loop
//!
//! A device that disappears mid-session makes every capture read fail. The
//! throttler lets the loop keep reporting the condition without writing a
//! line per frame.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy)]
struct KeyState {
    last_logged: Instant,
    suppressed: u64,
}

/// Limits how often a message with the same key is emitted
///
/// Messages that fall inside the window are counted, and the count is handed
/// back with the next message that gets through.
pub struct LogThrottler {
    keys: Mutex<HashMap<String, KeyState>>,
    interval: Duration,
}

impl LogThrottler {
    pub fn new(interval: Duration) -> Self {
        Self {
            keys: Mutex::new(HashMap::new()),
            interval,
        }
    }

    pub fn with_secs(secs: u64) -> Self {
        Self::new(Duration::from_secs(secs))
    }

    /// Returns `Some(suppressed)` when the message should be emitted, where
    /// `suppressed` is the number of messages swallowed since the last one.
    /// Returns `None` while the key is inside its window.
    pub fn check(&self, key: &str) -> Option<u64> {
        let now = Instant::now();
        let mut keys = self.keys.lock();

        match keys.get_mut(key) {
            Some(state) if now.duration_since(state.last_logged) < self.interval => {
                state.suppressed += 1;
                None
            }
            Some(state) => {
                let suppressed = state.suppressed;
                state.last_logged = now;
                state.suppressed = 0;
                Some(suppressed)
            }
            None => {
                keys.insert(
                    key.to_string(),
                    KeyState {
                        last_logged: now,
                        suppressed: 0,
                    },
                );
                Some(0)
            }
        }
    }

    /// Whether the message should be emitted now
    pub fn should_log(&self, key: &str) -> bool {
        self.check(key).is_some()
    }

    /// Forget a key, so the next occurrence is emitted immediately
    pub fn clear(&self, key: &str) {
        self.keys.lock().remove(key);
    }
}

impl Default for LogThrottler {
    /// 5 second window
    fn default() -> Self {
        Self::with_secs(5)
    }
}

/// Throttled `tracing::warn!`, appending how many messages were swallowed
#[macro_export]
macro_rules! warn_throttled {
    ($throttler:expr, $key:expr, $($arg:tt)*) => {
        if let Some(suppressed) = $throttler.check($key) {
            if suppressed > 0 {
                tracing::warn!(suppressed, $($arg)*);
            } else {
                tracing::warn!($($arg)*);
            }
        }
    };
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_first_message_passes() {
        let throttler = LogThrottler::with_secs(1);
        assert_eq!(throttler.check("capture_read"), Some(0));
    }

    #[test]
    fn test_window_suppresses_and_counts() {
        let throttler = LogThrottler::new(Duration::from_millis(100));

        assert!(throttler.should_log("capture_read"));
        assert_eq!(throttler.check("capture_read"), None);
        assert_eq!(throttler.check("capture_read"), None);

        thread::sleep(Duration::from_millis(150));

        assert_eq!(throttler.check("capture_read"), Some(2));
        assert_eq!(throttler.check("capture_read"), None);
    }

    #[test]
    fn test_keys_are_independent() {
        let throttler = LogThrottler::with_secs(10);

        assert!(throttler.should_log("capture_read"));
        assert!(throttler.should_log("playback_write"));
        assert!(!throttler.should_log("capture_read"));
        assert!(!throttler.should_log("playback_write"));
    }

    #[test]
    fn test_clear() {
        let throttler = LogThrottler::with_secs(10);

        assert!(throttler.should_log("capture_read"));
        assert!(!throttler.should_log("capture_read"));

        assert!(throttler.should_log("playback_write"));

        throttler.clear("capture_read");
        assert!(throttler.should_log("capture_read"));
        assert!(!throttler.should_log("playback_write"));
    }

    #[test]
    fn test_macro_compiles_with_format_args() {
        let throttler = LogThrottler::default();
        warn_throttled!(throttler, "test", "read failed: {}", "EIO");
        warn_throttled!(throttler, "test", "read failed: {}", "EIO");
        assert!(!throttler.should_log("test"));
    }
}
