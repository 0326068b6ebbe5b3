use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

/// Gets the current time as the number of milliseconds since January 1st, 1970 (UTC).
pub fn current_time_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis() as u64)
        .unwrap_or(0)
}

/// `SnapshotTagger` hands out snapshot tags based on the wall clock.
///
/// A tag is the time in milliseconds. Two requests within the same millisecond,
/// or a clock going backwards, would produce the same name twice, so a tag is
/// always at least one more than the previous one.
pub struct SnapshotTagger {
    clock: Box<dyn Fn() -> u64 + Send + Sync>,
    last: AtomicU64,
}

impl Default for SnapshotTagger {
    fn default() -> Self {
        SnapshotTagger::new(current_time_ms)
    }
}

impl SnapshotTagger {
    pub fn new(clock: impl Fn() -> u64 + Send + Sync + 'static) -> Self {
        SnapshotTagger {
            clock: Box::new(clock),
            last: AtomicU64::new(0),
        }
    }

    /// Get the next tag.
    pub fn next_tag(&self) -> String {
        let now = (self.clock)();
        let previous = self
            .last
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |last| {
                Some(now.max(last.saturating_add(1)))
            })
            .unwrap_or(now);

        now.max(previous.saturating_add(1)).to_string()
    }
}
