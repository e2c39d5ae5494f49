// Per-task rate limiting for manual triggers.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tracing::debug;

/// One token per refill interval. A task can always burst one trigger, then
/// must wait out the interval.
const BUCKET_CAPACITY: u32 = 1;

struct TokenBucket {
    tokens: u32,
    last_refill: Instant,
}

/// Token-bucket limiter for manual task triggers, one bucket per task,
/// created lazily on first use. Buckets are independent across tasks.
pub struct TriggerLimiter {
    buckets: Mutex<HashMap<i64, TokenBucket>>,
    refill_interval: Duration,
}

impl TriggerLimiter {
    pub fn new(refill_interval: Duration) -> Self {
        Self {
            buckets: Mutex::new(HashMap::new()),
            refill_interval,
        }
    }

    /// Take a token for this task. Returns false when the task was triggered
    /// within the current refill interval.
    pub fn try_acquire(&self, task_id: i64) -> bool {
        let mut buckets = self.buckets.lock().unwrap_or_else(|e| e.into_inner());
        let now = Instant::now();
        let bucket = buckets.entry(task_id).or_insert(TokenBucket {
            tokens: BUCKET_CAPACITY,
            last_refill: now,
        });

        if now.duration_since(bucket.last_refill) >= self.refill_interval {
            bucket.tokens = BUCKET_CAPACITY;
            bucket.last_refill = now;
        }

        if bucket.tokens == 0 {
            tracing::warn!(task_id, "Manual trigger rate limit exceeded");
            return false;
        }
        bucket.tokens -= 1;
        debug!(task_id, "Manual trigger allowed");
        true
    }

    /// Drop a task's bucket, e.g. when the task itself is deleted. The map
    /// would otherwise grow without bound over task churn.
    pub fn remove(&self, task_id: i64) {
        self.buckets
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&task_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_trigger_allowed_second_denied() {
        let limiter = TriggerLimiter::new(Duration::from_secs(10));
        assert!(limiter.try_acquire(1));
        assert!(!limiter.try_acquire(1));
    }

    #[test]
    fn test_tasks_are_limited_independently() {
        let limiter = TriggerLimiter::new(Duration::from_secs(10));
        assert!(limiter.try_acquire(1));
        assert!(limiter.try_acquire(2));
        assert!(!limiter.try_acquire(1));
        assert!(!limiter.try_acquire(2));
    }

    #[test]
    fn test_removed_task_starts_with_a_fresh_bucket() {
        let limiter = TriggerLimiter::new(Duration::from_secs(10));
        assert!(limiter.try_acquire(1));
        assert!(!limiter.try_acquire(1));
        limiter.remove(1);
        assert!(limiter.try_acquire(1));
        // Removing an unknown task is a no-op.
        limiter.remove(99);
    }

    #[test]
    fn test_bucket_refills_after_interval() {
        let limiter = TriggerLimiter::new(Duration::from_millis(50));
        assert!(limiter.try_acquire(7));
        assert!(!limiter.try_acquire(7));
        std::thread::sleep(Duration::from_millis(80));
        assert!(limiter.try_acquire(7));
        assert!(!limiter.try_acquire(7));
    }
}
