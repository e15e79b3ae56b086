use std::time::Duration;

use super::password::random_token;
use crate::cache::TimeCache;

const CODE_LENGTH: usize = 32;

/// Single-use confirmation codes (password resets, e-mail confirmation)
/// that lapse after a fixed lifetime.
pub struct CodeCache {
    codes: TimeCache<String>,
    lifetime: Duration,
}

impl CodeCache {
    #[must_use]
    pub fn new(lifetime: Duration) -> Self {
        Self {
            codes: TimeCache::new(),
            lifetime,
        }
    }

    fn key(purpose: &str, code: &str) -> String {
        format!("{purpose}:{code}")
    }

    /// Issues a fresh code bound to `subject` for `purpose`.
    pub fn issue(&self, purpose: &str, subject: &str) -> String {
        let code = random_token(CODE_LENGTH);
        self.codes
            .register(&Self::key(purpose, &code), subject.to_string(), self.lifetime);
        code
    }

    /// Returns the subject the code was issued for and invalidates the code.
    pub fn consume(&self, purpose: &str, code: &str) -> Option<String> {
        self.codes.take(&Self::key(purpose, code))
    }

    /// True when `code` was issued to `subject` for `purpose`; the code is
    /// spent either way once it has matched.
    pub fn verify_and_consume(&self, purpose: &str, subject: &str, code: &str) -> bool {
        self.consume(purpose, code).is_some_and(|s| s == subject)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Barrier};
    use std::thread;

    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_code_is_single_use() {
        let codes = CodeCache::new(Duration::from_secs(600));
        let code = codes.issue("reset", "alice");

        assert!(!codes.verify_and_consume("confirm", "alice", &code));
        assert!(codes.verify_and_consume("reset", "alice", &code));
        assert!(!codes.verify_and_consume("reset", "alice", &code));
    }

    #[tokio::test(start_paused = true)]
    async fn test_code_expires() {
        let codes = CodeCache::new(Duration::from_secs(600));
        let code = codes.issue("reset", "alice");

        tokio::time::advance(Duration::from_secs(601)).await;
        assert_eq!(codes.consume("reset", &code), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_wrong_subject_spends_code() {
        let codes = CodeCache::new(Duration::from_secs(600));
        let code = codes.issue("reset", "alice");

        assert!(!codes.verify_and_consume("reset", "mallory", &code));
        assert!(!codes.verify_and_consume("reset", "alice", &code));
    }

    #[test]
    fn test_concurrent_consumers_succeed_at_most_once() {
        let codes = Arc::new(CodeCache::new(Duration::from_secs(600)));

        for _ in 0..200 {
            let code = codes.issue("reset", "alice");
            let barrier = Arc::new(Barrier::new(2));
            let successes = Arc::new(AtomicUsize::new(0));

            let consumers: Vec<_> = (0..2)
                .map(|_| {
                    let codes = Arc::clone(&codes);
                    let barrier = Arc::clone(&barrier);
                    let successes = Arc::clone(&successes);
                    let code = code.clone();
                    thread::spawn(move || {
                        barrier.wait();
                        if codes.verify_and_consume("reset", "alice", &code) {
                            successes.fetch_add(1, Ordering::SeqCst);
                        }
                    })
                })
                .collect();
            for consumer in consumers {
                consumer.join().unwrap();
            }

            assert_eq!(successes.load(Ordering::SeqCst), 1);
        }
    }
}
