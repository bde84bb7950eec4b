use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::mpsc;
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::{debug, warn};

use super::{Category, Classifier, ClassifyRequest};

const MAX_CONSECUTIVE_TIMEOUTS: usize = 3;

/// Bounds every call to a slow hint source.
///
/// Each request runs on a helper thread; a call that does not answer within
/// the timeout abstains. After three timeouts in a row the inner classifier
/// is disabled for the rest of the run. A thread left behind by a timeout
/// finishes on its own and its answer is discarded.
pub struct TimedClassifier {
    inner: Arc<dyn Classifier>,
    timeout: Duration,
    consecutive_timeouts: AtomicUsize,
    disabled: AtomicBool,
}

impl TimedClassifier {
    pub fn new(inner: Arc<dyn Classifier>, timeout: Duration) -> Self {
        Self {
            inner,
            timeout,
            consecutive_timeouts: AtomicUsize::new(0),
            disabled: AtomicBool::new(false),
        }
    }

    pub fn is_disabled(&self) -> bool {
        self.disabled.load(Ordering::Relaxed)
    }
}

impl Classifier for TimedClassifier {
    fn classify(&self, request: &ClassifyRequest) -> Option<Category> {
        if self.is_disabled() {
            return None;
        }

        let (tx, rx) = mpsc::channel();
        let inner = Arc::clone(&self.inner);
        let owned = request.clone();
        let spawned = thread::Builder::new()
            .name("librarian-classify".into())
            .spawn(move || {
                let _ = tx.send(inner.classify(&owned));
            });
        if let Err(e) = spawned {
            warn!("Cannot start classifier thread: {}", e);
            return None;
        }

        match rx.recv_timeout(self.timeout) {
            Ok(answer) => {
                self.consecutive_timeouts.store(0, Ordering::Relaxed);
                answer
            }
            Err(mpsc::RecvTimeoutError::Timeout) => {
                let n = self.consecutive_timeouts.fetch_add(1, Ordering::Relaxed) + 1;
                debug!(
                    "Classifier timed out on {} ({} in a row)",
                    request.path.display(),
                    n
                );
                if n >= MAX_CONSECUTIVE_TIMEOUTS && !self.disabled.swap(true, Ordering::Relaxed) {
                    warn!(
                        "Classifier timed out {} times in a row; disabled for this run",
                        n
                    );
                }
                None
            }
            Err(mpsc::RecvTimeoutError::Disconnected) => {
                warn!("Classifier failed on {}", request.path.display());
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    struct Slow(Duration);

    impl Classifier for Slow {
        fn classify(&self, _request: &ClassifyRequest) -> Option<Category> {
            thread::sleep(self.0);
            Category::from_segments(&["Slow"])
        }
    }

    #[test]
    fn test_fast_answer_passes_through() {
        let timed = TimedClassifier::new(
            Arc::new(Slow(Duration::from_millis(0))),
            Duration::from_secs(5),
        );
        let request = ClassifyRequest::new(Path::new("/a/b.pdf"));
        assert_eq!(timed.classify(&request).unwrap().as_str(), "Slow");
        assert!(!timed.is_disabled());
    }

    #[test]
    fn test_disabled_after_three_timeouts() {
        let timed = TimedClassifier::new(
            Arc::new(Slow(Duration::from_millis(500))),
            Duration::from_millis(10),
        );
        let request = ClassifyRequest::new(Path::new("/a/b.pdf"));
        for _ in 0..MAX_CONSECUTIVE_TIMEOUTS {
            assert!(timed.classify(&request).is_none());
        }
        assert!(timed.is_disabled());
        assert!(timed.classify(&request).is_none());
    }
}
