use super::model::ChangeEvent;

/// Receives committed mutations from the entry store.
///
/// Implementations must not block: the store calls `notify` on the request path
/// right after the write commits.
pub trait ChangeNotifier: Send + Sync {
    /// Returns `false` if the event could not be delivered (channel full or closed).
    fn notify(&self, event: ChangeEvent) -> bool;
}

#[cfg(any(test, feature = "mock"))]
pub use mock::RecordingNotifier;

#[cfg(any(test, feature = "mock"))]
mod mock {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};

    use parking_lot::Mutex;

    use super::ChangeNotifier;
    use crate::store::model::ChangeEvent;

    /// Notifier that records events in memory.
    #[derive(Debug, Clone)]
    pub struct RecordingNotifier {
        events: Arc<Mutex<Vec<ChangeEvent>>>,
        accept: Arc<AtomicBool>,
    }

    impl Default for RecordingNotifier {
        fn default() -> Self {
            Self::new()
        }
    }

    impl RecordingNotifier {
        pub fn new() -> Self {
            Self {
                events: Arc::new(Mutex::new(Vec::new())),
                accept: Arc::new(AtomicBool::new(true)),
            }
        }

        /// Makes every subsequent `notify` report a dropped event.
        pub fn reject_all(&self) {
            self.accept.store(false, Ordering::Release);
        }

        pub fn events(&self) -> Vec<ChangeEvent> {
            self.events.lock().clone()
        }
    }

    impl ChangeNotifier for RecordingNotifier {
        fn notify(&self, event: ChangeEvent) -> bool {
            if !self.accept.load(Ordering::Acquire) {
                return false;
            }
            self.events.lock().push(event);
            true
        }
    }
}
