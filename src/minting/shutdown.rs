//! Cooperative cancellation for long-running searches

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Polled by kernel scans before every hash
pub trait Cancellation {
    fn is_cancelled(&self) -> bool;
}

/// Process-wide shutdown flag, cheap to clone into worker threads.
///
/// Searches poll it once per iteration and stop promptly once it is set.
#[derive(Debug, Clone, Default)]
pub struct ShutdownSignal(Arc<AtomicBool>);

impl ShutdownSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request shutdown
    pub fn trigger(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_triggered(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

impl Cancellation for ShutdownSignal {
    fn is_cancelled(&self) -> bool {
        self.is_triggered()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signal_is_shared_between_clones() {
        let signal = ShutdownSignal::new();
        let handle = signal.clone();

        assert!(!handle.is_triggered());
        assert!(!handle.is_cancelled());

        signal.trigger();
        assert!(handle.is_triggered());
        assert!(handle.is_cancelled());
    }
}
