use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Cooperative stop flag for background threads owned by a scenario run.
///
/// Cloning shares the flag; any clone can request shutdown and every clone
/// observes it.
#[derive(Debug, Clone, Default)]
pub struct ShutdownFlag {
    stopped: Arc<AtomicBool>,
}

impl ShutdownFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shutdown(&self) {
        self.stopped.store(true, Ordering::SeqCst);
    }

    /// Point in time check; once true it stays true.
    pub fn should_shutdown(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shutdown_is_observed_by_all_clones() {
        let flag = ShutdownFlag::new();
        let listener = flag.clone();
        assert!(!listener.should_shutdown());

        flag.shutdown();
        assert!(listener.should_shutdown());
    }
}
