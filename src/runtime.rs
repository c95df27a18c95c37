//! Task spawning abstraction for runtime independence.
//!
//! Ported near-verbatim from `thaumic-core`'s `runtime::TaskSpawner`: the
//! core spawns background work (connection tasks, the buffer sweeper)
//! through this trait rather than calling `tokio::spawn` directly, so a
//! host embedding this crate inside its own runtime wrapper can supply its
//! own spawner.

use std::future::Future;

/// Abstraction for spawning background tasks.
///
/// Implementations should ensure tasks run to completion independent of
/// the spawner's own lifetime; this trait provides no cancellation or join
/// handle; cooperative cancellation goes through the coordinator's own
/// `watch`-based cancellation channels instead.
pub trait TaskSpawner: Send + Sync {
    fn spawn(&self, future: std::pin::Pin<Box<dyn Future<Output = ()> + Send>>);
}

/// Tokio-based spawner; the default for standalone use.
#[derive(Clone)]
pub struct TokioSpawner {
    handle: tokio::runtime::Handle,
}

impl TokioSpawner {
    pub fn new(handle: tokio::runtime::Handle) -> Self {
        Self { handle }
    }

    /// # Panics
    /// Panics if called outside of a Tokio runtime context.
    pub fn current() -> Self {
        Self {
            handle: tokio::runtime::Handle::current(),
        }
    }
}

impl TaskSpawner for TokioSpawner {
    fn spawn(&self, future: std::pin::Pin<Box<dyn Future<Output = ()> + Send>>) {
        self.handle.spawn(future);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn tokio_spawner_executes_task() {
        let spawner = TokioSpawner::current();
        let executed = Arc::new(AtomicBool::new(false));
        let executed_clone = executed.clone();

        spawner.spawn(Box::pin(async move {
            executed_clone.store(true, Ordering::SeqCst);
        }));

        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        assert!(executed.load(Ordering::SeqCst));
    }
}
