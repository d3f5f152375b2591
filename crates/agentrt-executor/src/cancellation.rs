//! Cancellable execution context: three cancellation sources OR'd
//! together — request context, a 500ms poll of an interrupt controller,
//! and explicit executor close.

use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

const INTERRUPT_POLL_PERIOD: Duration = Duration::from_millis(500);

/// Polled on the 500ms tick. A single boolean query — callers implement
/// whichever backing store (shared atomic, channel, external service)
/// they need.
pub trait InterruptController: Send + Sync {
    fn is_interrupted(&self) -> bool;
}

/// An `InterruptController` that is never interrupted; used when no
/// interrupt source is wired up (e.g. non-interactive executions).
pub struct NeverInterrupted;

impl InterruptController for NeverInterrupted {
    fn is_interrupted(&self) -> bool {
        false
    }
}

/// Owns the merged cancellation token for one request and the background
/// task that polls the interrupt controller into it. Dropping this (or
/// calling [`ExecutionCancellation::close`]) stops the poll task.
pub struct ExecutionCancellation {
    token: CancellationToken,
    poll_handle: tokio::task::JoinHandle<()>,
}

impl ExecutionCancellation {
    /// `request_token` is the caller's own cancellation source (HTTP
    /// context done, or an explicit close call). This constructor spawns
    /// a task that polls `interrupt` every 500ms and cancels the merged
    /// token the first time it reports interrupted.
    pub fn new(request_token: CancellationToken, interrupt: Arc<dyn InterruptController>) -> Self {
        let merged = CancellationToken::new();
        let poll_merged = merged.clone();
        let poll_request = request_token.clone();

        let poll_handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(INTERRUPT_POLL_PERIOD);
            loop {
                tokio::select! {
                    _ = poll_request.cancelled() => {
                        poll_merged.cancel();
                        break;
                    }
                    _ = poll_merged.cancelled() => {
                        break;
                    }
                    _ = ticker.tick() => {
                        if interrupt.is_interrupted() {
                            poll_merged.cancel();
                            break;
                        }
                    }
                }
            }
        });

        Self { token: merged, poll_handle }
    }

    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Explicit executor close.
    pub fn close(&self) {
        self.token.cancel();
    }
}

impl Drop for ExecutionCancellation {
    fn drop(&mut self) {
        self.poll_handle.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};

    struct FlagController(Arc<AtomicBool>);

    impl InterruptController for FlagController {
        fn is_interrupted(&self) -> bool {
            self.0.load(Ordering::SeqCst)
        }
    }

    #[tokio::test]
    async fn request_cancellation_propagates_to_merged_token() {
        let request = CancellationToken::new();
        let cancellation = ExecutionCancellation::new(request.clone(), Arc::new(NeverInterrupted));
        assert!(!cancellation.is_cancelled());
        request.cancel();
        cancellation.token().cancelled().await;
        assert!(cancellation.is_cancelled());
    }

    #[tokio::test]
    async fn explicit_close_cancels_the_merged_token() {
        let cancellation = ExecutionCancellation::new(CancellationToken::new(), Arc::new(NeverInterrupted));
        cancellation.close();
        assert!(cancellation.is_cancelled());
    }

    #[tokio::test(start_paused = true)]
    async fn interrupt_controller_is_polled_and_cancels_merged_token() {
        let flag = Arc::new(AtomicBool::new(false));
        let cancellation = ExecutionCancellation::new(CancellationToken::new(), Arc::new(FlagController(flag.clone())));
        assert!(!cancellation.is_cancelled());

        flag.store(true, Ordering::SeqCst);
        tokio::time::advance(Duration::from_millis(600)).await;
        cancellation.token().cancelled().await;
        assert!(cancellation.is_cancelled());
    }
}
