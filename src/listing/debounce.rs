use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::debug;

/// Quiet period before a keyword is considered settled
pub const SEARCH_DEBOUNCE: Duration = Duration::from_millis(250);

/// Keyword debouncer.
///
/// Every `push` restarts the timer, so at most one emission is pending at a
/// time. Settled keywords arrive trimmed on the receiver returned by `spawn`.
pub struct Debouncer {
    input: watch::Sender<Option<String>>,
    task: JoinHandle<()>,
}

impl Debouncer {
    /// Spawn the timer task; settled values are delivered on the returned receiver.
    pub fn spawn(delay: Duration) -> (Self, mpsc::UnboundedReceiver<String>) {
        let (input, mut changes) = watch::channel::<Option<String>>(None);
        let (output, settled) = mpsc::unbounded_channel();

        let task = tokio::spawn(async move {
            // Wait for the first keystroke, then restart the timer on each new one.
            while changes.changed().await.is_ok() {
                loop {
                    tokio::select! {
                        changed = changes.changed() => {
                            if changed.is_err() {
                                return;
                            }
                        }
                        _ = sleep(delay) => {
                            let value = changes.borrow_and_update().clone().unwrap_or_default();
                            debug!("Keyword settled: {:?}", value.trim());
                            if output.send(value.trim().to_string()).is_err() {
                                return;
                            }
                            break;
                        }
                    }
                }
            }
        });

        (Self { input, task }, settled)
    }

    /// Record a keystroke
    pub fn push(&self, keyword: &str) {
        self.input.send_replace(Some(keyword.to_string()));
    }
}

impl Drop for Debouncer {
    fn drop(&mut self) {
        self.task.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::advance;

    /// Let the timer task observe the latest state.
    async fn settle() {
        for _ in 0..5 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test(start_paused = true)]
    async fn emits_only_after_quiet_period() {
        let (debouncer, mut settled) = Debouncer::spawn(SEARCH_DEBOUNCE);

        debouncer.push("C");
        settle().await;
        advance(Duration::from_millis(100)).await;
        debouncer.push("Cầu");
        settle().await;
        advance(Duration::from_millis(200)).await;
        debouncer.push("Cầu Giấy ");
        settle().await;
        advance(Duration::from_millis(249)).await;
        settle().await;
        assert!(settled.try_recv().is_err());

        advance(Duration::from_millis(2)).await;
        settle().await;
        assert_eq!(settled.try_recv().unwrap(), "Cầu Giấy");
        assert!(settled.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn separate_bursts_emit_separately() {
        let (debouncer, mut settled) = Debouncer::spawn(SEARCH_DEBOUNCE);

        debouncer.push("a");
        settle().await;
        advance(Duration::from_millis(300)).await;
        settle().await;
        debouncer.push("ab");
        settle().await;
        advance(Duration::from_millis(300)).await;
        settle().await;

        assert_eq!(settled.try_recv().unwrap(), "a");
        assert_eq!(settled.try_recv().unwrap(), "ab");
    }
}
