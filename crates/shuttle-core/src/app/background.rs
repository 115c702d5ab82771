use std::future::Future;

use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Background loop group handle.
/// - 各ループは `watch::Receiver<bool>` を受け取り、`true` を見たら抜ける
/// - `shutdown_and_join()` で全ループの終了を待てる
pub struct BackgroundLoops {
    shutdown_tx: watch::Sender<bool>,
    joins: Vec<JoinHandle<()>>,
}

impl BackgroundLoops {
    pub fn new() -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            shutdown_tx,
            joins: Vec::new(),
        }
    }

    /// Spawn one loop with its own shutdown receiver.
    pub fn spawn<F, Fut>(&mut self, make: F)
    where
        F: FnOnce(watch::Receiver<bool>) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let rx = self.shutdown_tx.subscribe();
        self.joins.push(tokio::spawn(make(rx)));
    }

    pub fn len(&self) -> usize {
        self.joins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.joins.is_empty()
    }

    /// Ask every loop to stop. In-flight cycles finish first.
    pub fn request_shutdown(&self) {
        // receivers may already be dropped
        let _ = self.shutdown_tx.send(true);
    }

    pub async fn shutdown_and_join(self) {
        self.request_shutdown();
        for j in self.joins {
            let _ = j.await;
        }
    }
}

impl Default for BackgroundLoops {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn shutdown_reaches_every_loop() {
        let stopped = Arc::new(AtomicUsize::new(0));
        let mut loops = BackgroundLoops::new();
        for _ in 0..3 {
            let stopped = stopped.clone();
            loops.spawn(move |mut rx| async move {
                while !*rx.borrow() {
                    if rx.changed().await.is_err() {
                        break;
                    }
                }
                stopped.fetch_add(1, Ordering::SeqCst);
            });
        }
        assert_eq!(loops.len(), 3);

        tokio::time::timeout(Duration::from_secs(1), loops.shutdown_and_join())
            .await
            .unwrap();
        assert_eq!(stopped.load(Ordering::SeqCst), 3);
    }
}
