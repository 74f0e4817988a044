//! Periodic credential reload

use parking_lot::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::client::KubeletClient;
use super::trust::TrustConfig;
use crate::clock::Clock;

/// Shared slot holding the active kubelet client.
///
/// Readers clone the inner `Arc` and keep using that snapshot for the whole
/// request; a swap never affects a request already in flight.
#[derive(Debug)]
pub struct ClientHandle {
    current: RwLock<Arc<KubeletClient>>,
    generation: AtomicU64,
}

impl ClientHandle {
    pub fn new(client: KubeletClient) -> Self {
        Self {
            current: RwLock::new(Arc::new(client)),
            generation: AtomicU64::new(0),
        }
    }

    pub fn current(&self) -> Arc<KubeletClient> {
        self.current.read().clone()
    }

    pub fn swap(&self, client: KubeletClient) {
        *self.current.write() = Arc::new(client);
        self.generation.fetch_add(1, Ordering::SeqCst);
    }

    /// Number of successful swaps so far
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }
}

/// Rebuilds the client from disk every `interval` until `cancel` fires.
pub fn spawn_reload(
    runtime: &Handle,
    trust: TrustConfig,
    handle: Arc<ClientHandle>,
    clock: Arc<dyn Clock>,
    interval: Duration,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    runtime.spawn(async move {
        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = clock.sleep(interval) => {}
            }

            match trust.build_client() {
                Ok(client) => {
                    handle.swap(client);
                    debug!(
                        generation = handle.generation(),
                        "Reloaded kubelet credentials"
                    );
                }
                Err(e) => warn!(
                    error = %e,
                    "Unable to reload kubelet credentials, keeping the previous client"
                ),
            }
        }
        debug!("Kubelet credential reload stopped");
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use podwarden_config::ConfigBuilder;
    use tempfile::TempDir;

    fn token_trust(dir: &TempDir) -> TrustConfig {
        let config = ConfigBuilder::new()
            .with_skip_kubelet_verification(true)
            .with_token_path(dir.path().join("token"))
            .build();
        TrustConfig::from_config(&config.kubelet, &|_: &str| None).unwrap()
    }

    async fn wait_for_generation(handle: &ClientHandle, generation: u64) {
        while handle.generation() < generation {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test]
    async fn test_reload_swaps_token() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("token"), "first-token\n").unwrap();
        let trust = token_trust(&dir);
        let handle = Arc::new(ClientHandle::new(trust.build_client().unwrap()));
        assert_eq!(handle.current().token(), Some("first-token"));

        let clock = Arc::new(ManualClock::new());
        let cancel = CancellationToken::new();
        let task = spawn_reload(
            &Handle::current(),
            trust,
            handle.clone(),
            clock.clone(),
            Duration::from_secs(60),
            cancel.clone(),
        );

        std::fs::write(dir.path().join("token"), "second-token").unwrap();
        clock.wait_for_sleepers(1).await;
        clock.advance(Duration::from_secs(60));
        wait_for_generation(&handle, 1).await;
        assert_eq!(handle.current().token(), Some("second-token"));

        cancel.cancel();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn test_failed_reload_keeps_previous_client() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("token"), "first-token").unwrap();
        let trust = token_trust(&dir);
        let handle = Arc::new(ClientHandle::new(trust.build_client().unwrap()));

        let clock = Arc::new(ManualClock::new());
        let cancel = CancellationToken::new();
        let task = spawn_reload(
            &Handle::current(),
            trust,
            handle.clone(),
            clock.clone(),
            Duration::from_secs(60),
            cancel.clone(),
        );

        std::fs::remove_file(dir.path().join("token")).unwrap();
        clock.wait_for_sleepers(1).await;
        clock.advance(Duration::from_secs(60));
        // the loop parks again once the failed attempt is done
        clock.wait_for_sleepers(1).await;

        assert_eq!(handle.generation(), 0);
        assert_eq!(handle.current().token(), Some("first-token"));

        cancel.cancel();
        task.await.unwrap();
    }
}
