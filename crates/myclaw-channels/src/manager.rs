use std::collections::HashMap;
use std::sync::Arc;

use tokio::time::{sleep, Duration};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::{channel::Channel, error::ChannelError, types::ChannelStatus};

/// Minimum delay between start retries (seconds).
const BACKOFF_BASE_SECS: u64 = 5;
/// Maximum delay between start retries (seconds).
const BACKOFF_MAX_SECS: u64 = 300;
/// Maximum number of start attempts before giving up.
const MAX_ATTEMPTS: u32 = 10;
/// Jitter fraction applied to each delay (±10 %).
const JITTER_FRACTION: f64 = 0.10;

/// Owns the set of registered channel adapters and starts/stops them as a
/// group (§4.9 composition step 5).
pub struct ChannelManager {
    channels: HashMap<String, Arc<dyn Channel>>,
}

impl ChannelManager {
    pub fn new() -> Self {
        Self {
            channels: HashMap::new(),
        }
    }

    /// Register a channel adapter. A channel with the same name is replaced.
    pub fn register(&mut self, channel: Arc<dyn Channel>) {
        let name = channel.name().to_string();
        info!(channel = %name, "registering channel adapter");
        self.channels.insert(name, channel);
    }

    /// Start every registered channel concurrently. Returns the first error
    /// encountered, after exponential backoff with jitter has been
    /// exhausted for the failing channel (§4.9 `Run(ctx)`).
    pub async fn start_all(&self, ctx: CancellationToken) -> Result<(), ChannelError> {
        let mut tasks = Vec::with_capacity(self.channels.len());
        for (name, channel) in self.channels.iter() {
            let name = name.clone();
            let channel = channel.clone();
            let ctx = ctx.clone();
            tasks.push(tokio::spawn(async move {
                start_with_backoff(&name, channel.as_ref(), ctx).await
            }));
        }

        for task in tasks {
            match task.await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => return Err(e),
                Err(join_err) => {
                    return Err(ChannelError::StartFailed(format!(
                        "channel task panicked: {join_err}"
                    )))
                }
            }
        }
        Ok(())
    }

    /// Stop every registered channel. Errors are logged but do not abort
    /// stopping the remaining channels.
    pub async fn stop_all(&self) {
        for (name, channel) in self.channels.iter() {
            info!(channel = %name, "stopping channel");
            if let Err(e) = channel.stop().await {
                warn!(channel = %name, error = %e, "error while stopping channel");
            }
        }
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Channel>> {
        self.channels.get(name).cloned()
    }

    /// Current status of every registered channel, sorted by name.
    pub fn statuses(&self) -> Vec<(String, ChannelStatus)> {
        let mut result: Vec<(String, ChannelStatus)> = self
            .channels
            .iter()
            .map(|(name, ch)| (name.clone(), ch.status()))
            .collect();
        result.sort_by(|a, b| a.0.cmp(&b.0));
        result
    }
}

impl Default for ChannelManager {
    fn default() -> Self {
        Self::new()
    }
}

/// Attempt to start a single channel with exponential backoff and jitter.
/// Schedule: 5 s -> 10 s -> 20 s -> ... -> 300 s (cap), up to [`MAX_ATTEMPTS`].
async fn start_with_backoff(
    name: &str,
    channel: &dyn Channel,
    ctx: CancellationToken,
) -> Result<(), ChannelError> {
    let mut delay_secs = BACKOFF_BASE_SECS;

    for attempt in 1..=MAX_ATTEMPTS {
        match channel.start(ctx.clone()).await {
            Ok(()) => {
                info!(channel = %name, attempt, "channel started successfully");
                return Ok(());
            }
            Err(e) if attempt == MAX_ATTEMPTS => {
                error!(channel = %name, attempts = MAX_ATTEMPTS, error = %e, "channel failed to start after retries");
                return Err(e);
            }
            Err(e) => {
                let jitter = jitter_secs(delay_secs);
                let total = delay_secs + jitter;
                warn!(
                    channel = %name,
                    attempt,
                    max = MAX_ATTEMPTS,
                    error = %e,
                    retry_after_secs = total,
                    "channel start failed, retrying with backoff"
                );
                sleep(Duration::from_secs(total)).await;
                delay_secs = (delay_secs * 2).min(BACKOFF_MAX_SECS);
            }
        }
    }

    unreachable!("backoff loop exited without returning")
}

fn jitter_secs(base_secs: u64) -> u64 {
    let nanos = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.subsec_nanos())
        .unwrap_or(0);

    let max_jitter = ((base_secs as f64) * JITTER_FRACTION) as u64;
    if max_jitter == 0 {
        return 0;
    }
    (nanos as u64) % max_jitter
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use myclaw_core::OutboundMessage;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct MockChannel {
        name: String,
        fail_times: AtomicU32,
        started: AtomicU32,
        stopped: AtomicU32,
    }

    impl MockChannel {
        fn new(name: &str, fail_times: u32) -> Self {
            Self {
                name: name.to_string(),
                fail_times: AtomicU32::new(fail_times),
                started: AtomicU32::new(0),
                stopped: AtomicU32::new(0),
            }
        }
    }

    #[async_trait]
    impl Channel for MockChannel {
        fn name(&self) -> &str {
            &self.name
        }

        async fn start(&self, _ctx: CancellationToken) -> Result<(), ChannelError> {
            if self.fail_times.load(Ordering::SeqCst) > 0 {
                self.fail_times.fetch_sub(1, Ordering::SeqCst);
                return Err(ChannelError::StartFailed("mock failure".to_string()));
            }
            self.started.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn stop(&self) -> Result<(), ChannelError> {
            self.stopped.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn send(&self, _msg: &OutboundMessage) -> Result<(), ChannelError> {
            Ok(())
        }

        fn status(&self) -> ChannelStatus {
            if self.started.load(Ordering::SeqCst) > 0 {
                ChannelStatus::Running
            } else {
                ChannelStatus::Stopped
            }
        }
    }

    #[tokio::test]
    async fn register_replaces_same_name() {
        let mut mgr = ChannelManager::new();
        mgr.register(Arc::new(MockChannel::new("telegram", 0)));
        mgr.register(Arc::new(MockChannel::new("telegram", 0)));
        assert_eq!(mgr.channels.len(), 1);
    }

    #[tokio::test]
    async fn start_all_succeeds_when_every_channel_starts() {
        let mut mgr = ChannelManager::new();
        mgr.register(Arc::new(MockChannel::new("telegram", 0)));
        mgr.register(Arc::new(MockChannel::new("feishu", 0)));
        let ctx = CancellationToken::new();
        assert!(mgr.start_all(ctx).await.is_ok());
        let statuses = mgr.statuses();
        assert_eq!(statuses.len(), 2);
        assert!(statuses.iter().all(|(_, s)| *s == ChannelStatus::Running));
    }

    #[tokio::test]
    async fn statuses_are_sorted_by_name() {
        let mut mgr = ChannelManager::new();
        mgr.register(Arc::new(MockChannel::new("zzz", 0)));
        mgr.register(Arc::new(MockChannel::new("aaa", 0)));
        let names: Vec<String> = mgr.statuses().into_iter().map(|(n, _)| n).collect();
        assert_eq!(names, vec!["aaa".to_string(), "zzz".to_string()]);
    }

    #[tokio::test]
    async fn stop_all_invokes_stop_on_every_channel() {
        let mut mgr = ChannelManager::new();
        let chan = Arc::new(MockChannel::new("telegram", 0));
        mgr.register(chan.clone());
        mgr.stop_all().await;
        assert_eq!(chan.stopped.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn jitter_is_bounded_by_fraction_of_base() {
        for base in [5, 10, 20, 40, 80, 160, 300] {
            let j = jitter_secs(base);
            assert!(j <= ((base as f64) * JITTER_FRACTION) as u64);
        }
    }
}
