use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use myclaw_core::OutboundMessage;

use crate::{error::ChannelError, types::ChannelStatus};

/// Common interface implemented by every channel adapter (Telegram, Feishu,
/// WeCom, WhatsApp, WebUI — §3 Channel, §4.2).
///
/// Implementations must be `Send + Sync` so they can be stored in a
/// [`ChannelManager`](crate::manager::ChannelManager) and driven from
/// multiple Tokio tasks. Common state — name, bus handle, allowlist — is
/// held by composition inside each implementing struct, not inherited.
#[async_trait]
pub trait Channel: Send + Sync {
    /// Stable lowercase identifier for this channel (e.g. `"telegram"`).
    fn name(&self) -> &str;

    /// Initialize the transport and spawn any long-running loops, then
    /// return quickly. A channel MUST NOT accept [`Channel::send`] before
    /// `start` completes. `ctx` is cancelled on shutdown; long-running loops
    /// must observe it.
    async fn start(&self, ctx: CancellationToken) -> Result<(), ChannelError>;

    /// Idempotent; safe to call before `start`.
    async fn stop(&self) -> Result<(), ChannelError>;

    /// Deliver a single outbound message. Intentionally `&self` so a running
    /// adapter can send concurrently without a mutable borrow.
    async fn send(&self, msg: &OutboundMessage) -> Result<(), ChannelError>;

    /// Current runtime status, queried without blocking.
    fn status(&self) -> ChannelStatus;
}
