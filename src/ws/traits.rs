//! Seams between the connection manager and the code built on top of it.

use async_trait::async_trait;
use serde_json::Value;

/// Receives every well-formed frame that is not a reply to a pending request.
///
/// Called from the receive loop, one frame at a time and in transport order.
/// Implementations must not fail: anything that can go wrong is handled
/// (or logged) inside.
#[async_trait]
pub trait MessageHandler: Send + Sync + 'static {
    async fn on_message(&self, message: Value);
}

/// Transport lifecycle hooks.
///
/// ```ignore
/// struct Audit;
///
/// #[async_trait]
/// impl ConnectionHooks for Audit {
///     async fn before_reconnect(&self, attempt: u32) {
///         tracing::info!(attempt, "about to reconnect");
///     }
/// }
/// ```
#[async_trait]
pub trait ConnectionHooks: Send + Sync + 'static {
    /// Runs after the retry delay and right before the next connection attempt.
    async fn before_reconnect(&self, _attempt: u32) {}

    /// Runs once [`close`](crate::ws::ConnectionManager::close) has released the socket.
    fn after_close(&self) {}
}

/// Hooks that do nothing.
#[non_exhaustive]
#[derive(Debug, Clone, Copy, Default)]
pub struct NoHooks;

impl ConnectionHooks for NoHooks {}

/// Sends one request and waits for its correlated reply.
///
/// The request id is assigned by the sender; `request` must be a JSON object.
#[async_trait]
pub trait RequestSender: Send + Sync {
    async fn send_request(&self, request: Value) -> crate::Result<Value>;
}
