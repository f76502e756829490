//! Outbound event queue and the producer loop that drains it.
//!
//! Any number of call sites enqueue [`OutboundEvent`]s; exactly one
//! [`run_producer`] loop dequeues them and writes them to the socket in
//! enqueue order. A [`OutboundEvent::Close`] is the last event the loop
//! handles: it asks the socket to shut down, polls until the socket reports
//! closed, and returns.

// Rust guideline compliant 2026-02

use std::time::Duration;

use tokio::sync::mpsc;

use crate::error::ClientError;
use crate::protocol::OutboundInvocation;
use crate::transport::FrameWriter;

/// Event consumed by the producer loop.
#[derive(Debug, Clone, PartialEq)]
pub enum OutboundEvent {
    /// Write an invocation envelope.
    Invoke(OutboundInvocation),
    /// Shut the socket down and stop the loop.
    Close,
}

/// Sending side of the queue. Cheap to clone.
pub type QueueSender = mpsc::UnboundedSender<OutboundEvent>;

/// Receiving side of the queue, owned by the producer loop.
pub type QueueReceiver = mpsc::UnboundedReceiver<OutboundEvent>;

/// Create an empty queue.
#[must_use]
pub fn channel() -> (QueueSender, QueueReceiver) {
    mpsc::unbounded_channel()
}

/// How the producer loop waits for the socket to finish closing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClosePolicy {
    /// Delay between `is_open` checks.
    pub poll_interval: Duration,
    /// Give up waiting after this long.
    pub timeout: Duration,
}

impl Default for ClosePolicy {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(100),
            timeout: Duration::from_secs(5),
        }
    }
}

/// Drain `queue` onto `writer` until a close completes.
///
/// Returns `Ok(())` once the socket reports closed after a
/// [`OutboundEvent::Close`].
///
/// # Errors
///
/// - [`ClientError::Encode`] if an invocation cannot be serialized
/// - [`ClientError::Transport`] if a write or the close request fails
/// - [`ClientError::QueueDisconnected`] if every sender is gone before a close
pub async fn run_producer(
    queue: &mut QueueReceiver,
    writer: &mut dyn FrameWriter,
    policy: ClosePolicy,
) -> Result<(), ClientError> {
    loop {
        let Some(event) = queue.recv().await else {
            return Err(ClientError::QueueDisconnected);
        };

        match event {
            OutboundEvent::Invoke(invocation) => {
                let frame = invocation.to_frame().map_err(ClientError::Encode)?;
                writer.send(&frame).await.map_err(ClientError::Transport)?;
                log::trace!(
                    "[Producer] Sent invocation {} ({})",
                    invocation.id,
                    invocation.method
                );
            }
            OutboundEvent::Close => {
                log::info!("[Producer] Close signal received");
                writer.close().await.map_err(ClientError::Transport)?;
                wait_until_closed(writer, policy).await;
                return Ok(());
            }
        }
    }
}

/// Poll `writer.is_open()` until it reports closed or the policy times out.
async fn wait_until_closed(writer: &mut dyn FrameWriter, policy: ClosePolicy) {
    let deadline = tokio::time::Instant::now() + policy.timeout;
    while writer.is_open() {
        if tokio::time::Instant::now() >= deadline {
            log::warn!(
                "[Producer] Socket still open {}ms after close, giving up",
                policy.timeout.as_millis()
            );
            return;
        }
        tokio::time::sleep(policy.poll_interval).await;
    }
    log::info!("[Producer] Socket closed");
}
