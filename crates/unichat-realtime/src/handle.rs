//! Connection handles
//!
//! A [`ConnectionHandle`] owns exactly one [`Transport`] and serialises every
//! operation on it. Sends, liveness probes and disposal all go through the
//! same transport lock, so a heartbeat can never interleave with a
//! notification on the wire.
//!
//! # Lifecycle
//!
//! ```text
//! open() ──greeting ok──> Open ──dispose(reason)──> Closed
//!    └──greeting failed──> error, transport released
//! ```
//!
//! Disposal is idempotent: the first caller wins and every later call is a
//! no-op that returns `false`. Whoever holds the handle's [`Arc`] can wait
//! for closure with [`ConnectionHandle::wait_until_closed`], which is how the
//! HTTP layer keeps an upgraded request alive for exactly as long as the
//! subscription lasts.
//!
//! # Busy transports
//!
//! A send that hangs holds the transport lock. Disposal waits at most
//! `close_timeout` for it; after that it gives up on the close frame but still
//! marks the handle closed and wakes every waiter. Later acquisitions observe
//! the closed flag and back off without touching the transport.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::{Mutex, MutexGuard, watch};
use tokio::time;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{RealtimeError, RealtimeResult};
use crate::ids::SlotKey;
use crate::transport::{Inbound, Transport, TransportError, TransportResult};

/// Why a handle was closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum CloseReason {
    /// A newer connection registered under the same key
    Superseded,
    /// The liveness probe found the peer unresponsive
    Dead,
    /// Explicitly removed, for example on logout
    Removed,
    /// The registry is shutting down
    Shutdown,
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let reason = match self {
            CloseReason::Superseded => "superseded",
            CloseReason::Dead => "dead",
            CloseReason::Removed => "removed",
            CloseReason::Shutdown => "shutdown",
        };
        f.write_str(reason)
    }
}

/// Result of a single liveness probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeOutcome {
    /// The peer answered the heartbeat
    Alive,
    /// The heartbeat went out but nothing came back in time
    Silent,
    /// The transport is closed, failed, or the peer hung up
    Closed,
    /// Another operation held the transport for the whole probe window
    Stalled,
}

impl ProbeOutcome {
    pub fn is_alive(self) -> bool {
        matches!(self, ProbeOutcome::Alive)
    }
}

/// Exclusive access to a handle's transport.
///
/// Released on drop.
pub struct TransportGuard<'a> {
    slot: MutexGuard<'a, Option<Box<dyn Transport>>>,
}

impl TransportGuard<'_> {
    pub async fn send_text(&mut self, text: &str) -> TransportResult<()> {
        match self.slot.as_deref_mut() {
            Some(transport) => transport.send_text(text).await,
            None => Err(TransportError::Closed),
        }
    }

    pub async fn recv(&mut self) -> TransportResult<Inbound> {
        match self.slot.as_deref_mut() {
            Some(transport) => transport.recv().await,
            None => Err(TransportError::Closed),
        }
    }

    pub fn is_closed(&self) -> bool {
        self.slot.as_deref().is_none_or(|transport| transport.is_closed())
    }
}

/// One registered subscriber connection.
pub struct ConnectionHandle {
    id: Uuid,
    key: SlotKey,
    connected_at: DateTime<Utc>,
    transport: Mutex<Option<Box<dyn Transport>>>,
    closed: AtomicBool,
    close_signal: watch::Sender<Option<CloseReason>>,
    close_timeout: Duration,
}

impl ConnectionHandle {
    /// Send the greeting over `transport` and wrap it in a handle.
    ///
    /// If the greeting cannot be written the transport is closed and
    /// released, and no handle is produced.
    pub async fn open(
        key: SlotKey,
        mut transport: Box<dyn Transport>,
        greeting: &str,
        close_timeout: Duration,
    ) -> RealtimeResult<Arc<Self>> {
        if let Err(source) = transport.send_text(greeting).await {
            debug!(key = %key, error = %source, "Greeting failed, releasing transport");
            let _ = time::timeout(close_timeout, transport.close()).await;
            return Err(RealtimeError::GreetingFailed { key, source });
        }

        let (close_signal, _) = watch::channel(None);
        let handle = Arc::new(Self {
            id: Uuid::new_v4(),
            key,
            connected_at: Utc::now(),
            transport: Mutex::new(Some(transport)),
            closed: AtomicBool::new(false),
            close_signal,
            close_timeout,
        });

        debug!(connection_id = %handle.id, key = %handle.key, "Connection opened");
        Ok(handle)
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn key(&self) -> &SlotKey {
        &self.key
    }

    pub fn connected_at(&self) -> DateTime<Utc> {
        self.connected_at
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Reason recorded by the disposal that won, if any.
    pub fn close_reason(&self) -> Option<CloseReason> {
        *self.close_signal.borrow()
    }

    /// Wait for exclusive use of the transport.
    ///
    /// Returns `None` once the handle is closed.
    pub async fn acquire(&self) -> Option<TransportGuard<'_>> {
        if self.is_closed() {
            return None;
        }
        let slot = self.transport.lock().await;
        if slot.is_none() || self.is_closed() {
            return None;
        }
        Some(TransportGuard { slot })
    }

    /// Write one frame.
    ///
    /// Never fails loudly: a closed handle, a closed transport or a write
    /// error all report `false`.
    pub async fn send(&self, frame: &str) -> bool {
        let Some(mut guard) = self.acquire().await else {
            return false;
        };
        if guard.is_closed() {
            return false;
        }

        match guard.send_text(frame).await {
            Ok(()) => true,
            Err(error) => {
                debug!(connection_id = %self.id, key = %self.key, %error, "Delivery failed");
                false
            }
        }
    }

    /// Write `heartbeat` and wait for any reply.
    ///
    /// Each step (lock, write, read) is bounded by `timeout`. The transport
    /// lock is released before this returns.
    pub async fn probe(&self, heartbeat: &str, timeout: Duration) -> ProbeOutcome {
        let mut guard = match time::timeout(timeout, self.acquire()).await {
            Ok(Some(guard)) => guard,
            Ok(None) => return ProbeOutcome::Closed,
            Err(_) => return ProbeOutcome::Stalled,
        };
        if guard.is_closed() {
            return ProbeOutcome::Closed;
        }

        match time::timeout(timeout, guard.send_text(heartbeat)).await {
            Ok(Ok(())) => {}
            Ok(Err(_)) => return ProbeOutcome::Closed,
            Err(_) => return ProbeOutcome::Stalled,
        }

        match time::timeout(timeout, guard.recv()).await {
            Ok(Ok(inbound)) if inbound.is_sign_of_life() => ProbeOutcome::Alive,
            Ok(_) => ProbeOutcome::Closed,
            Err(_) => ProbeOutcome::Silent,
        }
    }

    /// Close the transport and mark the handle closed.
    ///
    /// Returns `true` for the call that performed the disposal.
    pub async fn dispose(&self, reason: CloseReason) -> bool {
        if self.closed.swap(true, Ordering::AcqRel) {
            return false;
        }

        match time::timeout(self.close_timeout, self.transport.lock()).await {
            Ok(mut slot) => {
                let taken = slot.take();
                drop(slot);
                if let Some(mut transport) = taken {
                    if !transport.is_closed() {
                        match time::timeout(self.close_timeout, transport.close()).await {
                            Ok(Ok(())) => {}
                            Ok(Err(error)) => {
                                debug!(connection_id = %self.id, %error, "Close frame failed");
                            }
                            Err(_) => {
                                debug!(connection_id = %self.id, "Close frame timed out");
                            }
                        }
                    }
                }
            }
            Err(_) => {
                warn!(
                    connection_id = %self.id,
                    key = %self.key,
                    "Transport busy past close timeout, skipping close frame"
                );
            }
        }

        self.close_signal.send_replace(Some(reason));
        info!(connection_id = %self.id, key = %self.key, %reason, "Connection closed");
        true
    }

    /// Resolve once the handle has been disposed.
    pub async fn wait_until_closed(&self) -> CloseReason {
        let mut signal = self.close_signal.subscribe();
        loop {
            let current = *signal.borrow_and_update();
            if let Some(reason) = current {
                return reason;
            }
            if signal.changed().await.is_err() {
                return CloseReason::Removed;
            }
        }
    }
}

impl fmt::Debug for ConnectionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionHandle")
            .field("id", &self.id)
            .field("key", &self.key)
            .field("connected_at", &self.connected_at)
            .field("closed", &self.is_closed())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::{EntityScope, UserId};
    use crate::testing::mock_pair;

    const WAIT: Duration = Duration::from_millis(200);

    fn key() -> SlotKey {
        SlotKey::new("Conversation", EntityScope::Entity(42), UserId::new(7))
    }

    async fn open_handle() -> (Arc<ConnectionHandle>, crate::testing::MockPeer) {
        let (transport, mut peer) = mock_pair();
        let handle = ConnectionHandle::open(key(), Box::new(transport), "hello there", WAIT)
            .await
            .unwrap();
        assert_eq!(peer.next_frame(WAIT).await.as_deref(), Some("hello there"));
        (handle, peer)
    }

    #[tokio::test]
    async fn test_open_sends_greeting_first() {
        let (handle, mut peer) = open_handle().await;
        assert!(handle.send("second").await);
        assert_eq!(peer.next_frame(WAIT).await.as_deref(), Some("second"));
    }

    #[tokio::test]
    async fn test_failed_greeting_releases_transport() {
        let (transport, peer) = mock_pair();
        peer.fail_sends();

        let result = ConnectionHandle::open(key(), Box::new(transport), "hello there", WAIT).await;
        assert!(matches!(result, Err(RealtimeError::GreetingFailed { .. })));
        assert_eq!(peer.close_calls(), 1);
    }

    #[tokio::test]
    async fn test_dispose_is_idempotent() {
        let (handle, peer) = open_handle().await;

        assert!(handle.dispose(CloseReason::Removed).await);
        assert!(!handle.dispose(CloseReason::Dead).await);
        assert_eq!(peer.close_calls(), 1);
        assert_eq!(handle.close_reason(), Some(CloseReason::Removed));
    }

    #[tokio::test]
    async fn test_send_after_dispose_is_false() {
        let (handle, _peer) = open_handle().await;
        handle.dispose(CloseReason::Removed).await;

        assert!(!handle.send("late").await);
        assert!(handle.acquire().await.is_none());
    }

    #[tokio::test]
    async fn test_wait_until_closed_resolves_with_reason() {
        let (handle, _peer) = open_handle().await;

        let waiter = {
            let handle = Arc::clone(&handle);
            tokio::spawn(async move { handle.wait_until_closed().await })
        };
        handle.dispose(CloseReason::Superseded).await;

        assert_eq!(waiter.await.unwrap(), CloseReason::Superseded);
        // Already-closed handles resolve immediately
        assert_eq!(handle.wait_until_closed().await, CloseReason::Superseded);
    }

    #[tokio::test]
    async fn test_probe_outcomes() {
        let (handle, peer) = open_handle().await;
        peer.auto_reply();
        assert_eq!(handle.probe("ping", WAIT).await, ProbeOutcome::Alive);

        let (handle, _peer) = open_handle().await;
        assert_eq!(
            handle.probe("ping", Duration::from_millis(20)).await,
            ProbeOutcome::Silent
        );

        let (handle, peer) = open_handle().await;
        peer.reply(Inbound::Data { len: 0 });
        assert_eq!(handle.probe("ping", WAIT).await, ProbeOutcome::Closed);

        let (handle, mut peer) = open_handle().await;
        peer.hang_up();
        assert_eq!(handle.probe("ping", WAIT).await, ProbeOutcome::Closed);
    }

    #[tokio::test]
    async fn test_dispose_gives_up_on_busy_transport() {
        let (handle, peer) = open_handle().await;
        peer.hang_sends();

        let stuck = {
            let handle = Arc::clone(&handle);
            tokio::spawn(async move { handle.send("never").await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert!(handle.dispose(CloseReason::Dead).await);
        assert!(handle.is_closed());
        assert_eq!(handle.wait_until_closed().await, CloseReason::Dead);
        assert_eq!(peer.close_calls(), 0);
        stuck.abort();
    }
}
