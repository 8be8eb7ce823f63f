//! Connection registry
//!
//! Three-level map `category -> scope -> user -> handle`. Each level is a
//! [`DashMap`], so operations on unrelated keys never contend on a global
//! lock.
//!
//! # Locking rules
//!
//! - Shard guards are taken outer to inner and never held across `.await`.
//! - Anything that needs I/O (sends, probes, disposal) first copies the
//!   relevant `Arc<ConnectionHandle>`s out, then drops every guard.
//! - Removal after a slow operation is compare-and-remove: a slot is only
//!   cleared if it still holds the exact handle that was inspected, so a
//!   replacement registered in the meantime is never evicted by mistake.
//!
//! Empty scope and category maps are pruned under the parent's shard lock,
//! which serialises against registrations into the same scope.

use dashmap::DashMap;
use futures::{StreamExt, future::join_all, stream};
use serde::Serialize;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tracing::{debug, error, info};

use crate::category::{CategoryName, EventCategory};
use crate::config::RealtimeConfig;
use crate::dispatch::DispatchContext;
use crate::envelope::{Envelope, EventName};
use crate::error::{RealtimeError, RealtimeResult};
use crate::handle::{CloseReason, ConnectionHandle};
use crate::ids::{EntityScope, SlotKey, UserId};
use crate::transport::Transport;

type UserSlots = DashMap<UserId, Arc<ConnectionHandle>>;
type ScopeSlots = DashMap<EntityScope, UserSlots>;

/// What a sweep action decided for one handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SweepVerdict {
    Keep,
    Evict(CloseReason),
}

/// Point-in-time registry statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RegistryStats {
    /// Categories with at least one scope
    pub categories: usize,
    /// Non-empty `(category, scope)` buckets
    pub scopes: usize,
    /// Live registered connections
    pub connections: usize,
    pub registered_total: u64,
    pub superseded_total: u64,
    pub removed_total: u64,
    pub evicted_total: u64,
    pub delivered_total: u64,
    pub failed_deliveries_total: u64,
}

#[derive(Debug, Default)]
struct Counters {
    registered: AtomicU64,
    superseded: AtomicU64,
    removed: AtomicU64,
    evicted: AtomicU64,
    delivered: AtomicU64,
    failed_deliveries: AtomicU64,
}

/// Concurrent registry of subscriber connections.
pub struct ConnectionRegistry {
    config: RealtimeConfig,
    slots: DashMap<CategoryName, ScopeSlots>,
    shutting_down: AtomicBool,
    counters: Arc<Counters>,
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new(RealtimeConfig::default())
    }
}

impl ConnectionRegistry {
    pub fn new(config: RealtimeConfig) -> Self {
        Self {
            config,
            slots: DashMap::new(),
            shutting_down: AtomicBool::new(false),
            counters: Arc::new(Counters::default()),
        }
    }

    pub fn config(&self) -> &RealtimeConfig {
        &self.config
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutting_down.load(Ordering::Acquire)
    }

    /// Greet `transport` and make it the connection for `(category, scope, user)`.
    ///
    /// An existing connection under the same key is replaced atomically and
    /// disposed on a background task with [`CloseReason::Superseded`]. When
    /// registrations race on one key the last insert wins and every loser is
    /// disposed.
    pub async fn register<T: Transport>(
        &self,
        category: impl Into<CategoryName>,
        scope: EntityScope,
        user: UserId,
        transport: T,
    ) -> RealtimeResult<Arc<ConnectionHandle>> {
        let key = SlotKey::new(category, scope, user);
        let mut transport: Box<dyn Transport> = Box::new(transport);

        if self.is_shutting_down() {
            let _ = tokio::time::timeout(self.config.close_timeout, transport.close()).await;
            return Err(RealtimeError::ShuttingDown);
        }

        let handle = ConnectionHandle::open(
            key.clone(),
            transport,
            &self.config.greeting,
            self.config.close_timeout,
        )
        .await?;

        let previous = self.insert_slot(&key, &handle);

        // A shutdown that snapshotted before this insert would miss both the
        // new handle and the one it displaced
        if self.is_shutting_down() {
            self.detach(&key, Some(&handle));
            if let Some(previous) = &previous {
                previous.dispose(CloseReason::Shutdown).await;
            }
            handle.dispose(CloseReason::Shutdown).await;
            return Err(RealtimeError::ShuttingDown);
        }

        self.counters.registered.fetch_add(1, Ordering::Relaxed);
        info!(connection_id = %handle.id(), key = %key, "Connection registered");

        if let Some(previous) = previous {
            self.counters.superseded.fetch_add(1, Ordering::Relaxed);
            debug!(
                connection_id = %previous.id(),
                key = %key,
                "Replacing existing connection"
            );
            tokio::spawn(async move {
                previous.dispose(CloseReason::Superseded).await;
            });
        }

        Ok(handle)
    }

    /// Put `handle` into its slot and return whatever it displaced.
    ///
    /// Categories that already exist are entered under a shared shard lock;
    /// the write lock on the category shard is only taken to create one.
    fn insert_slot(
        &self,
        key: &SlotKey,
        handle: &Arc<ConnectionHandle>,
    ) -> Option<Arc<ConnectionHandle>> {
        if let Some(scopes) = self.slots.get(key.category.as_str()) {
            return scopes
                .entry(key.scope)
                .or_default()
                .insert(key.user, Arc::clone(handle));
        }
        self.slots
            .entry(key.category.clone())
            .or_default()
            .entry(key.scope)
            .or_default()
            .insert(key.user, Arc::clone(handle))
    }

    /// Current handle for a key, if any.
    pub fn lookup(
        &self,
        category: &str,
        scope: EntityScope,
        user: UserId,
    ) -> Option<Arc<ConnectionHandle>> {
        let scopes = self.slots.get(category)?;
        let users = scopes.get(&scope.normalized())?;
        users.get(&user).map(|handle| Arc::clone(handle.value()))
    }

    pub fn contains(&self, category: &str, scope: EntityScope, user: UserId) -> bool {
        self.lookup(category, scope, user).is_some()
    }

    /// Fan an event out to every matching subscriber of `(category, scope)`.
    ///
    /// The envelope is serialised once. Each delivery runs on its own task
    /// and is never awaited here, so one slow recipient cannot delay another.
    /// Returns the number of deliveries started. Must be called from within a
    /// Tokio runtime.
    pub fn send<E, T, P>(
        &self,
        category: &str,
        recipients: P,
        event: &E,
        data: Option<&T>,
        scope: EntityScope,
    ) -> usize
    where
        E: EventName + ?Sized,
        T: Serialize,
        P: Fn(UserId) -> bool,
    {
        let scope = scope.normalized();
        let targets: Vec<Arc<ConnectionHandle>> = {
            let Some(scopes) = self.slots.get(category) else {
                return 0;
            };
            let Some(users) = scopes.get(&scope) else {
                return 0;
            };
            users
                .iter()
                .filter(|entry| recipients(*entry.key()))
                .map(|entry| Arc::clone(entry.value()))
                .collect()
        };

        if targets.is_empty() {
            return 0;
        }

        let frame = match Envelope::new(event.name(), data).to_frame() {
            Ok(frame) => frame,
            Err(error) => {
                error!(category, event = event.name(), %error, "Failed to serialise notification");
                return 0;
            }
        };

        debug!(
            category,
            scope = %scope,
            event = event.name(),
            recipients = targets.len(),
            "Dispatching notification"
        );

        for handle in &targets {
            let handle = Arc::clone(handle);
            let frame = Arc::clone(&frame);
            let counters = Arc::clone(&self.counters);
            tokio::spawn(async move {
                if handle.send(&frame).await {
                    counters.delivered.fetch_add(1, Ordering::Relaxed);
                } else {
                    counters.failed_deliveries.fetch_add(1, Ordering::Relaxed);
                }
            });
        }

        targets.len()
    }

    /// Remove and dispose the connection at a key.
    ///
    /// Returns `false` when nothing was registered there.
    pub async fn remove_if_present(&self, category: &str, scope: EntityScope, user: UserId) -> bool {
        let key = SlotKey::new(category, scope, user);
        match self.detach(&key, None) {
            Some(handle) => {
                self.counters.removed.fetch_add(1, Ordering::Relaxed);
                handle.dispose(CloseReason::Removed).await;
                true
            }
            None => false,
        }
    }

    /// Remove every connection `user` holds, across all categories and scopes.
    pub async fn remove_user_everywhere(&self, user: UserId) -> usize {
        let keys: Vec<SlotKey> = self
            .slots
            .iter()
            .flat_map(|category| {
                category
                    .value()
                    .iter()
                    .filter(|scope| scope.value().contains_key(&user))
                    .map(|scope| SlotKey::new(category.key().clone(), *scope.key(), user))
                    .collect::<Vec<_>>()
            })
            .collect();

        let removed: Vec<Arc<ConnectionHandle>> = keys
            .iter()
            .filter_map(|key| self.detach(key, None))
            .collect();

        self.counters
            .removed
            .fetch_add(removed.len() as u64, Ordering::Relaxed);
        join_all(
            removed
                .iter()
                .map(|handle| handle.dispose(CloseReason::Removed)),
        )
        .await;

        if !removed.is_empty() {
            info!(user = %user, closed = removed.len(), "Closed all connections for user");
        }
        removed.len()
    }

    /// Every registered handle at this instant.
    pub fn snapshot(&self) -> Vec<Arc<ConnectionHandle>> {
        self.slots
            .iter()
            .flat_map(|category| {
                category
                    .value()
                    .iter()
                    .flat_map(|scope| {
                        scope
                            .value()
                            .iter()
                            .map(|entry| Arc::clone(entry.value()))
                            .collect::<Vec<_>>()
                    })
                    .collect::<Vec<_>>()
            })
            .collect()
    }

    /// Run `action` against a snapshot of every handle, at most
    /// `concurrency` at a time, then evict the ones it condemned.
    ///
    /// Returns the number of handles actually evicted. A handle that was
    /// replaced or removed while its action ran is left alone.
    pub async fn sweep<F, Fut>(&self, concurrency: usize, action: F) -> usize
    where
        F: Fn(Arc<ConnectionHandle>) -> Fut,
        Fut: Future<Output = SweepVerdict>,
    {
        let verdicts = self.inspect(concurrency, action).await;
        self.apply_verdicts(verdicts).await
    }

    /// First half of [`sweep`](Self::sweep): evaluate without removing.
    pub async fn inspect<F, Fut>(
        &self,
        concurrency: usize,
        action: F,
    ) -> Vec<(Arc<ConnectionHandle>, SweepVerdict)>
    where
        F: Fn(Arc<ConnectionHandle>) -> Fut,
        Fut: Future<Output = SweepVerdict>,
    {
        stream::iter(self.snapshot())
            .map(|handle| {
                let verdict = action(Arc::clone(&handle));
                async move { (handle, verdict.await) }
            })
            .buffer_unordered(concurrency.max(1))
            .collect()
            .await
    }

    /// Second half of [`sweep`](Self::sweep): evict condemned handles.
    pub async fn apply_verdicts(&self, verdicts: Vec<(Arc<ConnectionHandle>, SweepVerdict)>) -> usize {
        let evictions = verdicts.into_iter().filter_map(|(handle, verdict)| match verdict {
            SweepVerdict::Keep => None,
            SweepVerdict::Evict(reason) => Some(async move { self.evict(&handle, reason).await }),
        });

        join_all(evictions)
            .await
            .into_iter()
            .filter(|evicted| *evicted)
            .count()
    }

    /// Remove `handle` only if it still occupies its slot, then dispose it.
    pub async fn evict(&self, handle: &Arc<ConnectionHandle>, reason: CloseReason) -> bool {
        if self.detach(handle.key(), Some(handle)).is_none() {
            return false;
        }
        self.counters.evicted.fetch_add(1, Ordering::Relaxed);
        handle.dispose(reason).await;
        true
    }

    /// Stop accepting registrations and dispose every connection.
    pub async fn shutdown(&self) -> usize {
        if self.shutting_down.swap(true, Ordering::AcqRel) {
            return 0;
        }

        let handles = self.snapshot();
        self.slots.clear();

        let closed = join_all(
            handles
                .iter()
                .map(|handle| handle.dispose(CloseReason::Shutdown)),
        )
        .await
        .into_iter()
        .filter(|closed| *closed)
        .count();

        info!(closed, "Connection registry shut down");
        closed
    }

    /// Typed sending facade for category `C`, bound to an optional caller.
    pub fn context<C: EventCategory>(self: &Arc<Self>, caller: Option<UserId>) -> DispatchContext<C> {
        DispatchContext::new(Arc::clone(self), caller)
    }

    pub fn connection_count(&self) -> usize {
        self.slots
            .iter()
            .map(|category| {
                category
                    .value()
                    .iter()
                    .map(|scope| scope.value().len())
                    .sum::<usize>()
            })
            .sum()
    }

    pub fn stats(&self) -> RegistryStats {
        let mut stats = RegistryStats {
            registered_total: self.counters.registered.load(Ordering::Relaxed),
            superseded_total: self.counters.superseded.load(Ordering::Relaxed),
            removed_total: self.counters.removed.load(Ordering::Relaxed),
            evicted_total: self.counters.evicted.load(Ordering::Relaxed),
            delivered_total: self.counters.delivered.load(Ordering::Relaxed),
            failed_deliveries_total: self.counters.failed_deliveries.load(Ordering::Relaxed),
            ..RegistryStats::default()
        };

        for category in self.slots.iter() {
            stats.categories += 1;
            for scope in category.value().iter() {
                stats.scopes += 1;
                stats.connections += scope.value().len();
            }
        }
        stats
    }

    /// Clear a slot, optionally only if it holds `expected`, and prune the
    /// scope and category maps if they became empty.
    fn detach(
        &self,
        key: &SlotKey,
        expected: Option<&Arc<ConnectionHandle>>,
    ) -> Option<Arc<ConnectionHandle>> {
        let removed = {
            let scopes = self.slots.get(key.category.as_str())?;
            let users = scopes.get(&key.scope)?;
            let entry = match expected {
                Some(expected) => {
                    users.remove_if(&key.user, |_, current| Arc::ptr_eq(current, expected))
                }
                None => users.remove(&key.user),
            };
            entry.map(|(_, handle)| handle)
        };

        if removed.is_some() {
            self.prune(key);
        }
        removed
    }

    fn prune(&self, key: &SlotKey) {
        if let Some(scopes) = self.slots.get(key.category.as_str()) {
            scopes.remove_if(&key.scope, |_, users| users.is_empty());
        }
        self.slots
            .remove_if(key.category.as_str(), |_, scopes| scopes.is_empty());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::category::ConversationEvent;
    use crate::testing::{MockPeer, mock_pair};
    use std::time::Duration;

    const WAIT: Duration = Duration::from_millis(200);
    const CONVERSATION: &str = "Conversation";

    async fn connect(
        registry: &ConnectionRegistry,
        scope: EntityScope,
        user: i64,
    ) -> (Arc<ConnectionHandle>, MockPeer) {
        let (transport, mut peer) = mock_pair();
        let handle = registry
            .register(CONVERSATION, scope, UserId::new(user), transport)
            .await
            .unwrap();
        assert_eq!(peer.next_frame(WAIT).await.as_deref(), Some("hello there"));
        (handle, peer)
    }

    #[tokio::test]
    async fn test_register_and_lookup() {
        let registry = ConnectionRegistry::default();
        let (handle, _peer) = connect(&registry, EntityScope::Entity(42), 7).await;

        let found = registry
            .lookup(CONVERSATION, EntityScope::Entity(42), UserId::new(7))
            .unwrap();
        assert!(Arc::ptr_eq(&found, &handle));
        assert!(!registry.contains(CONVERSATION, EntityScope::None, UserId::new(7)));
        assert_eq!(registry.connection_count(), 1);
    }

    #[tokio::test]
    async fn test_reregistration_supersedes_previous() {
        let registry = ConnectionRegistry::default();
        let (first, first_peer) = connect(&registry, EntityScope::Entity(42), 7).await;
        let (second, _second_peer) = connect(&registry, EntityScope::Entity(42), 7).await;

        assert_eq!(first.wait_until_closed().await, CloseReason::Superseded);
        assert_eq!(first_peer.close_calls(), 1);
        assert!(!second.is_closed());
        assert_eq!(registry.connection_count(), 1);
        assert_eq!(registry.stats().superseded_total, 1);
    }

    #[tokio::test]
    async fn test_remove_prunes_empty_scopes() {
        let registry = ConnectionRegistry::default();
        let (handle, _peer) = connect(&registry, EntityScope::Entity(42), 7).await;

        assert!(
            registry
                .remove_if_present(CONVERSATION, EntityScope::Entity(42), UserId::new(7))
                .await
        );
        assert!(handle.is_closed());
        assert!(
            !registry
                .remove_if_present(CONVERSATION, EntityScope::Entity(42), UserId::new(7))
                .await
        );

        let stats = registry.stats();
        assert_eq!(stats.categories, 0);
        assert_eq!(stats.scopes, 0);
    }

    #[tokio::test]
    async fn test_send_to_empty_category_is_noop() {
        let registry = ConnectionRegistry::default();
        let sent = registry.send(
            "Nobody",
            |_| true,
            &ConversationEvent::NewMessage,
            None::<&()>,
            EntityScope::None,
        );
        assert_eq!(sent, 0);
    }

    #[tokio::test]
    async fn test_evict_skips_replaced_handle() {
        let registry = ConnectionRegistry::default();
        let (stale, _stale_peer) = connect(&registry, EntityScope::None, 7).await;
        let (current, _current_peer) = connect(&registry, EntityScope::None, 7).await;

        assert!(!registry.evict(&stale, CloseReason::Dead).await);
        assert!(!current.is_closed());
        assert!(registry.contains(CONVERSATION, EntityScope::None, UserId::new(7)));
    }

    #[tokio::test]
    async fn test_sweep_evicts_condemned_only() {
        let registry = ConnectionRegistry::default();
        let (keep, _keep_peer) = connect(&registry, EntityScope::None, 1).await;
        let (drop_me, _drop_peer) = connect(&registry, EntityScope::None, 2).await;

        let evicted = registry
            .sweep(4, |handle| async move {
                if handle.key().user == UserId::new(2) {
                    SweepVerdict::Evict(CloseReason::Dead)
                } else {
                    SweepVerdict::Keep
                }
            })
            .await;

        assert_eq!(evicted, 1);
        assert!(!keep.is_closed());
        assert_eq!(drop_me.close_reason(), Some(CloseReason::Dead));
        assert_eq!(registry.connection_count(), 1);
    }

    #[tokio::test]
    async fn test_shutdown_rejects_new_registrations() {
        let registry = ConnectionRegistry::default();
        let (handle, _peer) = connect(&registry, EntityScope::None, 7).await;

        assert_eq!(registry.shutdown().await, 1);
        assert_eq!(handle.close_reason(), Some(CloseReason::Shutdown));
        assert_eq!(registry.connection_count(), 0);

        let (transport, peer) = mock_pair();
        let result = registry
            .register(CONVERSATION, EntityScope::None, UserId::new(8), transport)
            .await;
        assert!(matches!(result, Err(RealtimeError::ShuttingDown)));
        assert_eq!(peer.close_calls(), 1);
    }
}
