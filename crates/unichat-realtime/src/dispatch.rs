//! Typed sending facade for domain code.

use serde::Serialize;
use std::collections::HashSet;
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

use crate::category::EventCategory;
use crate::ids::{EntityScope, UserId};
use crate::registry::ConnectionRegistry;

/// Sends events of category `C` on behalf of an optional caller.
///
/// Only `C::Event` values are accepted, so a conversation service cannot
/// emit another category's events. The caller is the authenticated user
/// whose action triggered the send; contexts built for background jobs have
/// none.
pub struct DispatchContext<C: EventCategory> {
    registry: Arc<ConnectionRegistry>,
    caller: Option<UserId>,
    _category: PhantomData<fn() -> C>,
}

impl<C: EventCategory> DispatchContext<C> {
    pub fn new(registry: Arc<ConnectionRegistry>, caller: Option<UserId>) -> Self {
        Self {
            registry,
            caller,
            _category: PhantomData,
        }
    }

    pub fn caller(&self) -> Option<UserId> {
        self.caller
    }

    pub fn category(&self) -> &'static str {
        C::NAME
    }

    /// Send to the members of `recipients` subscribed under `scope`.
    pub fn send_to_users<T: Serialize>(
        &self,
        scope: EntityScope,
        recipients: &HashSet<UserId>,
        event: C::Event,
        data: Option<&T>,
    ) -> usize {
        self.registry.send(
            C::NAME,
            |user| recipients.contains(&user),
            &event,
            data,
            scope,
        )
    }

    /// Send to the category-wide subscribers among `recipients`.
    pub fn send_to_users_unscoped<T: Serialize>(
        &self,
        recipients: &HashSet<UserId>,
        event: C::Event,
        data: Option<&T>,
    ) -> usize {
        self.send_to_users(EntityScope::None, recipients, event, data)
    }

    /// Like [`send_to_users`](Self::send_to_users) but never echoes back to
    /// the caller.
    pub fn send_to_others<T: Serialize>(
        &self,
        scope: EntityScope,
        recipients: &HashSet<UserId>,
        event: C::Event,
        data: Option<&T>,
    ) -> usize {
        let caller = self.caller;
        self.registry.send(
            C::NAME,
            |user| Some(user) != caller && recipients.contains(&user),
            &event,
            data,
            scope,
        )
    }

    /// Notify both the entity's own subscribers and the category-wide
    /// subscribers among `recipients`.
    ///
    /// This is the common pattern for conversation events: clients with the
    /// conversation open listen on its entity scope, while inbox views listen
    /// category-wide.
    pub fn send_to_entity_and_users<T: Serialize>(
        &self,
        entity: i64,
        recipients: &HashSet<UserId>,
        event: C::Event,
        data: Option<&T>,
    ) -> usize {
        let scope = EntityScope::from_raw(entity);
        let scoped = self.send_to_users(scope, recipients, event, data);
        if scope == EntityScope::None {
            return scoped;
        }
        scoped + self.send_to_users_unscoped(recipients, event, data)
    }

    /// Send an event without a payload.
    pub fn notify(&self, scope: EntityScope, recipients: &HashSet<UserId>, event: C::Event) -> usize {
        self.send_to_users(scope, recipients, event, None::<&()>)
    }
}

impl<C: EventCategory> Clone for DispatchContext<C> {
    fn clone(&self) -> Self {
        Self {
            registry: Arc::clone(&self.registry),
            caller: self.caller,
            _category: PhantomData,
        }
    }
}

impl<C: EventCategory> fmt::Debug for DispatchContext<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DispatchContext")
            .field("category", &C::NAME)
            .field("caller", &self.caller)
            .finish()
    }
}
