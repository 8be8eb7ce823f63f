//! Identifiers that address a registry slot.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::category::CategoryName;

/// Raw entity id meaning "no specific entity".
pub const NO_ENTITY: i64 = -1;

/// Application user identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(i64);

impl UserId {
    pub const fn new(id: i64) -> Self {
        Self(id)
    }

    pub const fn get(self) -> i64 {
        self.0
    }
}

impl From<i64> for UserId {
    fn from(id: i64) -> Self {
        Self(id)
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Sub-scope inside a category.
///
/// `None` is the category-wide bucket. It is a bucket of its own and does
/// not alias any entity: a send to `Entity(42)` never reaches `None`
/// subscribers and vice versa. `Entity(NO_ENTITY)` is treated as `None`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum EntityScope {
    #[default]
    None,
    Entity(i64),
}

impl EntityScope {
    /// Interpret a raw id, mapping the [`NO_ENTITY`] sentinel to `None`.
    pub const fn from_raw(raw: i64) -> Self {
        if raw == NO_ENTITY {
            Self::None
        } else {
            Self::Entity(raw)
        }
    }

    /// Fold a hand-built `Entity(NO_ENTITY)` into `None`.
    ///
    /// Every registry entry point applies this, so both spellings address
    /// the same bucket.
    pub const fn normalized(self) -> Self {
        match self {
            Self::Entity(raw) => Self::from_raw(raw),
            Self::None => Self::None,
        }
    }

    pub const fn as_raw(self) -> i64 {
        match self {
            Self::None => NO_ENTITY,
            Self::Entity(id) => id,
        }
    }

    pub const fn entity(self) -> Option<i64> {
        match self {
            Self::None => None,
            Self::Entity(id) => Some(id),
        }
    }

    pub const fn is_entity(self) -> bool {
        matches!(self, Self::Entity(_))
    }
}

impl From<Option<i64>> for EntityScope {
    fn from(raw: Option<i64>) -> Self {
        raw.map_or(Self::None, Self::from_raw)
    }
}

impl fmt::Display for EntityScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::None => f.write_str("*"),
            Self::Entity(id) => write!(f, "{}", id),
        }
    }
}

/// Full address of a registry slot: `(category, scope, user)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SlotKey {
    pub category: CategoryName,
    pub scope: EntityScope,
    pub user: UserId,
}

impl SlotKey {
    pub fn new(category: impl Into<CategoryName>, scope: EntityScope, user: UserId) -> Self {
        Self {
            category: category.into(),
            scope: scope.normalized(),
            user,
        }
    }
}

impl fmt::Display for SlotKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.category, self.scope, self.user)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sentinel_maps_to_none() {
        assert_eq!(EntityScope::from_raw(NO_ENTITY), EntityScope::None);
        assert_eq!(EntityScope::from(Some(-1)), EntityScope::None);
        assert_eq!(EntityScope::from(None), EntityScope::None);
        assert_eq!(EntityScope::from(Some(42)), EntityScope::Entity(42));
    }

    #[test]
    fn test_sentinel_entity_normalizes_to_none() {
        assert_eq!(EntityScope::Entity(NO_ENTITY).normalized(), EntityScope::None);
        assert_eq!(EntityScope::Entity(5).normalized(), EntityScope::Entity(5));

        let key = SlotKey::new("Conversation", EntityScope::Entity(NO_ENTITY), UserId::new(7));
        assert_eq!(key.scope, EntityScope::None);
    }

    #[test]
    fn test_none_scope_round_trips_through_raw() {
        assert_eq!(EntityScope::None.as_raw(), NO_ENTITY);
        assert_eq!(EntityScope::Entity(7).as_raw(), 7);
        assert_eq!(EntityScope::Entity(7).entity(), Some(7));
        assert!(!EntityScope::None.is_entity());
    }

    #[test]
    fn test_slot_key_display() {
        let key = SlotKey::new("Conversation", EntityScope::Entity(42), UserId::new(7));
        assert_eq!(key.to_string(), "Conversation/42/7");

        let key = SlotKey::new("Conversation", EntityScope::None, UserId::new(7));
        assert_eq!(key.to_string(), "Conversation/*/7");
    }

    #[test]
    fn test_user_id_serializes_as_number() {
        let json = serde_json::to_string(&UserId::new(7)).unwrap();
        assert_eq!(json, "7");
    }
}
