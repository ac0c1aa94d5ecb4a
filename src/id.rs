//! Typed identifiers minted for behaviors, events, state and effects.
//!
//! Identifiers are opaque, reference-equal tokens: two identifiers compare
//! equal only if they are the very same token, never because their payload
//! types happen to match. They carry no runtime type information beyond a
//! raw counter value; static typing (the `T`/`I, R` parameters) is what
//! keeps a [`BehaviorId<u32>`] from being handed to an API expecting a
//! [`BehaviorId<String>`].
//!
//! Minting is a free-standing operation: identifiers can be created before
//! any [`Store`](crate::store::Store) exists and embedded in configuration
//! values, exactly as [`Aggregate`](crate::entity::Entity) ids are handed
//! out independently of any particular [`Repository`].

use std::fmt;
use std::hash::{Hash, Hasher};
use std::marker::PhantomData;
use std::sync::atomic::{AtomicU64, Ordering};

/// Process-wide counter backing identifier minting.
///
/// A single counter (rather than one per [`Store`](crate::store::Store))
/// means identifiers remain globally unique even when shared across
/// multiple store instances, per the "(or globally...)" option in the
/// design notes.
static NEXT_RAW_ID: AtomicU64 = AtomicU64::new(1);

fn next_raw_id() -> u64 {
    NEXT_RAW_ID.fetch_add(1, Ordering::Relaxed)
}

macro_rules! single_param_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        pub struct $name<T> {
            raw: u64,
            name: Option<&'static str>,
            _marker: PhantomData<fn() -> T>,
        }

        impl<T> $name<T> {
            /// Mints a brand new, globally-unique identifier.
            pub fn new() -> Self {
                Self {
                    raw: next_raw_id(),
                    name: None,
                    _marker: PhantomData,
                }
            }

            /// Mints a new identifier carrying a debug name.
            ///
            /// The name is used only for diagnostics; it never participates
            /// in equality or hashing, and consumers must not parse it.
            pub fn named(name: &'static str) -> Self {
                Self {
                    raw: next_raw_id(),
                    name: Some(name),
                    _marker: PhantomData,
                }
            }

            /// Debug name attached at minting time, if any.
            pub fn debug_name(&self) -> Option<&'static str> {
                self.name
            }

            pub(crate) fn raw(&self) -> RawId {
                RawId(self.raw)
            }
        }

        impl<T> Default for $name<T> {
            fn default() -> Self {
                Self::new()
            }
        }

        impl<T> Clone for $name<T> {
            fn clone(&self) -> Self {
                *self
            }
        }

        impl<T> Copy for $name<T> {}

        impl<T> PartialEq for $name<T> {
            fn eq(&self, other: &Self) -> bool {
                self.raw == other.raw
            }
        }

        impl<T> Eq for $name<T> {}

        impl<T> Hash for $name<T> {
            fn hash<H: Hasher>(&self, state: &mut H) {
                self.raw.hash(state);
            }
        }

        impl<T> fmt::Debug for $name<T> {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                match self.name {
                    Some(name) => write!(f, "{}({}, #{})", stringify!($name), name, self.raw),
                    None => write!(f, "{}(#{})", stringify!($name), self.raw),
                }
            }
        }
    };
}

single_param_id! {
    /// Identifier of a multicast, replaying (last-value) behavior.
    BehaviorId
}

single_param_id! {
    /// Identifier of a multicast, non-replaying event stream.
    EventId
}

single_param_id! {
    /// Identifier of a behavior whose sources are reducers keyed by events,
    /// plus an initial value.
    StateId
}

/// Identifier of an entry in the effect registry: a function from an input
/// `I` to a stream of results `R`.
pub struct EffectId<I, R> {
    raw: u64,
    name: Option<&'static str>,
    _marker: PhantomData<fn(I) -> R>,
}

impl<I, R> EffectId<I, R> {
    /// Mints a brand new, globally-unique effect identifier.
    pub fn new() -> Self {
        Self {
            raw: next_raw_id(),
            name: None,
            _marker: PhantomData,
        }
    }

    /// Mints a new effect identifier carrying a debug name.
    pub fn named(name: &'static str) -> Self {
        Self {
            raw: next_raw_id(),
            name: Some(name),
            _marker: PhantomData,
        }
    }

    /// Debug name attached at minting time, if any.
    pub fn debug_name(&self) -> Option<&'static str> {
        self.name
    }

    pub(crate) fn raw(&self) -> RawId {
        RawId(self.raw)
    }
}

impl<I, R> Default for EffectId<I, R> {
    fn default() -> Self {
        Self::new()
    }
}

impl<I, R> Clone for EffectId<I, R> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<I, R> Copy for EffectId<I, R> {}

impl<I, R> PartialEq for EffectId<I, R> {
    fn eq(&self, other: &Self) -> bool {
        self.raw == other.raw
    }
}

impl<I, R> Eq for EffectId<I, R> {}

impl<I, R> Hash for EffectId<I, R> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.raw.hash(state);
    }
}

impl<I, R> fmt::Debug for EffectId<I, R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.name {
            Some(name) => write!(f, "EffectId({name}, #{})", self.raw),
            None => write!(f, "EffectId(#{})", self.raw),
        }
    }
}

/// Type-erased form of any identifier, used as the key of the store's
/// internal tables.
///
/// Since every identifier flavor is minted from the same process-wide
/// counter, raw values never collide across flavors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub(crate) struct RawId(u64);

impl RawId {
    pub(crate) fn value(&self) -> u64 {
        self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identifiers_are_reference_equal_not_structural() {
        let a = BehaviorId::<u32>::new();
        let b = BehaviorId::<u32>::new();

        assert_ne!(a, b);
        assert_eq!(a, a);
    }

    #[test]
    fn debug_name_does_not_affect_equality() {
        let a = EventId::<()>::named("tick");
        let b = a;

        assert_eq!(a, b);
        assert_eq!(a.debug_name(), Some("tick"));
    }

    #[test]
    fn raw_ids_never_collide_across_flavors() {
        let behavior = BehaviorId::<u32>::new().raw();
        let event = EventId::<u32>::new().raw();
        let state = StateId::<u32>::new().raw();
        let effect = EffectId::<u32, u32>::new().raw();

        let mut raws = vec![behavior, event, state, effect];
        raws.sort();
        raws.dedup();
        assert_eq!(raws.len(), 4);
    }
}
