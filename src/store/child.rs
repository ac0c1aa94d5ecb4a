//! Parent/child store delegation.
//!
//! A child store is a fresh, independent set of tables that falls back to
//! its parent's behavior subjects for any identifier it has not itself
//! sourced -- see `Store::get_behavior`. Events are never shared this way:
//! each store's event namespace stands alone.

use crate::store::{Store, StoreConfig, StoreInner};
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

impl Store {
    /// Creates a new store whose behavior lookups fall back to `self`
    /// whenever the child has not registered its own source for an
    /// identifier. The child has its own independent event namespace,
    /// reducers and effect registry.
    pub fn create_child_store(&self) -> Store {
        self.create_child_store_with_config(self.inner.config)
    }

    /// Like [`create_child_store`](Store::create_child_store), but with an
    /// explicit configuration for the child rather than inheriting the
    /// parent's.
    pub fn create_child_store_with_config(&self, config: StoreConfig) -> Store {
        Store {
            inner: Arc::new(StoreInner {
                tables: Default::default(),
                queue: crate::queue::DelayedQueue::new(),
                config,
                in_lifecycle_registration: AtomicBool::new(false),
            }),
            parent: Some(Box::new(self.clone())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::id::BehaviorId;
    use futures::StreamExt;

    #[tokio::test]
    async fn child_with_no_source_delegates_to_the_parent() {
        let parent = Store::new();
        let shared = BehaviorId::<i32>::named("shared");
        parent.add_behavior(shared, futures::stream::iter([1, 2, 3]), false).unwrap();

        let child = parent.create_child_store();
        let mut values = child.get_behavior(shared);

        assert_eq!(values.next().await, Some(1));
        assert_eq!(values.next().await, Some(2));
        assert_eq!(values.next().await, Some(3));
    }

    #[tokio::test]
    async fn child_with_its_own_source_never_sees_the_parents() {
        let parent = Store::new();
        let shared = BehaviorId::<i32>::named("shared");
        parent.add_behavior(shared, futures::stream::iter([100]), false).unwrap();

        let child = parent.create_child_store();
        child.add_behavior(shared, futures::stream::iter([7]), false).unwrap();

        let mut values = child.get_behavior(shared);
        assert_eq!(values.next().await, Some(7));
    }
}
