//! Child entity bookkeeping.


use crate::consumer::{ConsumerId, WeakConsumer};
use crate::producer::{Producer, ProducerId, WeakProducer};
use hash_hasher::HashedMap;
use parking_lot::Mutex;
use std::fmt;
use std::hash::Hash;
use std::sync::{Arc, Weak};

/// Mapping from child id to child entity, shared between an owner and the close handlers of its
/// children.
///
/// Every operation takes the lock for its own duration only and values leaving the registry are
/// dropped after the lock is released, so dropping an entity that removes itself from the same
/// registry can not deadlock.
pub struct Registry<K, V> {
    entries: Arc<Mutex<HashedMap<K, V>>>,
}

impl<K, V> Clone for Registry<K, V> {
    fn clone(&self) -> Self {
        Self {
            entries: Arc::clone(&self.entries),
        }
    }
}

impl<K, V> Default for Registry<K, V> {
    fn default() -> Self {
        Self {
            entries: Arc::default(),
        }
    }
}

impl<K, V> fmt::Debug for Registry<K, V>
where
    K: fmt::Debug,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.entries.lock().keys()).finish()
    }
}

impl<K, V> Registry<K, V>
where
    K: Copy + Eq + Hash,
{
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert an entry. Returns `false` and leaves the registry untouched if the key is already
    /// taken.
    pub fn insert(&self, key: K, value: V) -> bool {
        let mut entries = self.entries.lock();
        if entries.contains_key(&key) {
            return false;
        }
        entries.insert(key, value);
        true
    }

    /// Remove an entry, removing an absent key is a no-op. Returns whether something was removed.
    pub fn remove(&self, key: &K) -> bool {
        let removed = self.entries.lock().remove(key);
        removed.is_some()
    }

    /// Remove an entry only if `predicate` holds for its current value. Returns whether something
    /// was removed.
    pub fn remove_if<F>(&self, key: &K, predicate: F) -> bool
    where
        F: FnOnce(&V) -> bool,
    {
        let removed = {
            let mut entries = self.entries.lock();
            if entries.get(key).is_some_and(predicate) {
                entries.remove(key)
            } else {
                None
            }
        };
        removed.is_some()
    }

    /// Insert an entry, overwriting whatever was registered under the key before.
    pub fn replace(&self, key: K, value: V) -> Option<V> {
        self.entries.lock().insert(key, value)
    }

    /// Whether the key is registered.
    #[must_use]
    pub fn contains(&self, key: &K) -> bool {
        self.entries.lock().contains_key(key)
    }

    /// Number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Whether the registry is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Registered keys, in no particular order.
    #[must_use]
    pub fn ids(&self) -> Vec<K> {
        self.entries.lock().keys().copied().collect()
    }

    /// Take all entries out of the registry.
    #[must_use]
    pub fn drain(&self) -> Vec<(K, V)> {
        let entries = std::mem::take(&mut *self.entries.lock());
        entries.into_iter().collect()
    }

    /// Downgrade to a handle that doesn't keep the registry alive.
    #[must_use]
    pub fn downgrade(&self) -> WeakRegistry<K, V> {
        WeakRegistry {
            entries: Arc::downgrade(&self.entries),
        }
    }
}

impl<K, V> Registry<K, V>
where
    K: Copy + Eq + Hash,
    V: Clone,
{
    /// Get a copy of the entry.
    #[must_use]
    pub fn get(&self, key: &K) -> Option<V> {
        self.entries.lock().get(key).cloned()
    }
}

/// [`WeakRegistry`] vs [`Registry`] is similar to [`Weak`] vs [`Arc`].
pub struct WeakRegistry<K, V> {
    entries: Weak<Mutex<HashedMap<K, V>>>,
}

impl<K, V> Clone for WeakRegistry<K, V> {
    fn clone(&self) -> Self {
        Self {
            entries: Weak::clone(&self.entries),
        }
    }
}

impl<K, V> fmt::Debug for WeakRegistry<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WeakRegistry").finish()
    }
}

impl<K, V> WeakRegistry<K, V> {
    /// Attempts to upgrade to [`Registry`] if it is still alive.
    #[must_use]
    pub fn upgrade(&self) -> Option<Registry<K, V>> {
        let entries = self.entries.upgrade()?;

        Some(Registry { entries })
    }
}

/// Producers of all transports of a router. Maintained by the router layer (and by
/// [`Transport::produce`](crate::transport::Transport::produce)), consulted by
/// [`Transport::consume`](crate::transport::Transport::consume).
///
/// Holds weak handles only, a registry entry never keeps a producer alive.
pub type ProducerRegistry = Registry<ProducerId, WeakProducer>;

impl ProducerRegistry {
    /// Register a producer created outside of this crate's transports.
    pub fn add_producer(&self, producer: &Producer) -> bool {
        self.insert(producer.id(), producer.downgrade())
    }

    /// Remove the entry of `producer_id` only if it still refers to `producer`, an id that was
    /// taken over by another producer in the meantime stays registered.
    pub fn remove_producer(&self, producer_id: &ProducerId, producer: &WeakProducer) -> bool {
        self.remove_if(producer_id, |entry| entry.ptr_eq(producer))
    }

    /// Resolve a producer id to a live producer.
    #[must_use]
    pub fn producer(&self, producer_id: &ProducerId) -> Option<Producer> {
        self.get(producer_id)?.upgrade()
    }
}

pub(crate) type ConsumerRegistry = Registry<ConsumerId, WeakConsumer>;
