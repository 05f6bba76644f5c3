use hash_hasher::HashedMap;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use uuid::Uuid;

struct EventHandlersList<V: Clone + 'static> {
    index: usize,
    #[allow(clippy::type_complexity)]
    callbacks: HashMap<usize, Arc<dyn Fn(V) + Send + Sync>>,
}

impl<V: Clone + 'static> Default for EventHandlersList<V> {
    fn default() -> Self {
        Self {
            index: 0,
            callbacks: HashMap::new(),
        }
    }
}

/// Notification callbacks of the channel, grouped by the entity they target.
#[derive(Clone)]
pub(super) struct EventHandlers<V: Clone + 'static> {
    handlers: Arc<Mutex<HashedMap<SubscriptionTarget, EventHandlersList<V>>>>,
}

impl<V: Clone + 'static> EventHandlers<V> {
    pub(super) fn new() -> Self {
        let handlers =
            Arc::<Mutex<HashedMap<SubscriptionTarget, EventHandlersList<V>>>>::default();
        Self { handlers }
    }

    pub(super) fn add(
        &self,
        target_id: SubscriptionTarget,
        callback: Box<dyn Fn(V) + Send + Sync + 'static>,
    ) -> SubscriptionHandler {
        let index;
        {
            let mut event_handlers = self.handlers.lock();
            let list = event_handlers.entry(target_id).or_default();
            index = list.index;
            list.index += 1;
            list.callbacks.insert(index, Arc::from(callback));
        }

        SubscriptionHandler::new({
            let event_handlers_weak = Arc::downgrade(&self.handlers);

            Box::new(move || {
                if let Some(event_handlers) = event_handlers_weak.upgrade() {
                    // The removed callback may own an entity whose drop unsubscribes again, so
                    // it is only dropped once the lock is released.
                    let removed_handler;
                    {
                        let mut handlers = event_handlers.lock();
                        let is_empty = match handlers.get_mut(&target_id) {
                            Some(list) => {
                                removed_handler = list.callbacks.remove(&index);
                                list.callbacks.is_empty()
                            }
                            None => {
                                removed_handler = None;
                                false
                            }
                        };
                        if is_empty {
                            handlers.remove(&target_id);
                        }
                    }
                    drop(removed_handler);
                }
            })
        })
    }

    /// Returns `false` if nobody is subscribed to `target_id`.
    pub(super) fn call_callbacks_with_value(
        &self,
        target_id: &SubscriptionTarget,
        value: V,
    ) -> bool {
        let handlers = self.handlers.lock();
        let Some(list) = handlers.get(target_id) else {
            return false;
        };
        let callbacks = list.callbacks.values().cloned().collect::<Vec<_>>();
        // Callbacks may subscribe or unsubscribe, never run them under the lock
        drop(handlers);

        if let Some((last, rest)) = callbacks.split_last() {
            for callback in rest {
                callback(value.clone());
            }
            last(value);
        }

        true
    }

    pub(super) fn downgrade(&self) -> WeakEventHandlers<V> {
        WeakEventHandlers {
            handlers: Arc::downgrade(&self.handlers),
        }
    }
}

#[derive(Clone)]
pub(super) struct WeakEventHandlers<V: Clone + 'static> {
    handlers: Weak<Mutex<HashedMap<SubscriptionTarget, EventHandlersList<V>>>>,
}

impl<V: Clone + 'static> WeakEventHandlers<V> {
    pub(super) fn upgrade(&self) -> Option<EventHandlers<V>> {
        self.handlers
            .upgrade()
            .map(|handlers| EventHandlers { handlers })
    }
}

/// Entity that worker notifications are addressed to.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum SubscriptionTarget {
    /// Entity identified by UUID (transports, producers, consumers).
    Uuid(Uuid),
}

/// Subscription handler, will remove corresponding subscription when dropped
pub struct SubscriptionHandler {
    remove_callback: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl SubscriptionHandler {
    fn new(remove_callback: Box<dyn FnOnce() + Send + Sync>) -> Self {
        Self {
            remove_callback: Some(remove_callback),
        }
    }
}

impl Drop for SubscriptionHandler {
    fn drop(&mut self) {
        if let Some(remove_callback) = self.remove_callback.take() {
            remove_callback();
        }
    }
}
