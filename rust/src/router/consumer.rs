//! Media sinks bound to a producer.


use crate::data_structures::AppData;
use crate::messages::{
    ConsumerCloseRequest, ConsumerInternal, ConsumerPauseRequest, ConsumerResumeRequest,
};
use crate::producer::{Producer, ProducerId};
use crate::router::lifecycle::{CloseTrigger, EntityState, Lifecycle};
use crate::router::registry::ProducerRegistry;
use crate::rtp_parameters::{MediaKind, RtpParameters};
use crate::transport::Transport;
use crate::uuid_based_wrapper_type;
use crate::worker::{Channel, RequestError, SubscriptionHandler};
use async_executor::Executor;
use event_listener_primitives::{Bag, BagOnce, HandlerId};
use log::{debug, error};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::sync::{Arc, Weak};

uuid_based_wrapper_type!(
    /// [`Consumer`] identifier.
    ConsumerId
);

/// [`Consumer`] options.
#[derive(Debug, Clone)]
#[non_exhaustive]
pub struct ConsumerOptions {
    /// The id of the producer to consume.
    pub producer_id: ProducerId,
    /// Custom application data, must be an object if given.
    pub app_data: Value,
}

impl ConsumerOptions {
    /// Create consumer options for the given producer with no application data.
    #[must_use]
    pub fn new(producer_id: ProducerId) -> Self {
        Self {
            producer_id,
            app_data: Value::Null,
        }
    }
}

/// Consumer type.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConsumerType {
    /// A single RTP stream is sent with no spatial/temporal layers.
    Simple,
    /// Two or more RTP streams are sent, each of them with one or more temporal layers.
    Simulcast,
    /// A single RTP stream is sent with spatial/temporal layers.
    Svc,
    /// Special type for consumers created on a pipe transport, it mirrors all streams of the
    /// producer.
    Pipe,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "event", rename_all = "lowercase", content = "data")]
enum Notification {
    ProducerClose,
    ProducerPause,
    ProducerResume,
}

/// Local and producer side pause flags, always read and updated together.
#[derive(Debug, Copy, Clone, Default, Eq, PartialEq)]
struct PauseState {
    paused: bool,
    producer_paused: bool,
}

impl PauseState {
    fn effectively_paused(self) -> bool {
        self.paused || self.producer_paused
    }

    /// Applies `change` and returns the new effective state if it flipped, `Some(true)` meaning
    /// the consumer got paused and `Some(false)` that it got resumed.
    fn apply<F: FnOnce(&mut Self)>(&mut self, change: F) -> Option<bool> {
        let was_paused = self.effectively_paused();
        change(self);
        let is_paused = self.effectively_paused();

        (was_paused != is_paused).then_some(is_paused)
    }
}

#[derive(Default)]
struct Handlers {
    pause: Bag<Arc<dyn Fn() + Send + Sync>>,
    resume: Bag<Arc<dyn Fn() + Send + Sync>>,
    producer_pause: Bag<Arc<dyn Fn() + Send + Sync>>,
    producer_resume: Bag<Arc<dyn Fn() + Send + Sync>>,
    producer_close: BagOnce<Box<dyn FnOnce() + Send>>,
    transport_close: BagOnce<Box<dyn FnOnce() + Send>>,
    close: BagOnce<Box<dyn FnOnce() + Send>>,
}

struct Inner {
    id: ConsumerId,
    producer_id: ProducerId,
    kind: MediaKind,
    r#type: ConsumerType,
    rtp_parameters: RtpParameters,
    pause_state: Arc<Mutex<PauseState>>,
    executor: Arc<Executor<'static>>,
    channel: Channel,
    handlers: Arc<Handlers>,
    app_data: AppData,
    transport: Arc<dyn Transport>,
    producer_registry: ProducerRegistry,
    lifecycle: Lifecycle,
    // Drop subscription to consumer-specific notifications when consumer itself is dropped
    subscription_handler: Mutex<Option<SubscriptionHandler>>,
    _on_transport_close_handler: Mutex<HandlerId>,
}

impl Drop for Inner {
    fn drop(&mut self) {
        debug!("drop()");

        self.close(CloseTrigger::LocalClose);
    }
}

impl Inner {
    fn internal(&self) -> ConsumerInternal {
        ConsumerInternal {
            router_id: self.transport.router_id(),
            transport_id: self.transport.id(),
            producer_id: self.producer_id,
            consumer_id: self.id,
        }
    }

    fn close(&self, trigger: CloseTrigger) {
        let Some(_closing) = self.lifecycle.begin_close() else {
            return;
        };

        debug!("close() [id:{}, trigger:{:?}]", self.id, trigger);

        match trigger {
            CloseTrigger::ProducerClosed => {
                self.handlers.producer_close.call_simple();
            }
            CloseTrigger::TransportClosed => {
                self.handlers.transport_close.call_simple();
            }
            CloseTrigger::LocalClose => {}
        }
        self.handlers.close.call_simple();

        // No more notifications are expected for this consumer
        let subscription_handler = self.subscription_handler.lock().take();
        drop(subscription_handler);

        if trigger.needs_close_request() {
            let channel = self.channel.clone();
            let request = ConsumerCloseRequest {
                internal: self.internal(),
            };
            let transport = Arc::clone(&self.transport);

            self.executor
                .spawn(async move {
                    if let Err(error) = channel.request(request).await {
                        error!("consumer closing failed on drop: {}", error);
                    }

                    drop(transport);
                })
                .detach();
        }
    }
}

/// A consumer represents an audio or video source being forwarded from a router to an endpoint.
/// It's created on top of a transport that defines how the media packets are carried.
#[derive(Clone)]
#[must_use = "Consumer will be closed on drop, make sure to keep it around for as long as needed"]
pub struct Consumer {
    inner: Arc<Inner>,
}

impl fmt::Debug for Consumer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Consumer")
            .field("id", &self.inner.id)
            .field("producer_id", &self.inner.producer_id)
            .field("kind", &self.inner.kind)
            .field("type", &self.inner.r#type)
            .field("rtp_parameters", &self.inner.rtp_parameters)
            .field("pause_state", &*self.inner.pause_state.lock())
            .field("transport", &self.inner.transport)
            .field("state", &self.inner.lifecycle)
            .finish()
    }
}

impl Consumer {
    #[allow(clippy::too_many_arguments)]
    pub(super) fn new(
        id: ConsumerId,
        producer_id: ProducerId,
        kind: MediaKind,
        r#type: ConsumerType,
        rtp_parameters: RtpParameters,
        paused: bool,
        producer_paused: bool,
        executor: Arc<Executor<'static>>,
        channel: Channel,
        app_data: AppData,
        transport: Arc<dyn Transport>,
        producer_registry: ProducerRegistry,
    ) -> Self {
        debug!("new()");

        let handlers = Arc::<Handlers>::default();
        let pause_state = Arc::new(Mutex::new(PauseState {
            paused,
            producer_paused,
        }));

        let inner_weak = Arc::<Mutex<Option<Weak<Inner>>>>::default();
        let subscription_handler = {
            let handlers = Arc::clone(&handlers);
            let pause_state = Arc::clone(&pause_state);
            let inner_weak = Arc::clone(&inner_weak);

            channel.subscribe_to_notifications(id.into(), move |notification| {
                match serde_json::from_value::<Notification>(notification) {
                    Ok(notification) => match notification {
                        Notification::ProducerClose => {
                            let maybe_inner = inner_weak.lock().as_ref().and_then(Weak::upgrade);
                            if let Some(inner) = maybe_inner {
                                inner.close(CloseTrigger::ProducerClosed);
                            }
                        }
                        Notification::ProducerPause => {
                            let flipped = pause_state
                                .lock()
                                .apply(|state| state.producer_paused = true);

                            handlers.producer_pause.call_simple();

                            if flipped == Some(true) {
                                handlers.pause.call_simple();
                            }
                        }
                        Notification::ProducerResume => {
                            let flipped = pause_state
                                .lock()
                                .apply(|state| state.producer_paused = false);

                            handlers.producer_resume.call_simple();

                            if flipped == Some(false) {
                                handlers.resume.call_simple();
                            }
                        }
                    },
                    Err(error) => {
                        error!("Failed to parse notification: {}", error);
                    }
                }
            })
        };

        let on_transport_close_handler = transport.on_close({
            let inner_weak = Arc::clone(&inner_weak);

            Box::new(move || {
                let maybe_inner = inner_weak.lock().as_ref().and_then(Weak::upgrade);
                if let Some(inner) = maybe_inner {
                    inner.close(CloseTrigger::TransportClosed);
                }
            })
        });

        let inner = Arc::new(Inner {
            id,
            producer_id,
            kind,
            r#type,
            rtp_parameters,
            pause_state,
            executor,
            channel,
            handlers,
            app_data,
            transport,
            producer_registry,
            lifecycle: Lifecycle::default(),
            subscription_handler: Mutex::new(Some(subscription_handler)),
            _on_transport_close_handler: Mutex::new(on_transport_close_handler),
        });

        inner_weak.lock().replace(Arc::downgrade(&inner));

        // Transport may have been closed while the creation request was in flight
        if inner.transport.closed() {
            inner.close(CloseTrigger::TransportClosed);
        }

        Self { inner }
    }

    /// Consumer id.
    #[must_use]
    pub fn id(&self) -> ConsumerId {
        self.inner.id
    }

    /// Associated Producer id.
    #[must_use]
    pub fn producer_id(&self) -> ProducerId {
        self.inner.producer_id
    }

    /// Associated producer, looked up on demand. `None` once the producer is gone.
    #[must_use]
    pub fn producer(&self) -> Option<Producer> {
        self.inner.producer_registry.producer(&self.inner.producer_id)
    }

    /// Transport this consumer belongs to.
    #[must_use]
    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.inner.transport
    }

    /// Media kind.
    #[must_use]
    pub fn kind(&self) -> MediaKind {
        self.inner.kind
    }

    /// Consumer RTP parameters.
    #[must_use]
    pub fn rtp_parameters(&self) -> &RtpParameters {
        &self.inner.rtp_parameters
    }

    /// Consumer type.
    #[must_use]
    pub fn r#type(&self) -> ConsumerType {
        self.inner.r#type
    }

    /// Whether the consumer is paused. It does not take into account whether the associated
    /// producer is paused.
    #[must_use]
    pub fn paused(&self) -> bool {
        self.inner.pause_state.lock().paused
    }

    /// Whether the associate Producer is paused.
    #[must_use]
    pub fn producer_paused(&self) -> bool {
        self.inner.pause_state.lock().producer_paused
    }

    /// Custom application data.
    #[must_use]
    pub fn app_data(&self) -> &AppData {
        &self.inner.app_data
    }

    /// Lifecycle state of the consumer.
    #[must_use]
    pub fn state(&self) -> EntityState {
        self.inner.lifecycle.state()
    }

    /// Whether the consumer is closed.
    #[must_use]
    pub fn closed(&self) -> bool {
        self.inner.lifecycle.closed()
    }

    /// Pauses the consumer (no RTP is sent to the consuming endpoint).
    pub async fn pause(&self) -> Result<(), RequestError> {
        debug!("pause()");

        self.inner
            .channel
            .request(ConsumerPauseRequest {
                internal: self.inner.internal(),
            })
            .await?;

        let flipped = self
            .inner
            .pause_state
            .lock()
            .apply(|state| state.paused = true);

        if flipped == Some(true) {
            self.inner.handlers.pause.call_simple();
        }

        Ok(())
    }

    /// Resumes the consumer (RTP is sent again to the consuming endpoint).
    pub async fn resume(&self) -> Result<(), RequestError> {
        debug!("resume()");

        self.inner
            .channel
            .request(ConsumerResumeRequest {
                internal: self.inner.internal(),
            })
            .await?;

        let flipped = self
            .inner
            .pause_state
            .lock()
            .apply(|state| state.paused = false);

        if flipped == Some(false) {
            self.inner.handlers.resume.call_simple();
        }

        Ok(())
    }

    /// Callback is called when the consumer or its producer is paused and the consumer was not
    /// paused before.
    pub fn on_pause<F: Fn() + Send + Sync + 'static>(&self, callback: F) -> HandlerId {
        self.inner.handlers.pause.add(Arc::new(callback))
    }

    /// Callback is called when the consumer or its producer is resumed and both are resumed now.
    pub fn on_resume<F: Fn() + Send + Sync + 'static>(&self, callback: F) -> HandlerId {
        self.inner.handlers.resume.add(Arc::new(callback))
    }

    /// Callback is called when the associated producer is paused.
    pub fn on_producer_pause<F: Fn() + Send + Sync + 'static>(&self, callback: F) -> HandlerId {
        self.inner.handlers.producer_pause.add(Arc::new(callback))
    }

    /// Callback is called when the associated producer is resumed.
    pub fn on_producer_resume<F: Fn() + Send + Sync + 'static>(&self, callback: F) -> HandlerId {
        self.inner.handlers.producer_resume.add(Arc::new(callback))
    }

    /// Callback is called when the associated producer is closed for whatever reason. The consumer
    /// itself is also closed. A `on_close` callback is called right after this.
    pub fn on_producer_close<F: FnOnce() + Send + 'static>(&self, callback: F) -> HandlerId {
        self.inner.handlers.producer_close.add(Box::new(callback))
    }

    /// Callback is called when the transport this consumer belongs to is closed for whatever
    /// reason. The consumer itself is also closed. A `on_close` callback is called right after
    /// this.
    pub fn on_transport_close<F: FnOnce() + Send + 'static>(&self, callback: F) -> HandlerId {
        self.inner.handlers.transport_close.add(Box::new(callback))
    }

    /// Callback is called when the consumer is closed for whatever reason.
    ///
    /// NOTE: Callback will be called in place if consumer is already closed.
    pub fn on_close<F: FnOnce() + Send + 'static>(&self, callback: F) -> HandlerId {
        let handler_id = self.inner.handlers.close.add(Box::new(callback));
        if self.inner.lifecycle.closed() {
            self.inner.handlers.close.call_simple();
        }
        handler_id
    }

    /// Closes the consumer.
    pub fn close(&self) {
        self.inner.close(CloseTrigger::LocalClose);
    }

    /// Downgrade `Consumer` to [`WeakConsumer`] instance.
    #[must_use]
    pub fn downgrade(&self) -> WeakConsumer {
        WeakConsumer {
            inner: Arc::downgrade(&self.inner),
        }
    }
}

/// [`WeakConsumer`] doesn't own consumer instance in the worker and will not prevent one from
/// being destroyed once last instance of regular [`Consumer`] is dropped.
///
/// [`WeakConsumer`] vs [`Consumer`] is similar to [`Weak`] vs [`Arc`].
#[derive(Clone)]
pub struct WeakConsumer {
    inner: Weak<Inner>,
}

impl fmt::Debug for WeakConsumer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WeakConsumer").finish()
    }
}

impl WeakConsumer {
    /// Attempts to upgrade `WeakConsumer` to [`Consumer`] if last instance of one wasn't dropped
    /// yet.
    #[must_use]
    pub fn upgrade(&self) -> Option<Consumer> {
        let inner = self.inner.upgrade()?;

        Some(Consumer { inner })
    }
}
