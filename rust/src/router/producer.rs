//! Media sources injected into a router.


use crate::data_structures::AppData;
use crate::messages::{
    ProducerCloseRequest, ProducerInternal, ProducerPauseRequest, ProducerResumeRequest,
};
use crate::ortc::RtpMapping;
use crate::router::lifecycle::{CloseTrigger, EntityState, Lifecycle};
use crate::rtp_parameters::{MediaKind, RtpParameters};
use crate::transport::Transport;
use crate::uuid_based_wrapper_type;
use crate::worker::{Channel, RequestError};
use async_executor::Executor;
use event_listener_primitives::{Bag, BagOnce, HandlerId};
use log::{debug, error};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

uuid_based_wrapper_type!(
    /// [`Producer`] identifier.
    ProducerId
);

/// [`Producer`] options.
#[derive(Debug, Clone)]
#[non_exhaustive]
pub struct ProducerOptions {
    /// Producer id, should most likely not be specified explicitly. Used when a producer has to
    /// have the same id in two routers connected by pipe transports.
    pub id: Option<ProducerId>,
    /// Media kind.
    pub kind: MediaKind,
    /// RTP parameters defining what the endpoint is sending.
    pub rtp_parameters: RtpParameters,
    /// Mapping of the producer's codec payload types and encodings onto the router's ones.
    pub rtp_mapping: RtpMapping,
    /// RTP parameters every consumer of this producer is derived from.
    pub consumable_rtp_parameters: RtpParameters,
    /// Whether the producer must start in paused mode. Default false.
    pub paused: bool,
    /// Just for video. Time (in ms) before asking the sender for a new key frame after having
    /// asked a previous one. Default 0.
    pub key_frame_request_delay: u32,
    /// Custom application data, must be an object if given.
    pub app_data: Value,
}

impl ProducerOptions {
    /// Create producer options with the given parameters and default everything else.
    #[must_use]
    pub fn new(
        kind: MediaKind,
        rtp_parameters: RtpParameters,
        consumable_rtp_parameters: RtpParameters,
    ) -> Self {
        Self {
            id: None,
            kind,
            rtp_parameters,
            rtp_mapping: RtpMapping::default(),
            consumable_rtp_parameters,
            paused: false,
            key_frame_request_delay: 0,
            app_data: Value::Null,
        }
    }
}

/// Producer type.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ProducerType {
    /// A single RTP stream is received with no spatial/temporal layers.
    Simple,
    /// Two or more RTP streams are received, each of them with one or more temporal layers.
    Simulcast,
    /// A single RTP stream is received with spatial/temporal layers.
    Svc,
}

#[derive(Default)]
struct Handlers {
    pause: Bag<Arc<dyn Fn() + Send + Sync>>,
    resume: Bag<Arc<dyn Fn() + Send + Sync>>,
    transport_close: BagOnce<Box<dyn FnOnce() + Send>>,
    close: BagOnce<Box<dyn FnOnce() + Send>>,
}

struct Inner {
    id: ProducerId,
    kind: MediaKind,
    r#type: ProducerType,
    rtp_parameters: RtpParameters,
    consumable_rtp_parameters: RtpParameters,
    paused: AtomicBool,
    executor: Arc<Executor<'static>>,
    channel: Channel,
    handlers: Arc<Handlers>,
    app_data: AppData,
    transport: Arc<dyn Transport>,
    lifecycle: Lifecycle,
    // Drop subscription to transport close when producer itself is dropped
    _on_transport_close_handler: Mutex<HandlerId>,
}

impl Drop for Inner {
    fn drop(&mut self) {
        debug!("drop()");

        self.close(CloseTrigger::LocalClose);
    }
}

impl Inner {
    fn internal(&self) -> ProducerInternal {
        ProducerInternal {
            router_id: self.transport.router_id(),
            transport_id: self.transport.id(),
            producer_id: self.id,
        }
    }

    fn close(&self, trigger: CloseTrigger) {
        let Some(_closing) = self.lifecycle.begin_close() else {
            return;
        };

        debug!("close() [id:{}, trigger:{:?}]", self.id, trigger);

        if trigger == CloseTrigger::TransportClosed {
            self.handlers.transport_close.call_simple();
        }
        self.handlers.close.call_simple();

        if trigger.needs_close_request() {
            let channel = self.channel.clone();
            let request = ProducerCloseRequest {
                internal: self.internal(),
            };
            let transport = Arc::clone(&self.transport);

            self.executor
                .spawn(async move {
                    if let Err(error) = channel.request(request).await {
                        error!("producer closing failed on drop: {}", error);
                    }

                    drop(transport);
                })
                .detach();
        }
    }
}

/// A producer represents an audio or video source being injected into a router. It's created on
/// top of a transport that defines how the media packets are carried.
#[derive(Clone)]
#[must_use = "Producer will be closed on drop, make sure to keep it around for as long as needed"]
pub struct Producer {
    inner: Arc<Inner>,
}

impl fmt::Debug for Producer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Producer")
            .field("id", &self.inner.id)
            .field("kind", &self.inner.kind)
            .field("type", &self.inner.r#type)
            .field("rtp_parameters", &self.inner.rtp_parameters)
            .field("consumable_rtp_parameters", &self.inner.consumable_rtp_parameters)
            .field("paused", &self.inner.paused)
            .field("transport", &self.inner.transport)
            .field("state", &self.inner.lifecycle)
            .finish()
    }
}

impl Producer {
    #[allow(clippy::too_many_arguments)]
    pub(super) fn new(
        id: ProducerId,
        kind: MediaKind,
        r#type: ProducerType,
        rtp_parameters: RtpParameters,
        consumable_rtp_parameters: RtpParameters,
        paused: bool,
        executor: Arc<Executor<'static>>,
        channel: Channel,
        app_data: AppData,
        transport: Arc<dyn Transport>,
    ) -> Self {
        debug!("new()");

        let handlers = Arc::<Handlers>::default();
        let inner_weak = Arc::<Mutex<Option<Weak<Inner>>>>::default();

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
            kind,
            r#type,
            rtp_parameters,
            consumable_rtp_parameters,
            paused: AtomicBool::new(paused),
            executor,
            channel,
            handlers,
            app_data,
            transport,
            lifecycle: Lifecycle::default(),
            _on_transport_close_handler: Mutex::new(on_transport_close_handler),
        });

        inner_weak.lock().replace(Arc::downgrade(&inner));

        // Transport may have been closed while the creation request was in flight
        if inner.transport.closed() {
            inner.close(CloseTrigger::TransportClosed);
        }

        Self { inner }
    }

    /// Producer id.
    #[must_use]
    pub fn id(&self) -> ProducerId {
        self.inner.id
    }

    /// Transport this producer belongs to.
    #[must_use]
    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.inner.transport
    }

    /// Media kind.
    #[must_use]
    pub fn kind(&self) -> MediaKind {
        self.inner.kind
    }

    /// Producer RTP parameters.
    #[must_use]
    pub fn rtp_parameters(&self) -> &RtpParameters {
        &self.inner.rtp_parameters
    }

    /// RTP parameters every consumer of this producer is derived from.
    #[must_use]
    pub fn consumable_rtp_parameters(&self) -> &RtpParameters {
        &self.inner.consumable_rtp_parameters
    }

    /// Producer type, as reported by the worker.
    #[must_use]
    pub fn r#type(&self) -> ProducerType {
        self.inner.r#type
    }

    /// Whether the producer is paused.
    #[must_use]
    pub fn paused(&self) -> bool {
        self.inner.paused.load(Ordering::SeqCst)
    }

    /// Custom application data.
    #[must_use]
    pub fn app_data(&self) -> &AppData {
        &self.inner.app_data
    }

    /// Lifecycle state of the producer.
    #[must_use]
    pub fn state(&self) -> EntityState {
        self.inner.lifecycle.state()
    }

    /// Whether the producer is closed.
    #[must_use]
    pub fn closed(&self) -> bool {
        self.inner.lifecycle.closed()
    }

    /// Pauses the producer (no RTP is sent to its associated consumers).
    pub async fn pause(&self) -> Result<(), RequestError> {
        debug!("pause()");

        self.inner
            .channel
            .request(ProducerPauseRequest {
                internal: self.inner.internal(),
            })
            .await?;

        let was_paused = self.inner.paused.swap(true, Ordering::SeqCst);

        if !was_paused {
            self.inner.handlers.pause.call_simple();
        }

        Ok(())
    }

    /// Resumes the producer (RTP is sent again to its associated consumers).
    pub async fn resume(&self) -> Result<(), RequestError> {
        debug!("resume()");

        self.inner
            .channel
            .request(ProducerResumeRequest {
                internal: self.inner.internal(),
            })
            .await?;

        let was_paused = self.inner.paused.swap(false, Ordering::SeqCst);

        if was_paused {
            self.inner.handlers.resume.call_simple();
        }

        Ok(())
    }

    /// Callback is called when the producer is paused.
    pub fn on_pause<F: Fn() + Send + Sync + 'static>(&self, callback: F) -> HandlerId {
        self.inner.handlers.pause.add(Arc::new(callback))
    }

    /// Callback is called when the producer is resumed.
    pub fn on_resume<F: Fn() + Send + Sync + 'static>(&self, callback: F) -> HandlerId {
        self.inner.handlers.resume.add(Arc::new(callback))
    }

    /// Callback is called when the transport this producer belongs to is closed for whatever
    /// reason. The producer itself is also closed. A `on_close` callback is called right after
    /// this.
    pub fn on_transport_close<F: FnOnce() + Send + 'static>(&self, callback: F) -> HandlerId {
        self.inner.handlers.transport_close.add(Box::new(callback))
    }

    /// Callback is called when the producer is closed for whatever reason.
    ///
    /// NOTE: Callback will be called in place if producer is already closed.
    pub fn on_close<F: FnOnce() + Send + 'static>(&self, callback: F) -> HandlerId {
        let handler_id = self.inner.handlers.close.add(Box::new(callback));
        if self.inner.lifecycle.closed() {
            self.inner.handlers.close.call_simple();
        }
        handler_id
    }

    /// Closes the producer. The worker closes every consumer bound to it and notifies them with
    /// `producerclose`.
    pub fn close(&self) {
        self.inner.close(CloseTrigger::LocalClose);
    }

    /// Downgrade `Producer` to [`WeakProducer`] instance.
    #[must_use]
    pub fn downgrade(&self) -> WeakProducer {
        WeakProducer {
            inner: Arc::downgrade(&self.inner),
        }
    }
}

/// [`WeakProducer`] doesn't own producer instance in the worker and will not prevent one from
/// being destroyed once last instance of regular [`Producer`] is dropped.
///
/// [`WeakProducer`] vs [`Producer`] is similar to [`Weak`] vs [`Arc`].
#[derive(Clone)]
pub struct WeakProducer {
    inner: Weak<Inner>,
}

impl fmt::Debug for WeakProducer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WeakProducer").finish()
    }
}

impl WeakProducer {
    /// Attempts to upgrade `WeakProducer` to [`Producer`] if last instance of one wasn't dropped
    /// yet.
    #[must_use]
    pub fn upgrade(&self) -> Option<Producer> {
        let inner = self.inner.upgrade()?;

        Some(Producer { inner })
    }

    /// Placeholder that holds an id in a registry while the producer is being created in the
    /// worker. Never upgrades.
    pub(crate) fn reserved() -> Self {
        Self { inner: Weak::new() }
    }

    /// Whether both handles point to the same producer instance.
    pub(crate) fn ptr_eq(&self, other: &Self) -> bool {
        Weak::ptr_eq(&self.inner, &other.inner)
    }
}
