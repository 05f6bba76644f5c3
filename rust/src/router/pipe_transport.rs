//! Transport connecting two routers directly.


use crate::consumer::{Consumer, ConsumerId, ConsumerOptions, ConsumerType};
use crate::data_structures::{AppData, TransportTuple};
use crate::messages::{
    PipeTransportConnectData, PipeTransportConnectRequest, TransportCloseRequest,
    TransportInternal,
};
use crate::ortc;
use crate::producer::{Producer, ProducerId, ProducerOptions, WeakProducer};
use crate::router::registry::{ConsumerRegistry, ProducerRegistry, Registry};
use crate::router::transport::{TransportCreateParams, TransportImpl};
use crate::router::RouterId;
use crate::rtp_parameters::RtpParameters;
use crate::transport::{ConsumeError, ProduceError, Transport, TransportGeneric, TransportId};
use crate::worker::{Channel, RequestError};
use async_executor::Executor;
use async_trait::async_trait;
use event_listener_primitives::{Bag, BagOnce, HandlerId};
use log::{debug, error};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::IpAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

/// Pipe transport data reported by the worker when the transport was created.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
#[non_exhaustive]
pub struct PipeTransportData {
    /// The transport tuple. It refers to both RTP and RTCP, pipe transports always use RTCP-mux.
    pub tuple: TransportTuple,
}

impl PipeTransportData {
    /// Create pipe transport data from the tuple reported by the worker.
    #[must_use]
    pub fn new(tuple: TransportTuple) -> Self {
        Self { tuple }
    }
}

/// Pipe transport remote parameters.
#[derive(Debug, Clone, Eq, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
#[non_exhaustive]
pub struct PipeTransportRemoteParameters {
    /// Remote IPv4 or IPv6.
    pub ip: IpAddr,
    /// Remote port.
    pub port: u16,
}

impl PipeTransportRemoteParameters {
    /// Create remote parameters for the given remote endpoint.
    #[must_use]
    pub fn new(ip: IpAddr, port: u16) -> Self {
        Self { ip, port }
    }
}

#[derive(Default)]
struct Handlers {
    new_producer: Bag<Arc<dyn Fn(&Producer) + Send + Sync>, Producer>,
    new_consumer: Bag<Arc<dyn Fn(&Consumer) + Send + Sync>, Consumer>,
    close: BagOnce<Box<dyn FnOnce() + Send>>,
}

struct Inner {
    id: TransportId,
    router_id: RouterId,
    executor: Arc<Executor<'static>>,
    channel: Channel,
    handlers: Arc<Handlers>,
    tuple: Mutex<TransportTuple>,
    app_data: AppData,
    producer_registry: ProducerRegistry,
    producers: Registry<ProducerId, WeakProducer>,
    consumers: ConsumerRegistry,
    closed: AtomicBool,
}

impl Drop for Inner {
    fn drop(&mut self) {
        debug!("drop()");

        self.close(true);
    }
}

impl Inner {
    fn close(&self, close_request: bool) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            debug!("close() [id:{}]", self.id);

            // Producers and consumers are subscribed to this and close with `TransportClosed`
            self.handlers.close.call_simple();

            // Whatever is left (entities already dropped) just leaves the registries
            for (producer_id, producer) in self.producers.drain() {
                self.producer_registry.remove_producer(&producer_id, &producer);
            }
            drop(self.consumers.drain());

            if close_request {
                let channel = self.channel.clone();
                let request = TransportCloseRequest {
                    internal: TransportInternal {
                        router_id: self.router_id,
                        transport_id: self.id,
                    },
                };

                self.executor
                    .spawn(async move {
                        if let Err(error) = channel.request(request).await {
                            error!("transport closing failed on drop: {}", error);
                        }
                    })
                    .detach();
            }
        }
    }
}

/// A pipe transport represents a network path through which RTP and RTCP is transmitted. Pipe
/// transports are intended to intercommunicate two routers collocated on the same host or on
/// separate hosts.
///
/// # Notes on usage
/// When calling [`PipeTransport::consume`], all RTP streams of the [`Producer`] are transmitted
/// verbatim, consumers created here are always of [`ConsumerType::Pipe`] type and their RTP
/// parameters are derived from the producer, never supplied by the caller.
#[derive(Clone)]
#[must_use = "Transport will be closed on drop, make sure to keep it around for as long as needed"]
pub struct PipeTransport {
    inner: Arc<Inner>,
}

impl fmt::Debug for PipeTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PipeTransport")
            .field("id", &self.inner.id)
            .field("router_id", &self.inner.router_id)
            .field("tuple", &self.inner.tuple)
            .field("producers", &self.inner.producers)
            .field("consumers", &self.inner.consumers)
            .field("closed", &self.inner.closed)
            .finish()
    }
}

#[async_trait]
impl Transport for PipeTransport {
    fn id(&self) -> TransportId {
        self.inner.id
    }

    fn router_id(&self) -> RouterId {
        self.inner.router_id
    }

    fn app_data(&self) -> &AppData {
        &self.inner.app_data
    }

    fn closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    async fn produce(&self, producer_options: ProducerOptions) -> Result<Producer, ProduceError> {
        debug!("produce()");

        let producer = self.produce_impl(producer_options).await?;

        // Closed right away if the transport got closed while the request was in flight
        if !producer.closed() {
            self.inner.handlers.new_producer.call_simple(&producer);
        }

        Ok(producer)
    }

    async fn consume(&self, consumer_options: ConsumerOptions) -> Result<Consumer, ConsumeError> {
        debug!("consume()");

        let consumer = self.consume_impl(consumer_options).await?;

        if !consumer.closed() {
            self.inner.handlers.new_consumer.call_simple(&consumer);
        }

        Ok(consumer)
    }

    fn producer_ids(&self) -> Vec<ProducerId> {
        self.inner.producers.ids()
    }

    fn consumer_ids(&self) -> Vec<ConsumerId> {
        self.inner.consumers.ids()
    }

    fn producer(&self, producer_id: &ProducerId) -> Option<Producer> {
        self.inner.producers.get(producer_id)?.upgrade()
    }

    fn consumer(&self, consumer_id: &ConsumerId) -> Option<Consumer> {
        self.inner.consumers.get(consumer_id)?.upgrade()
    }

    fn on_new_producer(
        &self,
        callback: Arc<dyn Fn(&Producer) + Send + Sync + 'static>,
    ) -> HandlerId {
        self.inner.handlers.new_producer.add(callback)
    }

    fn on_new_consumer(
        &self,
        callback: Arc<dyn Fn(&Consumer) + Send + Sync + 'static>,
    ) -> HandlerId {
        self.inner.handlers.new_consumer.add(callback)
    }

    fn on_close(&self, callback: Box<dyn FnOnce() + Send + 'static>) -> HandlerId {
        let handler_id = self.inner.handlers.close.add(callback);
        if self.inner.closed.load(Ordering::Relaxed) {
            self.inner.handlers.close.call_simple();
        }
        handler_id
    }

    fn close(&self) {
        self.inner.close(true);
    }
}

#[async_trait]
impl TransportGeneric for PipeTransport {
    type RemoteParameters = PipeTransportRemoteParameters;

    /// Provide the pipe transport with the remote parameters. The tuple is replaced with the one
    /// reported by the worker, on failure it stays as it was.
    async fn connect(
        &self,
        remote_parameters: PipeTransportRemoteParameters,
    ) -> Result<(), RequestError> {
        debug!("connect()");

        let response = self
            .inner
            .channel
            .request(PipeTransportConnectRequest {
                internal: self.internal(),
                data: PipeTransportConnectData {
                    ip: remote_parameters.ip,
                    port: remote_parameters.port,
                },
            })
            .await?;

        *self.inner.tuple.lock() = response.tuple;

        Ok(())
    }
}

impl TransportImpl for PipeTransport {
    fn channel(&self) -> &Channel {
        &self.inner.channel
    }

    fn executor(&self) -> &Arc<Executor<'static>> {
        &self.inner.executor
    }

    fn producer_registry(&self) -> &ProducerRegistry {
        &self.inner.producer_registry
    }

    fn producers(&self) -> &Registry<ProducerId, WeakProducer> {
        &self.inner.producers
    }

    fn consumers(&self) -> &ConsumerRegistry {
        &self.inner.consumers
    }

    fn consumer_parameters(&self, producer: &Producer) -> (ConsumerType, RtpParameters) {
        (
            ConsumerType::Pipe,
            ortc::get_pipe_consumer_rtp_parameters(producer.consumable_rtp_parameters()),
        )
    }
}

impl PipeTransport {
    /// Wrap a pipe transport the worker has already created.
    pub fn new(data: PipeTransportData, params: TransportCreateParams) -> Self {
        let TransportCreateParams {
            router_id,
            transport_id,
            executor,
            channel,
            producer_registry,
            app_data,
        } = params;

        debug!("new() [id:{}]", transport_id);

        let inner = Arc::new(Inner {
            id: transport_id,
            router_id,
            executor,
            channel,
            handlers: Arc::<Handlers>::default(),
            tuple: Mutex::new(data.tuple),
            app_data,
            producer_registry,
            producers: Registry::new(),
            consumers: ConsumerRegistry::new(),
            closed: AtomicBool::new(false),
        });

        Self { inner }
    }

    /// The transport tuple. It refers to both RTP and RTCP, pipe transports always use RTCP-mux.
    #[must_use]
    pub fn tuple(&self) -> TransportTuple {
        *self.inner.tuple.lock()
    }

    /// Downgrade `PipeTransport` to [`WeakPipeTransport`] instance.
    #[must_use]
    pub fn downgrade(&self) -> WeakPipeTransport {
        WeakPipeTransport {
            inner: Arc::downgrade(&self.inner),
        }
    }
}

/// [`WeakPipeTransport`] doesn't own pipe transport instance in the worker and will not prevent
/// one from being destroyed once last instance of regular [`PipeTransport`] is dropped.
///
/// [`WeakPipeTransport`] vs [`PipeTransport`] is similar to [`Weak`] vs [`Arc`].
#[derive(Clone)]
pub struct WeakPipeTransport {
    inner: Weak<Inner>,
}

impl fmt::Debug for WeakPipeTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WeakPipeTransport").finish()
    }
}

impl WeakPipeTransport {
    /// Attempts to upgrade `WeakPipeTransport` to [`PipeTransport`] if last instance of one wasn't
    /// dropped yet.
    #[must_use]
    pub fn upgrade(&self) -> Option<PipeTransport> {
        let inner = self.inner.upgrade()?;

        Some(PipeTransport { inner })
    }
}
