//! Capabilities shared by all transport kinds.

use crate::consumer::{Consumer, ConsumerId, ConsumerOptions, ConsumerType};
use crate::data_structures::{AppData, AppDataError};
use crate::messages::{
    ConsumerInternal, ProducerInternal, TransportConsumeData, TransportConsumeRequest,
    TransportInternal, TransportProduceData, TransportProduceRequest,
};
use crate::ortc::{self, RtpParametersError};
use crate::producer::{Producer, ProducerId, ProducerOptions, WeakProducer};
use crate::router::registry::{ConsumerRegistry, ProducerRegistry, Registry};
use crate::router::RouterId;
use crate::rtp_parameters::RtpParameters;
use crate::uuid_based_wrapper_type;
use crate::worker::{Channel, RequestError};
use async_executor::Executor;
use async_trait::async_trait;
use event_listener_primitives::HandlerId;
use log::debug;
use std::fmt::Debug;
use std::sync::Arc;
use thiserror::Error;

uuid_based_wrapper_type!(
    /// [`Transport`] identifier.
    TransportId
);

/// Inputs of transport construction, supplied by the router layer that created the transport in
/// the worker.
#[derive(Debug, Clone)]
#[non_exhaustive]
pub struct TransportCreateParams {
    /// Router the transport belongs to.
    pub router_id: RouterId,
    /// Transport id, as used in the worker.
    pub transport_id: TransportId,
    /// Executor used for fire-and-forget requests (entity close requests).
    pub executor: Arc<Executor<'static>>,
    /// Channel to the worker that hosts the router.
    pub channel: Channel,
    /// Producers of the router, shared by all of its transports.
    pub producer_registry: ProducerRegistry,
    /// Custom application data.
    pub app_data: AppData,
}

impl TransportCreateParams {
    /// Create transport construction parameters with empty application data.
    #[must_use]
    pub fn new(
        router_id: RouterId,
        transport_id: TransportId,
        executor: Arc<Executor<'static>>,
        channel: Channel,
        producer_registry: ProducerRegistry,
    ) -> Self {
        Self {
            router_id,
            transport_id,
            executor,
            channel,
            producer_registry,
            app_data: AppData::default(),
        }
    }
}

/// Error that caused [`Transport::produce`] to fail.
#[derive(Debug, Error)]
pub enum ProduceError {
    /// Application data is not an object.
    #[error("Invalid app data: {0}")]
    InvalidAppData(AppDataError),
    /// Producer with the same id already exists.
    #[error("Producer with the same id \"{0}\" already exists")]
    AlreadyExists(ProducerId),
    /// Transport is closed.
    #[error("Transport is closed")]
    TransportClosed,
    /// RTP parameters validation error.
    #[error("RTP parameters validation error: {0}")]
    FailedRtpParametersValidation(RtpParametersError),
    /// Request to worker failed.
    #[error("Request to worker failed: {0}")]
    Request(RequestError),
}

/// Error that caused [`Transport::consume`] to fail.
#[derive(Debug, Error)]
pub enum ConsumeError {
    /// Application data is not an object.
    #[error("Invalid app data: {0}")]
    InvalidAppData(AppDataError),
    /// Producer with specified id not found.
    #[error("Producer with id \"{0}\" not found")]
    ProducerNotFound(ProducerId),
    /// Transport is closed.
    #[error("Transport is closed")]
    TransportClosed,
    /// Request to worker failed.
    #[error("Request to worker failed: {0}")]
    Request(RequestError),
}

/// A transport connects an endpoint with a router and carries media in both directions. Producers
/// are created on a transport to inject media, consumers to extract it.
#[async_trait]
pub trait Transport: Debug + Send + Sync {
    /// Transport id.
    fn id(&self) -> TransportId;

    /// Id of the router this transport belongs to.
    fn router_id(&self) -> RouterId;

    /// Custom application data.
    fn app_data(&self) -> &AppData;

    /// Whether the transport is closed.
    fn closed(&self) -> bool;

    /// Instructs the router to receive audio or video RTP (or SRTP depending on the transport).
    /// This is the way to inject media into the worker.
    async fn produce(&self, producer_options: ProducerOptions) -> Result<Producer, ProduceError>;

    /// Instructs the router to send audio or video RTP (or SRTP depending on the transport).
    /// This is the way to extract media from the worker.
    ///
    /// # Notes on usage
    /// The producer is looked up in the producer registry of the router, it doesn't have to belong
    /// to this transport.
    async fn consume(&self, consumer_options: ConsumerOptions) -> Result<Consumer, ConsumeError>;

    /// Ids of producers created on this transport.
    fn producer_ids(&self) -> Vec<ProducerId>;

    /// Ids of consumers created on this transport.
    fn consumer_ids(&self) -> Vec<ConsumerId>;

    /// Producer created on this transport, if still open.
    fn producer(&self, producer_id: &ProducerId) -> Option<Producer>;

    /// Consumer created on this transport, if still open.
    fn consumer(&self, consumer_id: &ConsumerId) -> Option<Consumer>;

    /// Callback is called when a new producer is created.
    fn on_new_producer(
        &self,
        callback: Arc<dyn Fn(&Producer) + Send + Sync + 'static>,
    ) -> HandlerId;

    /// Callback is called when a new consumer is created.
    fn on_new_consumer(
        &self,
        callback: Arc<dyn Fn(&Consumer) + Send + Sync + 'static>,
    ) -> HandlerId;

    /// Callback is called when the transport is closed for whatever reason.
    ///
    /// NOTE: Callback will be called in place if transport is already closed.
    fn on_close(&self, callback: Box<dyn FnOnce() + Send + 'static>) -> HandlerId;

    /// Close the transport together with all of its producers and consumers.
    fn close(&self);
}

/// Operations whose signature differs between transport kinds.
#[async_trait]
pub trait TransportGeneric: Transport + Clone + 'static {
    /// Parameters of the remote endpoint, see [`TransportGeneric::connect`].
    type RemoteParameters: Debug + Send + 'static;

    /// Provide the transport with remote parameters.
    async fn connect(&self, remote_parameters: Self::RemoteParameters) -> Result<(), RequestError>;
}

#[async_trait]
pub(super) trait TransportImpl: TransportGeneric {
    fn channel(&self) -> &Channel;

    fn executor(&self) -> &Arc<Executor<'static>>;

    /// Producers of the whole router.
    fn producer_registry(&self) -> &ProducerRegistry;

    /// Producers created on this transport.
    fn producers(&self) -> &Registry<ProducerId, WeakProducer>;

    /// Consumers created on this transport.
    fn consumers(&self) -> &ConsumerRegistry;

    /// Consumer type and RTP parameters to use when consuming `producer` on this kind of
    /// transport. The only step of `consume` that differs between transport kinds.
    fn consumer_parameters(&self, producer: &Producer) -> (ConsumerType, RtpParameters);

    fn internal(&self) -> TransportInternal {
        TransportInternal {
            router_id: self.router_id(),
            transport_id: self.id(),
        }
    }

    async fn produce_impl(
        &self,
        producer_options: ProducerOptions,
    ) -> Result<Producer, ProduceError> {
        let ProducerOptions {
            id,
            kind,
            rtp_parameters,
            rtp_mapping,
            consumable_rtp_parameters,
            paused,
            key_frame_request_delay,
            app_data,
        } = producer_options;

        if self.closed() {
            return Err(ProduceError::TransportClosed);
        }

        let app_data = AppData::from_value(app_data).map_err(ProduceError::InvalidAppData)?;

        ortc::validate_rtp_parameters(&rtp_parameters)
            .map_err(ProduceError::FailedRtpParametersValidation)?;

        let producer_id = id.unwrap_or_else(ProducerId::new);

        // Id stays taken router-wide while the worker creates the producer
        let reservation = WeakProducer::reserved();
        if !self.producer_registry().insert(producer_id, reservation.clone()) {
            return Err(ProduceError::AlreadyExists(producer_id));
        }

        let response = match self
            .channel()
            .request(TransportProduceRequest {
                internal: ProducerInternal {
                    router_id: self.router_id(),
                    transport_id: self.id(),
                    producer_id,
                },
                data: TransportProduceData {
                    kind,
                    rtp_parameters: rtp_parameters.clone(),
                    rtp_mapping,
                    key_frame_request_delay,
                    paused,
                },
            })
            .await
        {
            Ok(response) => response,
            Err(error) => {
                self.producer_registry().remove_producer(&producer_id, &reservation);
                return Err(ProduceError::Request(error));
            }
        };

        let producer = Producer::new(
            producer_id,
            kind,
            response.r#type,
            rtp_parameters,
            consumable_rtp_parameters,
            paused,
            Arc::clone(self.executor()),
            self.channel().clone(),
            app_data,
            Arc::new(self.clone()),
        );

        self.producer_registry().replace(producer_id, producer.downgrade());
        self.producers().insert(producer_id, producer.downgrade());

        producer
            .on_close({
                let producer_registry = self.producer_registry().downgrade();
                let producers = self.producers().downgrade();
                let weak_producer = producer.downgrade();

                move || {
                    if let Some(producer_registry) = producer_registry.upgrade() {
                        producer_registry.remove_producer(&producer_id, &weak_producer);
                    }
                    if let Some(producers) = producers.upgrade() {
                        producers.remove_if(&producer_id, |entry| entry.ptr_eq(&weak_producer));
                    }
                }
            })
            .detach();

        Ok(producer)
    }

    async fn consume_impl(
        &self,
        consumer_options: ConsumerOptions,
    ) -> Result<Consumer, ConsumeError> {
        let ConsumerOptions {
            producer_id,
            app_data,
        } = consumer_options;

        if self.closed() {
            return Err(ConsumeError::TransportClosed);
        }

        let app_data = AppData::from_value(app_data).map_err(ConsumeError::InvalidAppData)?;

        let producer = self
            .producer_registry()
            .producer(&producer_id)
            .ok_or(ConsumeError::ProducerNotFound(producer_id))?;

        let (r#type, rtp_parameters) = self.consumer_parameters(&producer);
        let consumer_id = ConsumerId::new();

        debug!(
            "consume() [producerId:{}, consumerId:{}, type:{:?}]",
            producer_id, consumer_id, r#type
        );

        let response = self
            .channel()
            .request(TransportConsumeRequest {
                internal: ConsumerInternal {
                    router_id: self.router_id(),
                    transport_id: self.id(),
                    producer_id,
                    consumer_id,
                },
                data: TransportConsumeData {
                    kind: producer.kind(),
                    rtp_parameters: rtp_parameters.clone(),
                    r#type,
                    consumable_rtp_encodings: producer
                        .consumable_rtp_parameters()
                        .encodings
                        .clone(),
                },
            })
            .await
            .map_err(ConsumeError::Request)?;

        let consumer = Consumer::new(
            consumer_id,
            producer_id,
            producer.kind(),
            r#type,
            rtp_parameters,
            response.paused,
            response.producer_paused,
            Arc::clone(self.executor()),
            self.channel().clone(),
            app_data,
            Arc::new(self.clone()),
            self.producer_registry().clone(),
        );

        self.consumers().insert(consumer_id, consumer.downgrade());

        // Consumer leaves the registry on whichever of these comes first, removal is idempotent
        let remove_consumer = {
            let consumers = self.consumers().downgrade();

            move || {
                if let Some(consumers) = consumers.upgrade() {
                    consumers.remove(&consumer_id);
                }
            }
        };
        consumer.on_close(remove_consumer.clone()).detach();
        consumer.on_producer_close(remove_consumer).detach();

        Ok(consumer)
    }
}
