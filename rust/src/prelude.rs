//! relayctl prelude.
//!
//! Re-exports commonly used traits and structs from this crate.
//!
//! # Examples
//!
//! Import the prelude with:
//!
//! ```
//! # #[allow(unused_imports)]
//! use relayctl::prelude::*;
//! ```
pub use crate::worker::{Channel, ChannelSettings, RequestError};

pub use crate::router::lifecycle::{CloseTrigger, EntityState};
pub use crate::router::registry::ProducerRegistry;
pub use crate::router::RouterId;

pub use crate::pipe_transport::{
    PipeTransport, PipeTransportData, PipeTransportRemoteParameters, WeakPipeTransport,
};
pub use crate::transport::{
    ConsumeError, ProduceError, Transport, TransportCreateParams, TransportGeneric, TransportId,
};

pub use crate::consumer::{Consumer, ConsumerId, ConsumerOptions, ConsumerType, WeakConsumer};
pub use crate::producer::{Producer, ProducerId, ProducerOptions, ProducerType, WeakProducer};

pub use crate::data_structures::{AppData, AppDataError, TransportProtocol, TransportTuple};
pub use crate::ortc::RtpMapping;
pub use crate::rtp_parameters::{
    MediaKind, MimeTypeAudio, MimeTypeVideo, RtcpFeedback, RtcpParameters,
    RtpCodecParameters, RtpCodecParametersParameters, RtpEncodingParameters,
    RtpHeaderExtensionParameters, RtpHeaderExtensionUri, RtpParameters,
};
