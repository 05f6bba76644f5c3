//! RTP parameters validation and derivation helpers.


use crate::rtp_parameters::{
    RtcpFeedback, RtpCodecParameters, RtpCodecParametersParametersValue, RtpHeaderExtensionUri,
    RtpParameters,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Mapping of a producer codec payload type to the payload type used inside the router.
#[derive(Debug, Default, Clone, Eq, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RtpMappingCodec {
    /// Payload type as sent by the endpoint.
    pub payload_type: u8,
    /// Payload type used inside the router.
    pub mapped_payload_type: u8,
}

/// Mapping of a producer encoding to the SSRC used inside the router.
#[derive(Debug, Default, Clone, Eq, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RtpMappingEncoding {
    /// SSRC as sent by the endpoint.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ssrc: Option<u32>,
    /// RID as sent by the endpoint.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rid: Option<String>,
    /// Scalability mode of the stream.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scalability_mode: Option<String>,
    /// SSRC used inside the router.
    pub mapped_ssrc: u32,
}

/// Codec and encoding mapping of a producer, computed by the router layer.
#[derive(Debug, Default, Clone, Eq, PartialEq, Deserialize, Serialize)]
pub struct RtpMapping {
    /// Codec mappings.
    pub codecs: Vec<RtpMappingCodec>,
    /// Encoding mappings.
    pub encodings: Vec<RtpMappingEncoding>,
}

/// Error caused by invalid RTP parameters.
#[derive(Debug, Error, Eq, PartialEq)]
pub enum RtpParametersError {
    /// RTX `apt` parameter must be a payload type number.
    #[error("invalid codec apt parameter {0}")]
    InvalidAptParameter(String),
}

/// Validates RTP parameters.
pub fn validate_rtp_parameters(rtp_parameters: &RtpParameters) -> Result<(), RtpParametersError> {
    for codec in rtp_parameters.codecs.iter() {
        validate_rtp_codec_parameters(codec)?;
    }

    Ok(())
}

fn validate_rtp_codec_parameters(codec: &RtpCodecParameters) -> Result<(), RtpParametersError> {
    for (key, value) in codec.parameters().iter() {
        if key.as_ref() == "apt" {
            if let RtpCodecParametersParametersValue::String(string) = value {
                return Err(RtpParametersError::InvalidAptParameter(string.to_string()));
            }
        }
    }

    Ok(())
}

/// Generate RTP parameters for a pipe consumer from the consumable RTP parameters of its producer.
///
/// Both ends of a pipe are routers, so there is nobody to negotiate with: media codecs are kept as
/// is, RTX is dropped, feedback is reduced to what is meaningful across a pipe and the transport
/// related header extensions are removed. Encodings (and thus SSRCs) are kept, minus their RTX
/// streams, so that all streams of the producer are relayed one to one.
///
/// The result depends on `consumable_params` only.
#[must_use]
pub fn get_pipe_consumer_rtp_parameters(consumable_params: &RtpParameters) -> RtpParameters {
    let codecs = consumable_params
        .codecs
        .iter()
        .filter(|codec| !codec.is_rtx())
        .cloned()
        .map(|mut codec| {
            codec
                .rtcp_feedback_mut()
                .retain(|fb| matches!(fb, RtcpFeedback::NackPli | RtcpFeedback::CcmFir));
            codec
        })
        .collect();

    let header_extensions = consumable_params
        .header_extensions
        .iter()
        .filter(|ext| {
            !matches!(
                ext.uri,
                RtpHeaderExtensionUri::Mid
                    | RtpHeaderExtensionUri::AbsSendTime
                    | RtpHeaderExtensionUri::TransportWideCcDraft01
            )
        })
        .cloned()
        .collect();

    // No RTX across a pipe
    let encodings = consumable_params
        .encodings
        .iter()
        .cloned()
        .map(|mut encoding| {
            encoding.rtx = None;
            encoding
        })
        .collect();

    RtpParameters {
        mid: None,
        codecs,
        header_extensions,
        encodings,
        rtcp: consumable_params.rtcp.clone(),
    }
}
