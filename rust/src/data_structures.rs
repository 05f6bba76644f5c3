//! Miscellaneous data structures shared by transports, producers and consumers.


use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::net::IpAddr;
use std::ops::Deref;
use thiserror::Error;

/// Error returned when custom application data is not a mapping.
#[derive(Debug, Error, Eq, PartialEq)]
pub enum AppDataError {
    /// Application data was given, but it is not an object.
    #[error("if given, app data must be an object, got {found}")]
    NotAnObject {
        /// JSON type of the rejected value.
        found: &'static str,
    },
}

/// Custom application data attached to transports, producers and consumers.
///
/// Always a mapping of unique keys to arbitrary values. Use [`AppData::from_value`] to validate a
/// raw value at the API boundary.
#[derive(Debug, Default, Clone, Eq, PartialEq, Deserialize, Serialize)]
#[serde(transparent)]
pub struct AppData(Map<String, Value>);

impl Deref for AppData {
    type Target = Map<String, Value>;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl From<Map<String, Value>> for AppData {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}

impl TryFrom<Value> for AppData {
    type Error = AppDataError;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        Self::from_value(value)
    }
}

impl AppData {
    /// Empty application data.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate raw application data. `null` stands for "not given" and becomes an empty mapping,
    /// an object is taken as is, anything else is rejected.
    pub fn from_value(value: Value) -> Result<Self, AppDataError> {
        match value {
            Value::Null => Ok(Self::default()),
            Value::Object(map) => Ok(Self(map)),
            Value::Bool(_) => Err(AppDataError::NotAnObject { found: "boolean" }),
            Value::Number(_) => Err(AppDataError::NotAnObject { found: "number" }),
            Value::String(_) => Err(AppDataError::NotAnObject { found: "string" }),
            Value::Array(_) => Err(AppDataError::NotAnObject { found: "array" }),
        }
    }

    /// Consume and return the underlying mapping.
    #[must_use]
    pub fn into_inner(self) -> Map<String, Value> {
        self.0
    }
}

/// Transport protocol.
#[derive(Debug, Copy, Clone, Ord, PartialOrd, Eq, PartialEq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportProtocol {
    /// TCP.
    Tcp,
    /// UDP.
    Udp,
}

/// Transport tuple, local endpoint and (once connected) remote endpoint of a transport.
#[derive(Debug, Copy, Clone, Ord, PartialOrd, Eq, PartialEq, Hash, Deserialize, Serialize)]
#[serde(untagged)]
pub enum TransportTuple {
    /// Transport tuple with remote endpoint info.
    #[serde(rename_all = "camelCase")]
    WithRemote {
        /// Local IP address.
        local_ip: IpAddr,
        /// Local port.
        local_port: u16,
        /// Remote IP address.
        remote_ip: IpAddr,
        /// Remote port.
        remote_port: u16,
        /// Protocol
        protocol: TransportProtocol,
    },
    /// Transport tuple without remote endpoint info.
    #[serde(rename_all = "camelCase")]
    LocalOnly {
        /// Local IP address.
        local_ip: IpAddr,
        /// Local port.
        local_port: u16,
        /// Protocol
        protocol: TransportProtocol,
    },
}

impl TransportTuple {
    /// Local IP address.
    #[must_use]
    pub fn local_ip(&self) -> IpAddr {
        let (Self::WithRemote { local_ip, .. } | Self::LocalOnly { local_ip, .. }) = self;
        *local_ip
    }

    /// Local port.
    #[must_use]
    pub fn local_port(&self) -> u16 {
        let (Self::WithRemote { local_port, .. } | Self::LocalOnly { local_port, .. }) = self;
        *local_port
    }

    /// Protocol.
    #[must_use]
    pub fn protocol(&self) -> TransportProtocol {
        let (Self::WithRemote { protocol, .. } | Self::LocalOnly { protocol, .. }) = self;
        *protocol
    }

    /// Remote IP address, `None` until the transport is connected.
    #[must_use]
    pub fn remote_ip(&self) -> Option<IpAddr> {
        if let TransportTuple::WithRemote { remote_ip, .. } = self {
            Some(*remote_ip)
        } else {
            None
        }
    }

    /// Remote port, `None` until the transport is connected.
    #[must_use]
    pub fn remote_port(&self) -> Option<u16> {
        if let TransportTuple::WithRemote { remote_port, .. } = self {
            Some(*remote_port)
        } else {
            None
        }
    }
}
