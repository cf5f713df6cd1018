// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Envelope format for bridged messages.
//!
//! Every message on the bus is a JSON object:
//! - `cluster_id`: the cluster the message concerns
//! - `kind`: type tag used for dispatch
//! - `payload`: the kind-specific message
//!
//! Reply envelopes carry the kind of the request they answer; the reply topic
//! (`<kind>Resp`) tells the two apart.

use std::fmt;
use std::str::FromStr;

use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::ProtocolError;

/// Maximum encoded envelope size (1 MB)
pub const MAX_ENVELOPE_SIZE: usize = 1024 * 1024;

/// Type tag of a bridged message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    /// Periodic cluster status report
    Heartbeat,
    /// Agent (re)connection
    Register,
    /// TLS material request
    Ssl,
    /// Update or install instruction
    Update,
}

impl MessageKind {
    pub const ALL: [MessageKind; 4] = [
        MessageKind::Heartbeat,
        MessageKind::Register,
        MessageKind::Ssl,
        MessageKind::Update,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            MessageKind::Heartbeat => "heartbeat",
            MessageKind::Register => "register",
            MessageKind::Ssl => "ssl",
            MessageKind::Update => "update",
        }
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MessageKind {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        MessageKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| ProtocolError::UnknownKind(s.to_string()))
    }
}

/// A typed message addressed to or from one cluster
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub cluster_id: Uuid,
    pub kind: MessageKind,
    pub payload: serde_json::Value,
}

impl Envelope {
    /// Wrap a payload in an envelope
    pub fn new<M: Serialize>(
        cluster_id: Uuid,
        kind: MessageKind,
        msg: &M,
    ) -> Result<Self, ProtocolError> {
        Ok(Self {
            cluster_id,
            kind,
            payload: serde_json::to_value(msg)?,
        })
    }

    /// Decode the payload as a concrete message
    pub fn decode<M: DeserializeOwned>(&self) -> Result<M, ProtocolError> {
        Ok(M::deserialize(&self.payload)?)
    }

    /// Encode the envelope for publishing
    pub fn to_bytes(&self) -> Result<Bytes, ProtocolError> {
        let encoded = serde_json::to_vec(self)?;
        if encoded.len() > MAX_ENVELOPE_SIZE {
            return Err(ProtocolError::EnvelopeTooLarge(encoded.len()));
        }
        Ok(Bytes::from(encoded))
    }

    /// Decode an envelope received from the bus
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, ProtocolError> {
        if bytes.len() > MAX_ENVELOPE_SIZE {
            return Err(ProtocolError::EnvelopeTooLarge(bytes.len()));
        }
        Ok(serde_json::from_slice(bytes)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::{SslCertRequest, VizierHeartbeat};

    #[test]
    fn test_message_kind_conversions() {
        assert_eq!("heartbeat".parse::<MessageKind>().unwrap(), MessageKind::Heartbeat);
        assert_eq!("ssl".parse::<MessageKind>().unwrap(), MessageKind::Ssl);
        assert!(matches!(
            "Heartbeat".parse::<MessageKind>(),
            Err(ProtocolError::UnknownKind(_))
        ));
        assert!("sslResp".parse::<MessageKind>().is_err());
    }

    #[test]
    fn test_envelope_wire_shape() {
        let id = Uuid::new_v4();
        let envelope =
            Envelope::new(id, MessageKind::Ssl, &SslCertRequest { vizier_id: id }).unwrap();
        let json: serde_json::Value =
            serde_json::from_slice(&envelope.to_bytes().unwrap()).unwrap();

        assert_eq!(json["cluster_id"], id.to_string());
        assert_eq!(json["kind"], "ssl");
        assert_eq!(json["payload"]["vizier_id"], id.to_string());
    }

    #[test]
    fn test_decode_wrong_payload_type() {
        let id = Uuid::new_v4();
        let envelope = Envelope {
            cluster_id: id,
            kind: MessageKind::Heartbeat,
            payload: serde_json::json!("not an object"),
        };

        assert!(matches!(
            envelope.decode::<VizierHeartbeat>(),
            Err(ProtocolError::Json(_))
        ));
    }

    #[test]
    fn test_from_bytes_rejects_garbage_and_oversized() {
        assert!(matches!(
            Envelope::from_bytes(b"{not json"),
            Err(ProtocolError::Json(_))
        ));

        let huge = vec![b' '; MAX_ENVELOPE_SIZE + 1];
        assert!(matches!(
            Envelope::from_bytes(&huge),
            Err(ProtocolError::EnvelopeTooLarge(_))
        ));
    }

    #[test]
    fn test_unknown_kind_in_envelope_is_rejected() {
        let raw = format!(
            r#"{{"cluster_id":"{}","kind":"metrics","payload":{{}}}}"#,
            Uuid::new_v4()
        );
        assert!(Envelope::from_bytes(raw.as_bytes()).is_err());
    }
}
