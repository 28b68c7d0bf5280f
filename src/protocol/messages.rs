//! Messages exchanged with client processes.

use std::path::PathBuf;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::request::{ErrorKind, Headers};

/// Client-chosen request identifier, unique only within its session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestId(pub u64);

impl std::fmt::Display for RequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Inbound operations, one per frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    StartRequest {
        request_id: RequestId,
        method: String,
        url: String,
        #[serde(default)]
        headers: Headers,
        #[serde(default, with = "base64_opt", skip_serializing_if = "Option::is_none")]
        body: Option<Bytes>,
    },
    CancelRequest {
        request_id: RequestId,
    },
    SetCertificateOverride {
        paths: Vec<PathBuf>,
    },
    Shutdown,
}

/// Outbound notifications, one per observable request transition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServiceEvent {
    HeadersAvailable {
        request_id: RequestId,
        status: u16,
        headers: Headers,
    },
    DataChunk {
        request_id: RequestId,
        #[serde(with = "base64_bytes")]
        bytes: Bytes,
    },
    RequestComplete {
        request_id: RequestId,
    },
    RequestFailed {
        request_id: RequestId,
        error_kind: ErrorKind,
        detail: String,
    },
}

/// JSON a `data_chunk` frame spends outside its payload, with the widest
/// request id and some slack.
const DATA_CHUNK_OVERHEAD: usize = 96;

/// Largest body piece whose `data_chunk` event still fits in `max_frame_bytes`
/// once base64 encoded.
pub fn max_chunk_payload(max_frame_bytes: usize) -> usize {
    let encoded = max_frame_bytes.saturating_sub(DATA_CHUNK_OVERHEAD);
    (encoded / 4 * 3).max(1)
}

impl ServiceEvent {
    pub fn request_id(&self) -> RequestId {
        match self {
            ServiceEvent::HeadersAvailable { request_id, .. }
            | ServiceEvent::DataChunk { request_id, .. }
            | ServiceEvent::RequestComplete { request_id }
            | ServiceEvent::RequestFailed { request_id, .. } => *request_id,
        }
    }

    /// No further events follow this one for the same request.
    pub fn is_terminal(&self) -> bool {
        matches!(self, ServiceEvent::RequestComplete { .. } | ServiceEvent::RequestFailed { .. })
    }
}

mod base64_bytes {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine as _;
    use bytes::Bytes;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &Bytes, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Bytes, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD
            .decode(encoded.as_bytes())
            .map(Bytes::from)
            .map_err(serde::de::Error::custom)
    }
}

mod base64_opt {
    use bytes::Bytes;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &Option<Bytes>, serializer: S) -> Result<S::Ok, S::Error> {
        match bytes {
            Some(bytes) => super::base64_bytes::serialize(bytes, serializer),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<Bytes>, D::Error> {
        #[derive(Deserialize)]
        struct Wrapped(#[serde(with = "super::base64_bytes")] Bytes);

        Ok(Option::<Wrapped>::deserialize(deserializer)?.map(|Wrapped(bytes)| bytes))
    }
}
