//! Registration protocol payloads and the REST response envelope

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Body of a `register` call
///
/// `id` and `token` are both present on a token refresh of an existing
/// registration and both absent on a brand-new one.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RegistrationRequest {
    /// Existing plugin id, for token refresh
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Prior token authorizing the refresh
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    /// Realm name this plugin owns
    pub realm: String,
    /// Callback URI the gateway uses to ping/refresh the plugin
    pub callback: String,
}

/// Successful `register` result
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistrationReply {
    /// Plugin id (ULID)
    pub id: String,
    /// Freshly minted token for subsequent calls
    pub token: String,
    /// Fixed set of derived environment hints for the plugin
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub env: BTreeMap<String, String>,
}

/// Envelope metadata block
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiMeta {
    /// Payload type, always `JSON`
    #[serde(rename = "mimeType")]
    pub mime_type: String,
    /// Outcome, `OK` on success
    pub status: String,
}

/// Response envelope wrapping a `result` payload
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiEnvelope<T> {
    /// Envelope metadata
    pub meta: ApiMeta,
    /// Payload container
    pub data: ApiData<T>,
}

/// Payload container inside the envelope
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiData<T> {
    /// The operation result
    pub result: T,
}

impl<T> ApiEnvelope<T> {
    /// Wrap a successful result
    pub fn ok(result: T) -> Self {
        Self {
            meta: ApiMeta {
                mime_type: "JSON".into(),
                status: "OK".into(),
            },
            data: ApiData { result },
        }
    }
}
